//! Report envelope container and its transport encoding
//!
//! Stored form is a small JSON object under the report's `crypto` key. The
//! transport form is a single string `v{version}:{ivB64}:{ciphertextB64}`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use super::errors::{EncryptionError, EncryptionResult};
use super::models::{MAX_PLAINTEXT_BYTES, SUPPORTED_ENVELOPE_VERSIONS};

/// Nonce size in bytes for ChaCha20-Poly1305
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size, appended to every ciphertext
pub const TAG_SIZE: usize = 16;

const WIRE_SEPARATOR: char = ':';

/// Encrypted sensitive payload of a single report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCryptoEnvelope {
    /// Envelope schema version
    pub version: u32,
    /// Per-encryption nonce (base64-encoded)
    #[serde(rename = "ivB64", alias = "nonceB64")]
    pub nonce_b64: String,
    /// Ciphertext with appended tag (base64-encoded)
    #[serde(rename = "ciphertextB64")]
    pub ciphertext_b64: String,
}

impl ReportCryptoEnvelope {
    /// Wrap raw nonce and ciphertext bytes
    pub fn from_parts(version: u32, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Self {
        Self {
            version,
            nonce_b64: BASE64.encode(nonce),
            ciphertext_b64: BASE64.encode(ciphertext),
        }
    }

    /// Decode and validate the binary parts.
    pub fn decode(&self) -> EncryptionResult<([u8; NONCE_SIZE], Vec<u8>)> {
        if !SUPPORTED_ENVELOPE_VERSIONS.contains(&self.version) {
            return Err(EncryptionError::UnsupportedVersion(self.version));
        }

        let nonce = BASE64
            .decode(&self.nonce_b64)
            .map_err(|e| EncryptionError::encoding(format!("nonce is not valid base64: {}", e)))?;
        let nonce: [u8; NONCE_SIZE] = nonce.as_slice().try_into().map_err(|_| {
            EncryptionError::encoding(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                nonce.len()
            ))
        })?;

        let ciphertext = BASE64.decode(&self.ciphertext_b64).map_err(|e| {
            EncryptionError::encoding(format!("ciphertext is not valid base64: {}", e))
        })?;
        if ciphertext.len() < TAG_SIZE {
            return Err(EncryptionError::encoding(format!(
                "ciphertext is {} bytes, shorter than the {} byte tag",
                ciphertext.len(),
                TAG_SIZE
            )));
        }
        if ciphertext.len() > MAX_PLAINTEXT_BYTES + TAG_SIZE {
            return Err(EncryptionError::encoding("ciphertext exceeds the payload limit"));
        }

        Ok((nonce, ciphertext))
    }
}

/// Encode an envelope as a single transport-safe string
pub fn to_wire(envelope: &ReportCryptoEnvelope) -> String {
    format!(
        "v{}{sep}{}{sep}{}",
        envelope.version,
        envelope.nonce_b64,
        envelope.ciphertext_b64,
        sep = WIRE_SEPARATOR
    )
}

/// Parse and validate a transport string produced by [`to_wire`]
pub fn from_wire(wire: &str) -> EncryptionResult<ReportCryptoEnvelope> {
    let mut parts = wire.trim().split(WIRE_SEPARATOR);
    let (Some(version), Some(nonce_b64), Some(ciphertext_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(EncryptionError::encoding(
            "expected three ':'-separated parts: version, iv, ciphertext",
        ));
    };

    let version = version
        .strip_prefix('v')
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| EncryptionError::encoding(format!("invalid version tag '{}'", version)))?;

    let envelope = ReportCryptoEnvelope {
        version,
        nonce_b64: nonce_b64.to_string(),
        ciphertext_b64: ciphertext_b64.to_string(),
    };
    envelope.decode()?;
    Ok(envelope)
}

/// Accept either the transport string or the stored JSON object.
pub fn parse_envelope(value: &serde_json::Value) -> EncryptionResult<ReportCryptoEnvelope> {
    let envelope = match value {
        serde_json::Value::String(wire) => return from_wire(wire),
        serde_json::Value::Object(_) => serde_json::from_value::<ReportCryptoEnvelope>(value.clone())
            .map_err(|e| EncryptionError::encoding(format!("malformed envelope object: {}", e)))?,
        other => {
            return Err(EncryptionError::encoding(format!(
                "envelope must be a string or object, got {}",
                json_kind(other)
            )))
        }
    };
    envelope.decode()?;
    Ok(envelope)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

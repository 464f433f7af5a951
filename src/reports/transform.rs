//! Pure record transforms. Each takes a report by reference and returns a
//! new one; callers can retry with the original untouched.

use super::models::{RecordState, ScoutingReport, SensitiveFields};
use crate::encryption::{
    decrypt_fields, encrypt_fields, EncryptionError, EncryptionKey, EncryptionResult,
};

/// Split a report into its plaintext remainder and its sensitive fields
pub fn strip_sensitive(report: &ScoutingReport) -> (ScoutingReport, SensitiveFields) {
    let remainder = ScoutingReport {
        sensitive: SensitiveFields::default(),
        ..report.clone()
    };
    (remainder, report.sensitive.clone())
}

/// Put decrypted sensitive fields back onto a report, dropping its envelope
pub fn merge_sensitive(report: &ScoutingReport, fields: SensitiveFields) -> ScoutingReport {
    ScoutingReport {
        sensitive: fields,
        crypto: None,
        ..report.clone()
    }
}

/// Plaintext -> Encrypted
pub fn seal_report(
    report: &ScoutingReport,
    key: &EncryptionKey,
    version: u32,
) -> EncryptionResult<ScoutingReport> {
    if report.state() != RecordState::Plaintext {
        return Err(EncryptionError::encoding(format!(
            "report {} already carries an envelope",
            report.id
        )));
    }
    let (remainder, fields) = strip_sensitive(report);
    let envelope = encrypt_fields(key, &fields, version)?;
    Ok(ScoutingReport {
        crypto: Some(envelope),
        ..remainder
    })
}

/// Encrypted -> Plaintext. Also used to render a locked report for display.
pub fn open_report(report: &ScoutingReport, key: &EncryptionKey) -> EncryptionResult<ScoutingReport> {
    let envelope = match (report.state(), &report.crypto) {
        (RecordState::Encrypted, Some(envelope)) => envelope,
        (RecordState::Mixed, _) => {
            return Err(EncryptionError::encoding(format!(
                "report {} has both plaintext fields and an envelope",
                report.id
            )))
        }
        _ => {
            return Err(EncryptionError::encoding(format!(
                "report {} is not encrypted",
                report.id
            )))
        }
    };
    let fields = decrypt_fields(key, envelope)?;
    Ok(merge_sensitive(report, fields))
}

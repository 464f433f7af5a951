use serde::{Deserialize, Deserializer, Serialize};

use crate::encryption::ReportCryptoEnvelope;

/// Fields of a scouting report that only team members may read.
///
/// Every field defaults to empty so a missing key and an empty value are the
/// same thing; an encrypted record carries this struct in its default state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SensitiveFields {
    #[serde(deserialize_with = "null_as_default")]
    pub athlete_first_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub athlete_last_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub athlete_national_rank: String,
    #[serde(deserialize_with = "null_as_default")]
    pub athlete_international_rank: String,
    #[serde(deserialize_with = "null_as_default")]
    pub athlete_club: String,
    #[serde(deserialize_with = "null_as_default")]
    pub athlete_country: String,
    /// Dominant grip, e.g. "right"
    #[serde(deserialize_with = "null_as_default")]
    pub athlete_grip: String,
    /// Favoured attacks, e.g. "armbar"
    #[serde(deserialize_with = "null_as_default")]
    pub athlete_attacks: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub technique_notes: String,
    /// Attached video references (URLs or storage keys)
    #[serde(deserialize_with = "null_as_default")]
    pub video_refs: Vec<String>,
}

/// Document stores write `null` for cleared fields; read it as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl SensitiveFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One scouting report as seen by the encryption core.
///
/// Metadata stays plaintext so the persistence layer can still sort and
/// filter on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoutingReport {
    /// Filled from the store's record id when the document omits it
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_class: Option<String>,
    #[serde(flatten)]
    pub sensitive: SensitiveFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto: Option<ReportCryptoEnvelope>,
}

/// Where a record sits in the lock/unlock state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Sensitive fields inline, no envelope
    Plaintext,
    /// Envelope present, sensitive fields blank
    Encrypted,
    /// Envelope present and sensitive fields populated; never transformed
    Mixed,
}

impl ScoutingReport {
    pub fn state(&self) -> RecordState {
        match (&self.crypto, self.sensitive.is_empty()) {
            (None, _) => RecordState::Plaintext,
            (Some(_), true) => RecordState::Encrypted,
            (Some(_), false) => RecordState::Mixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flattened_shape() {
        let report: ScoutingReport = serde_json::from_value(json!({
            "id": "r1",
            "matchType": "tournament",
            "eventName": "Grand Slam",
            "athleteFirstName": "Jane",
            "athleteAttacks": ["armbar"],
            "someUnrelatedField": 3
        }))
        .unwrap();

        assert_eq!(report.id, "r1");
        assert_eq!(report.event_name.as_deref(), Some("Grand Slam"));
        assert_eq!(report.sensitive.athlete_first_name, "Jane");
        assert_eq!(report.sensitive.athlete_attacks, vec!["armbar"]);
        assert!(report.sensitive.athlete_club.is_empty());
        assert_eq!(report.state(), RecordState::Plaintext);

        let back = serde_json::to_value(&report).unwrap();
        assert_eq!(back["athleteFirstName"], "Jane");
        assert!(back.get("crypto").is_none());
    }

    #[test]
    fn test_missing_fields_default_empty() {
        let fields: SensitiveFields = serde_json::from_value(json!({})).unwrap();
        assert!(fields.is_empty());

        let fields: SensitiveFields =
            serde_json::from_value(json!({ "athleteGrip": "left" })).unwrap();
        assert!(!fields.is_empty());
    }

    #[test]
    fn test_null_fields_default_empty() {
        let report: ScoutingReport = serde_json::from_value(json!({
            "id": "r1",
            "athleteFirstName": "Jane",
            "athleteClub": null,
            "athleteAttacks": null,
            "weightClass": null
        }))
        .unwrap();

        assert_eq!(report.sensitive.athlete_first_name, "Jane");
        assert!(report.sensitive.athlete_club.is_empty());
        assert!(report.sensitive.athlete_attacks.is_empty());
        assert!(report.weight_class.is_none());
        assert_eq!(report.state(), RecordState::Plaintext);

        // A blanked record written with nulls still reads as encrypted.
        let report: ScoutingReport = serde_json::from_value(json!({
            "id": "r2",
            "athleteFirstName": null,
            "crypto": { "version": 1, "ivB64": "AAAAAAAAAAAAAAAA", "ciphertextB64": "" }
        }))
        .unwrap();
        assert_eq!(report.state(), RecordState::Encrypted);
    }

    #[test]
    fn test_record_states() {
        let envelope = ReportCryptoEnvelope {
            version: 1,
            nonce_b64: "AAAAAAAAAAAAAAAA".to_string(),
            ciphertext_b64: "AAAAAAAAAAAAAAAAAAAAAA==".to_string(),
        };

        let mut report = ScoutingReport {
            id: "r1".to_string(),
            ..Default::default()
        };
        assert_eq!(report.state(), RecordState::Plaintext);

        report.crypto = Some(envelope);
        assert_eq!(report.state(), RecordState::Encrypted);

        report.sensitive.athlete_first_name = "Jane".to_string();
        assert_eq!(report.state(), RecordState::Mixed);
    }
}

//! Scouting report records as seen by the encryption core

mod models;
pub mod transform;

pub use models::{RecordState, ScoutingReport, SensitiveFields};
pub use transform::{merge_sensitive, open_report, seal_report, strip_sensitive};

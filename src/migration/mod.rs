//! Bulk migration of a team's reports between plaintext and encrypted form,
//! plus the setup and password-rotation flows that bracket it.

mod errors;
mod orchestrator;
mod report;
mod setup;

pub use errors::{MigrationError, MigrationResult};
pub use orchestrator::MigrationRunner;
pub use report::{FailureReason, MigrationDirection, MigrationReport, RecordFailure, RotationReport};
pub use setup::{setup_team, SetupOptions};

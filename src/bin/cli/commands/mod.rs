pub mod import;
pub mod migrate;
pub mod setup;
pub mod show;
pub mod status;

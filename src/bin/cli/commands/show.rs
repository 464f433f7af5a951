use anyhow::{Context, Result};

use scout_vault_lib::reports::{open_report, RecordState, ScoutingReport};

use crate::app::{read_password, App, PASSWORD_ENV};
use crate::render::terminal;
use crate::OutputFormat;

pub async fn run(
    app: &App,
    team: &str,
    report_id: &str,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let document = app.store.load_report(team, report_id).await?;
    let mut report: ScoutingReport = serde_json::from_value(document)
        .with_context(|| format!("Report {} is not a scouting report", report_id))?;
    if report.id.is_empty() {
        report.id = report_id.to_string();
    }

    // Decrypt for display only; the stored record stays encrypted.
    let report = match report.state() {
        RecordState::Plaintext => report,
        RecordState::Encrypted => {
            let password = read_password(PASSWORD_ENV, "Team password")?;
            let key = app.runner.unlock_key(team, &password).await?;
            open_report(&report, &key)?
        }
        RecordState::Mixed => {
            anyhow::bail!("Report {} has plaintext fields and an envelope; fix it by hand", report_id)
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => {
            for line in terminal::render_report(&report, use_color) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

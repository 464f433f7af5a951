use anyhow::Result;
use serde::Serialize;

use scout_vault_lib::reports::{RecordState, ScoutingReport};
use scout_vault_lib::store::{ReportStore, SecurityConfigStore};

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TeamStatus {
    team: String,
    configured: bool,
    lock_enabled: bool,
    iterations: Option<u32>,
    password_hint: Option<String>,
    plaintext: usize,
    encrypted: usize,
    mixed: usize,
    unreadable: usize,
}

pub async fn run(app: &App, team: Option<&str>, format: &OutputFormat, use_color: bool) -> Result<()> {
    let teams = match team {
        Some(team) => vec![team.to_string()],
        None => app.store.list_teams().await?,
    };

    let mut statuses = Vec::new();
    for team in teams {
        statuses.push(team_status(app, team).await?);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Plain => {
            if statuses.is_empty() {
                println!("No teams in {}", app.store.base_path().display());
            }
            for status in &statuses {
                let state = match (status.configured, status.lock_enabled) {
                    (false, _) => paint("not configured", Color::DIM, use_color),
                    (true, false) => paint("unlocked", Color::YELLOW, use_color),
                    (true, true) => paint("locked", Color::GREEN, use_color),
                };
                println!("{} [{}]", paint(&status.team, Color::BOLD, use_color), state);
                println!(
                    "    {} plaintext, {} encrypted, {} mixed, {} unreadable",
                    status.plaintext, status.encrypted, status.mixed, status.unreadable
                );
                if let Some(hint) = &status.password_hint {
                    println!("    hint: {}", hint);
                }
            }
        }
    }
    Ok(())
}

async fn team_status(app: &App, team: String) -> Result<TeamStatus> {
    let mut status = TeamStatus::default();
    if let Some(config) = app.store.load_config(&team).await? {
        status.configured = config.has_verifier();
        status.lock_enabled = config.lock_enabled;
        status.iterations = Some(config.kdf.iterations);
        status.password_hint = config.password_hint;
    }

    for raw in app.store.fetch_reports(&team).await? {
        match serde_json::from_value::<ScoutingReport>(raw.document).map(|r| r.state()) {
            Ok(RecordState::Plaintext) => status.plaintext += 1,
            Ok(RecordState::Encrypted) => status.encrypted += 1,
            Ok(RecordState::Mixed) => status.mixed += 1,
            Err(_) => status.unreadable += 1,
        }
    }
    status.team = team;
    Ok(status)
}

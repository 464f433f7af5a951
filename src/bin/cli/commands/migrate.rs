use anyhow::Result;

use scout_vault_lib::migration::{MigrationReport, SetupOptions};

use crate::app::{read_password, App, NEW_PASSWORD_ENV, PASSWORD_ENV};
use crate::render::terminal;
use crate::OutputFormat;

pub async fn run_lock(app: &App, team: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let password = read_password(PASSWORD_ENV, "Team password")?;
    let report = app.runner.lock_team(team, &password).await?;
    print_report(&report, format, use_color)
}

pub async fn run_unlock(app: &App, team: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let password = read_password(PASSWORD_ENV, "Team password")?;
    let report = app.runner.unlock_team(team, &password).await?;
    print_report(&report, format, use_color)
}

pub async fn run_rotate(
    app: &App,
    team: &str,
    iterations: Option<u32>,
    hint: Option<String>,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let old_password = read_password(PASSWORD_ENV, "Current password")?;
    let new_password = read_password(NEW_PASSWORD_ENV, "New password")?;
    let options = SetupOptions {
        iterations,
        password_hint: hint,
    };
    let rotation = app
        .runner
        .rotate_password(team, &old_password, &new_password, options)
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rotation)?),
        OutputFormat::Plain => {
            for line in terminal::render_rotation(&rotation, use_color) {
                println!("{}", line);
            }
        }
    }
    if !rotation.config_rotated {
        std::process::exit(2);
    }
    Ok(())
}

/// Print the outcome; exit non-zero when records were left behind
fn print_report(report: &MigrationReport, format: &OutputFormat, use_color: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Plain => {
            for line in terminal::render_migration(report, use_color) {
                println!("{}", line);
            }
        }
    }
    if !report.is_complete() {
        std::process::exit(2);
    }
    Ok(())
}

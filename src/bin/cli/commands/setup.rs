use anyhow::Result;

use scout_vault_lib::migration::SetupOptions;

use crate::app::{read_password, App, PASSWORD_ENV};
use crate::OutputFormat;

pub async fn run(
    app: &App,
    team: &str,
    iterations: Option<u32>,
    hint: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let password = read_password(PASSWORD_ENV, "Team password")?;
    let options = SetupOptions {
        iterations,
        password_hint: hint,
    };
    let config = app.runner.setup_team(team, &password, options).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Plain => {
            println!(
                "Team '{}' configured ({} iterations). Run `lock` to encrypt its reports.",
                team, config.kdf.iterations
            );
        }
    }
    Ok(())
}

pub async fn run_check(app: &App, team: &str, format: &OutputFormat) -> Result<()> {
    let password = read_password(PASSWORD_ENV, "Team password")?;
    let ok = app.runner.check_password(team, &password).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "team": team, "valid": ok })),
        OutputFormat::Plain => println!("{}", if ok { "Password OK" } else { "Wrong password" }),
    }
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

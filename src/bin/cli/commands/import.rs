use anyhow::{bail, Context, Result};
use serde_json::Value;

use scout_vault_lib::encryption::EncryptionKey;
use scout_vault_lib::reports::{seal_report, RecordState, ScoutingReport};
use scout_vault_lib::store::SecurityConfigStore;

use crate::app::{read_password, App, PASSWORD_ENV};
use crate::OutputFormat;

/// Store reports from a file. Into a locked team they are encrypted on the
/// way in so no plaintext lands next to encrypted records.
pub async fn run(app: &App, team: &str, file: &str, format: &OutputFormat) -> Result<()> {
    let content = if file == "-" {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?
    };

    let documents = match serde_json::from_str::<Value>(&content).context("Invalid JSON")? {
        Value::Array(items) => items,
        single @ Value::Object(_) => vec![single],
        _ => bail!("Expected a report object or an array of reports"),
    };

    let locked = app
        .store
        .load_config(team)
        .await?
        .is_some_and(|config| config.lock_enabled);
    let key = if locked {
        let password = read_password(PASSWORD_ENV, "Team password")?;
        Some(app.runner.unlock_key(team, &password).await?)
    } else {
        None
    };
    let version = scout_vault_lib::encryption::CURRENT_ENVELOPE_VERSION;

    let mut imported = Vec::new();
    for document in documents {
        let report: ScoutingReport =
            serde_json::from_value(document.clone()).context("Not a scouting report")?;
        if report.id.is_empty() {
            bail!("Every imported report needs an \"id\"");
        }
        let stored = sealed_document(document, &report, key.as_ref(), version)?;
        app.store.put_report(team, &report.id, &stored).await?;
        imported.push(report.id);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "team": team, "imported": imported })),
        OutputFormat::Plain => println!(
            "Imported {} report(s) into '{}'{}",
            imported.len(),
            team,
            if locked { " (encrypted)" } else { "" }
        ),
    }
    Ok(())
}

/// Keep unknown keys of the original document; replace the report fields
fn sealed_document(
    mut document: Value,
    report: &ScoutingReport,
    key: Option<&EncryptionKey>,
    version: u32,
) -> Result<Value> {
    let Some(key) = key else {
        return Ok(document);
    };
    if report.state() != RecordState::Plaintext {
        return Ok(document);
    }
    let sealed = serde_json::to_value(seal_report(report, key, version)?)?;
    if let (Value::Object(target), Value::Object(fields)) = (&mut document, sealed) {
        target.extend(fields);
    }
    Ok(document)
}

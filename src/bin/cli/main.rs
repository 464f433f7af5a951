mod app;
mod commands;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scout-vault", about = "Password-protect team scouting reports", version)]
struct Cli {
    /// Store directory (default: the platform data dir)
    #[arg(long, global = true, env = "SCOUT_VAULT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "SCOUT_VAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Set a team password (records are left as they are)
    Setup {
        team: String,
        /// PBKDF2 iterations (default from settings)
        #[arg(long)]
        iterations: Option<u32>,
        /// Password hint shown to team members
        #[arg(long)]
        hint: Option<String>,
    },

    /// Check a password against the team's verifier
    Check { team: String },

    /// Encrypt every plaintext report of a team
    Lock { team: String },

    /// Decrypt every encrypted report of a team
    Unlock { team: String },

    /// Change the team password and re-encrypt every report
    Rotate {
        team: String,
        #[arg(long)]
        iterations: Option<u32>,
        #[arg(long)]
        hint: Option<String>,
    },

    /// Show lock state and record counts
    Status {
        /// Limit to one team
        team: Option<String>,
    },

    /// Print one report, decrypting it if needed
    Show { team: String, report: String },

    /// Add reports from a JSON file (object or array; "-" for stdin)
    Import { team: String, file: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let app = app::App::new(cli.data_dir, cli.config.as_deref())?;

    // Ctrl-C stops a migration between records; finished records stay written.
    let token = app.runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, finishing in-flight records");
            token.cancel();
        }
    });

    match cli.command {
        Command::Setup { team, iterations, hint } => {
            commands::setup::run(&app, &team, iterations, hint, &cli.format).await?;
        }
        Command::Check { team } => {
            commands::setup::run_check(&app, &team, &cli.format).await?;
        }
        Command::Lock { team } => {
            commands::migrate::run_lock(&app, &team, &cli.format, use_color).await?;
        }
        Command::Unlock { team } => {
            commands::migrate::run_unlock(&app, &team, &cli.format, use_color).await?;
        }
        Command::Rotate { team, iterations, hint } => {
            commands::migrate::run_rotate(&app, &team, iterations, hint, &cli.format, use_color)
                .await?;
        }
        Command::Status { team } => {
            commands::status::run(&app, team.as_deref(), &cli.format, use_color).await?;
        }
        Command::Show { team, report } => {
            commands::show::run(&app, &team, &report, &cli.format, use_color).await?;
        }
        Command::Import { team, file } => {
            commands::import::run(&app, &team, &file, &cli.format).await?;
        }
    }

    Ok(())
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

/// Check if stdin is a terminal (not piped)
pub fn stdin_is_tty() -> bool {
    unsafe { libc_isatty(0) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}

//! `adsum` — operator CLI for the attendance daemon.
//!
//! Everything except `setup` is a thin D-Bus client of `adsumd`; the CLI
//! never owns the camera or the database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adsum", version, about = "Adsum attendance verification CLI")]
struct Cli {
    /// Talk to the daemon on the session bus (development mode).
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and verify the face-pipeline model files.
    Setup {
        /// Target directory (default: system or XDG model directory).
        #[arg(long)]
        model_dir: Option<String>,
    },
    /// Enroll (or re-enroll) an identity from live capture.
    Enroll {
        user_id: String,
        /// Display name stored alongside the identity.
        #[arg(long)]
        name: Option<String>,
    },
    /// Run one attendance check-in attempt.
    Checkin,
    /// Show daemon status.
    Status,
    /// List enrolled identities.
    Users,
    /// Remove an enrolled identity (decision records are kept).
    Remove { user_id: String },
    /// Compute FAR/FRR/accuracy (and EER when no threshold is given) over
    /// recorded decisions.
    Evaluate {
        /// Range start, RFC 3339 or YYYY-MM-DD.
        #[arg(long)]
        start: Option<String>,
        /// Range end, RFC 3339 or YYYY-MM-DD.
        #[arg(long)]
        end: Option<String>,
        /// Threshold to evaluate at; omit to include the EER search.
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[zbus::proxy(
    interface = "org.freedesktop.Adsum1",
    default_service = "org.freedesktop.Adsum1",
    default_path = "/org/freedesktop/Adsum1"
)]
trait Adsum {
    async fn enroll(&self, user_id: &str, name: &str) -> zbus::Result<String>;
    async fn check_in(&self) -> zbus::Result<String>;
    async fn evaluate(&self, start: &str, end: &str, threshold: f64) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_users(&self) -> zbus::Result<String>;
    async fn remove_user(&self, user_id: &str) -> zbus::Result<bool>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Command::Setup { model_dir } = &cli.command {
        return run_setup(model_dir.clone());
    }

    let connection = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus (is adsumd running?)")?;
    let proxy = AdsumProxy::new(&connection).await?;

    match cli.command {
        Command::Setup { .. } => unreachable!("handled above"),
        Command::Enroll { user_id, name } => {
            let reply = proxy.enroll(&user_id, name.as_deref().unwrap_or("")).await?;
            print_json(&reply);
        }
        Command::Checkin => {
            let reply = proxy.check_in().await?;
            print_json(&reply);
        }
        Command::Status => {
            let reply = proxy.status().await?;
            print_json(&reply);
        }
        Command::Users => {
            let reply = proxy.list_users().await?;
            print_json(&reply);
        }
        Command::Remove { user_id } => {
            if proxy.remove_user(&user_id).await? {
                println!("removed '{user_id}'");
            } else {
                println!("no enrolled identity '{user_id}'");
            }
        }
        Command::Evaluate {
            start,
            end,
            threshold,
        } => {
            let reply = proxy
                .evaluate(
                    start.as_deref().unwrap_or(""),
                    end.as_deref().unwrap_or(""),
                    threshold.unwrap_or(-1.0),
                )
                .await?;
            print_json(&reply);
        }
    }

    Ok(())
}

/// Download missing/corrupt model files into the target directory.
fn run_setup(model_dir: Option<String>) -> Result<()> {
    let dir = match model_dir {
        Some(d) => PathBuf::from(d),
        None => default_model_dir(),
    };
    println!("Model directory: {}", dir.display());

    let summary = adsum_models::download_missing(&dir)
        .with_context(|| format!("model setup failed in {}", dir.display()))?;

    if summary.downloaded > 0 {
        println!(
            "Setup complete: {} model(s) downloaded, {} already present.",
            summary.downloaded, summary.already_valid
        );
    } else {
        println!("All models already present. Nothing to download.");
    }
    Ok(())
}

/// Determine the model directory.
///
/// When running as root (UID 0), defaults to `/var/lib/adsum/models`
/// (system-wide). Otherwise defaults to `$XDG_DATA_HOME/adsum/models`.
fn default_model_dir() -> PathBuf {
    if is_root() {
        PathBuf::from("/var/lib/adsum/models")
    } else {
        let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.local/share")
        });
        PathBuf::from(data_home).join("adsum/models")
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid is always safe to call.
    unsafe { libc::geteuid() == 0 }
}

/// Pretty-print a JSON reply, falling back to the raw text if it does not
/// parse.
fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
        ),
        Err(_) => println!("{raw}"),
    }
}

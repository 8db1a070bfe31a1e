use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::Mutex as AsyncMutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod lockout;
mod pipeline;
mod store;

use config::Config;
use dbus_interface::{AdsumService, AppState};
use engine::EngineSettings;
use lockout::AttemptLockout;
use store::AttendanceStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("adsumd starting");

    let config = Config::from_env();

    // Preflight the face-pipeline model assets. A headless daemon can still
    // serve evaluation and roster queries, so this only warns.
    match adsum_models::check_dir(&config.model_dir) {
        Ok(report) if report.is_complete() => {
            tracing::info!(dir = %config.model_dir.display(), "model assets verified");
        }
        Ok(report) => {
            tracing::warn!(
                dir = %config.model_dir.display(),
                missing = ?report.unusable(),
                "model assets missing or corrupt; run `adsum setup`"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "model asset check failed");
        }
    }

    let store = AttendanceStore::open(&config.db_path).await?;
    tracing::info!(db = %config.db_path.display(), "attendance store opened");

    let lockout = Arc::new(Mutex::new(AttemptLockout::new()));
    let capture = pipeline::from_config(&config)?;
    tracing::info!(backend = %config.capture_backend, "capture pipeline ready");

    let engine = engine::spawn_engine(
        capture,
        EngineSettings {
            verify: config.verify_config(),
            checkin_timeout: config.checkin_timeout(),
            enroll_sample_count: config.enroll_sample_count,
            enroll_frame_budget: config.enroll_frame_budget,
        },
        lockout.clone(),
    );

    let session_bus = config.session_bus;
    let service = AdsumService {
        state: Arc::new(AsyncMutex::new(AppState {
            config,
            engine,
            store,
            lockout,
        })),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name("org.freedesktop.Adsum1")?
        .serve_at("/org/freedesktop/Adsum1", service)?
        .build()
        .await?;

    tracing::info!(
        bus = if session_bus { "session" } else { "system" },
        "adsumd ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("adsumd shutting down");

    Ok(())
}

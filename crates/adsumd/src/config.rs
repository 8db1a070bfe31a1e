use std::path::PathBuf;
use std::time::Duration;

use adsum_core::VerifyConfig;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing the face-pipeline model files.
    pub model_dir: PathBuf,
    /// Capture backend name (`disconnected` unless a camera integration is
    /// deployed alongside the daemon).
    pub capture_backend: String,
    /// Cosine similarity threshold for a positive face match.
    pub similarity_threshold: f32,
    /// Length of the liveness verification window, in seconds.
    pub verification_duration_secs: u64,
    /// QR decode runs every Nth frame while awaiting a claim.
    pub qr_sample_interval: u32,
    /// Face detection + matching runs every Nth frame.
    pub face_sample_interval: u32,
    /// Liveness evaluation runs every Nth frame inside the window.
    pub liveness_sample_interval: u32,
    /// Whole-attempt timeout: a check-in with no identity claim after this
    /// many seconds is cancelled with no record.
    pub checkin_timeout_secs: u64,
    /// Reference embedding samples collected per enrollment.
    pub enroll_sample_count: usize,
    /// Maximum frames scanned while collecting enrollment samples.
    pub enroll_frame_budget: usize,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `ADSUM_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("adsum");

        let db_path = std::env::var("ADSUM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let model_dir = std::env::var("ADSUM_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            db_path,
            model_dir,
            capture_backend: std::env::var("ADSUM_CAPTURE_BACKEND")
                .unwrap_or_else(|_| "disconnected".to_string()),
            similarity_threshold: env_f32("ADSUM_SIMILARITY_THRESHOLD", 0.5),
            verification_duration_secs: env_u64("ADSUM_VERIFICATION_DURATION_SECS", 10),
            qr_sample_interval: env_u32("ADSUM_QR_SAMPLE_INTERVAL", 2),
            face_sample_interval: env_u32("ADSUM_FACE_SAMPLE_INTERVAL", 2),
            liveness_sample_interval: env_u32("ADSUM_LIVENESS_SAMPLE_INTERVAL", 2),
            checkin_timeout_secs: env_u64("ADSUM_CHECKIN_TIMEOUT_SECS", 60),
            enroll_sample_count: env_usize("ADSUM_ENROLL_SAMPLE_COUNT", 5),
            enroll_frame_budget: env_usize("ADSUM_ENROLL_FRAME_BUDGET", 40),
            session_bus: std::env::var("ADSUM_SESSION_BUS").is_ok(),
        }
    }

    /// Verification tunables for the matcher, session and engine loop.
    pub fn verify_config(&self) -> VerifyConfig {
        VerifyConfig {
            similarity_threshold: self.similarity_threshold,
            verification_duration: Duration::from_secs(self.verification_duration_secs),
            qr_sample_interval: self.qr_sample_interval,
            face_sample_interval: self.face_sample_interval,
            liveness_sample_interval: self.liveness_sample_interval,
        }
        .sanitized()
    }

    pub fn checkin_timeout(&self) -> Duration {
        Duration::from_secs(self.checkin_timeout_secs)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

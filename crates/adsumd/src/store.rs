use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio_rusqlite::Connection;

use adsum_core::types::{DecisionRecord, Embedding, EmbeddingError, EnrolledIdentity, EMBEDDING_DIM};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

const EMBEDDING_BYTE_LEN: usize = EMBEDDING_DIM * 4;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("embedding encryption failed")]
    EncryptionFailed,
    #[error("embedding decryption failed — key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid embedding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("unparseable stored timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// SQLite-backed attendance storage.
///
/// Three tables: `users` (the enrolled roster), `enrollment_samples`
/// (AES-256-GCM-encrypted reference embeddings, ordered per user) and the
/// append-only `decisions` audit trail. A per-installation 32-byte key is
/// generated at first use and stored at `{db_dir}/.key` (mode 0600).
///
/// The `threshold_used` and `system_decision` columns are nullable: rows
/// written before those columns existed are read back with the fields
/// absent, and the evaluation layer applies its documented fallbacks.
#[derive(Clone)]
pub struct AttendanceStore {
    conn: Connection,
    enc_key: [u8; 32],
}

/// Roster metadata row (no embedding data).
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserInfo {
    pub user_id: String,
    pub name: Option<String>,
    pub sample_count: u64,
    pub created_at: String,
}

impl AttendanceStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let enc_key = if db_path == Path::new(":memory:") {
            // In-memory DB (tests): use a fixed all-zeros key
            [0u8; 32]
        } else {
            let key_path = db_path
                .parent()
                .unwrap_or(Path::new("/var/lib/adsum"))
                .join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS users (
                     user_id TEXT PRIMARY KEY,
                     name TEXT,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS enrollment_samples (
                     id TEXT PRIMARY KEY,
                     user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                     sample_index INTEGER NOT NULL,
                     embedding BLOB NOT NULL,
                     model_version TEXT NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_samples_user ON enrollment_samples(user_id);
                 CREATE TABLE IF NOT EXISTS decisions (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     user_id TEXT NOT NULL,
                     recognition_score REAL,
                     face_verified INTEGER NOT NULL,
                     liveness_verified INTEGER NOT NULL,
                     threshold_used REAL,
                     system_decision TEXT,
                     timestamp TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_decisions_user ON decisions(user_id);
                 CREATE INDEX IF NOT EXISTS idx_decisions_timestamp ON decisions(timestamp);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, enc_key })
    }

    /// Enroll (or re-enroll) an identity with its ordered reference samples.
    ///
    /// Re-enrollment replaces the sample set wholesale in one transaction;
    /// the user's original enrollment time — and with it the roster
    /// position that drives the matcher tie-break — is preserved.
    pub async fn enroll(
        &self,
        user_id: &str,
        name: Option<&str>,
        references: &[Embedding],
    ) -> Result<(), StoreError> {
        // Validate and encrypt before entering the SQLite closure
        let mut rows = Vec::with_capacity(references.len());
        for (index, embedding) in references.iter().enumerate() {
            embedding.validate()?;
            let blob = self.encrypt_embedding(&embedding.values)?;
            let model_version = embedding
                .model_version
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            rows.push((
                uuid::Uuid::new_v4().to_string(),
                index as i64,
                blob,
                model_version,
            ));
        }

        let user_id = user_id.to_string();
        let name = name.map(str::to_string);
        let now = rfc3339(&Utc::now());

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO users (user_id, name, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id) DO UPDATE SET
                         name = COALESCE(excluded.name, users.name)",
                    rusqlite::params![user_id, name, now],
                )?;
                tx.execute(
                    "DELETE FROM enrollment_samples WHERE user_id = ?1",
                    [&user_id],
                )?;
                for (id, index, blob, model_version) in rows {
                    tx.execute(
                        "INSERT INTO enrollment_samples
                             (id, user_id, sample_index, embedding, model_version, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![id, user_id, index, blob, model_version, now],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// The full enrolled roster, in enrollment order, with each identity's
    /// reference samples in sample order.
    pub async fn roster(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let rows: Vec<(String, Option<String>, Option<Vec<u8>>, Option<String>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT u.user_id, u.name, s.embedding, s.model_version
                     FROM users u
                     LEFT JOIN enrollment_samples s ON s.user_id = u.user_id
                     ORDER BY u.created_at, u.rowid, s.sample_index",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<Vec<u8>>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        // Decrypt outside the blocking closure, preserving row order.
        let mut roster: Vec<EnrolledIdentity> = Vec::new();
        for (user_id, name, blob, model_version) in rows {
            if roster.last().map(|i: &EnrolledIdentity| i.user_id.as_str()) != Some(user_id.as_str())
            {
                roster.push(EnrolledIdentity {
                    user_id,
                    name,
                    references: Vec::new(),
                });
            }
            if let Some(blob) = blob {
                let values = self.decrypt_embedding(&blob)?;
                let identity = roster.last_mut().expect("pushed above");
                identity.references.push(Embedding {
                    values,
                    model_version,
                });
            }
        }
        Ok(roster)
    }

    /// List enrolled users (metadata only, no embeddings).
    pub async fn list_users(&self) -> Result<Vec<UserInfo>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT u.user_id, u.name, COUNT(s.id), u.created_at
                     FROM users u
                     LEFT JOIN enrollment_samples s ON s.user_id = u.user_id
                     GROUP BY u.user_id
                     ORDER BY u.created_at, u.rowid",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(UserInfo {
                        user_id: row.get(0)?,
                        name: row.get(1)?,
                        sample_count: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Remove an enrolled identity and its samples. Decision records are the
    /// audit trail and are kept.
    pub async fn remove_user(&self, user_id: &str) -> Result<bool, StoreError> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM users WHERE user_id = ?1", [&user_id])?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Persist a terminal decision record. The write must be durable before
    /// this returns; a failure here breaks the audit trail and is surfaced
    /// to the verification loop rather than swallowed.
    pub async fn persist(&self, record: &DecisionRecord) -> Result<i64, StoreError> {
        let record = record.clone();
        let timestamp = rfc3339(&record.timestamp);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO decisions
                         (user_id, recognition_score, face_verified, liveness_verified,
                          threshold_used, system_decision, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        record.user_id,
                        record.recognition_score,
                        record.face_verified as i64,
                        record.liveness_verified as i64,
                        record.threshold_used,
                        record.system_decision,
                        timestamp,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Load decision records in an optional date range, oldest first.
    pub async fn decisions_between(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        // RFC 3339 UTC timestamps with fixed-width seconds sort
        // lexicographically in chronological order, so the range filter can
        // run on the indexed text column.
        let start = start.as_ref().map(rfc3339);
        let end = end.as_ref().map(rfc3339);

        let rows: Vec<(String, Option<f64>, i64, i64, Option<f64>, Option<String>, String)> = self
            .conn
            .call(move |conn| {
                let mut sql = String::from(
                    "SELECT user_id, recognition_score, face_verified, liveness_verified,
                            threshold_used, system_decision, timestamp
                     FROM decisions WHERE 1=1",
                );
                let mut params: Vec<String> = Vec::new();
                if let Some(start) = start {
                    sql.push_str(" AND timestamp >= ?");
                    params.push(start);
                }
                if let Some(end) = end {
                    sql.push_str(" AND timestamp <= ?");
                    params.push(end);
                }
                sql.push_str(" ORDER BY timestamp, id");

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (user_id, score, face, liveness, threshold, decision, timestamp) in rows {
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|_| StoreError::InvalidTimestamp(timestamp.clone()))?
                .with_timezone(&Utc);
            records.push(DecisionRecord {
                user_id,
                recognition_score: score.map(|s| s as f32),
                face_verified: face != 0,
                liveness_verified: liveness != 0,
                threshold_used: threshold.map(|t| t as f32),
                system_decision: decision,
                timestamp,
            });
        }
        Ok(records)
    }

    pub async fn count_users(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM users").await
    }

    pub async fn count_decisions(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM decisions").await
    }

    async fn count(&self, sql: &'static str) -> Result<u64, StoreError> {
        self.conn
            .call(move |conn| {
                let count: u64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt embedding values with AES-256-GCM.
    ///
    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_embedding(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        let plaintext = embedding_to_bytes(values);

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(12 + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt_embedding(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        const NONCE_LEN: usize = 12;

        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_embedding(&plaintext)
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        if bytes.len() != 32 {
            return Err(StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() != EMBEDDING_BYTE_LEN {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }

    let mut values = Vec::with_capacity(EMBEDDING_DIM);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk
            .try_into()
            .map_err(|_| StoreError::InvalidBlob(bytes.len()))?;
        let v = f32::from_le_bytes(arr);
        if !v.is_finite() {
            return Err(StoreError::Embedding(EmbeddingError::InvalidValue));
        }
        values.push(v);
    }
    Ok(values)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

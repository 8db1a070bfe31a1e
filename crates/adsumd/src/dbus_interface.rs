use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex as AsyncMutex;
use zbus::interface;

use crate::config::Config;
use crate::engine::{CheckInOutcome, EngineHandle};
use crate::lockout::AttemptLockout;
use crate::store::AttendanceStore;

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub store: AttendanceStore,
    pub lockout: Arc<Mutex<AttemptLockout>>,
}

/// D-Bus interface for the Adsum attendance daemon.
///
/// Bus name: org.freedesktop.Adsum1
/// Object path: /org/freedesktop/Adsum1
pub struct AdsumService {
    pub state: Arc<AsyncMutex<AppState>>,
}

#[interface(name = "org.freedesktop.Adsum1")]
impl AdsumService {
    /// Enroll (or re-enroll) an identity: capture sample frames, extract
    /// reference embeddings, replace the stored set wholesale.
    ///
    /// Returns a JSON summary of the enrollment.
    async fn enroll(&self, user_id: &str, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(user = user_id, "enroll requested");

        // Copy handles while holding the lock, then release it for the
        // capture run.
        let (engine, store) = {
            let state = self.state.lock().await;
            (state.engine.clone(), state.store.clone())
        };

        let result = engine.enroll().await.map_err(|e| {
            tracing::error!(error = %e, "enroll capture failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;

        let name = if name.is_empty() { None } else { Some(name) };
        store
            .enroll(user_id, name, &result.references)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "enroll store write failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        tracing::info!(
            user = user_id,
            samples = result.references.len(),
            quality = result.mean_quality,
            "enrolled successfully"
        );
        Ok(serde_json::json!({
            "user_id": user_id,
            "samples": result.references.len(),
            "mean_quality": result.mean_quality,
        })
        .to_string())
    }

    /// Run one attendance check-in attempt and persist its decision record.
    ///
    /// Returns a JSON outcome. A cancelled attempt (no claim, lockout)
    /// reports `decided: false` and leaves no record; a storage failure is
    /// an error — the attempt is never acknowledged as recorded unless the
    /// write succeeded.
    async fn check_in(&self) -> zbus::fdo::Result<String> {
        tracing::info!("check-in requested");

        let (engine, store, lockout) = {
            let state = self.state.lock().await;
            (
                state.engine.clone(),
                state.store.clone(),
                state.lockout.clone(),
            )
        };

        let roster = store.roster().await.map_err(|e| {
            tracing::error!(error = %e, "roster fetch failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        if roster.is_empty() {
            tracing::warn!("check-in with no enrolled identities");
            return Err(zbus::fdo::Error::Failed(
                "no identities enrolled".to_string(),
            ));
        }

        let outcome = engine.check_in(roster).await.map_err(|e| {
            tracing::error!(error = %e, "check-in failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;

        match outcome {
            CheckInOutcome::Decided(record) => {
                store.persist(&record).await.map_err(|e| {
                    tracing::error!(error = %e, "decision record write failed");
                    zbus::fdo::Error::Failed(format!("decision record not persisted: {e}"))
                })?;

                {
                    let mut lockout = lockout.lock().unwrap_or_else(|e| e.into_inner());
                    if record.accepted() {
                        lockout.record_acceptance(&record.user_id);
                    } else {
                        lockout.record_rejection(&record.user_id);
                    }
                }

                tracing::info!(
                    user = %record.user_id,
                    accepted = record.accepted(),
                    score = record.recognition_score,
                    "check-in decided"
                );
                Ok(serde_json::json!({
                    "decided": true,
                    "accepted": record.accepted(),
                    "failure_reasons": record.failure_reasons(),
                    "record": record,
                })
                .to_string())
            }
            CheckInOutcome::Cancelled { reason } => {
                tracing::info!(reason = %reason, "check-in cancelled");
                Ok(serde_json::json!({
                    "decided": false,
                    "reason": reason,
                })
                .to_string())
            }
        }
    }

    /// Evaluate recorded decisions over an optional date range.
    ///
    /// `start`/`end` accept RFC 3339 timestamps or plain `YYYY-MM-DD` dates
    /// (empty string = unbounded). A negative `threshold` means "not
    /// given": metrics run at the configured threshold and the equal error
    /// rate search is included.
    async fn evaluate(&self, start: &str, end: &str, threshold: f64) -> zbus::fdo::Result<String> {
        let (store, configured_threshold) = {
            let state = self.state.lock().await;
            (state.store.clone(), state.config.similarity_threshold)
        };

        let start = parse_range_bound(start, false).map_err(zbus::fdo::Error::InvalidArgs)?;
        let end = parse_range_bound(end, true).map_err(zbus::fdo::Error::InvalidArgs)?;

        let records = store.decisions_between(start, end).await.map_err(|e| {
            tracing::error!(error = %e, "decision load failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;

        let requested = (threshold >= 0.0).then_some(threshold as f32);
        let at = requested.unwrap_or(configured_threshold);

        let metrics = adsum_eval::compute_metrics(&records, at, true);
        let outcomes = adsum_eval::outcome_counts(&records, configured_threshold);
        let score_statistics = adsum_eval::score_statistics(&records);

        let mut report = serde_json::json!({
            "records": records.len(),
            "metrics": metrics,
            "outcomes": outcomes,
            "score_statistics": score_statistics,
        });
        if requested.is_none() {
            report["eer"] = serde_json::to_value(adsum_eval::find_eer(&records, 100))
                .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        }

        tracing::info!(records = records.len(), "evaluation served");
        Ok(report.to_string())
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.state.lock().await;
        let enrolled = state.store.count_users().await.unwrap_or(0);
        let decisions = state.store.count_decisions().await.unwrap_or(0);

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "capture_backend": state.config.capture_backend,
            "enrolled_users": enrolled,
            "decision_records": decisions,
            "similarity_threshold": state.config.similarity_threshold,
            "verification_duration_secs": state.config.verification_duration_secs,
        })
        .to_string())
    }

    /// List enrolled identities as JSON.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        let state = self.state.lock().await;
        let users = state
            .store
            .list_users()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&users).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove an enrolled identity. Decision records are kept.
    async fn remove_user(&self, user_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(user = user_id, "remove_user requested");
        let state = self.state.lock().await;
        let removed = state
            .store
            .remove_user(user_id)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        if removed {
            tracing::info!(user = user_id, "user removed");
        } else {
            tracing::warn!(user = user_id, "user not found");
        }
        Ok(removed)
    }
}

/// Parse one end of a date range: empty = unbounded, RFC 3339 timestamps
/// pass through, bare dates expand to the start or end of that day.
fn parse_range_bound(raw: &str, is_end: bool) -> Result<Option<DateTime<Utc>>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if is_end {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        let time = time.ok_or_else(|| format!("invalid date: {raw}"))?;
        return Ok(Some(time.and_utc()));
    }
    Err(format!(
        "unparseable date '{raw}' (expected RFC 3339 or YYYY-MM-DD)"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn empty_bound_is_unbounded() {
        assert_eq!(parse_range_bound("", false).unwrap(), None);
        assert_eq!(parse_range_bound("  ", true).unwrap(), None);
    }

    #[test]
    fn rfc3339_bound_passes_through() {
        let ts = parse_range_bound("2026-08-06T10:30:00Z", false)
            .unwrap()
            .unwrap();
        assert_eq!(ts.hour(), 10);
        assert_eq!(ts.minute(), 30);
    }

    #[test]
    fn bare_date_expands_to_day_bounds() {
        let start = parse_range_bound("2026-08-06", false).unwrap().unwrap();
        assert_eq!((start.hour(), start.minute(), start.second()), (0, 0, 0));

        let end = parse_range_bound("2026-08-06", true).unwrap().unwrap();
        assert_eq!((end.hour(), end.minute(), end.second()), (23, 59, 59));
    }

    #[test]
    fn garbage_bound_is_an_error() {
        assert!(parse_range_bound("yesterday", false).is_err());
    }
}

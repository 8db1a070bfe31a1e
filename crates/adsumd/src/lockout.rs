use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maximum rejected attempts before a claimed identity is locked out.
const MAX_REJECTED: u32 = 5;
/// Sliding window over which rejections are counted.
const WINDOW: Duration = Duration::from_secs(60);
/// Lockout duration after exceeding MAX_REJECTED.
const LOCKOUT: Duration = Duration::from_secs(300);

struct UserRecord {
    rejections: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

/// Per-identity lockout for attendance attempts.
///
/// After MAX_REJECTED rejected decisions for the same claimed identity
/// within WINDOW seconds, that identity is locked out for LOCKOUT seconds.
/// The gate applies when the QR claim is presented, before any biometric
/// processing. Engine errors (camera failure, exhausted frames) never
/// count — only a recorded rejection increments the counter.
pub struct AttemptLockout {
    records: HashMap<String, UserRecord>,
}

impl AttemptLockout {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Return `Ok(())` if the claimed identity may proceed.
    /// Return `Err(message)` if it is currently locked out.
    pub fn check(&mut self, user_id: &str) -> Result<(), String> {
        let now = Instant::now();
        let record = self
            .records
            .entry(user_id.to_string())
            .or_insert(UserRecord {
                rejections: 0,
                window_start: now,
                locked_until: None,
            });

        if let Some(locked_until) = record.locked_until {
            if now < locked_until {
                let remaining = locked_until.duration_since(now).as_secs();
                return Err(format!(
                    "too many rejected attempts for '{user_id}'; try again in {remaining}s"
                ));
            }
            // Lockout expired — reset
            *record = UserRecord {
                rejections: 0,
                window_start: now,
                locked_until: None,
            };
        } else if now.duration_since(record.window_start) >= WINDOW {
            // Sliding window expired — reset the counter
            record.rejections = 0;
            record.window_start = now;
        }

        Ok(())
    }

    /// Record a rejected decision for the claimed identity. May trigger a
    /// lockout.
    pub fn record_rejection(&mut self, user_id: &str) {
        let now = Instant::now();
        let record = self
            .records
            .entry(user_id.to_string())
            .or_insert(UserRecord {
                rejections: 0,
                window_start: now,
                locked_until: None,
            });

        if now.duration_since(record.window_start) >= WINDOW {
            record.rejections = 0;
            record.window_start = now;
        }

        record.rejections += 1;
        if record.rejections >= MAX_REJECTED {
            record.locked_until = Some(now + LOCKOUT);
            tracing::warn!(
                user = user_id,
                rejections = record.rejections,
                lockout_secs = LOCKOUT.as_secs(),
                "attempt lockout triggered"
            );
        } else {
            tracing::debug!(
                user = user_id,
                rejections = record.rejections,
                max = MAX_REJECTED,
                "attempt rejected, counter incremented"
            );
        }
    }

    /// Record an accepted decision — clears the identity's counter.
    pub fn record_acceptance(&mut self, user_id: &str) {
        self.records.remove(user_id);
    }
}

impl Default for AttemptLockout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_under_limit() {
        let mut lockout = AttemptLockout::new();
        for _ in 0..4 {
            assert!(lockout.check("0002").is_ok());
            lockout.record_rejection("0002");
        }
        assert!(lockout.check("0002").is_ok());
    }

    #[test]
    fn locks_after_max_rejections() {
        let mut lockout = AttemptLockout::new();
        for _ in 0..MAX_REJECTED {
            lockout.record_rejection("0002");
        }
        assert!(lockout.check("0002").is_err());
    }

    #[test]
    fn acceptance_clears_counter() {
        let mut lockout = AttemptLockout::new();
        for _ in 0..4 {
            lockout.record_rejection("0002");
        }
        lockout.record_acceptance("0002");
        lockout.record_rejection("0002");
        assert!(lockout.check("0002").is_ok());
    }

    #[test]
    fn identities_are_independent() {
        let mut lockout = AttemptLockout::new();
        for _ in 0..MAX_REJECTED {
            lockout.record_rejection("0002");
        }
        assert!(lockout.check("0003").is_ok());
        assert!(lockout.check("0002").is_err());
    }
}

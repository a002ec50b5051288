use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use tracker_core::errors::ValidationError;
use tracker_core::ids::ConnId;
use tracker_settings::RateLimitSettings;

#[derive(Clone, Debug)]
struct Bucket {
    last_accepted: Instant,
    window_start: Instant,
    accepted: u32,
}

/// Why a report was refused, and how long until one would be accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Throttled {
    pub reason: &'static str,
    pub retry_after: Duration,
}

impl From<Throttled> for ValidationError {
    fn from(t: Throttled) -> Self {
        ValidationError::RateLimited(format!(
            "{}; retry in {} ms",
            t.reason,
            t.retry_after.as_millis()
        ))
    }
}

/// Per-connection limiter for location reports: a minimum spacing between
/// accepted reports plus a cap per window. Windows reset lazily on the next
/// check.
pub struct RateLimiter {
    buckets: DashMap<ConnId, Bucket>,
    min_interval: Duration,
    window: Duration,
    max_per_window: u32,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            buckets: DashMap::new(),
            min_interval: Duration::from_millis(settings.min_interval_ms),
            window: Duration::from_millis(settings.window_ms),
            max_per_window: settings.max_per_window,
        }
    }

    /// Accept or refuse a report arriving at `now`. Refusals do not count.
    pub fn check(&self, conn: &ConnId, now: Instant) -> Result<(), Throttled> {
        let mut bucket = match self.buckets.get_mut(conn) {
            Some(b) => b,
            None => {
                let _ = self.buckets.insert(
                    conn.clone(),
                    Bucket {
                        last_accepted: now,
                        window_start: now,
                        accepted: 1,
                    },
                );
                return Ok(());
            }
        };

        let since_last = now.saturating_duration_since(bucket.last_accepted);
        if since_last < self.min_interval {
            return Err(Throttled {
                reason: "location updates too frequent",
                retry_after: self.min_interval - since_last,
            });
        }

        let window_age = now.saturating_duration_since(bucket.window_start);
        if window_age >= self.window {
            bucket.window_start = now;
            bucket.accepted = 0;
        } else if bucket.accepted >= self.max_per_window {
            return Err(Throttled {
                reason: "location update quota exhausted",
                retry_after: self.window - window_age,
            });
        }

        bucket.accepted += 1;
        bucket.last_accepted = now;
        Ok(())
    }

    pub fn clear(&self, conn: &ConnId) {
        let _ = self.buckets.remove(conn);
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

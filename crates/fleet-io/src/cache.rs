use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Single-entry response cache with a fixed time-to-live.
///
/// Used for the status endpoint so bursts of dashboard polls are served from
/// one serialized snapshot.
pub struct TtlCache {
    ttl: Duration,
    entry: Mutex<Option<(Instant, Vec<u8>)>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Return the cached body if still fresh at `now`, otherwise build a new
    /// one with `fill` and store it. A failed fill leaves the cache empty.
    pub fn get_or_fill<E>(
        &self,
        now: Instant,
        fill: impl FnOnce() -> Result<Vec<u8>, E>,
    ) -> Result<Vec<u8>, E> {
        let mut entry = self.entry.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((stored_at, body)) = entry.as_ref() {
            if now.saturating_duration_since(*stored_at) < self.ttl {
                return Ok(body.clone());
            }
        }

        let body = fill()?;
        *entry = Some((now, body.clone()));
        Ok(body)
    }
}

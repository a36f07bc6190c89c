//! Sliding-window throttle for credential endpoints.
//!
//! Each source (normally a client IP) keeps the instants of its recent attempts.
//! An attempt is admitted while fewer than `max_attempts` earlier attempts fall
//! strictly inside the trailing window. Refused attempts are not recorded.
//!
//! The table holds at most `max_sources` entries. When a new source arrives at a
//! full table, idle sources are swept and, failing that, the least recently seen
//! sources are evicted in a batch so the scan cost is shared across many inserts.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::AuthError;

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_SOURCES: usize = 100_000;

// a full table sheds this fraction of its entries at once
const EVICTION_BATCH_DIVISOR: usize = 100;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Attempts admitted per source inside one window.
    pub max_attempts: usize,
    /// Length of the trailing window.
    pub window: Duration,
    /// Upper bound on the number of sources tracked at once.
    pub max_sources: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window: DEFAULT_WINDOW,
            max_sources: DEFAULT_MAX_SOURCES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    attempts: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn check_and_record(&self, source: &str) -> Result<(), AuthError> {
        self.check_and_record_at(source, Instant::now())
    }

    pub(crate) fn check_and_record_at(&self, source: &str, now: Instant) -> Result<(), AuthError> {
        let cutoff = now.checked_sub(self.config.window);
        let mut attempts = self.attempts.lock();

        if !attempts.contains_key(source) && attempts.len() >= self.config.max_sources {
            sweep_locked(&mut attempts, cutoff);
            if attempts.len() >= self.config.max_sources {
                let evicted = evict_least_recent(&mut attempts, self.config.max_sources);
                warn!(evicted, "rate limiter table full, evicted least recently seen sources");
            }
        }

        let recent = attempts.entry(source.to_string()).or_default();
        retain_recent(recent, cutoff);

        if recent.len() >= self.config.max_attempts {
            debug!(source, attempts = recent.len(), "rate limit exceeded");
            return Err(AuthError::RateLimited);
        }

        recent.push(now);
        Ok(())
    }

    /// Drop every source whose attempts have all left the window. Returns how many
    /// sources were evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let cutoff = now.checked_sub(self.config.window);
        sweep_locked(&mut self.attempts.lock(), cutoff)
    }

    pub fn tracked_sources(&self) -> usize {
        self.attempts.lock().len()
    }
}

// a `None` cutoff means the process is younger than the window: nothing has expired
fn retain_recent(recent: &mut Vec<Instant>, cutoff: Option<Instant>) {
    if let Some(cutoff) = cutoff {
        recent.retain(|attempt| *attempt > cutoff);
    }
}

fn sweep_locked(attempts: &mut HashMap<String, Vec<Instant>>, cutoff: Option<Instant>) -> usize {
    let before = attempts.len();
    attempts.retain(|_, recent| {
        retain_recent(recent, cutoff);
        !recent.is_empty()
    });
    before - attempts.len()
}

fn evict_least_recent(attempts: &mut HashMap<String, Vec<Instant>>, max_sources: usize) -> usize {
    let excess = (attempts.len() + 1).saturating_sub(max_sources);
    let batch = (max_sources / EVICTION_BATCH_DIVISOR)
        .max(excess)
        .min(attempts.len());
    if batch == 0 {
        return 0;
    }

    // sources with no recorded attempt sort first
    let mut last_seen: Vec<(Option<Instant>, &String)> = attempts
        .iter()
        .map(|(source, recent)| (recent.last().copied(), source))
        .collect();
    last_seen.select_nth_unstable_by_key(batch - 1, |(seen, _)| *seen);

    let doomed: Vec<String> = last_seen[..batch]
        .iter()
        .map(|(_, source)| (*source).clone())
        .collect();
    for source in &doomed {
        attempts.remove(source);
    }
    doomed.len()
}

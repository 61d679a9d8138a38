use crate::clock::{Clock, RealClock};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Configuration for per-pod backoff
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Backoff handed out on the first failure
    pub default_duration: Duration,
    /// Ceiling for the backoff, and idle time after which an entry is dropped
    pub max_duration: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            default_duration: Duration::from_secs(1),
            max_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct BackoffEntry {
    backoff: Duration,
    last_update: DateTime<Utc>,
}

/// Exponential backoff keyed by pod
pub struct PodBackoff {
    entries: Mutex<HashMap<String, BackoffEntry>>,
    clock: Arc<dyn Clock>,
    config: BackoffConfig,
}

impl PodBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_clock(config, Arc::new(RealClock))
    }

    pub fn with_clock(config: BackoffConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BackoffEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current backoff for `pod_id`; doubles the stored value for next time
    pub fn get_backoff(&self, pod_id: &str) -> Duration {
        let now = self.clock.now();
        let mut entries = self.lock();
        let entry = entries
            .entry(pod_id.to_string())
            .or_insert_with(|| BackoffEntry {
                backoff: self.config.default_duration,
                last_update: now,
            });
        entry.last_update = now;

        let duration = entry.backoff;
        entry.backoff = duration
            .saturating_mul(2)
            .min(self.config.max_duration);

        trace!("Backing off {:?} for pod {}", duration, pod_id);
        duration
    }

    /// Sleep for the pod's current backoff
    pub async fn wait(&self, pod_id: &str) {
        let duration = self.get_backoff(pod_id);
        tokio::time::sleep(duration).await;
    }

    /// Drop entries idle for longer than the maximum backoff
    pub fn gc(&self) {
        let now = self.clock.now();
        let max_idle = TimeDelta::from_std(self.config.max_duration).unwrap_or(TimeDelta::MAX);

        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.last_update <= max_idle);

        let removed = before - entries.len();
        if removed > 0 {
            debug!("Backoff gc removed {} idle entries", removed);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, pod_id: &str) -> bool {
        self.lock().contains_key(pod_id)
    }
}

impl Default for PodBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

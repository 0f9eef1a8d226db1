// API key rotation with failure cooldown
//
// Keys that keep failing are benched and retried only after a recovery
// window. The ring never refuses while it holds any key at all: a
// single-key deployment has nothing else to offer, so the stalest failure
// is handed out as the last resort.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Consecutive failures before a key is benched.
const BENCH_THRESHOLD: u32 = 3;
/// How long a recent failure keeps a key in cooldown.
const COOLDOWN: Duration = Duration::from_secs(60);
/// How long a benched key sits out before a retry is allowed.
const BENCH_RECOVERY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyHealth {
    Healthy,
    Cooling,
    Benched,
}

/// Per-key counters exposed on the key health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub index: usize,
    pub health: KeyHealth,
    pub total_requests: u64,
    pub total_failures: u64,
}

#[derive(Debug)]
struct TrackedKey {
    key: String,
    index: usize,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    total_requests: u64,
    total_failures: u64,
}

impl TrackedKey {
    fn new(key: String, index: usize) -> Self {
        Self {
            key,
            index,
            consecutive_failures: 0,
            last_failure: None,
            total_requests: 0,
            total_failures: 0,
        }
    }

    fn health(&self) -> KeyHealth {
        if self.consecutive_failures >= BENCH_THRESHOLD {
            return KeyHealth::Benched;
        }
        if let Some(at) = self.last_failure {
            if self.consecutive_failures > 0 && at.elapsed() < COOLDOWN {
                return KeyHealth::Cooling;
            }
        }
        KeyHealth::Healthy
    }

    fn retry_allowed(&self) -> bool {
        match self.last_failure {
            Some(at) => at.elapsed() > BENCH_RECOVERY,
            None => true,
        }
    }

    fn record_success(&mut self) {
        if self.consecutive_failures >= BENCH_THRESHOLD {
            info!("API key {} recovered", self.index);
        }
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.total_requests += 1;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure = Some(Instant::now());
        self.total_requests += 1;
        self.total_failures += 1;
        if self.consecutive_failures == BENCH_THRESHOLD {
            warn!(
                "API key {} benched after {} consecutive failures",
                self.index, BENCH_THRESHOLD
            );
        }
    }
}

pub struct KeyRing {
    keys: RwLock<Vec<TrackedKey>>,
    cursor: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        let tracked = keys
            .into_iter()
            .enumerate()
            .map(|(index, key)| TrackedKey::new(key, index))
            .collect();
        Self {
            keys: RwLock::new(tracked),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pick a key for the next call: healthy first, cooling next, then any
    /// benched key past its recovery window. With everything benched and
    /// cooling the least-recently-failed key goes out anyway.
    ///
    /// Returns None only for an empty ring, which config validation rules
    /// out before the server starts.
    pub async fn acquire(&self) -> Option<(usize, String)> {
        let keys = self.keys.read().await;

        for wanted in [KeyHealth::Healthy, KeyHealth::Cooling] {
            let pool: Vec<&TrackedKey> =
                keys.iter().filter(|k| k.health() == wanted).collect();
            if !pool.is_empty() {
                let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % pool.len();
                let picked = pool[slot];
                if wanted == KeyHealth::Cooling {
                    debug!("No healthy API key, using cooling key {}", picked.index);
                }
                return Some((picked.index, picked.key.clone()));
            }
        }

        let recoverable: Vec<&TrackedKey> =
            keys.iter().filter(|k| k.retry_allowed()).collect();
        if !recoverable.is_empty() {
            let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % recoverable.len();
            let picked = recoverable[slot];
            warn!("All API keys benched, retrying key {}", picked.index);
            return Some((picked.index, picked.key.clone()));
        }

        let picked = keys.iter().min_by_key(|k| k.last_failure)?;
        warn!(
            "All API keys benched within the recovery window, falling back to key {}",
            picked.index
        );
        Some((picked.index, picked.key.clone()))
    }

    pub async fn record_success(&self, index: usize) {
        let mut keys = self.keys.write().await;
        if let Some(key) = keys.get_mut(index) {
            key.record_success();
        }
    }

    pub async fn record_failure(&self, index: usize) {
        let mut keys = self.keys.write().await;
        if let Some(key) = keys.get_mut(index) {
            key.record_failure();
        }
    }

    pub async fn total(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn healthy_count(&self) -> usize {
        let keys = self.keys.read().await;
        keys.iter().filter(|k| k.health() == KeyHealth::Healthy).count()
    }

    pub async fn stats(&self) -> Vec<KeyStats> {
        let keys = self.keys.read().await;
        keys.iter()
            .map(|k| KeyStats {
                index: k.index,
                health: k.health(),
                total_requests: k.total_requests,
                total_failures: k.total_failures,
            })
            .collect()
    }
}

//! In-memory [`WindowStore`] for single-process deployments and tests.
//!
//! Windows live in a `HashMap` behind `std::sync::Mutex`. Expired
//! entries are pruned on every check for the key being checked; with a
//! small probability (1% by default) a check also sweeps every other key
//! so idle identifiers do not accumulate.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;

use super::{WindowEntry, WindowStore};

const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;

struct Window {
    window_ms: i64,
    entries: VecDeque<WindowEntry>,
}

impl Window {
    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while self
            .entries
            .front()
            .is_some_and(|e| e.timestamp_ms <= cutoff)
        {
            self.entries.pop_front();
        }
    }
}

/// Process-local sliding windows.
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, Window>>,
    sweep_probability: f64,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::with_sweep_probability(DEFAULT_SWEEP_PROBABILITY)
    }

    /// `probability` is clamped to `[0, 1]`.
    pub fn with_sweep_probability(probability: f64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            sweep_probability: probability.clamp(0.0, 1.0),
        }
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn sweep_locked(windows: &mut HashMap<String, Window>, now_ms: i64) {
        windows.retain(|_, window| {
            window.prune(now_ms);
            !window.entries.is_empty()
        });
    }
}

impl Default for InMemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn record(&self, key: &str, entry: WindowEntry, window_ms: i64) -> Result<u64> {
        let now_ms = entry.timestamp_ms;
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| anyhow!("rate limit window lock poisoned"))?;

        if self.sweep_probability > 0.0 && rand::thread_rng().gen_bool(self.sweep_probability) {
            Self::sweep_locked(&mut windows, now_ms);
        }

        let window = windows.entry(key.to_string()).or_insert_with(|| Window {
            window_ms,
            entries: VecDeque::new(),
        });
        window.window_ms = window_ms;
        window.prune(now_ms);
        window.entries.push_back(entry);
        Ok(window.entries.len() as u64)
    }

    async fn sweep(&self, now_ms: i64) -> Result<()> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| anyhow!("rate limit window lock poisoned"))?;
        Self::sweep_locked(&mut windows, now_ms);
        Ok(())
    }
}

// ABOUTME: Per-call options for run, send, and download.
// ABOUTME: Each call resolves its own copy; options never leak between calls.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Options for a single `run`, `send`, or `download` invocation.
#[derive(Debug, Clone)]
pub struct OpOptions {
    /// Log completion and timing.
    pub verbose: bool,
    /// Retry budget for this call. Zero means any failure is returned
    /// immediately.
    pub retries: u32,
    /// Pause between a reconnect and the next attempt.
    pub retry_interval: Duration,
    /// Per-call deadline. Zero means no independent deadline; the call is
    /// bounded only by the client's lifetime.
    pub timeout: Duration,
    /// Call-specific environment, merged over the client's global map.
    /// Call-specific values win on key collision.
    pub env: HashMap<String, String>,
}

impl Default for OpOptions {
    fn default() -> Self {
        Self {
            verbose: true,
            retries: 0,
            retry_interval: Duration::ZERO,
            timeout: Duration::ZERO,
            env: HashMap::new(),
        }
    }
}

impl OpOptions {
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Merge the global map under this call's overrides, sorted so the
    /// variables go out on the wire in a deterministic order.
    pub(crate) fn merged_env(&self, global: &HashMap<String, String>) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = global
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        merged.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

//! # skillhub-ratelimit
//!
//! A fixed-window admission rate limiter keyed by `(scope, kind, bucket)`:
//! `scope` is read/write, `kind` is ip/key. One mutex guards the whole
//! entry map — the spec calls out that this is sufficient given O(1) work
//! per call, the same "shared state behind one lock, held briefly" idiom
//! this workspace uses throughout (`engine_parallel.rs`'s execution state,
//! `skillhub-store`'s table mutex).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Ip,
    Key,
}

/// `{window, readIP, readKey, writeIP, writeKey}` — the per-bucket limits.
/// Defaults match the spec: `1 min / 120 / 600 / 30 / 120`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub read_ip: u64,
    pub read_key: u64,
    pub write_ip: u64,
    pub write_key: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            read_ip: 120,
            read_key: 600,
            write_ip: 30,
            write_key: 120,
        }
    }
}

impl RateLimitConfig {
    fn limit_for(&self, scope: Scope, kind: Kind) -> u64 {
        match (scope, kind) {
            (Scope::Read, Kind::Ip) => self.read_ip,
            (Scope::Read, Kind::Key) => self.read_key,
            (Scope::Write, Kind::Ip) => self.write_ip,
            (Scope::Write, Kind::Key) => self.write_key,
        }
    }
}

/// The result of one [`RateLimiter::take`] call, carrying both the
/// allow/deny decision and the values needed to populate both header
/// families the spec names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Absolute epoch-seconds at which the window resets.
    pub reset_at: u64,
    /// Seconds until the window resets.
    pub reset_in: u64,
}

impl Decision {
    /// `RateLimit-Limit` / `RateLimit-Remaining` / `RateLimit-Reset`
    /// (reset expressed as seconds-until-reset).
    pub fn rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RateLimit-Limit", self.limit.to_string()),
            ("RateLimit-Remaining", self.remaining.to_string()),
            ("RateLimit-Reset", self.reset_in.to_string()),
        ]
    }

    /// `X-RateLimit-Limit` / `X-RateLimit-Remaining` / `X-RateLimit-Reset`
    /// (reset expressed as an absolute epoch-seconds timestamp).
    pub fn x_rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.to_string()),
        ]
    }

    /// Set as `Retry-After` on denial.
    pub fn retry_after(&self) -> Option<u64> {
        (!self.allowed).then_some(self.reset_in)
    }
}

struct WindowCounter {
    window_start: u64,
    count: u64,
}

const SOFT_CAP: usize = 100_000;

pub struct RateLimiter {
    config: RateLimitConfig,
    entries: Mutex<HashMap<(Scope, Kind, String), WindowCounter>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn now_epoch_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs()
    }

    /// `take(now, scope, kind, bucket)` — the one admission check. `now`
    /// is threaded explicitly (rather than read from the clock inside)
    /// so callers and tests get deterministic window math.
    pub fn take(&self, now: u64, scope: Scope, kind: Kind, bucket: &str) -> Decision {
        let window = self.config.window_secs.max(1);
        let window_start = (now / window) * window;
        let reset_at = window_start + window;
        let limit = self.config.limit_for(scope, kind);

        let mut entries = self.entries.lock().expect("rate limiter mutex poisoned");
        self.evict_stale(&mut entries, now, window);

        let key = (scope, kind, bucket.to_string());
        let counter = entries.entry(key).or_insert(WindowCounter {
            window_start,
            count: 0,
        });
        if counter.window_start != window_start {
            counter.window_start = window_start;
            counter.count = 0;
        }

        let allowed = counter.count < limit;
        if allowed {
            counter.count += 1;
        }
        let remaining = limit.saturating_sub(counter.count);

        Decision {
            allowed,
            limit,
            remaining,
            reset_at,
            reset_in: reset_at.saturating_sub(now),
        }
    }

    /// Evicts entries whose window is more than two full windows stale,
    /// once the soft cap is exceeded — bounds memory without an explicit
    /// TTL sweep thread.
    fn evict_stale(
        &self,
        entries: &mut HashMap<(Scope, Kind, String), WindowCounter>,
        now: u64,
        window: u64,
    ) {
        if entries.len() <= SOFT_CAP {
            return;
        }
        let floor = now.saturating_sub(2 * window);
        entries.retain(|_, counter| counter.window_start > floor);
    }
}

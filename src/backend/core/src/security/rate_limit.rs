//! Fixed-window rate limiting.
//!
//! Each key gets a counter and a window end. The first request in a window
//! creates the entry with `count = 1`; later requests increment it until the
//! limit is reached, after which requests are denied without incrementing.
//! Once `now > reset_time` the next request replaces the entry with a fresh
//! window.
//!
//! The fixed window admits up to twice the limit in a short burst straddling a
//! window boundary. That is accepted: one counter per key, O(1) per check.
//!
//! Increment-and-compare happens under the map's shard write lock (via
//! `DashMap::entry`), so concurrent requests for one key are serialised and
//! the sweep (`retain`) can never remove an entry mid-update.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Route class used when a policy names an unknown class.
pub const DEFAULT_CLASS: &str = "general";

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub limit: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Rate limiting configuration: named route classes plus sweep cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often expired entries are swept. Defaults to a quarter of the
    /// shortest configured window.
    #[serde(default, with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,

    #[serde(default = "default_classes")]
    pub classes: BTreeMap<String, RateLimitPolicy>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            sweep_interval: None,
            classes: default_classes(),
        }
    }
}

impl RateLimitConfig {
    /// Configured sweep interval, or a quarter of the shortest window.
    ///
    /// A zero interval is never returned.
    pub fn effective_sweep_interval(&self) -> Duration {
        if let Some(interval) = self.sweep_interval.filter(|i| !i.is_zero()) {
            return interval;
        }
        self.classes
            .values()
            .map(|p| p.window / 4)
            .min()
            .unwrap_or(Duration::from_secs(15))
            .max(Duration::from_secs(1))
    }

    pub fn with_class(mut self, name: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.classes.insert(name.into(), policy);
        self
    }
}

fn default_enabled() -> bool { true }

fn default_classes() -> BTreeMap<String, RateLimitPolicy> {
    BTreeMap::from([
        ("auth".to_string(), RateLimitPolicy::new(5, Duration::from_secs(15 * 60))),
        ("api".to_string(), RateLimitPolicy::new(100, Duration::from_secs(60))),
        ("upload".to_string(), RateLimitPolicy::new(10, Duration::from_secs(60))),
        (DEFAULT_CLASS.to_string(), RateLimitPolicy::new(300, Duration::from_secs(60))),
    ])
}

// ═══════════════════════════════════════════════════════════════════════════════
// Keys, Entries and Decisions
// ═══════════════════════════════════════════════════════════════════════════════

/// Client identifier for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Key on the client alone.
    pub fn for_client(ip: &str) -> Self {
        Self(format!("ip:{}", ip))
    }

    /// Key on client plus route, so each route class counts separately.
    pub fn for_route(ip: &str, route: &str) -> Self {
        Self(format!("ip:{}:{}", ip, route))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-key window state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub key: String,
    pub count: u32,
    /// Requests denied in this window.
    pub rejected: u64,
    pub window_start: DateTime<Utc>,
    pub reset_time: DateTime<Utc>,
}

impl RateLimitEntry {
    fn fresh(key: &str, now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            key: key.to_string(),
            count: 0,
            rejected: 0,
            window_start: now,
            reset_time: now + window,
        }
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Never negative: 0 once the limit is reached.
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Reset time as unix seconds, for the `X-Rate-Limit-Reset` header.
    pub fn reset_unix(&self) -> i64 {
        self.reset_time.timestamp()
    }

    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_time - now).num_seconds().max(1) as u64
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rate Limiter
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory fixed-window limiter. Construct one and share it through `Arc`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policies(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Policy for a route class, falling back to the `general` class.
    pub fn policy(&self, class: &str) -> RateLimitPolicy {
        if let Some(policy) = self.config.classes.get(class) {
            return *policy;
        }
        warn!(class = class, "Unknown rate limit class, using general policy");
        self.config
            .classes
            .get(DEFAULT_CLASS)
            .copied()
            .unwrap_or_else(|| default_classes()[DEFAULT_CLASS])
    }

    /// Check and count one request at the current time.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        self.check_at(key, limit, window, Utc::now())
    }

    /// Check using the limits of a named route class. When limiting is
    /// disabled every request is allowed and nothing is counted.
    pub fn check_class(&self, class: &str, key: &RateLimitKey) -> RateLimitDecision {
        let policy = self.policy(class);
        if !self.config.enabled {
            let window = to_chrono(policy.window);
            return RateLimitDecision {
                allowed: true,
                limit: policy.limit,
                remaining: policy.limit,
                reset_time: Utc::now() + window,
            };
        }
        self.check(key.as_str(), policy.limit, policy.window)
    }

    /// Check and count one request at `now`.
    pub fn check_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let window = to_chrono(window);

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::fresh(key, now, window));

        if now > entry.reset_time {
            *entry = RateLimitEntry::fresh(key, now, window);
        }

        let allowed = entry.count < limit;
        if allowed {
            entry.count += 1;
        } else {
            entry.rejected += 1;
        }

        let decision = RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_time: entry.reset_time,
        };
        drop(entry);

        counter!(
            "bastion_rate_limit_checks_total",
            "outcome" => if allowed { "allowed" } else { "denied" }
        )
        .increment(1);
        if !allowed {
            debug!(key = key, reset = %decision.reset_time, "Rate limit exceeded");
        }
        decision
    }

    /// Snapshot of one key's state.
    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries whose window ended before `now`. Returns how many.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_time >= now);
        before.saturating_sub(self.entries.len())
    }
}

fn to_chrono(window: Duration) -> chrono::Duration {
    let millis = i64::try_from(window.as_millis()).unwrap_or(i64::MAX / 2);
    chrono::Duration::milliseconds(millis.min(i64::MAX / 2))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Background Sweep
// ═══════════════════════════════════════════════════════════════════════════════

/// Shortest period the sweeper will tick at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn a task that sweeps expired entries every `interval`.
///
/// Intervals below [`MIN_SWEEP_INTERVAL`], zero included, are raised to it.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            let removed = limiter.sweep_expired(Utc::now());
            if removed > 0 {
                debug!(removed = removed, remaining = limiter.len(), "Swept expired rate limit entries");
            }
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

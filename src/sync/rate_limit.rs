//! Sliding-window rate limiting keyed by connection and channel.
//!
//! Every key owns a queue of recent event timestamps. A check prunes the
//! queue against the window, records the new event and compares the count
//! with the limit. Stale keys are reclaimed by a periodic sweep and when the
//! owning connection disconnects.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

use super::Channel;

/// Budget for a single channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLimit {
    /// Maximum admitted events per window
    pub limit: usize,
    /// Length of the trailing window
    pub window: Duration,
}

impl ChannelLimit {
    pub const fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }

    pub const fn per_second(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }
}

/// Per-channel budgets and sweep policy
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub edit: ChannelLimit,
    pub cursor: ChannelLimit,
    pub operation: ChannelLimit,
    /// How often the background sweep runs
    pub sweep_interval: Duration,
    /// Timestamps older than this are dropped by the sweep
    pub retention: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            edit: ChannelLimit::per_second(15),
            cursor: ChannelLimit::per_second(30),
            operation: ChannelLimit::per_second(20),
            sweep_interval: Duration::from_secs(60),
            retention: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, channel: Channel) -> ChannelLimit {
        match channel {
            Channel::Edit => self.edit,
            Channel::Cursor => self.cursor,
            Channel::Operation => self.operation,
        }
    }

    pub fn with_limit(mut self, channel: Channel, limit: ChannelLimit) -> Self {
        match channel {
            Channel::Edit => self.edit = limit,
            Channel::Cursor => self.cursor = limit,
            Channel::Operation => self.operation = limit,
        }
        self
    }

    pub fn with_sweep(mut self, interval: Duration, retention: Duration) -> Self {
        self.sweep_interval = interval;
        self.retention = retention;
        self
    }
}

/// Concurrent sliding-window counter
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event for `key` and report whether it fits the budget
    pub fn admit(&self, key: &str, limit: usize, window: Duration) -> bool {
        self.admit_at(key, limit, window, Instant::now())
    }

    /// Same as [`admit`](Self::admit) with an explicit clock reading.
    ///
    /// Rejected attempts are recorded too, so a client that keeps sending
    /// past its budget stays throttled until it backs off for a full window.
    pub fn admit_at(&self, key: &str, limit: usize, window: Duration, now: Instant) -> bool {
        let mut timestamps = self.windows.entry(key.to_string()).or_default();

        prune(&mut timestamps, window, now);
        timestamps.push_back(now);

        timestamps.len() <= limit
    }

    /// Drop every channel window belonging to a connection
    pub fn purge_connection(&self, connection_id: &str) {
        for channel in Channel::ALL {
            self.windows.remove(&channel.key(connection_id));
        }
    }

    /// Prune all windows against `retention` and delete the empty ones.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, retention: Duration) -> usize {
        self.sweep_at(retention, Instant::now())
    }

    pub fn sweep_at(&self, retention: Duration, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, timestamps| {
            prune(timestamps, retention, now);
            !timestamps.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!("Rate limiter sweep removed {} idle keys", removed);
        }
        removed
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.windows.contains_key(key)
    }
}

/// Remove timestamps that are at least `window` old
fn prune(timestamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(&oldest) = timestamps.front() {
        if now.saturating_duration_since(oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

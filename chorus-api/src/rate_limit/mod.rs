//! Fixed-window rate limiter
//!
//! Counts requests per identifier string (e.g. `contribute:<user-id>`).
//! The first request of a window opens it; requests beyond
//! `max_requests` are refused until the window ends. Different
//! identifiers never share a counter.

mod store;

pub use store::{InMemoryRateLimitStore, RateLimitEntry, RateLimitStore};

use chorus_common::time::millis_to_duration;
use chorus_common::Clock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Window length and ceiling for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitConfig {
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            window,
            max_requests,
        }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Outcome of one [`RateLimiter::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the current window ends
    pub reset_in: Duration,
}

/// Actions guarded by a pre-configured policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAction {
    Contribute,
    Synthesise,
    Submit,
}

impl RateLimitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::Contribute => "contribute",
            RateLimitAction::Synthesise => "synthesise",
            RateLimitAction::Submit => "submit",
        }
    }

    /// Identifier for `subject` under this action, e.g. `contribute:<id>`
    pub fn key(&self, subject: impl fmt::Display) -> String {
        format!("{}:{}", self.as_str(), subject)
    }
}

/// Per-action configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicies {
    pub contribute: RateLimitConfig,
    pub synthesise: RateLimitConfig,
    pub submit: RateLimitConfig,
}

impl RateLimitPolicies {
    pub fn for_action(&self, action: RateLimitAction) -> &RateLimitConfig {
        match action {
            RateLimitAction::Contribute => &self.contribute,
            RateLimitAction::Synthesise => &self.synthesise,
            RateLimitAction::Submit => &self.submit,
        }
    }
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        Self {
            contribute: RateLimitConfig::new(10, Duration::from_secs(60)),
            synthesise: RateLimitConfig::new(5, Duration::from_secs(300)),
            submit: RateLimitConfig::new(10, Duration::from_secs(3600)),
        }
    }
}

/// Fixed-window limiter over an injected store and clock
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    policies: RateLimitPolicies,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        policies: RateLimitPolicies,
    ) -> Self {
        Self {
            store,
            clock,
            policies,
        }
    }

    /// In-memory store with the wall clock
    pub fn in_memory(policies: RateLimitPolicies) -> Self {
        Self::new(
            Arc::new(InMemoryRateLimitStore::new()),
            Arc::new(chorus_common::SystemClock),
            policies,
        )
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    /// Check `subject` against the policy for `action`
    pub async fn check_action(
        &self,
        action: RateLimitAction,
        subject: impl fmt::Display,
    ) -> RateLimitDecision {
        let config = *self.policies.for_action(action);
        self.check(&action.key(subject), &config).await
    }

    /// Count one request for `identifier`; never fails
    ///
    /// Read and write go through the store's compare-and-swap, retried
    /// until it lands, so concurrent checks on one identifier are
    /// serialised without holding a lock across the store calls.
    pub async fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let window_ms = config.window_ms();

        loop {
            let now = self.clock.now_millis();
            let current = self.store.get(identifier).await;

            let (next, decision) = match current {
                Some(entry) if !entry.is_expired(now) => {
                    let reset_in = remaining_window(entry.window_end_ms, now);
                    if entry.count >= config.max_requests {
                        debug!(identifier = %identifier, count = entry.count, "Rate limit exceeded");
                        return RateLimitDecision {
                            allowed: false,
                            remaining: 0,
                            reset_in,
                        };
                    }
                    let count = entry.count + 1;
                    (
                        RateLimitEntry {
                            count,
                            window_end_ms: entry.window_end_ms,
                        },
                        RateLimitDecision {
                            allowed: true,
                            remaining: config.max_requests - count,
                            reset_in,
                        },
                    )
                }
                // Absent or expired: open a new window
                _ => (
                    RateLimitEntry {
                        count: 1,
                        window_end_ms: now.saturating_add(window_ms),
                    },
                    RateLimitDecision {
                        allowed: true,
                        remaining: config.max_requests.saturating_sub(1),
                        reset_in: config.window,
                    },
                ),
            };

            if self.store.compare_and_swap(identifier, current, next).await {
                return decision;
            }
        }
    }

    /// Delete expired entries; returns how many were removed
    pub async fn sweep(&self) -> usize {
        self.store.sweep_expired(self.clock.now_millis()).await
    }
}

fn remaining_window(window_end_ms: i64, now_ms: i64) -> Duration {
    millis_to_duration(u64::try_from(window_end_ms - now_ms).unwrap_or(0))
}

/// Periodically sweep expired entries
///
/// Memory hygiene only; correctness of [`RateLimiter::check`] does not
/// depend on it.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if every.is_zero() {
            warn!("Rate-limit sweeper disabled (interval is zero)");
            return;
        }
        let mut ticker = tokio::time::interval(every);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep().await;
            if removed > 0 {
                debug!(removed, "Swept expired rate-limit entries");
            }
        }
    })
}

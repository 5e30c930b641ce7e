//! Per-client fixed-window rate limiting.
//!
//! # Algorithm
//!
//! Each client key owns a counter and the instant its window opened.
//!
//! 1. No entry, or the window is older than `window`: start a new window
//!    with count 1 and admit.
//! 2. Otherwise, if `count >= limit`: reject.
//! 3. Otherwise increment and admit.
//!
//! The whole check-and-update runs under a single lock acquisition, so two
//! concurrent requests from one client can never both see "under limit" and
//! both pass the threshold. Fixed windows allow up to twice the limit across
//! a window boundary; that is the accepted cost of O(1) state per client.
//!
//! # Eviction
//!
//! A reaper task wakes every `window` and removes entries whose window has
//! expired. It runs on a fixed ticker, not per-entry deadlines. A failed
//! sweep is logged and the next tick tries again.
//!
//! # Response Headers
//!
//! On rejection (429):
//! - `Retry-After`: seconds until the client's window closes
//! - `X-RateLimit-Limit`: configured limit
//! - `X-RateLimit-Remaining`: `0`

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::ip::{TrustedProxyConfig, client_key};
use crate::chain::{Middleware, middleware_fn};
use crate::error::AppError;
use crate::metrics;
use crate::utils;

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Limit cannot be zero.
    ZeroLimit,
    /// Window cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroLimit => write!(f, "rate limit must be greater than 0"),
            RateLimitError::ZeroWindow => write!(f, "rate limit window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Fixed-window counters keyed by client.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    clients: Mutex<HashMap<String, WindowEntry>>,
}

impl FixedWindowLimiter {
    /// # Errors
    ///
    /// `RateLimitError` when `limit` or `window` is zero.
    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(Self {
            limit,
            window,
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and record one request from `key`.
    pub fn check(&self, key: &str) -> Admission {
        self.check_at(key, utils::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> Admission {
        let mut clients = self.clients.lock();

        match clients.get_mut(key) {
            Some(entry) if now.saturating_duration_since(entry.window_start) <= self.window => {
                if entry.count >= self.limit {
                    let elapsed = now.saturating_duration_since(entry.window_start);
                    return Admission::Rejected {
                        retry_after: self.window.saturating_sub(elapsed),
                    };
                }
                entry.count += 1;
                Admission::Admitted {
                    remaining: self.limit - entry.count,
                }
            }
            _ => {
                clients.insert(
                    key.to_string(),
                    WindowEntry {
                        count: 1,
                        window_start: now,
                    },
                );
                Admission::Admitted {
                    remaining: self.limit - 1,
                }
            }
        }
    }

    /// Remove entries whose window closed before `now`. Returns how many.
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, entry| now.saturating_duration_since(entry.window_start) <= self.window);
        before - clients.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }

    /// Spawn the eviction task on the current tokio runtime.
    ///
    /// The task exits when `shutdown` is cancelled or the limiter is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let period = self.window;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Rate limiter reaper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else {
                            debug!("Rate limiter dropped, reaper exiting");
                            break;
                        };
                        match catch_unwind(AssertUnwindSafe(|| limiter.evict_expired_at(utils::now()))) {
                            Ok(evicted) => trace!(evicted, remaining = limiter.tracked_clients(), "Rate limiter sweep"),
                            Err(_) => error!("Rate limiter sweep failed; retrying on next tick"),
                        }
                    }
                }
            }
        })
    }
}

/// Rate limiting middleware configuration.
///
/// # Example
///
/// ```rust,ignore
/// let limit = RateLimit::new(100, Duration::from_secs(60))?;
/// limit.spawn_reaper(shutdown.clone());
/// app.use_middleware(limit.middleware());
/// ```
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<FixedWindowLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimit {
    /// # Errors
    ///
    /// `RateLimitError` when `limit` or `window` is zero.
    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        Self::with_trusted_proxies(limit, window, &[])
    }

    /// # Errors
    ///
    /// `RateLimitError` when `limit` or `window` is zero.
    pub fn with_trusted_proxies(
        limit: u32,
        window: Duration,
        trusted_proxies: &[String],
    ) -> Result<Self, RateLimitError> {
        Ok(Self {
            limiter: Arc::new(FixedWindowLimiter::new(limit, window)?),
            trusted_proxies: Arc::new(TrustedProxyConfig::new(trusted_proxies)),
        })
    }

    pub fn limiter(&self) -> &Arc<FixedWindowLimiter> {
        &self.limiter
    }

    /// See [`FixedWindowLimiter::spawn_reaper`].
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.limiter.spawn_reaper(shutdown)
    }

    /// Build the chain link.
    pub fn middleware(&self) -> Middleware {
        let limiter = self.limiter.clone();
        let trusted_proxies = self.trusted_proxies.clone();

        middleware_fn(move |ctx| {
            let key = client_key(ctx, &trusted_proxies);

            match limiter.check(&key) {
                Admission::Admitted { remaining } => {
                    ctx.set_header("X-RateLimit-Limit", &limiter.limit().to_string());
                    ctx.set_header("X-RateLimit-Remaining", &remaining.to_string());
                    ctx.next()
                }
                Admission::Rejected { retry_after } => {
                    let retry_after_secs = retry_after.as_secs().max(1);
                    warn!(
                        client = %key,
                        path = %ctx.path(),
                        retry_after_secs,
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limited();

                    ctx.set_header("Retry-After", &retry_after_secs.to_string());
                    ctx.set_header("X-RateLimit-Limit", &limiter.limit().to_string());
                    ctx.set_header("X-RateLimit-Remaining", "0");
                    Err(AppError::RateLimitExceeded { retry_after_secs })
                }
            }
        })
    }
}

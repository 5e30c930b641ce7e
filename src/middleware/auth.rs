//! Bearer token authentication middleware.
//!
//! # Security Features
//!
//! - **Pluggable verification**: tokens are checked by a [`TokenVerifier`]
//! - **Constant-time comparison**: [`ApiKeyVerifier`] never short-circuits on
//!   a partial match
//! - **Selective protection**: bypass paths skip authentication entirely
//! - **Brute force throttling**: repeated failures from one client are
//!   answered with 429 before the token is even looked at. A reaper task
//!   ([`BearerAuth::spawn_reaper`]) drops expired blocks and idle failure
//!   counters so spoofed client keys cannot grow the state without bound.
//!
//! # Usage
//!
//! ```bash
//! curl -H "Authorization: Bearer <token>" http://localhost:3000/users/42
//! ```
//!
//! On success the verified [`Claims`] are stored under the local key `user`
//! and the subject under `user_id`. Use [`claims`] and [`user_id`] to read
//! them back in later links.
//!
//! # Bypassed Endpoints
//!
//! Bypass paths use **exact string matching** against the request path, so
//! `/health` is bypassed but `/health/` is not.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::ip::{TrustedProxyConfig, client_key};
use crate::chain::{Middleware, middleware_fn};
use crate::context::Context;
use crate::error::{AppError, AppResult};
use crate::utils;

/// Local key holding the verified [`Claims`].
pub const USER_LOCAL: &str = "user";

/// Local key holding the verified subject as a `String`.
pub const USER_ID_LOCAL: &str = "user_id";

const BEARER_PREFIX: &str = "Bearer ";

const DEFAULT_BYPASS_PATHS: [&str; 1] = ["/health"];

/// Maximum auth failures per client per minute before blocking.
const DEFAULT_AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Failures a client may burn through before the per-minute rate applies.
const DEFAULT_AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// How often the reaper sweeps blocked clients and idle failure counters.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Identity established by a verified token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            extra: Map::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Checks a bearer token and returns the identity it carries.
pub trait TokenVerifier: Send + Sync {
    /// # Errors
    ///
    /// `AppError::Unauthorized` when the token is unknown, expired or
    /// malformed.
    fn verify(&self, token: &str) -> AppResult<Claims>;
}

/// Verifier over a fixed set of opaque tokens.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyVerifier {
    entries: Vec<(String, String)>,
}

impl ApiKeyVerifier {
    /// `entries` are `(token, subject)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TokenVerifier for ApiKeyVerifier {
    fn verify(&self, token: &str) -> AppResult<Claims> {
        // Compare against every entry so timing doesn't reveal which one matched.
        let mut subject = None;
        for (expected, sub) in &self.entries {
            if constant_time_eq(token, expected) {
                subject = Some(sub);
            }
        }
        subject
            .map(Claims::new)
            .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))
    }
}

/// Per-client auth failure state: a keyed `governor` limiter that counts
/// failures, and the clients currently blocked with their deadlines.
pub struct FailureTracker {
    limiter: AuthFailureLimiter,
    blocked: Mutex<HashMap<String, Instant>>,
}

impl FailureTracker {
    pub fn new(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
            blocked: Mutex::new(HashMap::new()),
        }
    }

    /// Time left on `client`'s block, if any. An expired block is dropped.
    pub fn blocked_for(&self, client: &str, now: Instant) -> Option<Duration> {
        let mut blocked = self.blocked.lock();
        let until = *blocked.get(client)?;
        if until > now {
            Some(until - now)
        } else {
            blocked.remove(client);
            None
        }
    }

    /// Count a failure; block the client once its quota is spent.
    pub fn record_failure(&self, client: &str, now: Instant) {
        if let Err(not_until) = self.limiter.check_key(&client.to_string()) {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            self.blocked.lock().insert(client.to_string(), now + wait);
        }
    }

    /// Drop blocks that ended by `now` and failure counters that have fully
    /// recovered. Returns the number of blocks removed.
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let evicted = {
            let mut blocked = self.blocked.lock();
            let before = blocked.len();
            blocked.retain(|_, until| *until > now);
            before - blocked.len()
        };
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        evicted
    }

    pub fn blocked_clients(&self) -> usize {
        self.blocked.lock().len()
    }

    /// Clients with a failure counter that has not yet recovered.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Sweep every `period` until `shutdown` fires or the tracker is dropped.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Auth failure reaper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(tracker) = tracker.upgrade() else {
                            debug!("Auth failure tracker dropped, reaper exiting");
                            break;
                        };
                        match catch_unwind(AssertUnwindSafe(|| tracker.evict_expired_at(utils::now()))) {
                            Ok(evicted) => trace!(
                                evicted,
                                blocked = tracker.blocked_clients(),
                                counters = tracker.tracked_clients(),
                                "Auth failure sweep"
                            ),
                            Err(_) => error!("Auth failure sweep failed; retrying on next tick"),
                        }
                    }
                }
            }
        })
    }
}

/// Bearer authentication configuration.
///
/// Build once at startup and install either [`required`](Self::required) or
/// [`optional`](Self::optional) as a global or route middleware.
#[derive(Clone)]
pub struct BearerAuth {
    verifier: Arc<dyn TokenVerifier>,
    bypass_paths: Arc<Vec<String>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    failures: Arc<FailureTracker>,
}

impl BearerAuth {
    /// Create with the default bypass path (`/health`).
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        let quota =
            Quota::per_minute(DEFAULT_AUTH_FAILURE_LIMIT).allow_burst(DEFAULT_AUTH_FAILURE_BURST);
        Self {
            verifier,
            bypass_paths: Arc::new(
                DEFAULT_BYPASS_PATHS
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect(),
            ),
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
            failures: Arc::new(FailureTracker::new(quota)),
        }
    }

    /// Replace the failure quota. Resets all failure state.
    pub fn with_failure_quota(mut self, quota: Quota) -> Self {
        self.failures = Arc::new(FailureTracker::new(quota));
        self
    }

    pub fn failures(&self) -> &Arc<FailureTracker> {
        &self.failures
    }

    /// Start the background sweep of failure state. Stops on `shutdown`.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.failures.spawn_reaper(DEFAULT_SWEEP_INTERVAL, shutdown)
    }

    pub fn with_bypass_paths(mut self, paths: Vec<String>) -> Self {
        self.bypass_paths = Arc::new(paths);
        self
    }

    pub fn with_trusted_proxies(mut self, cidrs: &[String]) -> Self {
        self.trusted_proxies = Arc::new(TrustedProxyConfig::new(cidrs));
        self
    }

    /// Reject requests without a valid bearer token.
    pub fn required(&self) -> Middleware {
        let auth = self.clone();
        middleware_fn(move |ctx| auth.authenticate(ctx))
    }

    /// Attach claims when a valid token is present; never reject.
    pub fn optional(&self) -> Middleware {
        let verifier = self.verifier.clone();
        middleware_fn(move |ctx| {
            if let Some(token) = ctx
                .header("authorization")
                .and_then(|h| h.strip_prefix(BEARER_PREFIX))
                && let Ok(claims) = verifier.verify(token)
            {
                store_claims(ctx, claims);
            }
            ctx.next()
        })
    }

    fn authenticate(&self, ctx: &mut Context) -> AppResult<()> {
        if self.bypass_paths.iter().any(|p| p == ctx.path()) {
            debug!(path = %ctx.path(), "Bypassing auth");
            return ctx.next();
        }

        let client = client_key(ctx, &self.trusted_proxies).into_owned();

        if let Some(retry_after) = self.failures.blocked_for(&client, utils::now()) {
            let retry_after_secs = retry_after.as_secs().max(1);
            error!(
                client = %client,
                retry_after_secs,
                "Client blocked due to excessive auth failures"
            );
            ctx.set_header("Retry-After", &retry_after_secs.to_string());
            return Err(AppError::RateLimitExceeded { retry_after_secs });
        }

        let verified = match ctx.header("authorization") {
            None => Err(AppError::Unauthorized(
                "Missing authorization header".to_string(),
            )),
            Some(header) => match header.strip_prefix(BEARER_PREFIX) {
                None => Err(AppError::Unauthorized(
                    "Invalid authorization header format".to_string(),
                )),
                Some(token) => self.verifier.verify(token.trim()),
            },
        };

        match verified {
            Ok(claims) => {
                debug!(subject = %claims.subject, "Bearer authentication successful");
                store_claims(ctx, claims);
                ctx.next()
            }
            Err(err) => {
                self.failures.record_failure(&client, utils::now());
                warn!(
                    path = %ctx.path(),
                    client = %client,
                    error = %err,
                    "Authentication failed"
                );
                ctx.set_header("WWW-Authenticate", "Bearer");
                Err(err)
            }
        }
    }
}

fn store_claims(ctx: &mut Context, claims: Claims) {
    ctx.set_local(USER_ID_LOCAL, claims.subject.clone());
    ctx.set_local(USER_LOCAL, claims);
}

/// Claims stored by an earlier auth link.
pub fn claims(ctx: &Context) -> Option<&Claims> {
    ctx.get_local::<Claims>(USER_LOCAL)
}

/// Subject stored by an earlier auth link.
pub fn user_id(ctx: &Context) -> Option<&str> {
    ctx.get_local::<String>(USER_ID_LOCAL).map(String::as_str)
}

/// Perform constant-time comparison of two strings.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

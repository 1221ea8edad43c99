//! Sliding-window rate limiting.
//!
//! Each check is keyed by `rate_limit:{identifier}:{max}:{window}`. The
//! backing [`WindowStore`] atomically drops entries older than
//! `now − window`, records the current request, and returns the number of
//! entries left in the window. The request is admitted iff that count is
//! at most `max`.
//!
//! Denied requests are still recorded, so a client that keeps hammering
//! an exhausted window keeps it full.
//!
//! Two backends share these semantics: the in-memory store in
//! [`memory`] and the SQLite store in the `advisory-chat` crate. Both must
//! produce the same decision for the same request sequence.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Requests allowed per window for a class of caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitTier {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitTier {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    pub fn window_ms(&self) -> i64 {
        (self.window_secs as i64) * 1000
    }
}

/// Anonymous callers.
pub const UNAUTHENTICATED: RateLimitTier = RateLimitTier::new(5, 60);
/// Callers with a user id or API key.
pub const AUTHENTICATED: RateLimitTier = RateLimitTier::new(60, 60);
/// Authenticated callers on chat, conversation, and message routes.
pub const CONVERSATION: RateLimitTier = RateLimitTier::new(20, 60);

/// Path fragments that mark a conversation-heavy route.
const CONVERSATION_PATHS: [&str; 3] = ["/api/chat", "/api/conversation", "/api/messages"];

/// Tier set used by [`select_tier`], overridable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSet {
    pub unauthenticated: RateLimitTier,
    pub authenticated: RateLimitTier,
    pub conversation: RateLimitTier,
}

impl Default for TierSet {
    fn default() -> Self {
        Self {
            unauthenticated: UNAUTHENTICATED,
            authenticated: AUTHENTICATED,
            conversation: CONVERSATION,
        }
    }
}

pub fn is_conversation_path(path: &str) -> bool {
    CONVERSATION_PATHS.iter().any(|p| path.contains(p))
}

/// Pick the tier for a request. Anonymous callers always get the strict
/// tier; authenticated callers on conversation routes get the
/// intermediate one.
pub fn select_tier(tiers: &TierSet, path: &str, authenticated: bool) -> RateLimitTier {
    match (authenticated, is_conversation_path(path)) {
        (false, _) => tiers.unauthenticated,
        (true, true) => tiers.conversation,
        (true, false) => tiers.authenticated,
    }
}

/// One admitted-or-denied request inside a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub timestamp_ms: i64,
    pub request_id: String,
}

/// Outcome of a rate-limit check.
///
/// `reset` is a unix timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Storage for per-key request windows.
///
/// `record` must behave as one atomic step: remove entries with
/// `timestamp_ms <= now_ms - window_ms`, add `entry`, and return the
/// number of entries now in the window (including `entry`).
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn record(&self, key: &str, entry: WindowEntry, window_ms: i64) -> Result<u64>;

    /// Drop every key whose window is empty. Backends may no-op.
    async fn sweep(&self, _now_ms: i64) -> Result<()> {
        Ok(())
    }
}

pub fn window_key(identifier: &str, tier: &RateLimitTier) -> String {
    format!(
        "rate_limit:{}:{}:{}",
        identifier, tier.max_requests, tier.window_secs
    )
}

/// Turn a post-insert window count into a decision.
pub fn decide(tier: &RateLimitTier, count: u64, now_ms: i64) -> RateLimitDecision {
    let max = u64::from(tier.max_requests);
    let success = count <= max;
    let reset = now_ms + tier.window_ms();
    let retry_after = if success {
        None
    } else {
        let wait_ms = (reset - now_ms).max(0) as u64;
        Some(wait_ms.div_ceil(1000))
    };
    RateLimitDecision {
        success,
        limit: tier.max_requests,
        remaining: max.saturating_sub(count) as u32,
        reset,
        retry_after,
    }
}

/// Decision returned when the backend is unavailable.
pub fn fail_open(tier: &RateLimitTier, now_ms: i64) -> RateLimitDecision {
    RateLimitDecision {
        success: true,
        limit: tier.max_requests,
        remaining: tier.max_requests.saturating_sub(1),
        reset: now_ms + tier.window_ms(),
        retry_after: None,
    }
}

/// Record a request for `identifier` and decide whether to admit it.
///
/// Backend errors are returned to the caller, which decides whether to
/// fail open.
pub async fn check_rate_limit(
    store: &dyn WindowStore,
    identifier: &str,
    tier: &RateLimitTier,
    now_ms: i64,
) -> Result<RateLimitDecision> {
    let key = window_key(identifier, tier);
    let entry = WindowEntry {
        timestamp_ms: now_ms,
        request_id: uuid::Uuid::new_v4().to_string(),
    };
    let count = store.record(&key, entry, tier.window_ms()).await?;
    Ok(decide(tier, count, now_ms))
}

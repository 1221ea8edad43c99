//! Rate limiting for the HTTP API.
//!
//! Window semantics live in `advisory_core::ratelimit`. This module adds:
//!
//! - [`SqliteWindowStore`]: a durable [`WindowStore`] in the service
//!   database, shared by every process that opens the same file.
//! - [`RateLimiter`]: backend chosen from `[rate_limit] backend`, tier
//!   selection, and fail-open on backend errors.
//! - Caller identification against the configured API secret.
//! - [`rate_limit_middleware`]: axum middleware applied to `/api` routes.
//!
//! # Identifiers
//!
//! | Caller | Identifier |
//! |--------|------------|
//! | valid `x-api-key` with `x-user-id` | `user:{id}` |
//! | valid `x-api-key` | `key:{first 10 hex chars of sha256(key)}` |
//! | anyone else | `ip:{first x-forwarded-for, else x-real-ip, else unknown}` |
//!
//! Only an `x-api-key` equal to `[server] api_secret` authenticates. An
//! `x-user-id` without it is ignored, and a wrong key is reported as an
//! `AUTH_FAIL` security event. With no secret configured every caller is
//! anonymous.

use std::sync::Arc;

use advisory_core::ratelimit::memory::InMemoryWindowStore;
use advisory_core::ratelimit::{
    check_rate_limit, fail_open, select_tier, RateLimitDecision, RateLimitTier, TierSet,
    WindowEntry, WindowStore,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::security::{SecurityEvent, SecurityEventKind, SecurityMonitor, Severity};

// ============ SQLite backend ============

/// Sliding windows stored in the `rate_limit_entries` table.
pub struct SqliteWindowStore {
    pool: SqlitePool,
}

impl SqliteWindowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WindowStore for SqliteWindowStore {
    async fn record(&self, key: &str, entry: WindowEntry, window_ms: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rate_limit_entries WHERE key = ? AND timestamp_ms <= ?")
            .bind(key)
            .bind(entry.timestamp_ms - window_ms)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO rate_limit_entries (key, request_id, timestamp_ms, window_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(&entry.request_id)
        .bind(entry.timestamp_ms)
        .bind(window_ms)
        .execute(&mut *tx)
        .await?;

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM rate_limit_entries WHERE key = ?")
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(count as u64)
    }

    async fn sweep(&self, now_ms: i64) -> Result<()> {
        sqlx::query("DELETE FROM rate_limit_entries WHERE timestamp_ms <= ? - window_ms")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============ Limiter ============

/// Result of a limiter check. `degraded` is set when the backend failed
/// and the request was admitted without counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitCheck {
    pub decision: RateLimitDecision,
    pub degraded: bool,
}

pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    tiers: TierSet,
    api_secret: Option<String>,
    security: Option<Arc<SecurityMonitor>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, tiers: TierSet) -> Self {
        Self {
            store,
            tiers,
            api_secret: None,
            security: None,
        }
    }

    /// Build the backend named by `rate_limit.backend`. The SQLite backend
    /// needs the service pool.
    pub fn from_config(config: &RateLimitConfig, pool: Option<SqlitePool>) -> Result<Self> {
        let store: Arc<dyn WindowStore> = match (config.backend.as_str(), pool) {
            ("memory", _) => Arc::new(InMemoryWindowStore::new()),
            ("sqlite", Some(pool)) => Arc::new(SqliteWindowStore::new(pool)),
            ("sqlite", None) => bail!("rate_limit backend 'sqlite' requires a database pool"),
            (other, _) => bail!("Unknown rate_limit backend: {}", other),
        };
        Ok(Self::new(store, config.tiers()))
    }

    /// Report denied requests and rejected keys to `monitor`.
    pub fn with_security(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.security = Some(monitor);
        self
    }

    /// Secret an `x-api-key` must match to authenticate.
    pub fn with_api_secret(mut self, secret: Option<String>) -> Self {
        self.api_secret = secret;
        self
    }

    pub fn identify(&self, headers: &HeaderMap) -> Caller {
        identify(headers, self.api_secret.as_deref())
    }

    pub fn tier_for(&self, path: &str, authenticated: bool) -> RateLimitTier {
        select_tier(&self.tiers, path, authenticated)
    }

    /// Record one request. Never fails: backend errors admit the request.
    pub async fn check(&self, identifier: &str, tier: &RateLimitTier) -> LimitCheck {
        let now_ms = chrono::Utc::now().timestamp_millis();
        match check_rate_limit(self.store.as_ref(), identifier, tier, now_ms).await {
            Ok(decision) => LimitCheck {
                decision,
                degraded: false,
            },
            Err(e) => {
                warn!(identifier, error = %e, "rate limit backend failed, admitting request");
                LimitCheck {
                    decision: fail_open(tier, now_ms),
                    degraded: true,
                }
            }
        }
    }

    pub async fn sweep(&self) -> Result<()> {
        self.store
            .sweep(chrono::Utc::now().timestamp_millis())
            .await
    }

    fn report_denial(&self, identifier: &str, path: &str, headers: &HeaderMap) {
        let Some(monitor) = &self.security else {
            return;
        };
        let mut event = SecurityEvent::new(SecurityEventKind::RateLimit, Severity::Info)
            .endpoint(path)
            .ip(client_ip(headers))
            .detail("identifier", identifier);
        if let Some(user) = header_str(headers, "x-user-id") {
            event = event.user_id(user);
        }
        monitor.record(event);
    }

    fn report_rejected_key(&self, path: &str, headers: &HeaderMap) {
        let Some(monitor) = &self.security else {
            return;
        };
        monitor.record(
            SecurityEvent::new(SecurityEventKind::AuthFail, Severity::Warn)
                .endpoint(path)
                .ip(client_ip(headers))
                .detail("reason", "invalid api key"),
        );
    }
}

// ============ Identifiers ============

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First `x-forwarded-for` hop, else `x-real-ip`, else `unknown`.
pub fn client_ip(headers: &HeaderMap) -> String {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .unwrap_or("unknown")
        .to_string()
}

pub fn client_identifier(headers: &HeaderMap) -> String {
    format!("ip:{}", client_ip(headers))
}

pub fn api_key_identifier(api_key: &str) -> String {
    let digest = hex::encode(Sha256::digest(api_key.as_bytes()));
    format!("key:{}", &digest[..10])
}

/// Who sent a request, as far as the rate limiter is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identifier: String,
    pub authenticated: bool,
    /// An `x-api-key` was presented and did not match.
    pub rejected_key: bool,
}

fn secret_matches(presented: &str, secret: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(secret.as_bytes())
}

/// Identify a request. Authenticated only when `x-api-key` equals
/// `api_secret`; `x-user-id` then narrows the identifier to one user.
pub fn identify(headers: &HeaderMap, api_secret: Option<&str>) -> Caller {
    let key = header_str(headers, "x-api-key");
    let authenticated = match (key, api_secret) {
        (Some(key), Some(secret)) => secret_matches(key, secret),
        _ => false,
    };

    let identifier = match (authenticated, key) {
        (true, Some(key)) => header_str(headers, "x-user-id")
            .map(|user| format!("user:{}", user))
            .unwrap_or_else(|| api_key_identifier(key)),
        _ => client_identifier(headers),
    };

    Caller {
        identifier,
        authenticated,
        rejected_key: key.is_some() && !authenticated,
    }
}

// ============ Middleware ============

/// Admit or reject `/api` requests; other paths pass through untouched.
///
/// Admitted responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining`,
/// and `X-RateLimit-Reset`. Rejections are `429` with `Retry-After` and a
/// JSON body `{error, message, retryAfter}`.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !path.starts_with("/api") {
        return next.run(request).await;
    }

    let caller = limiter.identify(request.headers());
    if caller.rejected_key {
        limiter.report_rejected_key(&path, request.headers());
    }
    let tier = limiter.tier_for(&path, caller.authenticated);
    let check = limiter.check(&caller.identifier, &tier).await;

    if !check.decision.success {
        limiter.report_denial(&caller.identifier, &path, request.headers());
        let retry_after = check.decision.retry_after.unwrap_or(tier.window_secs);
        let body = serde_json::json!({
            "error": "Too many requests",
            "message": "Rate limit exceeded. Please try again later.",
            "retryAfter": retry_after,
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        apply_headers(response.headers_mut(), &check);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &check);
    response
}

fn apply_headers(headers: &mut HeaderMap, check: &LimitCheck) {
    let d = &check.decision;
    headers.insert("X-RateLimit-Limit", HeaderValue::from(d.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(d.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(d.reset));
    if let Some(retry_after) = d.retry_after {
        headers.insert("Retry-After", HeaderValue::from(retry_after));
    }
    if check.degraded {
        headers.insert("X-RateLimit-Error", HeaderValue::from_static("unavailable"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    #[async_trait]
    impl WindowStore for BrokenStore {
        async fn record(&self, _: &str, _: WindowEntry, _: i64) -> Result<u64> {
            bail!("connection refused")
        }
    }

    async fn sqlite_store() -> (SqliteWindowStore, tempfile::TempDir) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config: crate::config::Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\n[server]\nbind = \"127.0.0.1:0\"\n",
            tmp.path().join("rl.sqlite").display()
        ))
        .unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::create_tables(&pool).await.unwrap();
        (SqliteWindowStore::new(pool), tmp)
    }

    #[tokio::test]
    async fn test_sqlite_store_matches_memory_semantics() {
        let (sqlite, _tmp) = sqlite_store().await;
        let memory = InMemoryWindowStore::with_sweep_probability(0.0);
        let tier = RateLimitTier::new(2, 10);

        for t in [0, 5_000, 9_000, 10_000, 19_000, 19_500] {
            let a = check_rate_limit(&sqlite, "ip:1.1.1.1", &tier, t).await.unwrap();
            let b = check_rate_limit(&memory, "ip:1.1.1.1", &tier, t).await.unwrap();
            assert_eq!(a, b, "decisions diverged at t={}", t);
        }
    }

    #[tokio::test]
    async fn test_sqlite_sixth_request_denied() {
        let (sqlite, _tmp) = sqlite_store().await;
        let tier = RateLimitTier::new(5, 60);
        for i in 0..5 {
            let d = check_rate_limit(&sqlite, "ip:a", &tier, i * 100).await.unwrap();
            assert!(d.success);
        }
        let d = check_rate_limit(&sqlite, "ip:a", &tier, 600).await.unwrap();
        assert!(!d.success);
        assert_eq!(d.retry_after, Some(60));
    }

    #[tokio::test]
    async fn test_sqlite_sweep_removes_expired_rows() {
        let (sqlite, _tmp) = sqlite_store().await;
        let tier = RateLimitTier::new(5, 1);
        check_rate_limit(&sqlite, "ip:a", &tier, 0).await.unwrap();
        check_rate_limit(&sqlite, "ip:b", &tier, 900).await.unwrap();
        sqlite.sweep(1_500).await.unwrap();

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rate_limit_entries")
            .fetch_one(&sqlite.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore), TierSet::default());
        let tier = limiter.tier_for("/api/chat", false);
        let check = limiter.check("ip:1.2.3.4", &tier).await;
        assert!(check.degraded);
        assert!(check.decision.success);
        assert_eq!(check.decision.remaining, tier.max_requests - 1);
    }

    const SECRET: Option<&str> = Some("secret-key");

    #[test]
    fn test_identifiers() {
        let mut headers = HeaderMap::new();
        let anonymous = identify(&headers, SECRET);
        assert_eq!(anonymous.identifier, "ip:unknown");
        assert!(!anonymous.authenticated);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_identifier(&headers), "ip:10.0.0.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_identifier(&headers), "ip:203.0.113.7");

        headers.insert("x-api-key", HeaderValue::from_static("secret-key"));
        let caller = identify(&headers, SECRET);
        assert!(caller.authenticated);
        assert!(!caller.rejected_key);
        assert!(caller.identifier.starts_with("key:"));
        assert_eq!(caller.identifier.len(), "key:".len() + 10);
        assert!(!caller.identifier.contains("secret"));

        headers.insert("x-user-id", HeaderValue::from_static("u-42"));
        let caller = identify(&headers, SECRET);
        assert_eq!(caller.identifier, "user:u-42");
        assert!(caller.authenticated);
    }

    #[test]
    fn test_unverified_headers_stay_anonymous() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7"));
        headers.insert("x-user-id", HeaderValue::from_static("anon-1"));
        let caller = identify(&headers, SECRET);
        assert_eq!(caller.identifier, "ip:198.51.100.7");
        assert!(!caller.authenticated);
        assert!(!caller.rejected_key);

        headers.insert("x-api-key", HeaderValue::from_static("guessed"));
        let caller = identify(&headers, SECRET);
        assert_eq!(caller.identifier, "ip:198.51.100.7");
        assert!(!caller.authenticated);
        assert!(caller.rejected_key);

        headers.insert("x-api-key", HeaderValue::from_static("secret-key"));
        let caller = identify(&headers, None);
        assert!(!caller.authenticated);
        assert_eq!(caller.identifier, "ip:198.51.100.7");
    }

    #[tokio::test]
    async fn test_rotating_user_ids_share_one_window() {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryWindowStore::with_sweep_probability(0.0)),
            TierSet::default(),
        )
        .with_api_secret(Some("secret-key".into()));

        let mut admitted = 0;
        for i in 0..12 {
            let mut headers = HeaderMap::new();
            headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7"));
            headers.insert(
                "x-user-id",
                HeaderValue::from_str(&format!("anon-{}", i)).unwrap(),
            );
            let caller = limiter.identify(&headers);
            let tier = limiter.tier_for("/api/recommendations", caller.authenticated);
            if limiter.check(&caller.identifier, &tier).await.decision.success {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_from_config_requires_pool_for_sqlite() {
        let mut config = RateLimitConfig::default();
        assert!(RateLimiter::from_config(&config, None).is_ok());
        config.backend = "sqlite".into();
        assert!(RateLimiter::from_config(&config, None).is_err());
    }
}

//! Security event monitoring.
//!
//! Handlers report notable events (rate-limit hits, validation failures,
//! authentication failures) to the [`SecurityMonitor`]. Each event is
//! scrubbed, logged through `tracing` at its severity, and counted per
//! `(kind, identifier)`, where the identifier is the user id, else the IP.
//!
//! | Kind | Threshold |
//! |------|-----------|
//! | `AUTH_FAIL` | 5 in 5 min |
//! | `VALIDATION_FAIL` | 10 in 1 min |
//! | `API_ABUSE` | 3 in 1 min |
//! | `RATE_LIMIT` | 3 in 1 min |
//! | `DB_ERROR` | 5 in 5 min |
//!
//! Reaching a threshold raises one [`SecurityAlert`], logged at `error!`.
//! Further events for the same key raise no new alert until a full window
//! has passed since the last one.
//!
//! [`SecurityMonitor::cleanup`] bounds memory: event timestamps are kept
//! for 24 hours and alerts for 7 days. The server runs it on the rate
//! limiter's sweep interval.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_FIELDS: [&str; 5] = ["password", "token", "apiKey", "secret", "key"];
const RETENTION_HOURS: i64 = 24;
const ALERT_RETENTION_DAYS: i64 = 7;

static CARD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b").expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    AuthSuccess,
    AuthFail,
    RateLimit,
    ValidationFail,
    ApiAbuse,
    DbError,
    SuspiciousActivity,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::AuthSuccess => "AUTH_SUCCESS",
            SecurityEventKind::AuthFail => "AUTH_FAIL",
            SecurityEventKind::RateLimit => "RATE_LIMIT",
            SecurityEventKind::ValidationFail => "VALIDATION_FAIL",
            SecurityEventKind::ApiAbuse => "API_ABUSE",
            SecurityEventKind::DbError => "DB_ERROR",
            SecurityEventKind::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub endpoint: Option<String>,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, severity: Severity) -> Self {
        Self {
            kind,
            severity,
            ip: None,
            user_id: None,
            endpoint: None,
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn identifier(&self) -> &str {
        self.user_id
            .as_deref()
            .or(self.ip.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    pub kind: SecurityEventKind,
    pub max_events: usize,
    pub window_minutes: i64,
    pub severity: Severity,
}

pub const THRESHOLDS: [Threshold; 5] = [
    Threshold {
        kind: SecurityEventKind::AuthFail,
        max_events: 5,
        window_minutes: 5,
        severity: Severity::Warn,
    },
    Threshold {
        kind: SecurityEventKind::ValidationFail,
        max_events: 10,
        window_minutes: 1,
        severity: Severity::Warn,
    },
    Threshold {
        kind: SecurityEventKind::ApiAbuse,
        max_events: 3,
        window_minutes: 1,
        severity: Severity::Error,
    },
    Threshold {
        kind: SecurityEventKind::RateLimit,
        max_events: 3,
        window_minutes: 1,
        severity: Severity::Info,
    },
    Threshold {
        kind: SecurityEventKind::DbError,
        max_events: 5,
        window_minutes: 5,
        severity: Severity::Error,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAlert {
    pub id: String,
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub identifier: String,
    pub event_count: usize,
    pub window_minutes: i64,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetrics {
    pub total_events: usize,
    pub alert_count: usize,
    pub events_by_kind: BTreeMap<String, usize>,
}

#[derive(Default)]
struct MonitorState {
    events: HashMap<(SecurityEventKind, String), VecDeque<DateTime<Utc>>>,
    last_alert: HashMap<(SecurityEventKind, String), DateTime<Utc>>,
    alerts: Vec<SecurityAlert>,
}

#[derive(Default)]
pub struct SecurityMonitor {
    state: Mutex<MonitorState>,
}

impl SecurityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scrub, log, count, and check thresholds. Returns the alert raised
    /// by this event, if any.
    pub fn record(&self, event: SecurityEvent) -> Option<SecurityAlert> {
        let event = scrub(event);
        log_event(&event);

        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        let now = event.timestamp;
        let key = (event.kind, event.identifier().to_string());

        let timestamps = state.events.entry(key.clone()).or_default();
        timestamps.push_back(now);
        let retention = now - Duration::hours(RETENTION_HOURS);
        while timestamps.front().is_some_and(|t| *t <= retention) {
            timestamps.pop_front();
        }

        let threshold = THRESHOLDS.iter().find(|t| t.kind == event.kind)?;
        let window_start = now - Duration::minutes(threshold.window_minutes);
        let recent = timestamps.iter().filter(|t| **t > window_start).count();
        if recent < threshold.max_events {
            return None;
        }
        if state
            .last_alert
            .get(&key)
            .is_some_and(|last| *last > window_start)
        {
            return None;
        }

        let alert = SecurityAlert {
            id: uuid::Uuid::new_v4().to_string(),
            kind: event.kind,
            severity: threshold.severity,
            identifier: key.1.clone(),
            event_count: recent,
            window_minutes: threshold.window_minutes,
            triggered_at: now,
        };
        error!(
            alert_id = %alert.id,
            kind = %alert.kind,
            identifier = %alert.identifier,
            event_count = alert.event_count,
            window_minutes = alert.window_minutes,
            "security threshold breached"
        );
        state.last_alert.insert(key, now);
        state.alerts.push(alert.clone());
        Some(alert)
    }

    /// Alerts raised within the last `hours`.
    pub fn alerts(&self, hours: i64) -> Vec<SecurityAlert> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.state
            .lock()
            .map(|s| {
                s.alerts
                    .iter()
                    .filter(|a| a.triggered_at > cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop events past retention, keys left without events, and alerts
    /// older than seven days. Returns the number of keys removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let retention = now - Duration::hours(RETENTION_HOURS);
        let before = state.events.len();
        state.events.retain(|_, timestamps| {
            while timestamps.front().is_some_and(|t| *t <= retention) {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });
        let removed = before - state.events.len();

        state.last_alert.retain(|_, at| *at > retention);
        let alert_cutoff = now - Duration::days(ALERT_RETENTION_DAYS);
        state.alerts.retain(|a| a.triggered_at > alert_cutoff);
        removed
    }

    pub fn metrics(&self) -> SecurityMetrics {
        let Ok(state) = self.state.lock() else {
            return SecurityMetrics::default();
        };
        let mut metrics = SecurityMetrics {
            alert_count: state.alerts.len(),
            ..SecurityMetrics::default()
        };
        for ((kind, _), timestamps) in &state.events {
            metrics.total_events += timestamps.len();
            *metrics
                .events_by_kind
                .entry(kind.as_str().to_string())
                .or_default() += timestamps.len();
        }
        metrics
    }
}

fn log_event(event: &SecurityEvent) {
    let details = Value::Object(event.details.clone());
    let ip = event.ip.as_deref().unwrap_or("-");
    let user_id = event.user_id.as_deref().unwrap_or("-");
    let endpoint = event.endpoint.as_deref().unwrap_or("-");
    match event.severity {
        Severity::Info => info!(kind = %event.kind, ip, user_id, endpoint, %details, "security event"),
        Severity::Warn => warn!(kind = %event.kind, ip, user_id, endpoint, %details, "security event"),
        Severity::Error => error!(kind = %event.kind, ip, user_id, endpoint, %details, "security event"),
    }
}

/// Redact sensitive detail fields and mask card numbers in string values.
pub fn scrub(mut event: SecurityEvent) -> SecurityEvent {
    for (field, value) in event.details.iter_mut() {
        if SENSITIVE_FIELDS.contains(&field.as_str()) {
            *value = Value::String(REDACTED.to_string());
        } else if let Value::String(text) = value {
            if CARD_RE.is_match(text) {
                *text = CARD_RE.replace_all(text, "[CARD]").into_owned();
            }
        }
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limit_hit(ip: &str, at: DateTime<Utc>) -> SecurityEvent {
        SecurityEvent::new(SecurityEventKind::RateLimit, Severity::Info)
            .ip(ip)
            .endpoint("/api/chat")
            .at(at)
    }

    #[test]
    fn test_scrub_redacts_fields_and_cards() {
        let event = SecurityEvent::new(SecurityEventKind::AuthFail, Severity::Warn)
            .detail("password", "hunter2")
            .detail("apiKey", "sk-live-123")
            .detail("note", "paid with 4111 1111 1111 1111 yesterday")
            .detail("attempts", 3);
        let scrubbed = scrub(event);
        assert_eq!(scrubbed.details["password"], REDACTED);
        assert_eq!(scrubbed.details["apiKey"], REDACTED);
        assert_eq!(scrubbed.details["note"], "paid with [CARD] yesterday");
        assert_eq!(scrubbed.details["attempts"], 3);
    }

    #[test]
    fn test_threshold_raises_single_alert_per_window() {
        let monitor = SecurityMonitor::new();
        let t0 = Utc::now();

        assert!(monitor.record(rate_limit_hit("1.2.3.4", t0)).is_none());
        assert!(monitor
            .record(rate_limit_hit("1.2.3.4", t0 + Duration::seconds(1)))
            .is_none());
        let alert = monitor
            .record(rate_limit_hit("1.2.3.4", t0 + Duration::seconds(2)))
            .unwrap();
        assert_eq!(alert.kind, SecurityEventKind::RateLimit);
        assert_eq!(alert.identifier, "1.2.3.4");
        assert_eq!(alert.event_count, 3);

        // Same window: suppressed.
        assert!(monitor
            .record(rate_limit_hit("1.2.3.4", t0 + Duration::seconds(3)))
            .is_none());
        // Another IP is counted separately.
        assert!(monitor
            .record(rate_limit_hit("5.6.7.8", t0 + Duration::seconds(3)))
            .is_none());

        // A minute after the alert, three fresh events alert again.
        let later = t0 + Duration::seconds(70);
        monitor.record(rate_limit_hit("1.2.3.4", later));
        monitor.record(rate_limit_hit("1.2.3.4", later + Duration::seconds(1)));
        assert!(monitor
            .record(rate_limit_hit("1.2.3.4", later + Duration::seconds(2)))
            .is_some());

        assert_eq!(monitor.alerts(24).len(), 2);
    }

    #[test]
    fn test_events_outside_window_do_not_count() {
        let monitor = SecurityMonitor::new();
        let t0 = Utc::now();
        for i in 0..4 {
            let alert = monitor.record(rate_limit_hit("9.9.9.9", t0 + Duration::seconds(i * 40)));
            assert!(alert.is_none(), "event {} should not alert", i);
        }
    }

    #[test]
    fn test_user_id_takes_precedence_over_ip() {
        let monitor = SecurityMonitor::new();
        let t0 = Utc::now();
        for i in 0..5 {
            let event = SecurityEvent::new(SecurityEventKind::AuthFail, Severity::Warn)
                .ip(format!("10.0.0.{}", i))
                .user_id("alice")
                .at(t0 + Duration::seconds(i));
            let alert = monitor.record(event);
            assert_eq!(alert.is_some(), i == 4);
        }
    }

    #[test]
    fn test_metrics() {
        let monitor = SecurityMonitor::new();
        monitor.record(rate_limit_hit("1.1.1.1", Utc::now()));
        monitor.record(
            SecurityEvent::new(SecurityEventKind::ValidationFail, Severity::Warn).ip("1.1.1.1"),
        );
        let metrics = monitor.metrics();
        assert_eq!(metrics.total_events, 2);
        assert_eq!(metrics.events_by_kind.get("RATE_LIMIT"), Some(&1));
        assert_eq!(metrics.alert_count, 0);
    }

    #[test]
    fn test_cleanup_bounds_memory() {
        let monitor = SecurityMonitor::new();
        let now = Utc::now();

        let old = now - Duration::days(8);
        for i in 0..3 {
            monitor.record(rate_limit_hit("7.7.7.7", old + Duration::seconds(i)));
        }
        let recent = now - Duration::hours(1);
        for i in 0..3 {
            monitor.record(rate_limit_hit("8.8.8.8", recent + Duration::seconds(i)));
        }
        for i in 0..500 {
            monitor.record(rate_limit_hit(
                &format!("203.0.113.{}", i),
                now - Duration::hours(25),
            ));
        }
        assert_eq!(monitor.state.lock().unwrap().events.len(), 502);

        let removed = monitor.cleanup(now);
        assert_eq!(removed, 501);

        let state = monitor.state.lock().unwrap();
        assert_eq!(state.events.len(), 1);
        assert!(state
            .events
            .contains_key(&(SecurityEventKind::RateLimit, "8.8.8.8".to_string())));
        assert_eq!(state.last_alert.len(), 1);
        assert_eq!(state.alerts.len(), 1);
        assert_eq!(state.alerts[0].identifier, "8.8.8.8");
    }
}

//! Audit trail for entitlement decisions.
//!
//! Every grant, denial, quota mutation and profile lifecycle change is
//! emitted as a structured event on the `audit` tracing target, so it can be
//! routed separately from diagnostics. User ids are partially redacted and
//! free-text errors are scrubbed of credentials before logging.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A workflow request passed every gate check.
    AccessGranted,
    /// A workflow or resource request was refused.
    AccessDenied,
    /// The daily counter was reset on a new calendar day.
    QuotaReset,
    /// A successful call was counted against the quota.
    UsageCommitted,
    /// The gated work failed; no quota was consumed.
    WorkflowFailed,
    /// A custom voice profile was created.
    VoiceProfileCreated,
    /// A custom voice profile was replaced.
    VoiceProfileUpdated,
    /// A custom voice profile was deleted.
    VoiceProfileDeleted,
    /// A user addressed a profile they do not own.
    OwnershipViolation,
    /// Bearer token verification failed.
    AuthenticationFailed,
    /// An entitlement record was created by provisioning.
    UserProvisioned,
    /// An entitlement record was removed by account deletion.
    UserRemoved,
    /// A client address exceeded its request rate.
    RateLimitExceeded,
}

/// Contextual details of an audit entry. Absent fields are not serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditDetails {
    /// Workflow or resource involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Profile name requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Effective tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// Machine-readable denial reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Usage count after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_count: Option<u32>,
    /// Id of the affected resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Error message, redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Duration of the operation in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Audit log entry.
///
/// # Examples
///
/// ```
/// use textval_gate::security::audit::{AuditEvent, AuditEventType, audit_log};
/// use uuid::Uuid;
///
/// let event = AuditEvent::new(AuditEventType::AccessDenied, "user_2abcdef123", Uuid::new_v4())
///     .with_feature("validator")
///     .with_profile("Generico")
///     .with_reason("quota_exceeded");
///
/// audit_log(&event);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: SystemTime,
    /// What happened.
    pub event_type: AuditEventType,
    /// Who it happened to, redacted.
    pub user: String,
    /// Request correlation id.
    pub request_id: Uuid,
    /// Contextual information.
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Creates an event; the user id is redacted on the way in.
    #[must_use]
    pub fn new(event_type: AuditEventType, user_id: &str, request_id: Uuid) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            user: redact_user_id(user_id),
            request_id,
            details: AuditDetails::default(),
        }
    }

    /// Adds the workflow or resource name.
    #[must_use]
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.details.feature = Some(feature.into());
        self
    }

    /// Adds the requested profile name.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.details.profile = Some(profile.into());
        self
    }

    /// Adds the effective tier.
    #[must_use]
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.details.tier = Some(tier.into());
        self
    }

    /// Adds a denial reason code.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.details.reason = Some(reason.into());
        self
    }

    /// Adds the usage count after the event.
    #[must_use]
    pub fn with_usage_count(mut self, count: u32) -> Self {
        self.details.usage_count = Some(count);
        self
    }

    /// Adds the id of the affected resource.
    #[must_use]
    pub fn with_resource_id(mut self, id: impl ToString) -> Self {
        self.details.resource_id = Some(id.to_string());
        self
    }

    /// Adds an error message, scrubbed by [`redact_sensitive`].
    #[must_use]
    pub fn with_error(mut self, error: impl AsRef<str>) -> Self {
        self.details.error = Some(redact_sensitive(error.as_ref()));
        self
    }

    /// Adds the operation duration.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        reason = "duration in ms fits u64 for practical values"
    )]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.details.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    /// Emits the event.
    pub fn emit(&self) {
        audit_log(self);
    }
}

/// Logs an audit event to tracing with target `audit`.
pub fn audit_log(event: &AuditEvent) {
    tracing::info!(
        target: "audit",
        timestamp = ?event.timestamp,
        event_type = ?event.event_type,
        user = %event.user,
        request_id = %event.request_id,
        details = ?event.details,
        "AUDIT"
    );
}

const REDACTED: &str = "[REDACTED]";

/// Scrubs credentials from free text before it is logged.
///
/// - `Bearer <token>` keeps the scheme and drops the token
/// - `key=<value>`, `apikey=<value>` and `token=<value>` query parameters lose their value
/// - compact JWTs (`eyJ...` with three dot-separated segments) are replaced
///
/// # Examples
///
/// ```
/// use textval_gate::security::audit::redact_sensitive;
///
/// let msg = "GET https://api.example.com/v1?key=AIzaSyA123 failed";
/// assert_eq!(redact_sensitive(msg), "GET https://api.example.com/v1?key=[REDACTED] failed");
///
/// assert_eq!(redact_sensitive("Authorization: Bearer abc.def"), "Authorization: Bearer [REDACTED]");
/// ```
#[must_use]
pub fn redact_sensitive(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut redact_next_word = false;

    for (i, piece) in input.split(' ').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if redact_next_word && !piece.is_empty() {
            out.push_str(REDACTED);
            redact_next_word = false;
            continue;
        }
        if piece.eq_ignore_ascii_case("bearer") {
            redact_next_word = true;
            out.push_str(piece);
            continue;
        }
        if looks_like_jwt(piece) {
            out.push_str(REDACTED);
            continue;
        }
        out.push_str(&redact_query_secrets(piece));
    }

    out
}

fn looks_like_jwt(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_');
    word.starts_with("eyJ")
        && word.split('.').count() == 3
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '='))
}

fn redact_query_secrets(word: &str) -> String {
    const SECRET_PARAMS: [&str; 3] = ["key=", "apikey=", "token="];

    let mut out = String::with_capacity(word.len());
    let mut rest = word;
    loop {
        let found = SECRET_PARAMS
            .iter()
            .filter_map(|param| find_param(rest, param).map(|pos| (pos, pos + param.len())))
            .min_by_key(|(pos, _)| *pos);

        let Some((_, value_start)) = found else {
            out.push_str(rest);
            return out;
        };

        out.push_str(&rest[..value_start]);
        let value_len =
            rest[value_start..].find(['&', '#', '"', '\'']).unwrap_or(rest.len() - value_start);
        if value_len > 0 {
            out.push_str(REDACTED);
        }
        rest = &rest[value_start + value_len..];
    }
}

/// Finds `param` at a parameter boundary (start, `?` or `&`).
fn find_param(haystack: &str, param: &str) -> Option<usize> {
    haystack.match_indices(param).map(|(pos, _)| pos).find(|&pos| {
        pos == 0 || matches!(haystack.as_bytes()[pos - 1], b'?' | b'&')
    })
}

/// Redacts a user id to its prefix and last 4 characters.
///
/// Identity-provider ids look like `user_2NNEqL2nrIRdJ194ndJqAHwEfxC`;
/// the `user_` prefix is kept for readability.
///
/// # Examples
///
/// ```
/// use textval_gate::security::audit::redact_user_id;
///
/// assert_eq!(redact_user_id("user_2NNEqL2nrIRd"), "user_********rIRd");
/// assert_eq!(redact_user_id("abcd"), "abcd");
/// ```
#[must_use]
pub fn redact_user_id(user_id: &str) -> String {
    let chars: Vec<char> = user_id.chars().collect();
    if chars.len() <= 4 {
        return user_id.to_owned();
    }

    let prefix_len = user_id.find('_').map_or(0, |pos| user_id[..=pos].chars().count());
    let suffix_start = chars.len() - 4;
    if prefix_len >= suffix_start {
        return user_id.to_owned();
    }

    let mut out: String = chars[..prefix_len].iter().collect();
    out.extend(std::iter::repeat_n('*', suffix_start - prefix_len));
    out.extend(&chars[suffix_start..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new(AuditEventType::AccessGranted, "user_abcdef1234", Uuid::nil())
            .with_feature("validator")
            .with_profile("Generico")
            .with_tier("free")
            .with_usage_count(3)
            .with_duration(Duration::from_millis(1250));

        assert_eq!(event.user, "user_******1234");
        assert_eq!(event.details.feature.as_deref(), Some("validator"));
        assert_eq!(event.details.usage_count, Some(3));
        assert_eq!(event.details.duration_ms, Some(1250));
        assert!(event.details.error.is_none());
    }

    #[test]
    fn test_event_serializes_without_empty_details() {
        let event = AuditEvent::new(AuditEventType::QuotaReset, "u", Uuid::nil());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "quota_reset");
        assert_eq!(json["details"], serde_json::json!({}));
    }

    #[test]
    fn test_with_error_redacts() {
        let event = AuditEvent::new(AuditEventType::WorkflowFailed, "user_1", Uuid::nil())
            .with_error("request to https://x.test/v1?alt=json&key=SECRET123 timed out");
        assert_eq!(
            event.details.error.as_deref(),
            Some("request to https://x.test/v1?alt=json&key=[REDACTED] timed out")
        );
    }

    #[test]
    fn test_redact_bearer() {
        assert_eq!(redact_sensitive("bearer   tok"), "bearer   [REDACTED]");
        assert_eq!(redact_sensitive("no secrets here"), "no secrets here");
    }

    #[test]
    fn test_redact_jwt() {
        let msg = "invalid token eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiJ1In0.c2ln: expired";
        assert_eq!(redact_sensitive(msg), "invalid token [REDACTED] expired");
    }

    #[test]
    fn test_redact_query_param_boundaries() {
        assert_eq!(redact_sensitive("monkey=banana"), "monkey=banana");
        assert_eq!(redact_sensitive("?apikey=abc&x=1"), "?apikey=[REDACTED]&x=1");
        assert_eq!(redact_sensitive("?token=&x=1"), "?token=&x=1");
    }

    #[test]
    fn test_redact_user_id() {
        assert_eq!(redact_user_id("user_2NNEqL2nrIRd"), "user_********rIRd");
        assert_eq!(redact_user_id("plainidentifier"), "***********fier");
        assert_eq!(redact_user_id("abc"), "abc");
        assert_eq!(redact_user_id("user_ab"), "user_ab");
    }
}

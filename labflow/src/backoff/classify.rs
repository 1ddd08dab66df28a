//! Failure classification and server-supplied backoff hints.

use super::BackoffPolicy;
use crate::errors::{LabflowError, RemoteError, RemoteErrorKind};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// HTTP statuses retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Message tokens that mark a provider throttling failure (matched case-insensitively).
pub const DEFAULT_MESSAGE_TOKENS: [&str; 4] = [
    "RESOURCE_EXHAUSTED",
    "RATE_LIMIT",
    "UNAVAILABLE",
    "DEADLINE_EXCEEDED",
];

/// Result of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    /// Whether the failure may be retried.
    pub retryable: bool,
    /// Server-supplied wait, preferred over computed backoff.
    pub wait_hint: Option<Duration>,
}

impl Classification {
    /// A fatal classification.
    #[must_use]
    pub const fn fatal() -> Self {
        Self {
            retryable: false,
            wait_hint: None,
        }
    }

    /// A retryable classification with an optional hint.
    #[must_use]
    pub const fn retryable(wait_hint: Option<Duration>) -> Self {
        Self {
            retryable: true,
            wait_hint,
        }
    }
}

/// Errors that a [`BackoffPolicy`] knows how to classify.
pub trait ClassifyError {
    /// Classifies this error under the given policy.
    fn classify_with(&self, policy: &BackoffPolicy) -> Classification;
}

impl ClassifyError for RemoteError {
    fn classify_with(&self, policy: &BackoffPolicy) -> Classification {
        let retryable = match self.kind {
            RemoteErrorKind::Connect | RemoteErrorKind::Timeout => true,
            RemoteErrorKind::Status(code) => policy.retry_statuses.contains(&code),
            RemoteErrorKind::Decode | RemoteErrorKind::Provider => false,
        } || policy.matches_message_token(&self.message);

        if !retryable {
            return Classification::fatal();
        }

        let wait_hint = self
            .retry_after
            .as_deref()
            .and_then(retry_after_hint)
            .or_else(|| self.body.as_deref().and_then(retry_info_hint))
            .or_else(|| retry_info_hint(&self.message));

        Classification::retryable(wait_hint)
    }
}

impl ClassifyError for LabflowError {
    fn classify_with(&self, policy: &BackoffPolicy) -> Classification {
        match self {
            Self::TransientNetwork(err) => {
                let inner = err.classify_with(policy);
                Classification::retryable(inner.wait_hint)
            }
            _ => Classification::fatal(),
        }
    }
}

/// Parses a `Retry-After` header value.
///
/// Only purely numeric values (seconds) are honored; HTTP dates are ignored.
#[must_use]
pub fn retry_after_hint(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Extracts a `retryDelay` from a structured `RetryInfo` payload embedded in an error body.
///
/// The payload may be the whole body or a JSON object embedded in a longer message.
#[must_use]
pub fn retry_info_hint(body: &str) -> Option<Duration> {
    let value = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .or_else(|| {
            let start = body.find('{')?;
            let end = body.rfind('}')?;
            if end <= start {
                return None;
            }
            serde_json::from_str(&body[start..=end]).ok()
        })?;

    find_retry_delay(&value).map(Duration::from_secs)
}

fn find_retry_delay(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Object(map) => {
            let typed_retry_info = map
                .get("@type")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|t| t.ends_with("RetryInfo"));
            if typed_retry_info {
                if let Some(secs) = map.get("retryDelay").and_then(parse_retry_delay) {
                    return Some(secs);
                }
            }

            for (key, nested) in map {
                if key.ends_with("RetryInfo") {
                    if let Some(secs) = nested.get("retryDelay").and_then(parse_retry_delay) {
                        return Some(secs);
                    }
                }
                if let Some(secs) = find_retry_delay(nested) {
                    return Some(secs);
                }
            }
            None
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_retry_delay),
        _ => None,
    }
}

#[allow(clippy::expect_used)]
static RETRY_DELAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)s\s*$").expect("retry delay pattern is valid"));

fn parse_retry_delay(value: &serde_json::Value) -> Option<u64> {
    let raw = value.as_str()?;
    RETRY_DELAY.captures(raw)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::primary()
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            let class = policy().classify(&RemoteError::status(code, "x"));
            assert!(class.retryable, "status {code} should be retryable");
        }
    }

    #[test]
    fn test_fatal_statuses() {
        for code in [400, 401, 403, 404, 422] {
            let class = policy().classify(&RemoteError::status(code, "bad request"));
            assert!(!class.retryable, "status {code} should be fatal");
        }
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        assert!(policy().classify(&RemoteError::connect("refused")).retryable);
        assert!(policy().classify(&RemoteError::timeout("read timed out")).retryable);
        assert!(!policy().classify(&RemoteError::decode("bad json")).retryable);
    }

    #[test]
    fn test_message_tokens_case_insensitive() {
        let err = RemoteError::provider("429 resource_exhausted: quota");
        assert!(policy().classify(&err).retryable);

        let err = RemoteError::provider("Service Unavailable, try later");
        assert!(policy().classify(&err).retryable);

        let err = RemoteError::provider("invalid argument");
        assert!(!policy().classify(&err).retryable);
    }

    #[test]
    fn test_message_tokens_can_be_disabled() {
        let policy = BackoffPolicy::vcs().with_message_tokens(Vec::<String>::new());
        let err = RemoteError::provider("RATE_LIMIT exceeded");
        assert!(!policy.classify(&err).retryable);
    }

    #[test]
    fn test_retry_after_hint() {
        assert_eq!(retry_after_hint("5"), Some(Duration::from_secs(5)));
        assert_eq!(retry_after_hint(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(retry_after_hint("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(retry_after_hint("1.5"), None);
        assert_eq!(retry_after_hint(""), None);
    }

    #[test]
    fn test_retry_info_hint_typed_detail() {
        let body = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","details":[
            {"@type":"type.googleapis.com/google.rpc.QuotaFailure"},
            {"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"17s"}]}}"#;
        assert_eq!(retry_info_hint(body), Some(Duration::from_secs(17)));
    }

    #[test]
    fn test_retry_info_hint_keyed_field() {
        let body = r#"{"details":{"google.rpc.RetryInfo":{"retryDelay":"3s"}}}"#;
        assert_eq!(retry_info_hint(body), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_retry_info_hint_embedded_in_message() {
        let message = r#"429 RESOURCE_EXHAUSTED. {"@type": "RetryInfo", "retryDelay": "42s"}"#;
        assert_eq!(retry_info_hint(message), Some(Duration::from_secs(42)));
    }

    #[test]
    fn test_retry_info_hint_malformed_delay() {
        let body = r#"{"@type":"RetryInfo","retryDelay":"soon"}"#;
        assert_eq!(retry_info_hint(body), None);
        assert_eq!(retry_info_hint("not json at all"), None);
    }

    #[test]
    fn test_header_hint_preferred_over_body() {
        let err = RemoteError::status(429, "slow down")
            .with_retry_after("5")
            .with_body(r#"{"@type":"RetryInfo","retryDelay":"30s"}"#);
        let class = policy().classify(&err);
        assert_eq!(class.wait_hint, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_fatal_errors_carry_no_hint() {
        let err = RemoteError::status(400, "bad").with_retry_after("5");
        assert_eq!(policy().classify(&err), Classification::fatal());
    }

    #[test]
    fn test_labflow_error_classification() {
        let transient = LabflowError::TransientNetwork(RemoteError::status(503, "down"));
        let fatal = LabflowError::FatalRemote(RemoteError::status(404, "missing"));
        let failed = LabflowError::JobFailed {
            run_id: 1,
            conclusion: "failure".to_string(),
        };

        assert!(policy().classify(&transient).retryable);
        assert!(!policy().classify(&fatal).retryable);
        assert!(!policy().classify(&failed).retryable);
    }
}

//! Error classification shared by every adapter.
//!
//! Order of evidence: HTTP status, then structured JSON error fields, then
//! substring matching on the message as a last resort.

use super::sanitize::sanitize_api_error;
use crate::error::{AiError, ErrorKind};
use serde_json::Value;

/// Classify a failed upstream response.
pub fn classify_response(provider: &str, status: u16, body: &str) -> AiError {
    let message = format!("HTTP {}: {}", status, sanitize_api_error(body));
    let kind = kind_from_status(status)
        .or_else(|| kind_from_body(body))
        .unwrap_or_else(|| kind_from_message(&message));
    AiError::new(provider, kind, message).with_status(status)
}

/// Classify a failure that carries only a message (transport errors,
/// malformed bodies, provider-reported failures inside a 200).
pub fn classify_message(provider: &str, message: &str) -> AiError {
    let message = sanitize_api_error(message);
    let kind = kind_from_message(&message);
    AiError::new(provider, kind, message)
}

/// Classify a transport-level `reqwest` failure.
pub fn classify_transport(provider: &str, err: &reqwest::Error) -> AiError {
    if let Some(status) = err.status() {
        return classify_response(provider, status.as_u16(), &err.to_string());
    }
    if err.is_timeout() || err.is_connect() {
        return AiError::new(provider, ErrorKind::ServiceUnavailable, sanitize_api_error(&err.to_string()));
    }
    if err.is_decode() {
        return AiError::new(
            provider,
            ErrorKind::Unknown,
            format!("malformed response: {}", sanitize_api_error(&err.to_string())),
        );
    }
    classify_message(provider, &err.to_string())
}

pub fn kind_from_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimit),
        402 => Some(ErrorKind::QuotaExceeded),
        401 | 403 => Some(ErrorKind::AuthenticationError),
        408 | 502 | 503 | 504 => Some(ErrorKind::ServiceUnavailable),
        400..=499 => Some(ErrorKind::InvalidRequest),
        _ => None,
    }
}

/// Look at `error.code`, `error.type` and friends in a JSON error body.
fn kind_from_body(body: &str) -> Option<ErrorKind> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);

    if let Some(code) = error.get("code").and_then(Value::as_u64) {
        if let Some(kind) = u16::try_from(code).ok().and_then(kind_from_status) {
            return Some(kind);
        }
    }

    ["code", "type", "status"]
        .iter()
        .filter_map(|field| error.get(*field).and_then(Value::as_str))
        .find_map(kind_from_error_code)
}

fn kind_from_error_code(code: &str) -> Option<ErrorKind> {
    match code.to_ascii_lowercase().as_str() {
        "rate_limit_exceeded" | "rate_limited" | "rate_limit_error" | "resource_exhausted" => {
            Some(ErrorKind::RateLimit)
        }
        "insufficient_quota" | "quota_exceeded" | "insufficient_credits" | "payment_required" => {
            Some(ErrorKind::QuotaExceeded)
        }
        "invalid_api_key" | "authentication_error" | "unauthorized" | "permission_denied"
        | "unauthenticated" => Some(ErrorKind::AuthenticationError),
        "server_error" | "overloaded" | "overloaded_error" | "service_unavailable" | "unavailable" => {
            Some(ErrorKind::ServiceUnavailable)
        }
        "invalid_request_error" | "invalid_request" | "invalid_argument" | "model_not_found" => {
            Some(ErrorKind::InvalidRequest)
        }
        _ => None,
    }
}

/// Last-resort heuristic over the raw message.
pub fn kind_from_message(message: &str) -> ErrorKind {
    let msg = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if has(&["rate limit", "429"]) {
        ErrorKind::RateLimit
    } else if has(&["quota", "credits", "exceeded"]) {
        ErrorKind::QuotaExceeded
    } else if has(&["authentication", "401", "403"]) {
        ErrorKind::AuthenticationError
    } else if has(&["503", "502", "504"]) {
        ErrorKind::ServiceUnavailable
    } else if has(&["400", "invalid"]) {
        ErrorKind::InvalidRequest
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_a_non_retryable_rate_limit() {
        let err = classify_response("openrouter", 429, r#"{"error":"rate limit exceeded"}"#);
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(!err.retryable);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.provider, "openrouter");
    }

    #[test]
    fn gateway_errors_are_retryable() {
        for status in [502, 503, 504] {
            let err = classify_response("together", status, "upstream down");
            assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
            assert!(err.retryable);
        }
    }

    #[test]
    fn auth_and_quota_statuses() {
        assert_eq!(classify_response("p", 401, "").kind, ErrorKind::AuthenticationError);
        assert_eq!(classify_response("p", 403, "").kind, ErrorKind::AuthenticationError);
        assert_eq!(classify_response("p", 402, "").kind, ErrorKind::QuotaExceeded);
        assert_eq!(classify_response("p", 404, "").kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn structured_fields_win_over_message_text() {
        let body = r#"{"error":{"type":"insufficient_quota","message":"please try again"}}"#;
        let err = classify_response("p", 500, body);
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);

        let body = r#"{"error":{"code":429,"message":"slow down"}}"#;
        assert_eq!(classify_response("p", 200, body).kind, ErrorKind::RateLimit);
    }

    #[test]
    fn internal_server_error_without_hints_is_unknown_and_retryable() {
        let err = classify_response("p", 500, "oops");
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.retryable);
    }

    #[test]
    fn substring_table() {
        let cases = [
            ("Rate limit reached", ErrorKind::RateLimit),
            ("got 429 back", ErrorKind::RateLimit),
            ("monthly quota used up", ErrorKind::QuotaExceeded),
            ("not enough credits", ErrorKind::QuotaExceeded),
            ("limit exceeded", ErrorKind::QuotaExceeded),
            ("Authentication failed", ErrorKind::AuthenticationError),
            ("status 403", ErrorKind::AuthenticationError),
            ("503 Service Unavailable", ErrorKind::ServiceUnavailable),
            ("bad gateway 502", ErrorKind::ServiceUnavailable),
            ("Invalid prompt", ErrorKind::InvalidRequest),
            ("status 400", ErrorKind::InvalidRequest),
            ("connection reset by peer", ErrorKind::Unknown),
        ];
        for (msg, kind) in cases {
            assert_eq!(kind_from_message(msg), kind, "{}", msg);
        }
    }

    #[test]
    fn message_classification_is_sanitized() {
        let err = classify_message("p", "invalid key sk-abc123");
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert!(!err.message.contains("abc123"));
    }
}

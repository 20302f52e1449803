//! Shared plumbing for provider HTTP calls: status classification, transport
//! errors, and the single bounded retry.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

use crate::error::ChatError;

/// Longest slice of a provider error body carried into an error message.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Map a non-success provider status onto the upstream error variants.
pub fn classify_status(provider: &str, status: StatusCode, body: &str) -> ChatError {
    let snippet: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    let message = if snippet.is_empty() {
        format!("{provider} returned {status}")
    } else {
        format!("{provider} returned {status}: {snippet}")
    };

    let invalid_key = body.contains("API_KEY_INVALID") || body.contains("API key not valid");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::UpstreamAuth(message),
        StatusCode::BAD_REQUEST if invalid_key => ChatError::UpstreamAuth(message),
        StatusCode::TOO_MANY_REQUESTS => ChatError::UpstreamRateLimit(message),
        _ => ChatError::Upstream(message),
    }
}

/// Transport-level failure. The URL is stripped so query parameters never
/// reach logs or responses.
pub fn transport_error(provider: &str, err: reqwest::Error) -> ChatError {
    ChatError::Upstream(format!("{provider} request failed: {}", err.without_url()))
}

/// Send a prepared request and decode a JSON body, classifying failures.
pub async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ChatError> {
    let resp = request
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_status(provider, status, &body));
    }

    resp.json::<T>().await.map_err(|e| {
        ChatError::Upstream(format!(
            "{provider} returned an unreadable response: {}",
            e.without_url()
        ))
    })
}

/// Run `op`, retrying once after `backoff` if the failure is transient.
/// Auth and rate-limit failures are returned as-is.
pub async fn with_one_retry<T, F, Fut>(backoff: Duration, what: &str, mut op: F) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!("{what} failed, retrying once in {backoff:?}: {e}");
            tokio::time::sleep(backoff).await;
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_classify_auth_statuses() {
        assert!(matches!(
            classify_status("gemini", StatusCode::UNAUTHORIZED, ""),
            ChatError::UpstreamAuth(_)
        ));
        assert!(matches!(
            classify_status("gemini", StatusCode::FORBIDDEN, "denied"),
            ChatError::UpstreamAuth(_)
        ));
        assert!(matches!(
            classify_status(
                "gemini",
                StatusCode::BAD_REQUEST,
                r#"{"error":{"status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#
            ),
            ChatError::UpstreamAuth(_)
        ));
    }

    #[test]
    fn test_classify_rate_limit_and_other() {
        assert!(matches!(
            classify_status("gemini", StatusCode::TOO_MANY_REQUESTS, "quota"),
            ChatError::UpstreamRateLimit(_)
        ));
        assert!(matches!(
            classify_status("gemini", StatusCode::BAD_REQUEST, "bad field"),
            ChatError::Upstream(_)
        ));
        assert!(matches!(
            classify_status("gemini", StatusCode::SERVICE_UNAVAILABLE, ""),
            ChatError::Upstream(_)
        ));
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(5000);
        let err = classify_status("gemini", StatusCode::INTERNAL_SERVER_ERROR, &body);
        assert!(err.to_string().len() < 500);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<u32, ChatError> =
            with_one_retry(Duration::from_millis(1), "test", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ChatError::Upstream("503".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<u32, ChatError> =
            with_one_retry(Duration::from_millis(1), "test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChatError::UpstreamRateLimit("429".into()))
            })
            .await;
        assert!(matches!(result, Err(ChatError::UpstreamRateLimit(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_transient_failure_is_returned() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<u32, ChatError> =
            with_one_retry(Duration::from_millis(1), "test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChatError::Upstream("503".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}

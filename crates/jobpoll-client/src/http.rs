//! Shared reqwest plumbing: session construction and response classification.

use jobpoll_core::{JobError, JobResult};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Builds the pooled HTTP session a backend owns for its whole lifetime.
pub(crate) fn build_session(timeout: Duration) -> JobResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| JobError::Config(format!("Failed to create HTTP client: {e}")))
}

/// Maps a reqwest failure onto the error taxonomy.
///
/// Connect, timeout and body read failures are transport errors and
/// therefore retryable. Builder errors mean the request itself is invalid.
pub(crate) fn transport_error(err: reqwest::Error) -> JobError {
    if err.is_builder() {
        JobError::Config(format!("Invalid request: {err}"))
    } else if err.is_decode() {
        JobError::Decode(err.to_string())
    } else {
        JobError::Transport(err.to_string())
    }
}

/// Trims trailing slashes and a trailing `/openai` segment so paths can be
/// appended uniformly.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/openai")
        .unwrap_or(trimmed)
        .to_string()
}

async fn error_body(resp: reqwest::Response) -> String {
    resp.text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string())
}

/// Passes 2xx responses through; anything else is a rejected submission.
pub(crate) async fn check_submit(resp: reqwest::Response) -> JobResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(JobError::Submission {
        status: status.as_u16(),
        body: error_body(resp).await,
    })
}

/// Passes 2xx responses through; anything else becomes `HttpStatus`, whose
/// transience depends on the code.
pub(crate) async fn check_status(resp: reqwest::Response) -> JobResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(JobError::HttpStatus {
        status: status.as_u16(),
        body: error_body(resp).await,
    })
}

/// Reads the body and decodes it as JSON. A truncated read is a transport
/// error; a complete body that does not parse is a decode error.
pub(crate) async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> JobResult<T> {
    let text = resp.text().await.map_err(transport_error)?;
    serde_json::from_str(&text).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        JobError::Decode(format!("{e}; body: {preview}"))
    })
}

/// Returns a non-null `error` field from a status payload.
pub(crate) fn error_field(body: &serde_json::Value) -> Option<serde_json::Value> {
    body.get("error").filter(|e| !e.is_null()).cloned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_normalization() {
        assert_eq!(
            normalize_endpoint("https://res.cognitiveservices.azure.com/"),
            "https://res.cognitiveservices.azure.com"
        );
        assert_eq!(
            normalize_endpoint("https://res.openai.azure.com/openai/"),
            "https://res.openai.azure.com"
        );
        assert_eq!(
            normalize_endpoint("  http://localhost:8080//  "),
            "http://localhost:8080"
        );
        assert_eq!(
            normalize_endpoint("https://api.example.com/openai-proxy"),
            "https://api.example.com/openai-proxy"
        );
    }

    #[test]
    fn null_error_field_is_absent() {
        let body = serde_json::json!({"id": "x", "error": null});
        assert!(error_field(&body).is_none());
        let body = serde_json::json!({"id": "x", "error": {"code": "bad"}});
        assert_eq!(error_field(&body).unwrap()["code"], "bad");
    }
}

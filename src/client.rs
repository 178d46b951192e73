//! Transformation clients.
//!
//! - **[`OpenAiClient`]** calls an OpenAI-compatible chat completions API.
//! - **[`DisabledClient`]** refuses every request; the pipeline then keeps
//!   the original text and reports each segment as failed.
//!
//! Clients make exactly one attempt per call. Retries, backoff, and
//! deadlines belong to the [dispatcher](crate::dispatch).
//!
//! # Status mapping
//!
//! | Response | Error |
//! |----------|-------|
//! | 429 | `RateLimited` (with `Retry-After` when present) |
//! | 408, 504 | `Timeout` |
//! | other 4xx | `InvalidInput` |
//! | 5xx | `ServiceError` |
//! | transport failure | `ServiceError` (or `Timeout` for client timeouts) |
//! | empty or malformed body | `ServiceError` |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use chapterloom_core::transform::{
    TransformClient, TransformError, TransformRequest, TransformResponse,
};

use crate::config::{Config, TransformConfig};

/// A client that always fails with `InvalidInput`.
///
/// Used when `transform.provider = "disabled"`.
pub struct DisabledClient;

#[async_trait]
impl TransformClient for DisabledClient {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn transform(
        &self,
        _request: &TransformRequest,
    ) -> Result<TransformResponse, TransformError> {
        Err(TransformError::InvalidInput(
            "transformation is disabled (set transform.provider)".to_string(),
        ))
    }
}

/// Chat-completions client for OpenAI and compatible servers.
pub struct OpenAiClient {
    name: String,
    model: String,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl OpenAiClient {
    /// # Errors
    ///
    /// Fails when `transform.model` is empty or the API key variable is
    /// missing from the environment.
    pub fn new(config: &TransformConfig, timeout: Duration) -> Result<Self> {
        let model = config.model.trim().to_string();
        if model.is_empty() {
            bail!("transform.model required for openai provider");
        }

        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            name: format!("openai:{}", model),
            model,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            timeout,
            http,
        })
    }
}

#[async_trait]
impl TransformClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformResponse, TransformError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.instructions },
                { "role": "user", "content": request.text },
            ],
            "max_tokens": request.max_output_size,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body_text, retry_after, self.timeout));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransformError::ServiceError(format!("unreadable response: {}", e)))?;
        let text = parse_completion(&json)?;
        Ok(TransformResponse { text })
    }
}

/// Map a non-success HTTP status to a typed error.
///
/// `deadline` is reported on gateway timeouts.
pub fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
    deadline: Duration,
) -> TransformError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status.as_u16() {
        429 => TransformError::RateLimited {
            message,
            retry_after,
        },
        408 | 504 => TransformError::Timeout(deadline),
        400..=499 => TransformError::InvalidInput(message),
        _ => TransformError::ServiceError(message),
    }
}

fn classify_transport(err: reqwest::Error, deadline: Duration) -> TransformError {
    if err.is_timeout() {
        TransformError::Timeout(deadline)
    } else {
        TransformError::ServiceError(format!("request failed: {}", err))
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Extract `choices[0].message.content`; empty content is a service error.
pub fn parse_completion(json: &serde_json::Value) -> Result<String, TransformError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            TransformError::ServiceError("malformed response: missing choices[0].message.content".into())
        })?;

    if content.trim().is_empty() {
        return Err(TransformError::ServiceError("empty response".into()));
    }
    Ok(content.to_string())
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Build the client selected by `transform.provider`.
pub fn create_client(config: &Config) -> Result<Arc<dyn TransformClient>> {
    match config.transform.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClient)),
        "openai" => Ok(Arc::new(OpenAiClient::new(
            &config.transform,
            config.dispatch.timeout(),
        )?)),
        other => bail!("Unknown transform provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chapterloom_core::models::ErrorKind;

    const T: Duration = Duration::from_secs(30);

    #[test]
    fn test_classify_status() {
        let rl = classify_status(StatusCode::TOO_MANY_REQUESTS, "", Some(Duration::from_secs(2)), T);
        assert_eq!(rl.kind(), ErrorKind::RateLimited);
        assert_eq!(rl.retry_after(), Some(Duration::from_secs(2)));

        for code in [400u16, 401, 413, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                classify_status(status, "no", None, T).kind(),
                ErrorKind::InvalidInput,
                "{}",
                code
            );
        }
        assert_eq!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, "", None, T).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, "", None, T).kind(),
            ErrorKind::ServiceError
        );
    }

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Polished." } }]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Polished.");

        let empty = serde_json::json!({ "choices": [{ "message": { "content": "  " } }] });
        assert_eq!(parse_completion(&empty).unwrap_err().kind(), ErrorKind::ServiceError);

        let malformed = serde_json::json!({ "id": "x" });
        assert_eq!(
            parse_completion(&malformed).unwrap_err().kind(),
            ErrorKind::ServiceError
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_disabled_client_rejects() {
        let req = TransformRequest {
            text: "x".into(),
            instructions: "y".into(),
            max_output_size: 10,
        };
        let err = DisabledClient.transform(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}

// Retrying HTTP transport
// Every outbound call of a job run goes through RetryingTransport::send

use crate::errors::TransportError;
use crate::models::ResponseLog;
use crate::retry::{is_transient_status, parse_retry_after, RetryPolicy, RetryStrategy};
use crate::telemetry;
use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fully-read HTTP response handed back to the jobs
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status_code: u16,
    pub reason_phrase: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        let reason_phrase = reqwest::StatusCode::from_u16(status_code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map(str::to_string);
        Self {
            status_code,
            reason_phrase,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Payload of an OData action answer `{"value": ...}`.
    ///
    /// String values are returned unquoted, other JSON values in their compact
    /// form. A body that is not such an object is returned as plain text.
    pub fn value_string(&self) -> String {
        let text = self.text();
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(map)) => match map.get("value") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
            _ => text,
        }
    }

    pub fn reason(&self) -> String {
        self.reason_phrase.clone().unwrap_or_default()
    }

    pub fn to_log(&self) -> ResponseLog {
        let content = if self.body.is_empty() {
            None
        } else {
            Some(self.text())
        };
        ResponseLog {
            status_code: self.status_code,
            reason_phrase: self.reason_phrase.clone(),
            is_success_status_code: self.is_success(),
            headers: self.headers.clone(),
            content,
        }
    }
}

/// HTTP transport with transient-failure retries, scoped to one job run
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    client: Client,
    policy: RetryPolicy,
    job_key: String,
    cancel: CancellationToken,
}

impl RetryingTransport {
    pub fn new(
        client: Client,
        policy: RetryPolicy,
        job_key: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            policy,
            job_key: job_key.into(),
            cancel,
        }
    }

    /// Build a transport with its own client and per-attempt timeout
    pub fn with_timeout(
        timeout: Duration,
        policy: RetryPolicy,
        job_key: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self::new(client, policy, job_key, cancel))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send `request`, retrying transient outcomes.
    ///
    /// Returns the first non-transient response, or the last response once the
    /// attempt budget is spent. A transport error on the final attempt is
    /// propagated. Cancellation aborts at once, including during a wait.
    pub async fn send(&self, request: RequestBuilder) -> Result<ApiResponse, TransportError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let builder = request
                .try_clone()
                .ok_or(TransportError::NonReplayableRequest)?;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                result = builder.send() => result,
            };

            let last_attempt = attempt + 1 >= max_attempts;

            let (reason, retry_after) = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || !is_transient_status(status.as_u16()) || last_attempt
                    {
                        debug!(
                            job_key = %self.job_key,
                            attempt = attempt + 1,
                            status_code = status.as_u16(),
                            "HTTP request completed"
                        );
                        return self.read_response(response).await;
                    }
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| parse_retry_after(v, Utc::now()));
                    (format!("status {}", status.as_u16()), retry_after)
                }
                Err(err) => {
                    if !is_transient_error(&err) || last_attempt {
                        return Err(TransportError::Request {
                            attempts: attempt + 1,
                            source: err,
                        });
                    }
                    let reason = if err.is_timeout() {
                        "timeout".to_string()
                    } else {
                        "transport error".to_string()
                    };
                    warn!(job_key = %self.job_key, error = %err, "HTTP request failed");
                    (reason, None)
                }
            };

            let wait = self.policy.wait_for(attempt, retry_after);
            warn!(
                job_key = %self.job_key,
                attempt = attempt + 1,
                max_attempts = max_attempts,
                reason = %reason,
                wait_ms = wait.as_millis() as u64,
                "Transient HTTP failure, retrying"
            );
            telemetry::record_http_retry(&self.job_key, reason);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }

    async fn read_response(&self, response: Response) -> Result<ApiResponse, TransportError> {
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            body = response.bytes() => body.map_err(|e| TransportError::Body(e.to_string()))?,
        };

        Ok(ApiResponse {
            status_code: status.as_u16(),
            reason_phrase: status.canonical_reason().map(str::to_string),
            headers,
            body: body.to_vec(),
        })
    }
}

/// Connection failures and client-side timeouts are transient; malformed
/// requests and redirect loops are not.
fn is_transient_error(err: &reqwest::Error) -> bool {
    !(err.is_builder() || err.is_redirect() || err.is_status() || err.is_decode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_string_unwraps_odata_value() {
        let response = ApiResponse::new(200, r#"{"value":"Succeeded"}"#);
        assert_eq!(response.value_string(), "Succeeded");

        let response = ApiResponse::new(200, r#"{"value":true}"#);
        assert_eq!(response.value_string(), "true");

        let response = ApiResponse::new(200, r#"{"value":null}"#);
        assert_eq!(response.value_string(), "");
    }

    #[test]
    fn test_value_string_falls_back_to_text() {
        let response = ApiResponse::new(200, "MSG-0001");
        assert_eq!(response.value_string(), "MSG-0001");
    }

    #[test]
    fn test_response_log_snapshot() {
        let response = ApiResponse::new(400, "bad entity");
        let log = response.to_log();
        assert_eq!(log.status_code, 400);
        assert_eq!(log.reason_phrase.as_deref(), Some("Bad Request"));
        assert!(!log.is_success_status_code);
        assert_eq!(log.content.as_deref(), Some("bad entity"));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let transport =
            RetryingTransport::new(Client::new(), RetryPolicy::new(3, 0), "job", cancel);
        let request = transport.client().get("http://127.0.0.1:9/unused");
        let result = transport.send(request).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}

//! Webhook delivery pipeline: retries, a global send rate limit, and a
//! circuit breaker.

pub mod circuit;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fc_common::{redact::redact, Clock, RateLimiter};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use circuit::{Admission, CircuitBreaker};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("circuit open")]
    CircuitOpen,
    #[error("non-retriable failure: {0}")]
    NonRetriable(String),
    #[error("retriable failure after exhausting retries: {0}")]
    RetriesExhausted(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payload: &serde_json::Value) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub webhook_url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub retry_count: u32,
    pub retry_base_delay: Duration,
    pub raw_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookResponseBody {
    #[serde(rename = "isSuccessful")]
    is_successful: Option<bool>,
}

enum SendOutcome {
    Success,
    Retriable(String),
    NonRetriable(String),
}

pub struct WebhookNotifier {
    http: reqwest::Client,
    config: NotifierConfig,
    rate_limiter: Arc<RateLimiter>,
    circuit: CircuitBreaker,
    clock: Arc<dyn Clock>,
    cancel: Arc<tokio::sync::Notify>,
}

impl WebhookNotifier {
    pub fn new(
        config: NotifierConfig,
        rate_limiter: Arc<RateLimiter>,
        circuit_enabled: bool,
        circuit_failure_threshold: u32,
        circuit_open_duration: Duration,
        clock: Arc<dyn Clock>,
        cancel: Arc<tokio::sync::Notify>,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| NotifyError::NonRetriable(e.to_string()))?;
        Ok(Self {
            http,
            config,
            rate_limiter,
            circuit: CircuitBreaker::new(
                circuit_enabled,
                circuit_failure_threshold,
                circuit_open_duration,
            ),
            clock,
            cancel,
        })
    }

    fn redact(&self, message: &str) -> String {
        redact(
            message,
            self.config.raw_api_key.as_deref(),
            Some(&self.config.webhook_url),
        )
    }

    async fn attempt_send(&self, payload: &serde_json::Value) -> SendOutcome {
        self.rate_limiter.acquire(&self.cancel).await;

        let response = match self
            .http
            .post(&self.config.webhook_url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // Transport-level failures (timeout, connection refused,
                // etc.) are always retriable; only a parsed response body
                // can yield a non-retriable outcome.
                return SendOutcome::Retriable(self.redact(&e.to_string()));
            }
        };

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();

        if status.is_success() {
            // A body that parses with an explicit false flag is a
            // failure; parse failure with 2xx remains success so we
            // never duplicate a send.
            match serde_json::from_str::<WebhookResponseBody>(&body_text) {
                Ok(parsed) if parsed.is_successful == Some(false) => {
                    SendOutcome::NonRetriable(self.redact("webhook reported isSuccessful=false"))
                }
                _ => SendOutcome::Success,
            }
        } else if status.as_u16() >= 500 {
            SendOutcome::Retriable(self.redact(&format!("http {status}: {body_text}")))
        } else {
            SendOutcome::NonRetriable(self.redact(&format!("http {status}: {body_text}")))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, payload: &serde_json::Value) -> Result<(), NotifyError> {
        let now = self.clock.now();
        if matches!(self.circuit.admit(now), Admission::FailFast) {
            return Err(NotifyError::CircuitOpen);
        }

        let mut attempt = 0u32;
        loop {
            match self.attempt_send(payload).await {
                SendOutcome::Success => {
                    self.circuit.record_success();
                    info!(event = "notification.sent", attempt);
                    return Ok(());
                }
                SendOutcome::NonRetriable(message) => {
                    self.circuit.record_failure(self.clock.now());
                    warn!(event = "notification.final_failure", attempt, error = %message);
                    return Err(NotifyError::NonRetriable(message));
                }
                SendOutcome::Retriable(message) => {
                    if attempt < self.config.retry_count {
                        let delay = self.config.retry_base_delay * 2u32.pow(attempt);
                        warn!(event = "notification.retry", attempt, delay_ms = delay.as_millis() as u64, error = %message);
                        self.clock.sleep(delay, &self.cancel).await;
                        attempt += 1;
                    } else {
                        self.circuit.record_failure(self.clock.now());
                        warn!(event = "notification.final_failure", attempt, error = %message);
                        return Err(NotifyError::RetriesExhausted(message));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_common::clock::FakeClock;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(webhook_url: String, retry_count: u32) -> WebhookNotifier {
        let config = NotifierConfig {
            webhook_url,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            retry_count,
            retry_base_delay: Duration::from_millis(0),
            raw_api_key: None,
        };
        let rate_limiter = Arc::new(RateLimiter::new(0));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let cancel = Arc::new(tokio::sync::Notify::new());
        WebhookNotifier::new(
            config,
            rate_limiter,
            true,
            5,
            Duration::from_secs(60),
            clock,
            cancel,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn success_on_2xx_with_no_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let n = notifier(server.uri(), 2);
        let result = n.send(&serde_json::json!({"botName": "wx"})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn explicit_is_successful_false_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "isSuccessful": false
            })))
            .mount(&server)
            .await;

        let n = notifier(server.uri(), 2);
        let result = n.send(&serde_json::json!({"botName": "wx"})).await;
        assert!(matches!(result, Err(NotifyError::NonRetriable(_))));
    }

    #[tokio::test]
    async fn server_error_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let n = notifier(server.uri(), 2);
        let result = n.send(&serde_json::json!({"botName": "wx"})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures_and_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = NotifierConfig {
            webhook_url: server.uri(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            retry_count: 0,
            retry_base_delay: Duration::from_millis(0),
            raw_api_key: None,
        };
        let rate_limiter = Arc::new(RateLimiter::new(0));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let cancel = Arc::new(tokio::sync::Notify::new());
        let n = WebhookNotifier::new(
            config,
            rate_limiter,
            true,
            3,
            Duration::from_secs(60),
            clock,
            cancel,
        )
        .unwrap();

        for _ in 0..3 {
            let _ = n.send(&serde_json::json!({})).await;
        }
        let result = n.send(&serde_json::json!({})).await;
        assert!(matches!(result, Err(NotifyError::CircuitOpen)));
    }
}

//! Client for the upstream weather-warning API: pagination, retry with
//! backoff, and the result-code taxonomy.

pub mod client;
pub mod xml;

pub use client::{ReqwestWeatherClient, WeatherClientConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fc_common::WarningEvent;
use thiserror::Error;

/// The failure taxonomy the orchestrator uses to decide retry policy
/// and to populate the cycle's error-code histogram.
#[derive(Debug, Clone, Error)]
pub enum WeatherError {
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("http {0}")]
    Http(u16),
    #[error("failed to parse response body: {0}")]
    ParseError(String),
    #[error("upstream reported result code {code}")]
    ApiResultError { code: String },
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl WeatherError {
    /// Stable snake_case label used in structured events and the
    /// cycle's error-code histogram.
    pub fn kind_label(&self) -> String {
        match self {
            WeatherError::Timeout => "timeout".to_string(),
            WeatherError::Connection(_) => "connection".to_string(),
            WeatherError::Http(code) => format!("http_{code}"),
            WeatherError::ParseError(_) => "parse_error".to_string(),
            WeatherError::ApiResultError { code } => format!("api_result_error({code})"),
            WeatherError::Unknown(_) => "unknown_error".to_string(),
        }
    }

    /// Whether this failure is worth retrying under the same
    /// exponential-backoff policy as transport errors.
    pub fn is_retriable(&self) -> bool {
        match self {
            WeatherError::Timeout | WeatherError::Connection(_) | WeatherError::ParseError(_) => {
                true
            }
            WeatherError::Http(code) => *code >= 500,
            WeatherError::ApiResultError { code } => code == xml::RESULT_RATE_LIMIT,
            WeatherError::Unknown(_) => false,
        }
    }
}

/// Contract for fetching warning events for one region over one date
/// window.
#[async_trait]
pub trait WeatherClient: Send + Sync {
    async fn fetch(
        &self,
        region_code: &str,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<Vec<WarningEvent>, WeatherError>;
}

//! Error-sink reporter.
//!
//! Non-transient failures are posted to a webhook URL at warning or error
//! severity. Unset URL disables reporting; delivery failures are logged
//! and swallowed — the sink never adds a failure mode of its own.

use serde::Serialize;
use tracing::warn;

use chomp_core::ChompError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Serialize)]
struct FailureReport<'a> {
    severity: Severity,
    operation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<i64>,
    code: &'a str,
    message: String,
    latency_ms: u64,
}

pub struct ErrorSink {
    client: reqwest::Client,
    url: Option<String>,
}

impl ErrorSink {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Report a non-transient failure. Transient errors are the retry
    /// policy's business and are not reported here.
    pub async fn report(
        &self,
        operation: &str,
        user_id: Option<&str>,
        event_id: Option<i64>,
        error: &ChompError,
        latency_ms: u64,
    ) {
        if error.is_retryable() {
            return;
        }

        let severity = match error {
            ChompError::Internal(_) | ChompError::DependencyUnavailable(_) => Severity::Error,
            _ => Severity::Warning,
        };

        let Some(url) = &self.url else { return };

        let report = FailureReport {
            severity,
            operation,
            user_id,
            event_id,
            code: error.code(),
            message: error.to_string(),
            latency_ms,
        };

        if let Err(e) = self.client.post(url).json(&report).send().await {
            warn!("Error sink delivery failed: {}", e);
        }
    }
}

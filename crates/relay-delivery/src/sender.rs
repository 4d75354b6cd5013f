//! Rate-limited HTTP sender.
//!
//! Performs one delivery attempt: a JSON POST with a bounded overall
//! timeout, retrying in-band on HTTP 429 with a doubling backoff. Ordinary
//! failures never surface as errors; everything the caller needs is in the
//! returned [`AttemptOutcome`], including timestamps that bracket any
//! rate-limit sleeps.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use relay_core::{
    config::EngineConfig,
    models::{AttemptId, Endpoint, EventId, SendAttemptLog},
    time::Clock,
};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Substituted for response bodies that arrive empty or unreadable.
const EMPTY_BODY_PLACEHOLDER: &str = "(no response body)";

/// Result of one delivery attempt, before it is tied to an attempt number.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// Whether the attempt ended in a 2xx response.
    pub successful: bool,
    /// HTTP status of the final response, if one was received.
    pub status_code: Option<u16>,
    /// Failure detail for unsuccessful attempts.
    pub error_message: Option<String>,
    /// When the attempt started, before any rate-limit sleeps.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished, including rate-limit sleeps.
    pub finished_at: DateTime<Utc>,
}

impl AttemptOutcome {
    /// Converts this outcome into an append-only attempt log row.
    pub fn into_log(
        self,
        endpoint_id: relay_core::EndpointId,
        event_id: EventId,
        attempt_number: u32,
    ) -> SendAttemptLog {
        SendAttemptLog {
            id: AttemptId::new(),
            endpoint_id,
            event_id,
            attempt_number,
            successful: self.successful,
            status_code: self.status_code,
            error_message: self.error_message,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// HTTP sender with in-band 429 handling.
///
/// One instance is shared across a run; the underlying client pools
/// connections across endpoints.
#[derive(Debug, Clone)]
pub struct RateLimitedSender {
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    max_rate_limit_retries: u32,
    initial_backoff: Duration,
    timeout_secs: u64,
}

impl RateLimitedSender {
    /// Creates a sender from the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the configured timeout.
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.http_timeout()).build().map_err(
            |e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")),
        )?;

        Ok(Self {
            client,
            clock,
            max_rate_limit_retries: config.max_rate_limit_retries,
            initial_backoff: config.rate_limit_initial_backoff(),
            timeout_secs: config.http_timeout().as_secs(),
        })
    }

    /// Performs one delivery attempt against the endpoint.
    ///
    /// 429 responses are retried internally up to the configured budget,
    /// sleeping with a doubling backoff between tries; these retries all
    /// belong to the same attempt and never increment the attempt number.
    /// Every other failure is final for this attempt and is captured in the
    /// returned outcome.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        event_id: EventId,
        payload: &serde_json::Value,
    ) -> AttemptOutcome {
        let span = info_span!(
            "delivery_attempt",
            event_id = %event_id,
            endpoint_id = %endpoint.id,
            url = %endpoint.url
        );

        async move {
            let started_at = self.clock.now();
            let mut backoff = self.initial_backoff;
            let mut rate_limit_count: u32 = 0;

            loop {
                let response = self.client.post(&endpoint.url).json(payload).send().await;

                let response = match response {
                    Ok(response) => response,
                    Err(e) => {
                        let message = if e.is_timeout() {
                            format!("request timed out after {}s", self.timeout_secs)
                        } else {
                            e.to_string()
                        };
                        tracing::warn!(error = %message, "delivery attempt failed in transport");
                        return self.failure(started_at, None, message);
                    },
                };

                let status = response.status();

                if status.as_u16() == 429 {
                    rate_limit_count += 1;
                    if rate_limit_count > self.max_rate_limit_retries {
                        let body = read_body(response).await;
                        tracing::warn!(
                            retries = self.max_rate_limit_retries,
                            "rate-limit retry budget exhausted"
                        );
                        return self.failure(
                            started_at,
                            Some(429),
                            format!(
                                "rate limited: gave up after {} retries, last response: {body}",
                                self.max_rate_limit_retries
                            ),
                        );
                    }

                    tracing::debug!(
                        backoff_ms = backoff.as_millis(),
                        retry = rate_limit_count,
                        "rate limited, backing off"
                    );
                    self.clock.sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    continue;
                }

                if status.is_success() {
                    tracing::debug!(status = status.as_u16(), "delivered");
                    return AttemptOutcome {
                        successful: true,
                        status_code: Some(status.as_u16()),
                        error_message: None,
                        started_at,
                        finished_at: self.clock.now(),
                    };
                }

                let body = read_body(response).await;
                tracing::warn!(status = status.as_u16(), "delivery attempt rejected");
                return self.failure(started_at, Some(status.as_u16()), body);
            }
        }
        .instrument(span)
        .await
    }

    fn failure(
        &self,
        started_at: DateTime<Utc>,
        status_code: Option<u16>,
        message: String,
    ) -> AttemptOutcome {
        AttemptOutcome {
            successful: false,
            status_code,
            error_message: Some(message),
            started_at,
            finished_at: self.clock.now(),
        }
    }
}

/// Reads a response body for failure messages, substituting a placeholder
/// when it is empty or unreadable.
async fn read_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(body) if !body.is_empty() => body,
        _ => EMPTY_BODY_PLACEHOLDER.to_string(),
    }
}

//! Manual endpoint probing.
//!
//! Sends one synthetic test event directly through the sender, bypassing
//! matching and fan-out. Operators use this to verify an endpoint before
//! relying on it, and optionally to promote a successfully probed
//! Unhealthy endpoint straight to Probation without waiting for the sweep.

use std::sync::Arc;

use relay_core::{
    models::{EndpointId, EventId, HealthStatus},
    store::Store,
    time::Clock,
};
use relay_fanout::ad_hoc_envelope;
use serde_json::json;

use crate::{
    error::{DeliveryError, Result},
    sender::RateLimitedSender,
};

/// Outcome of a manual probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Whether the probe got a 2xx response.
    pub successful: bool,
    /// HTTP status of the response, if one was received.
    pub status_code: Option<u16>,
    /// Failure detail, if any.
    pub error_message: Option<String>,
    /// Whether the endpoint was promoted to Probation.
    pub promoted: bool,
}

/// Sends test events to individual endpoints.
pub struct EndpointProber {
    store: Arc<dyn Store>,
    sender: RateLimitedSender,
    clock: Arc<dyn Clock>,
}

impl EndpointProber {
    /// Creates a prober sharing the runner's sender configuration.
    pub fn new(store: Arc<dyn Store>, sender: RateLimitedSender, clock: Arc<dyn Clock>) -> Self {
        Self { store, sender, clock }
    }

    /// Sends one test event to the endpoint.
    ///
    /// No pending event or attempt log is recorded; the probe exists
    /// outside the delivery pipeline. When `promote_on_success` is set and
    /// the endpoint is Unhealthy, a successful probe moves it to Probation.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown endpoint and store errors
    /// from the optional health update. Delivery failures are captured in
    /// the returned result, never as errors.
    pub async fn send_test_event(
        &self,
        endpoint_id: EndpointId,
        promote_on_success: bool,
    ) -> Result<ProbeResult> {
        let endpoint = self
            .store
            .find_endpoint(endpoint_id)
            .await?
            .ok_or_else(|| {
                DeliveryError::Core(relay_core::CoreError::not_found(format!(
                    "endpoint {endpoint_id}"
                )))
            })?;

        let payload = ad_hoc_envelope(
            json!({
                "test": true,
                "endpointId": endpoint.id.to_string(),
                "sentAt": self.clock.now().to_rfc3339(),
            }),
            json!({}),
        );

        let outcome = self.sender.send(&endpoint, EventId::new(), &payload).await;

        let mut promoted = false;
        if outcome.successful
            && promote_on_success
            && endpoint.health_status == HealthStatus::Unhealthy
        {
            self.store.update_endpoint_health(endpoint.id, HealthStatus::Probation).await?;
            promoted = true;
            tracing::info!(%endpoint_id, "probe succeeded; endpoint promoted to probation");
        }

        Ok(ProbeResult {
            successful: outcome.successful,
            status_code: outcome.status_code,
            error_message: outcome.error_message,
            promoted,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use relay_core::{
        config::EngineConfig, models::Endpoint, store::memory::MemoryStore, time::TestClock,
    };
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn prober_with(store: Arc<MemoryStore>) -> EndpointProber {
        let clock = Arc::new(TestClock::new());
        let sender = RateLimitedSender::new(&EngineConfig::default(), clock.clone()).unwrap();
        EndpointProber::new(store, sender, clock)
    }

    #[tokio::test]
    async fn successful_probe_promotes_unhealthy_endpoint() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::body_partial_json(
                serde_json::json!({"webhookEventDetails": {"test": true}}),
            ))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let mut endpoint = Endpoint::new(format!("{}/hook", server.uri()), Utc::now());
        endpoint.health_status = HealthStatus::Unhealthy;
        let endpoint_id = endpoint.id;
        store.add_endpoint(endpoint).await;

        let prober = prober_with(store.clone()).await;
        let result = prober.send_test_event(endpoint_id, true).await.unwrap();

        assert!(result.successful);
        assert!(result.promoted);
        let stored = store.find_endpoint(endpoint_id).await.unwrap().unwrap();
        assert_eq!(stored.health_status, HealthStatus::Probation);
    }

    #[tokio::test]
    async fn failed_probe_leaves_health_untouched() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let mut endpoint = Endpoint::new(format!("{}/hook", server.uri()), Utc::now());
        endpoint.health_status = HealthStatus::Unhealthy;
        let endpoint_id = endpoint.id;
        store.add_endpoint(endpoint).await;

        let prober = prober_with(store.clone()).await;
        let result = prober.send_test_event(endpoint_id, true).await.unwrap();

        assert!(!result.successful);
        assert!(!result.promoted);
        let stored = store.find_endpoint(endpoint_id).await.unwrap().unwrap();
        assert_eq!(stored.health_status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn probing_a_healthy_endpoint_never_promotes() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let endpoint = Endpoint::new(format!("{}/hook", server.uri()), Utc::now());
        let endpoint_id = endpoint.id;
        store.add_endpoint(endpoint).await;

        let prober = prober_with(store.clone()).await;
        let result = prober.send_test_event(endpoint_id, true).await.unwrap();

        assert!(result.successful);
        assert!(!result.promoted);
    }

    #[tokio::test]
    async fn unknown_endpoint_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let prober = prober_with(store).await;

        let result = prober.send_test_event(EndpointId::new(), false).await;
        assert!(result.is_err());
    }
}

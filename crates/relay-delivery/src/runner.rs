//! Due-event scheduler and driver.
//!
//! Finds events eligible for an attempt right now and drives each through
//! the sender and the state machine, one endpoint's backlog at a time in
//! FIFO order. The health breaker is consulted after every outcome; an
//! endpoint that trips to unhealthy mid-batch has the rest of its backlog
//! left untouched for the next run.

use std::{collections::HashMap, sync::Arc, time::Duration};

use relay_core::{
    config::EngineConfig,
    models::{ActiveStatus, Endpoint, EndpointId, EventStatus, HealthStatus, PendingEvent},
    store::Store,
    time::Clock,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    health::HealthTracker,
    lifecycle::DeliveryStateMachine,
    sender::RateLimitedSender,
};

/// Per-run counts by outcome category.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Events that reached Delivered this run.
    pub delivered: u32,
    /// Events scheduled for another attempt.
    pub awaiting_retry: u32,
    /// Events that exhausted their attempt budget.
    pub failed: u32,
    /// Events skipped because their endpoint is paused or disabled.
    pub skipped_disabled: u32,
    /// Events skipped because their endpoint is (or became) unhealthy.
    pub skipped_unhealthy: u32,
    /// Events skipped because their endpoint no longer exists.
    pub skipped_missing: u32,
    /// Events skipped after a processing error, to be retried next run.
    pub errored: u32,
}

impl RunSummary {
    /// Number of events that went through a delivery attempt.
    pub fn processed(&self) -> u32 {
        self.delivered + self.awaiting_retry + self.failed
    }
}

/// Drives due events through delivery.
pub struct DeliveryRunner {
    store: Arc<dyn Store>,
    sender: RateLimitedSender,
    lifecycle: DeliveryStateMachine,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl DeliveryRunner {
    /// Creates a runner, validating the configuration and building the
    /// HTTP sender.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or an unbuildable HTTP
    /// client; both fail fast at startup rather than at send time.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = config.validated()?;
        let sender = RateLimitedSender::new(&config, clock.clone())?;
        let lifecycle = DeliveryStateMachine::new(store.clone(), config.clone());
        Ok(Self { store, sender, lifecycle, config, clock })
    }

    /// Processes every currently due event once and returns the per-run
    /// summary.
    ///
    /// Failures local to one event are counted and contained; only a
    /// failure of the due-event query itself propagates.
    ///
    /// # Errors
    ///
    /// Returns a store error if the due-event query fails.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let now = self.clock.now();
        let due = self.store.due_events(now).await?;
        let mut summary = RunSummary::default();

        for (endpoint_id, batch) in group_by_endpoint(due) {
            self.run_endpoint_batch(endpoint_id, batch, &mut summary).await;
        }

        tracing::debug!(
            delivered = summary.delivered,
            awaiting_retry = summary.awaiting_retry,
            failed = summary.failed,
            skipped_unhealthy = summary.skipped_unhealthy,
            "delivery run complete"
        );
        Ok(summary)
    }

    /// Processes one endpoint's due backlog in order.
    async fn run_endpoint_batch(
        &self,
        endpoint_id: EndpointId,
        batch: Vec<PendingEvent>,
        summary: &mut RunSummary,
    ) {
        let batch_len = batch.len() as u32;

        let endpoint = match self.store.find_endpoint(endpoint_id).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                summary.skipped_missing += batch_len;
                tracing::warn!(%endpoint_id, events = batch_len, "endpoint missing; skipping batch");
                return;
            },
            Err(error) => {
                summary.errored += batch_len;
                tracing::warn!(%endpoint_id, error = %error, "failed to load endpoint; skipping batch");
                return;
            },
        };

        if endpoint.active_status != ActiveStatus::Active {
            summary.skipped_disabled += batch_len;
            return;
        }
        if endpoint.health_status == HealthStatus::Unhealthy {
            summary.skipped_unhealthy += batch_len;
            return;
        }

        let mut tracker = match self.seed_tracker(&endpoint).await {
            Ok(tracker) => tracker,
            Err(error) => {
                summary.errored += batch_len;
                tracing::warn!(%endpoint_id, error = %error, "failed to seed health window; skipping batch");
                return;
            },
        };

        let mut persisted_health = endpoint.health_status;

        for (index, event) in batch.iter().enumerate() {
            match self.process_event(event, &endpoint, &mut tracker).await {
                Ok(EventStatus::Delivered) => summary.delivered += 1,
                Ok(EventStatus::AwaitingRetry) => summary.awaiting_retry += 1,
                Ok(EventStatus::Failed) => summary.failed += 1,
                Ok(_) => {},
                Err(error) => {
                    summary.errored += 1;
                    tracing::warn!(
                        event_id = %event.id,
                        error = %error,
                        "event processing failed; leaving for next run"
                    );
                },
            }

            if tracker.state() != persisted_health {
                match self.store.update_endpoint_health(endpoint.id, tracker.state()).await {
                    Ok(()) => persisted_health = tracker.state(),
                    Err(error) => {
                        tracing::warn!(
                            %endpoint_id,
                            error = %error,
                            "failed to persist endpoint health"
                        );
                    },
                }
            }

            if tracker.state() == HealthStatus::Unhealthy {
                let remaining = (batch.len() - index - 1) as u32;
                summary.skipped_unhealthy += remaining;
                tracing::info!(
                    %endpoint_id,
                    remaining,
                    "endpoint became unhealthy mid-batch; abandoning remaining events"
                );
                break;
            }
        }
    }

    /// One event's full attempt: lease, send, record, observe.
    async fn process_event(
        &self,
        event: &PendingEvent,
        endpoint: &Endpoint,
        tracker: &mut HealthTracker,
    ) -> Result<EventStatus> {
        let attempt_number = self.lifecycle.begin_attempt(event, self.clock.now()).await?;
        let outcome = self.sender.send(endpoint, event.id, &event.payload).await;
        let successful = outcome.successful;

        // Health as of this outcome decides the probation exception.
        let status =
            self.lifecycle.record_outcome(event, tracker.state(), attempt_number, outcome).await?;
        tracker.observe(successful);
        Ok(status)
    }

    /// Builds the health tracker for an endpoint, seeding its window from
    /// the most recent persisted attempt logs, oldest first.
    async fn seed_tracker(&self, endpoint: &Endpoint) -> Result<HealthTracker> {
        let mut tracker =
            HealthTracker::new(self.config.unhealthy_after_failures, endpoint.health_status);

        if let Some(threshold) = self.config.unhealthy_after_failures {
            let recent = self.store.recent_attempts(endpoint.id, threshold as usize).await?;
            tracker.seed(recent.iter().map(|attempt| attempt.successful));
        }
        Ok(tracker)
    }

    /// Out-of-band sweep: promotes Unhealthy endpoints that have been idle
    /// past the probation timeout, letting them try again cautiously.
    ///
    /// Endpoints with no attempt log at all are left Unhealthy.
    ///
    /// # Errors
    ///
    /// Returns a store error if reading or updating endpoints fails.
    pub async fn sweep_unhealthy(&self) -> Result<u32> {
        let now = self.clock.now();
        let idle_cutoff = chrono::Duration::minutes(self.config.probation_after_minutes);
        let mut promoted = 0;

        for endpoint in self.store.unhealthy_endpoints().await? {
            let last_started = self.store.last_attempt_started_at(endpoint.id).await?;
            if let Some(started_at) = last_started {
                if now - started_at > idle_cutoff {
                    self.store.update_endpoint_health(endpoint.id, HealthStatus::Probation).await?;
                    promoted += 1;
                    tracing::info!(
                        endpoint_id = %endpoint.id,
                        idle_minutes = (now - started_at).num_minutes(),
                        "promoted unhealthy endpoint to probation"
                    );
                }
            }
        }
        Ok(promoted)
    }

    /// Runs sweeps and delivery passes on the configured cadence until
    /// cancelled.
    pub async fn run_loop(&self, cancellation: CancellationToken) {
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        tracing::info!(interval_secs = self.config.sweep_interval_secs, "delivery runner started");

        loop {
            if let Err(error) = self.sweep_unhealthy().await {
                tracing::warn!(error = %error, "probation sweep failed");
            }
            if let Err(error) = self.run_once().await {
                tracing::warn!(error = %error, "delivery run failed");
            }

            tokio::select! {
                () = self.clock.sleep(interval) => {},
                () = cancellation.cancelled() => {
                    tracing::info!("delivery runner stopping");
                    break;
                },
            }
        }
    }
}

/// Groups due events by endpoint, preserving FIFO order both across
/// endpoints and within each batch.
fn group_by_endpoint(due: Vec<PendingEvent>) -> Vec<(EndpointId, Vec<PendingEvent>)> {
    let mut order: Vec<EndpointId> = Vec::new();
    let mut batches: HashMap<EndpointId, Vec<PendingEvent>> = HashMap::new();

    for event in due {
        let batch = batches.entry(event.endpoint_id).or_default();
        if batch.is_empty() {
            order.push(event.endpoint_id);
        }
        batch.push(event);
    }

    order
        .into_iter()
        .filter_map(|endpoint_id| batches.remove(&endpoint_id).map(|batch| (endpoint_id, batch)))
        .collect()
}

//! Delivery state machine.
//!
//! Owns every `PendingEvent` status transition: the lease taken on pickup,
//! and the outcome transition to Delivered, AwaitingRetry, or Failed. The
//! status update and its attempt-log row are applied through one store
//! call so they commit together.

use std::sync::Arc;

use relay_core::{
    config::EngineConfig,
    models::{EventStatus, HealthStatus, PendingEvent},
    store::Store,
};

use crate::{error::Result, sender::AttemptOutcome};

/// Applies lifecycle transitions for pending events.
#[derive(Clone)]
pub struct DeliveryStateMachine {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl DeliveryStateMachine {
    /// Creates a state machine over the given store.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Marks an event `Sending` with a lease and returns its attempt number.
    ///
    /// The lease doubles as crash recovery: if no outcome is ever recorded,
    /// the event becomes eligible again once the lease expires, at the cost
    /// of a possible duplicate delivery.
    ///
    /// # Errors
    ///
    /// Returns a store error if the event cannot be read or updated.
    pub async fn begin_attempt(
        &self,
        event: &PendingEvent,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<u32> {
        let attempt_number = 1 + self.store.attempt_count(event.id).await?;
        self.store.mark_sending(event.id, now + self.config.lease_timeout()).await?;
        Ok(attempt_number)
    }

    /// Records one attempt's outcome: appends the log row and moves the
    /// event to its next status in a single store transaction.
    ///
    /// An event that has exhausted its attempt budget normally becomes
    /// `Failed`, but while its endpoint is on probation it stays
    /// `AwaitingRetry` at the saturated backoff, so a recovering endpoint
    /// is not punished with premature terminal failures.
    ///
    /// # Errors
    ///
    /// Returns a store error if the combined update cannot be applied.
    pub async fn record_outcome(
        &self,
        event: &PendingEvent,
        endpoint_health: HealthStatus,
        attempt_number: u32,
        outcome: AttemptOutcome,
    ) -> Result<EventStatus> {
        let finished_at = outcome.finished_at;
        let successful = outcome.successful;

        let (status, next_attempt_at) = if successful {
            (EventStatus::Delivered, None)
        } else if attempt_number < self.config.max_attempts {
            let backoff = self.config.backoff_for_attempt(attempt_number);
            (EventStatus::AwaitingRetry, Some(finished_at + backoff))
        } else if endpoint_health == HealthStatus::Probation {
            let backoff = self.config.backoff_for_attempt(attempt_number);
            tracing::info!(
                event_id = %event.id,
                endpoint_id = %event.endpoint_id,
                attempt = attempt_number,
                "attempt budget exhausted but endpoint is on probation; keeping event retryable"
            );
            (EventStatus::AwaitingRetry, Some(finished_at + backoff))
        } else {
            (EventStatus::Failed, None)
        };

        let log = outcome.into_log(event.endpoint_id, event.id, attempt_number);
        self.store.record_outcome(event.id, status, next_attempt_at, log).await?;

        tracing::debug!(
            event_id = %event.id,
            attempt = attempt_number,
            status = %status,
            "recorded attempt outcome"
        );

        Ok(status)
    }
}

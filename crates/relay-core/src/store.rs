//! Storage collaborator traits and the in-memory reference implementation.
//!
//! The record store is external to this engine; everything it needs is
//! expressed as a narrow trait so production hosts can back it with their
//! own persistence while tests run against `memory::MemoryStore`. The
//! event-status update and its accompanying attempt-log insert go through
//! one `record_outcome` call so an implementation can apply both in a
//! single transaction.

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{
        Endpoint, EndpointId, EventId, EventStatus, HealthStatus, PendingEvent, Principal, Record,
        SecurityRule, SendAttemptLog, Subscription,
    },
};

/// Boxed future alias used by the storage traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage operations required by fan-out and delivery.
///
/// This trait abstracts every store operation the engine performs, enabling
/// both host-backed implementations and the in-memory test double. Failures
/// surface as `CoreError::Store`; per-event handling decides whether they
/// abort a run.
pub trait Store: Send + Sync + 'static {
    /// Inserts a batch of pending events atomically.
    ///
    /// Fan-out calls this once per mutation so event creation commits with
    /// the originating change.
    fn insert_events(&self, events: Vec<PendingEvent>) -> StoreFuture<'_, ()>;

    /// Returns events eligible for an attempt right now, FIFO by creation
    /// order.
    ///
    /// Eligible means status `New`, or status `Sending`/`AwaitingRetry`
    /// with a non-null `next_attempt_at` earlier than `now` (an expired
    /// lease counts, recovering leaked attempts).
    fn due_events(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<PendingEvent>>;

    /// Finds one event by id.
    fn find_event(&self, event_id: EventId) -> StoreFuture<'_, Option<PendingEvent>>;

    /// Moves an event to `Sending` and stamps its lease expiry.
    fn mark_sending(&self, event_id: EventId, lease_until: DateTime<Utc>) -> StoreFuture<'_, ()>;

    /// Applies an attempt outcome: updates the event's status and
    /// `next_attempt_at`, and appends the attempt log, in one transaction.
    fn record_outcome(
        &self,
        event_id: EventId,
        status: EventStatus,
        next_attempt_at: Option<DateTime<Utc>>,
        attempt: SendAttemptLog,
    ) -> StoreFuture<'_, ()>;

    /// Number of attempt-log rows recorded for an event.
    fn attempt_count(&self, event_id: EventId) -> StoreFuture<'_, u32>;

    /// All attempt logs for an event, oldest first.
    fn attempts_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<SendAttemptLog>>;

    /// The most recent `limit` attempt logs for an endpoint, returned
    /// oldest first, for seeding the health window.
    fn recent_attempts(
        &self,
        endpoint_id: EndpointId,
        limit: usize,
    ) -> StoreFuture<'_, Vec<SendAttemptLog>>;

    /// Start time of the endpoint's most recent attempt, if any.
    fn last_attempt_started_at(
        &self,
        endpoint_id: EndpointId,
    ) -> StoreFuture<'_, Option<DateTime<Utc>>>;

    /// Finds one endpoint by id.
    fn find_endpoint(&self, endpoint_id: EndpointId) -> StoreFuture<'_, Option<Endpoint>>;

    /// Updates an endpoint's health status.
    fn update_endpoint_health(
        &self,
        endpoint_id: EndpointId,
        health: HealthStatus,
    ) -> StoreFuture<'_, ()>;

    /// All endpoints currently Unhealthy, for the probation sweep.
    fn unhealthy_endpoints(&self) -> StoreFuture<'_, Vec<Endpoint>>;

    /// Active subscriptions registered for an event type.
    fn find_active_subscriptions<'a>(
        &'a self,
        event_type: &'a str,
    ) -> StoreFuture<'a, Vec<Subscription>>;
}

/// Record-security capability supplied by the host.
///
/// The engine never interprets table schemas itself; it asks the host which
/// security rules apply to a table and whether a record is visible to a
/// principal.
pub trait RecordVisibility: Send + Sync {
    /// Security rules configured for a table. Empty means the table has no
    /// record-level security and every subscriber is authorized.
    fn security_rules(&self, table: &str) -> Vec<SecurityRule>;

    /// Whether the record is visible to the principal.
    fn is_visible(&self, table: &str, record: &Record, principal: &Principal) -> bool;
}

/// Rule-driven visibility implementation for hosts whose security model is
/// "field value must match the principal's grant".
///
/// Also serves as the test double across the workspace.
#[derive(Debug, Default)]
pub struct RuleBasedVisibility {
    rules: std::collections::HashMap<String, Vec<SecurityRule>>,
}

impl RuleBasedVisibility {
    /// Creates a visibility checker with no rules (everything visible).
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the security rules for a table.
    #[must_use]
    pub fn with_table_rules(mut self, table: impl Into<String>, rules: Vec<SecurityRule>) -> Self {
        self.rules.insert(table.into(), rules);
        self
    }
}

impl RecordVisibility for RuleBasedVisibility {
    fn security_rules(&self, table: &str) -> Vec<SecurityRule> {
        self.rules.get(table).cloned().unwrap_or_default()
    }

    fn is_visible(&self, table: &str, record: &Record, principal: &Principal) -> bool {
        self.security_rules(table).iter().all(|rule| {
            match record.field_text(&rule.field_name) {
                // Record carries no value for this dimension; nothing to gate on.
                None => true,
                Some(value) => principal.allows(&rule.key_type, &value),
            }
        })
    }
}

pub mod memory {
    //! In-memory store for tests and embedded hosts.
    //!
    //! Keeps all state behind tokio `RwLock`s and preserves insertion order
    //! for FIFO semantics. `record_outcome` holds both the event and the
    //! attempt-log locks for the whole update, standing in for the single
    //! transaction a durable store would use.

    use std::{collections::HashMap, sync::Arc};

    use chrono::{DateTime, Utc};
    use tokio::sync::RwLock;

    use super::{Store, StoreFuture};
    use crate::{
        error::CoreError,
        models::{
            ActiveStatus, Endpoint, EndpointId, EventId, EventStatus, HealthStatus, PendingEvent,
            SendAttemptLog, Subscription,
        },
    };

    /// In-memory implementation of [`Store`].
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        events: Arc<RwLock<Vec<PendingEvent>>>,
        attempts: Arc<RwLock<Vec<SendAttemptLog>>>,
        endpoints: Arc<RwLock<HashMap<EndpointId, Endpoint>>>,
        subscriptions: Arc<RwLock<Vec<Subscription>>>,
    }

    impl MemoryStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers an endpoint.
        pub async fn add_endpoint(&self, endpoint: Endpoint) {
            self.endpoints.write().await.insert(endpoint.id, endpoint);
        }

        /// Registers a subscription.
        pub async fn add_subscription(&self, subscription: Subscription) {
            self.subscriptions.write().await.push(subscription);
        }

        /// Returns every stored event, in insertion order.
        pub async fn all_events(&self) -> Vec<PendingEvent> {
            self.events.read().await.clone()
        }

        /// Returns every recorded attempt log, in insertion order.
        pub async fn all_attempts(&self) -> Vec<SendAttemptLog> {
            self.attempts.read().await.clone()
        }

        /// Replaces an endpoint wholesale, for test setup.
        pub async fn put_endpoint(&self, endpoint: Endpoint) {
            self.endpoints.write().await.insert(endpoint.id, endpoint);
        }
    }

    impl Store for MemoryStore {
        fn insert_events(&self, mut new_events: Vec<PendingEvent>) -> StoreFuture<'_, ()> {
            let events = self.events.clone();
            Box::pin(async move {
                events.write().await.append(&mut new_events);
                Ok(())
            })
        }

        fn due_events(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<PendingEvent>> {
            let events = self.events.clone();
            Box::pin(async move {
                let due = events
                    .read()
                    .await
                    .iter()
                    .filter(|event| match event.status {
                        EventStatus::New => true,
                        EventStatus::Sending | EventStatus::AwaitingRetry => {
                            event.next_attempt_at.is_some_and(|at| at < now)
                        },
                        EventStatus::Delivered | EventStatus::Failed => false,
                    })
                    .cloned()
                    .collect();
                Ok(due)
            })
        }

        fn find_event(&self, event_id: EventId) -> StoreFuture<'_, Option<PendingEvent>> {
            let events = self.events.clone();
            Box::pin(async move {
                Ok(events.read().await.iter().find(|e| e.id == event_id).cloned())
            })
        }

        fn mark_sending(
            &self,
            event_id: EventId,
            lease_until: DateTime<Utc>,
        ) -> StoreFuture<'_, ()> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut events = events.write().await;
                let event = events
                    .iter_mut()
                    .find(|e| e.id == event_id)
                    .ok_or_else(|| CoreError::not_found(format!("event {event_id}")))?;
                event.status = EventStatus::Sending;
                event.next_attempt_at = Some(lease_until);
                Ok(())
            })
        }

        fn record_outcome(
            &self,
            event_id: EventId,
            status: EventStatus,
            next_attempt_at: Option<DateTime<Utc>>,
            attempt: SendAttemptLog,
        ) -> StoreFuture<'_, ()> {
            let events = self.events.clone();
            let attempts = self.attempts.clone();
            Box::pin(async move {
                // Both locks held across the update so no reader observes the
                // status change without its log row.
                let mut events = events.write().await;
                let mut attempts = attempts.write().await;
                let event = events
                    .iter_mut()
                    .find(|e| e.id == event_id)
                    .ok_or_else(|| CoreError::not_found(format!("event {event_id}")))?;
                event.status = status;
                event.next_attempt_at = next_attempt_at;
                attempts.push(attempt);
                Ok(())
            })
        }

        fn attempt_count(&self, event_id: EventId) -> StoreFuture<'_, u32> {
            let attempts = self.attempts.clone();
            Box::pin(async move {
                let count = attempts.read().await.iter().filter(|a| a.event_id == event_id).count();
                Ok(u32::try_from(count).unwrap_or(u32::MAX))
            })
        }

        fn attempts_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<SendAttemptLog>> {
            let attempts = self.attempts.clone();
            Box::pin(async move {
                Ok(attempts
                    .read()
                    .await
                    .iter()
                    .filter(|a| a.event_id == event_id)
                    .cloned()
                    .collect())
            })
        }

        fn recent_attempts(
            &self,
            endpoint_id: EndpointId,
            limit: usize,
        ) -> StoreFuture<'_, Vec<SendAttemptLog>> {
            let attempts = self.attempts.clone();
            Box::pin(async move {
                let matching: Vec<SendAttemptLog> = attempts
                    .read()
                    .await
                    .iter()
                    .filter(|a| a.endpoint_id == endpoint_id)
                    .cloned()
                    .collect();
                let skip = matching.len().saturating_sub(limit);
                Ok(matching.into_iter().skip(skip).collect())
            })
        }

        fn last_attempt_started_at(
            &self,
            endpoint_id: EndpointId,
        ) -> StoreFuture<'_, Option<DateTime<Utc>>> {
            let attempts = self.attempts.clone();
            Box::pin(async move {
                Ok(attempts
                    .read()
                    .await
                    .iter()
                    .filter(|a| a.endpoint_id == endpoint_id)
                    .map(|a| a.started_at)
                    .max())
            })
        }

        fn find_endpoint(&self, endpoint_id: EndpointId) -> StoreFuture<'_, Option<Endpoint>> {
            let endpoints = self.endpoints.clone();
            Box::pin(async move { Ok(endpoints.read().await.get(&endpoint_id).cloned()) })
        }

        fn update_endpoint_health(
            &self,
            endpoint_id: EndpointId,
            health: HealthStatus,
        ) -> StoreFuture<'_, ()> {
            let endpoints = self.endpoints.clone();
            Box::pin(async move {
                let mut endpoints = endpoints.write().await;
                let endpoint = endpoints
                    .get_mut(&endpoint_id)
                    .ok_or_else(|| CoreError::not_found(format!("endpoint {endpoint_id}")))?;
                endpoint.health_status = health;
                Ok(())
            })
        }

        fn unhealthy_endpoints(&self) -> StoreFuture<'_, Vec<Endpoint>> {
            let endpoints = self.endpoints.clone();
            Box::pin(async move {
                Ok(endpoints
                    .read()
                    .await
                    .values()
                    .filter(|e| e.health_status == HealthStatus::Unhealthy)
                    .cloned()
                    .collect())
            })
        }

        fn find_active_subscriptions<'a>(
            &'a self,
            event_type: &'a str,
        ) -> StoreFuture<'a, Vec<Subscription>> {
            let subscriptions = self.subscriptions.clone();
            Box::pin(async move {
                Ok(subscriptions
                    .read()
                    .await
                    .iter()
                    .filter(|s| {
                        s.event_type == event_type && s.active_status == ActiveStatus::Active
                    })
                    .cloned()
                    .collect())
            })
        }
    }

}

//! The fan-out engine: mutation in, pending events out.
//!
//! Converts a detected record mutation into zero or more pending events by
//! matching registered event types, checking per-subscriber record-level
//! authorization, rendering payloads, and batch-inserting the results.
//! Subscription lists are read through a TTL cache that subscription
//! writers invalidate explicitly.

use std::{collections::HashMap, sync::Arc};

use relay_core::{
    cache::TtlCache,
    config::EngineConfig,
    error::Result,
    models::{
        Endpoint, EventId, EventStatus, Mutation, PendingEvent, Principal, SecurityRule,
        Subscription,
    },
    store::{RecordVisibility, Store},
    time::Clock,
};

use crate::{
    event_types::{EventCategory, EventTypeDefinition, EventTypeRegistry},
    payload::{ad_hoc_envelope, record_body, PayloadBuilder, RecordPayloadBuilder},
};

/// Counters describing one fan-out invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutOutcome {
    /// IDs of the pending events created, in insertion order.
    pub created: Vec<EventId>,
    /// Subscriptions whose principal was not authorized to see the record.
    pub skipped_unauthorized: usize,
    /// Subscriptions skipped because their evaluation failed.
    pub errored: usize,
}

impl FanoutOutcome {
    /// Number of events created.
    pub fn created_count(&self) -> usize {
        self.created.len()
    }
}

/// Matches mutations against the event-type registry and produces pending
/// events for every authorized active subscription.
pub struct FanoutEngine {
    registry: EventTypeRegistry,
    store: Arc<dyn Store>,
    visibility: Arc<dyn RecordVisibility>,
    payload_builder: Arc<dyn PayloadBuilder>,
    subscription_cache: TtlCache<String, Vec<Subscription>>,
    clock: Arc<dyn Clock>,
}

impl FanoutEngine {
    /// Creates a fan-out engine with the default record payload builder.
    pub fn new(
        registry: EventTypeRegistry,
        store: Arc<dyn Store>,
        visibility: Arc<dyn RecordVisibility>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            visibility,
            payload_builder: Arc::new(RecordPayloadBuilder::new()),
            subscription_cache: TtlCache::new(config.cache_ttl(), clock.clone()),
            clock,
        }
    }

    /// Replaces the payload builder, builder-style.
    #[must_use]
    pub fn with_payload_builder(mut self, builder: Arc<dyn PayloadBuilder>) -> Self {
        self.payload_builder = builder;
        self
    }

    /// Handles one mutation: matches event types, authorizes subscribers,
    /// and batch-inserts the produced events.
    ///
    /// Failures evaluating one subscription are logged and counted, never
    /// propagated; only the final batch insert can fail, keeping event
    /// creation atomic with the originating change.
    ///
    /// # Errors
    ///
    /// Returns an error only when reading subscriptions or inserting the
    /// event batch fails at the store.
    pub async fn handle_mutation(&self, mutation: &Mutation) -> Result<FanoutOutcome> {
        let mut outcome = FanoutOutcome::default();
        let mut batch = Vec::new();

        let rules = self.visibility.security_rules(&mutation.table);

        for definition in self.registry.candidates(mutation.kind, &mutation.table) {
            if !definition.category.matches(mutation) {
                continue;
            }

            let subscriptions = self.active_subscriptions(&definition.name).await?;
            if subscriptions.is_empty() {
                continue;
            }

            for subscription in &subscriptions {
                match self.evaluate_subscription(mutation, definition, subscription, &rules).await {
                    Ok(Some(event)) => batch.push(event),
                    Ok(None) => outcome.skipped_unauthorized += 1,
                    Err(error) => {
                        outcome.errored += 1;
                        tracing::warn!(
                            subscription_id = %subscription.id,
                            event_type = %definition.name,
                            error = %error,
                            "skipping subscription after evaluation failure"
                        );
                    },
                }
            }
        }

        if !batch.is_empty() {
            outcome.created = batch.iter().map(|event| event.id).collect();
            self.store.insert_events(batch).await?;

            tracing::debug!(
                table = %mutation.table,
                created = outcome.created.len(),
                skipped_unauthorized = outcome.skipped_unauthorized,
                "fan-out produced pending events"
            );
        }

        Ok(outcome)
    }

    /// Evaluates one subscription: authorization, payload, event row.
    ///
    /// `Ok(None)` means the subscriber is not authorized to see the record.
    async fn evaluate_subscription(
        &self,
        mutation: &Mutation,
        definition: &EventTypeDefinition,
        subscription: &Subscription,
        rules: &[SecurityRule],
    ) -> Result<Option<PendingEvent>> {
        let endpoint = self
            .store
            .find_endpoint(subscription.endpoint_id)
            .await?
            .ok_or_else(|| {
                relay_core::CoreError::not_found(format!(
                    "endpoint {} for subscription {}",
                    subscription.endpoint_id, subscription.id
                ))
            })?;

        // A table with no security rules authorizes every subscriber.
        if !rules.is_empty() {
            let principal = build_principal(&endpoint, rules);
            if !self.visibility.is_visible(&mutation.table, &mutation.record, &principal) {
                return Ok(None);
            }
        }

        // Ad-hoc triggers carry a details envelope instead of the plain
        // record shape.
        let payload = if definition.category == EventCategory::AdHoc {
            ad_hoc_envelope(
                serde_json::json!({
                    "eventType": definition.name,
                    "table": mutation.table,
                }),
                record_body(&mutation.record),
            )
        } else {
            self.payload_builder.build(&mutation.record, subscription)
        };

        let mut security_values = HashMap::new();
        for rule in rules {
            if let Some(value) = mutation.record.field_text(&rule.field_name) {
                security_values.insert(rule.key_type.clone(), value);
            }
        }

        Ok(Some(PendingEvent {
            id: EventId::new(),
            endpoint_id: subscription.endpoint_id,
            subscription_id: subscription.id,
            event_type: definition.name.clone(),
            status: EventStatus::New,
            source_table: mutation.table.clone(),
            source_record_id: mutation.record.id.clone(),
            next_attempt_at: None,
            payload,
            security_values,
            created_at: self.clock.now(),
        }))
    }

    /// Active subscriptions for an event type, through the TTL cache.
    async fn active_subscriptions(&self, event_type: &str) -> Result<Vec<Subscription>> {
        if let Some(cached) = self.subscription_cache.get(&event_type.to_string()) {
            return Ok(cached);
        }

        let subscriptions = self.store.find_active_subscriptions(event_type).await?;
        self.subscription_cache.insert(event_type.to_string(), subscriptions.clone());
        Ok(subscriptions)
    }

    /// Drops the cached subscription list for one event type. Called by the
    /// code path that writes subscription records.
    pub fn invalidate_subscriptions(&self, event_type: &str) {
        self.subscription_cache.invalidate(&event_type.to_string());
    }

    /// Drops every cached subscription list. Called on endpoint writes,
    /// which can affect any event type.
    pub fn invalidate_all_subscriptions(&self) {
        self.subscription_cache.invalidate_all();
    }
}

/// Builds the synthetic principal for an endpoint from its stored security
/// values, granting only the key types the table's rules cover. Key types
/// without a rule fall back to the principal's blanket access.
fn build_principal(endpoint: &Endpoint, rules: &[SecurityRule]) -> Principal {
    let mut principal = Principal::new();
    for rule in rules {
        if let Some(value) = endpoint.security_values.get(&rule.key_type) {
            principal.grant(rule.key_type.clone(), value.clone());
        }
    }
    principal
}

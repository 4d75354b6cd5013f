//! End-to-end delivery pipeline tests against an in-memory store and a
//! mock HTTP server, with time controlled by a test clock.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use relay_core::{
    config::EngineConfig,
    models::{
        ActiveStatus, Endpoint, EndpointId, EventId, EventStatus, HealthStatus, Mutation,
        PendingEvent, Record, Subscription, SubscriptionId,
    },
    store::{memory::MemoryStore, RuleBasedVisibility, Store},
    time::{Clock, TestClock},
};
use relay_delivery::DeliveryRunner;
use relay_fanout::{EventCategory, EventTypeDefinition, EventTypeRegistry, FanoutEngine};
use serde_json::json;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct Pipeline {
    runner: DeliveryRunner,
    store: Arc<MemoryStore>,
    clock: TestClock,
}

async fn pipeline(config: EngineConfig) -> Pipeline {
    let clock = TestClock::new();
    let store = Arc::new(MemoryStore::new());
    let runner = DeliveryRunner::new(store.clone(), config, Arc::new(clock.clone())).unwrap();
    Pipeline { runner, store, clock }
}

async fn register_endpoint(pipeline: &Pipeline, server: &MockServer) -> EndpointId {
    let endpoint = Endpoint::new(format!("{}/hook", server.uri()), pipeline.clock.now());
    let id = endpoint.id;
    pipeline.store.add_endpoint(endpoint).await;
    id
}

fn new_event(endpoint_id: EndpointId, created_at: chrono::DateTime<Utc>) -> PendingEvent {
    PendingEvent {
        id: EventId::new(),
        endpoint_id,
        subscription_id: SubscriptionId::new(),
        event_type: "person-inserted".to_string(),
        status: EventStatus::New,
        source_table: "person".to_string(),
        source_record_id: "p-1".to_string(),
        next_attempt_at: None,
        payload: json!({"record": {"id": "p-1"}}),
        security_values: HashMap::new(),
        created_at,
    }
}

async fn mount_status(server: &MockServer, status: u16) {
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

#[tokio::test]
async fn delivers_new_event() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .and(matchers::body_partial_json(json!({"record": {"id": "p-1"}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(EngineConfig::default()).await;
    let endpoint_id = register_endpoint(&pipeline, &server).await;
    let event = new_event(endpoint_id, pipeline.clock.now());
    let event_id = event.id;
    pipeline.store.insert_events(vec![event]).await.unwrap();

    let summary = pipeline.runner.run_once().await.unwrap();

    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.processed(), 1);

    let stored = pipeline.store.find_event(event_id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Delivered);
    assert!(stored.timestamp_invariant_holds());

    let attempts = pipeline.store.attempts_for_event(event_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 1);
    assert!(attempts[0].successful);
    assert_eq!(attempts[0].status_code, Some(200));
}

#[tokio::test]
async fn backoff_schedule_runs_the_table_then_fails() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let config = EngineConfig {
        // Keep the breaker out of this test; only the state machine is
        // under observation.
        unhealthy_after_failures: None,
        ..Default::default()
    };
    let pipeline = pipeline(config).await;
    let endpoint_id = register_endpoint(&pipeline, &server).await;
    let event = new_event(endpoint_id, pipeline.clock.now());
    let event_id = event.id;
    pipeline.store.insert_events(vec![event]).await.unwrap();

    let backoff_minutes = [1i64, 5, 15, 60, 240];
    for (attempt, &minutes) in backoff_minutes.iter().enumerate() {
        let at = pipeline.clock.now();
        let summary = pipeline.runner.run_once().await.unwrap();

        let stored = pipeline.store.find_event(event_id).await.unwrap().unwrap();
        assert!(stored.timestamp_invariant_holds());

        if attempt < 4 {
            assert_eq!(summary.awaiting_retry, 1);
            assert_eq!(stored.status, EventStatus::AwaitingRetry);
            assert_eq!(stored.next_attempt_at, Some(at + chrono::Duration::minutes(minutes)));
            // Move past the scheduled retry (the due predicate is strict).
            pipeline.clock.advance(Duration::from_secs(u64::try_from(minutes).unwrap() * 60 + 1));
        } else {
            assert_eq!(summary.failed, 1);
            assert_eq!(stored.status, EventStatus::Failed);
            assert_eq!(stored.next_attempt_at, None);
        }
    }

    let numbers: Vec<u32> = pipeline
        .store
        .attempts_for_event(event_id)
        .await
        .unwrap()
        .iter()
        .map(|a| a.attempt_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    // A terminal event never becomes due again.
    pipeline.clock.advance(Duration::from_secs(24 * 3600));
    let summary = pipeline.runner.run_once().await.unwrap();
    assert_eq!(summary.processed(), 0);
}

#[tokio::test]
async fn probation_pins_exhausted_events_at_the_last_backoff() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let config = EngineConfig { unhealthy_after_failures: None, ..Default::default() };
    let pipeline = pipeline(config).await;

    let mut endpoint = Endpoint::new(format!("{}/hook", server.uri()), pipeline.clock.now());
    endpoint.health_status = HealthStatus::Probation;
    let endpoint_id = endpoint.id;
    pipeline.store.add_endpoint(endpoint).await;

    let event = new_event(endpoint_id, pipeline.clock.now());
    let event_id = event.id;
    pipeline.store.insert_events(vec![event]).await.unwrap();

    // Seven failed attempts, two past the normal budget of five.
    for attempt in 1..=7u32 {
        let at = pipeline.clock.now();
        let summary = pipeline.runner.run_once().await.unwrap();
        assert_eq!(summary.awaiting_retry, 1, "attempt {attempt} must stay retryable");

        let stored = pipeline.store.find_event(event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::AwaitingRetry);

        let expected_minutes = [1i64, 5, 15, 60, 240][usize::min(attempt as usize - 1, 4)];
        assert_eq!(stored.next_attempt_at, Some(at + chrono::Duration::minutes(expected_minutes)));

        pipeline
            .clock
            .advance(Duration::from_secs(u64::try_from(expected_minutes).unwrap() * 60 + 1));
    }
}

#[tokio::test]
async fn endpoint_trips_unhealthy_mid_batch() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let config = EngineConfig { unhealthy_after_failures: Some(2), ..Default::default() };
    let pipeline = pipeline(config).await;
    let endpoint_id = register_endpoint(&pipeline, &server).await;

    let events: Vec<PendingEvent> =
        (0..3).map(|_| new_event(endpoint_id, pipeline.clock.now())).collect();
    let third_id = events[2].id;
    pipeline.store.insert_events(events).await.unwrap();

    let summary = pipeline.runner.run_once().await.unwrap();

    // Two failures fill the window and trip the breaker; the third event
    // is abandoned untouched.
    assert_eq!(summary.awaiting_retry, 2);
    assert_eq!(summary.skipped_unhealthy, 1);

    let endpoint = pipeline.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.health_status, HealthStatus::Unhealthy);

    let third = pipeline.store.find_event(third_id).await.unwrap().unwrap();
    assert_eq!(third.status, EventStatus::New);

    // While unhealthy, nothing is attempted.
    let summary = pipeline.runner.run_once().await.unwrap();
    assert_eq!(summary.processed(), 0);
    assert_eq!(summary.skipped_unhealthy, 1);
}

#[tokio::test]
async fn sweep_promotes_idle_unhealthy_endpoints() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let config = EngineConfig {
        unhealthy_after_failures: Some(1),
        probation_after_minutes: 60,
        ..Default::default()
    };
    let pipeline = pipeline(config).await;
    let endpoint_id = register_endpoint(&pipeline, &server).await;
    pipeline.store.insert_events(vec![new_event(endpoint_id, pipeline.clock.now())]).await.unwrap();

    // One failure trips the single-entry window.
    pipeline.runner.run_once().await.unwrap();
    let endpoint = pipeline.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.health_status, HealthStatus::Unhealthy);

    // Not idle long enough yet.
    pipeline.clock.advance(Duration::from_secs(30 * 60));
    assert_eq!(pipeline.runner.sweep_unhealthy().await.unwrap(), 0);

    pipeline.clock.advance(Duration::from_secs(31 * 60));
    assert_eq!(pipeline.runner.sweep_unhealthy().await.unwrap(), 1);
    let endpoint = pipeline.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.health_status, HealthStatus::Probation);
}

#[tokio::test]
async fn sweep_ignores_unhealthy_endpoints_without_attempts() {
    let pipeline = pipeline(EngineConfig::default()).await;

    let mut endpoint = Endpoint::new("https://example.test/hook", pipeline.clock.now());
    endpoint.health_status = HealthStatus::Unhealthy;
    let endpoint_id = endpoint.id;
    pipeline.store.add_endpoint(endpoint).await;

    pipeline.clock.advance(Duration::from_secs(24 * 3600));
    assert_eq!(pipeline.runner.sweep_unhealthy().await.unwrap(), 0);

    let endpoint = pipeline.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.health_status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn probation_success_restores_health() {
    let server = MockServer::start().await;
    mount_status(&server, 200).await;

    let pipeline = pipeline(EngineConfig::default()).await;
    let mut endpoint = Endpoint::new(format!("{}/hook", server.uri()), pipeline.clock.now());
    endpoint.health_status = HealthStatus::Probation;
    let endpoint_id = endpoint.id;
    pipeline.store.add_endpoint(endpoint).await;
    pipeline.store.insert_events(vec![new_event(endpoint_id, pipeline.clock.now())]).await.unwrap();

    let summary = pipeline.runner.run_once().await.unwrap();

    assert_eq!(summary.delivered, 1);
    let endpoint = pipeline.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.health_status, HealthStatus::Healthy);
}

#[tokio::test]
async fn probation_failure_returns_to_unhealthy() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let pipeline = pipeline(EngineConfig::default()).await;
    let mut endpoint = Endpoint::new(format!("{}/hook", server.uri()), pipeline.clock.now());
    endpoint.health_status = HealthStatus::Probation;
    let endpoint_id = endpoint.id;
    pipeline.store.add_endpoint(endpoint).await;
    pipeline.store.insert_events(vec![new_event(endpoint_id, pipeline.clock.now())]).await.unwrap();

    let summary = pipeline.runner.run_once().await.unwrap();

    assert_eq!(summary.awaiting_retry, 1);
    let endpoint = pipeline.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.health_status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn leaked_lease_is_recovered_after_timeout() {
    let server = MockServer::start().await;
    mount_status(&server, 200).await;

    let pipeline = pipeline(EngineConfig::default()).await;
    let endpoint_id = register_endpoint(&pipeline, &server).await;

    // An event stuck in Sending, as if a worker died mid-attempt. Its
    // lease expired a minute ago.
    let mut event = new_event(endpoint_id, pipeline.clock.now());
    event.status = EventStatus::Sending;
    event.next_attempt_at = Some(pipeline.clock.now() - chrono::Duration::minutes(1));
    let event_id = event.id;
    pipeline.store.insert_events(vec![event]).await.unwrap();

    let summary = pipeline.runner.run_once().await.unwrap();

    assert_eq!(summary.delivered, 1);
    let stored = pipeline.store.find_event(event_id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Delivered);
}

#[tokio::test]
async fn unexpired_lease_is_left_alone() {
    let pipeline = pipeline(EngineConfig::default()).await;
    let endpoint_id = {
        let endpoint = Endpoint::new("https://example.test/hook", pipeline.clock.now());
        let id = endpoint.id;
        pipeline.store.add_endpoint(endpoint).await;
        id
    };

    let mut event = new_event(endpoint_id, pipeline.clock.now());
    event.status = EventStatus::Sending;
    event.next_attempt_at = Some(pipeline.clock.now() + chrono::Duration::minutes(5));
    pipeline.store.insert_events(vec![event]).await.unwrap();

    let summary = pipeline.runner.run_once().await.unwrap();
    assert_eq!(summary.processed(), 0);
}

#[tokio::test]
async fn inactive_and_missing_endpoints_get_distinct_buckets() {
    let pipeline = pipeline(EngineConfig::default()).await;

    let mut paused = Endpoint::new("https://example.test/a", pipeline.clock.now());
    paused.active_status = ActiveStatus::Paused;
    let paused_id = paused.id;
    pipeline.store.add_endpoint(paused).await;

    let mut unhealthy = Endpoint::new("https://example.test/b", pipeline.clock.now());
    unhealthy.health_status = HealthStatus::Unhealthy;
    let unhealthy_id = unhealthy.id;
    pipeline.store.add_endpoint(unhealthy).await;

    let missing_id = EndpointId::new();

    pipeline
        .store
        .insert_events(vec![
            new_event(paused_id, pipeline.clock.now()),
            new_event(unhealthy_id, pipeline.clock.now()),
            new_event(missing_id, pipeline.clock.now()),
        ])
        .await
        .unwrap();

    let summary = pipeline.runner.run_once().await.unwrap();

    assert_eq!(summary.skipped_disabled, 1);
    assert_eq!(summary.skipped_unhealthy, 1);
    assert_eq!(summary.skipped_missing, 1);
    assert_eq!(summary.processed(), 0);
}

#[tokio::test]
async fn fanout_to_delivery_pipeline() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::body_partial_json(json!({"record": {"id": "p-1", "firstName": "John"}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let clock = TestClock::new();
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig::default();

    let endpoint = Endpoint::new(format!("{}/hook", server.uri()), clock.now());
    let endpoint_id = endpoint.id;
    store.add_endpoint(endpoint).await;
    store.add_subscription(Subscription::new(endpoint_id, "person-inserted")).await;

    let registry = EventTypeRegistry::new().with(EventTypeDefinition::new(
        "person-inserted",
        "person",
        EventCategory::Insert,
    ));
    let fanout = FanoutEngine::new(
        registry,
        store.clone(),
        Arc::new(RuleBasedVisibility::new()),
        &config,
        Arc::new(clock.clone()),
    );

    let record = Record::new("person", "p-1").with_field("firstName", json!("John"));
    let outcome = fanout.handle_mutation(&Mutation::insert(record)).await.unwrap();
    assert_eq!(outcome.created_count(), 1);

    let runner = DeliveryRunner::new(store.clone(), config, Arc::new(clock.clone())).unwrap();
    let summary = runner.run_once().await.unwrap();

    assert_eq!(summary.delivered, 1);
    let events = store.all_events().await;
    assert_eq!(events[0].status, EventStatus::Delivered);
}

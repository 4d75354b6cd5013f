//! Core domain models and strongly-typed identifiers.
//!
//! Defines endpoints, subscriptions, pending events, attempt logs, and
//! newtype ID wrappers for compile-time type safety. Includes the record
//! and mutation types exchanged with the host record store and the
//! principal used for per-subscriber authorization.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed pending-event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Events are immutable
/// once created, and this ID follows them through their entire lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed endpoint identifier.
///
/// Each endpoint represents a unique delivery destination URL with its own
/// active status and health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    /// Creates a new random endpoint ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EndpointId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed attempt-log identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    /// Creates a new random attempt ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner-controlled activation state of an endpoint or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveStatus {
    /// Normal operation, eligible for delivery.
    Active,
    /// Temporarily suspended by the owner; kept for later reactivation.
    Paused,
    /// Turned off; excluded from the due-event query entirely.
    Disabled,
}

/// Per-endpoint health state managed by the circuit breaker.
///
/// ```text
/// Healthy -> Unhealthy -> Probation -> Healthy
///                ^            |
///                └────────────┘  (any failure while on probation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Deliveries flow normally.
    Healthy,
    /// Recent attempts all failed; excluded from delivery until the
    /// probation sweep lets it try again.
    Unhealthy,
    /// Cautious recovery: attempts are allowed, and the next outcome
    /// decides between Healthy and Unhealthy.
    Probation,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Probation => write!(f, "probation"),
        }
    }
}

/// Pending-event lifecycle status.
///
/// Events progress through these states during delivery. State transitions
/// are owned exclusively by the delivery state machine:
///
/// ```text
/// New -> Sending -> Delivered
///            |   -> AwaitingRetry -> Sending -> ...
///            └── -> Failed
/// ```
///
/// `Delivered` and `Failed` are terminal for normal flow; a manual re-send
/// may push a terminal event back through `Sending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Created by fan-out, not yet attempted.
    New,
    /// Leased by a worker; `next_attempt_at` holds the lease expiry.
    Sending,
    /// Delivery confirmed by a 2xx response. Terminal.
    Delivered,
    /// Last attempt failed; `next_attempt_at` holds the scheduled retry.
    AwaitingRetry,
    /// Attempts exhausted. Terminal.
    Failed,
}

impl EventStatus {
    /// Whether this status requires a non-null `next_attempt_at`.
    ///
    /// Invariant: `next_attempt_at` is set iff the status is `Sending` or
    /// `AwaitingRetry`.
    pub fn requires_next_attempt(self) -> bool {
        matches!(self, Self::Sending | Self::AwaitingRetry)
    }

    /// Whether this status ends the normal delivery flow.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Sending => write!(f, "sending"),
            Self::Delivered => write!(f, "delivered"),
            Self::AwaitingRetry => write!(f, "awaiting_retry"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A registered delivery target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique identifier for this endpoint.
    pub id: EndpointId,

    /// Destination URL for HTTP POST deliveries.
    pub url: String,

    /// Owner-controlled activation state.
    pub active_status: ActiveStatus,

    /// Circuit-breaker-managed health state.
    pub health_status: HealthStatus,

    /// Stored security field values keyed by security-key type, used to
    /// build the synthetic principal for record-level authorization.
    pub security_values: HashMap<String, String>,

    /// When this endpoint was registered.
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    /// Creates an active, healthy endpoint for the given URL.
    pub fn new(url: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: EndpointId::new(),
            url: url.into(),
            active_status: ActiveStatus::Active,
            health_status: HealthStatus::Healthy,
            security_values: HashMap::new(),
            created_at,
        }
    }
}

/// A binding of one endpoint to one event type.
///
/// Unique per (event type, endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Endpoint that receives events for this subscription.
    pub endpoint_id: EndpointId,

    /// Name of the registered event type.
    pub event_type: String,

    /// Owner-controlled activation state.
    pub active_status: ActiveStatus,

    /// Target API name used to shape the payload, if any.
    pub api_name: Option<String>,

    /// Target API version used to shape the payload, if any.
    pub api_version: Option<String>,
}

impl Subscription {
    /// Creates an active subscription binding an endpoint to an event type.
    pub fn new(endpoint_id: EndpointId, event_type: impl Into<String>) -> Self {
        Self {
            id: SubscriptionId::new(),
            endpoint_id,
            event_type: event_type.into(),
            active_status: ActiveStatus::Active,
            api_name: None,
            api_version: None,
        }
    }
}

/// One unit of deliverable work: "this subscription should receive this
/// payload".
///
/// Created by fan-out, mutated only by the delivery state machine, never
/// deleted by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Endpoint the payload is delivered to.
    pub endpoint_id: EndpointId,

    /// Subscription that produced this event.
    pub subscription_id: SubscriptionId,

    /// Name of the event type that matched.
    pub event_type: String,

    /// Delivery lifecycle status.
    pub status: EventStatus,

    /// Table of the source record.
    pub source_table: String,

    /// Identifier of the source record.
    pub source_record_id: String,

    /// Lease expiry while `Sending`, scheduled retry while `AwaitingRetry`,
    /// null otherwise.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Rendered JSON content delivered to the endpoint.
    pub payload: serde_json::Value,

    /// Security field values copied from the source record, keyed by
    /// security-key type, for downstream authorization of the event itself.
    pub security_values: HashMap<String, String>,

    /// When fan-out created this event. FIFO key within an endpoint.
    pub created_at: DateTime<Utc>,
}

impl PendingEvent {
    /// Checks the status/timestamp invariant:
    /// `next_attempt_at` is non-null iff status is Sending or AwaitingRetry.
    pub fn timestamp_invariant_holds(&self) -> bool {
        self.status.requires_next_attempt() == self.next_attempt_at.is_some()
    }
}

/// Append-only record of one delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAttemptLog {
    /// Unique identifier for this attempt.
    pub id: AttemptId,

    /// Endpoint the attempt targeted.
    pub endpoint_id: EndpointId,

    /// Event the attempt delivered.
    pub event_id: EventId,

    /// 1-based attempt number, strictly increasing per event.
    pub attempt_number: u32,

    /// Whether the attempt ended in a 2xx response.
    pub successful: bool,

    /// HTTP status code of the final response, if one was received.
    pub status_code: Option<u16>,

    /// Failure detail for unsuccessful attempts.
    pub error_message: Option<String>,

    /// When the attempt started, before any rate-limit sleeps.
    pub started_at: DateTime<Utc>,

    /// When the attempt finished, including rate-limit sleeps.
    pub finished_at: DateTime<Utc>,
}

/// Host-supplied record-security rule: which field of a table carries the
/// value for a given security-key type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    /// Field of the source table holding the security value.
    pub field_name: String,

    /// Security-key type the field value belongs to.
    pub key_type: String,
}

/// Synthetic authorization context built from an endpoint's stored security
/// values.
///
/// Key types without an explicit grant receive blanket access, so unrelated
/// security dimensions never block delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    grants: HashMap<String, String>,
}

impl Principal {
    /// Creates a principal with no explicit grants (blanket access).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an explicit grant for a security-key type.
    pub fn grant(&mut self, key_type: impl Into<String>, value: impl Into<String>) {
        self.grants.insert(key_type.into(), value.into());
    }

    /// Whether this principal may see the given value for a key type.
    ///
    /// Key types with no grant are allowed unconditionally.
    pub fn allows(&self, key_type: &str, value: &str) -> bool {
        self.grants.get(key_type).map_or(true, |granted| granted == value)
    }

    /// Explicit grants, keyed by security-key type.
    pub fn grants(&self) -> &HashMap<String, String> {
        &self.grants
    }
}

/// Kind of source-record change that can trigger event matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A record was inserted.
    Insert,
    /// A record was updated; the old record is usually available.
    Update,
    /// A record was inserted or updated (upsert-style write).
    Store,
    /// An ad-hoc trigger not tied to a record mutation.
    AdHoc,
}

/// A loosely-typed record from the host record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Table the record belongs to.
    pub table: String,

    /// Record identifier within the table.
    pub id: String,

    /// Field values.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Creates a record with the given table and id and no fields.
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self { table: table.into(), id: id.into(), fields: serde_json::Map::new() }
    }

    /// Sets a field value, builder-style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Returns a field value, if present.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// Returns a field rendered as text for comparison purposes.
    ///
    /// Null and missing fields yield `None`; strings are returned as-is;
    /// numbers and booleans use their canonical text form.
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Whether a field is blank: missing, null, or an empty string.
    pub fn field_is_blank(&self, name: &str) -> bool {
        self.field_text(name).is_none_or(|text| text.is_empty())
    }
}

/// A detected change to a source record (or an ad-hoc trigger), as handed
/// to event matching.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Kind of change.
    pub kind: MutationKind,

    /// Table the change happened in.
    pub table: String,

    /// The record after the change.
    pub record: Record,

    /// The record before the change, when the host can supply it.
    pub old_record: Option<Record>,
}

impl Mutation {
    /// Creates an insert mutation for the given record.
    pub fn insert(record: Record) -> Self {
        Self { kind: MutationKind::Insert, table: record.table.clone(), record, old_record: None }
    }

    /// Creates an update mutation carrying both record versions.
    pub fn update(record: Record, old_record: Record) -> Self {
        Self {
            kind: MutationKind::Update,
            table: record.table.clone(),
            record,
            old_record: Some(old_record),
        }
    }

    /// Creates a store (insert-or-update) mutation.
    pub fn store(record: Record, old_record: Option<Record>) -> Self {
        Self { kind: MutationKind::Store, table: record.table.clone(), record, old_record }
    }

    /// Creates an ad-hoc trigger carrying the record context to deliver.
    pub fn ad_hoc(record: Record) -> Self {
        Self { kind: MutationKind::AdHoc, table: record.table.clone(), record, old_record: None }
    }
}

//! Core domain types and collaborator traits for the relay event engine.
//!
//! This crate holds everything shared between fan-out and delivery: the
//! domain model (endpoints, subscriptions, pending events, attempt logs),
//! the storage and record-visibility collaborator traits, engine
//! configuration, the clock abstraction, and the TTL cache.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod time;

pub use cache::TtlCache;
pub use config::EngineConfig;
pub use error::{CoreError, Result};
pub use models::{
    ActiveStatus, AttemptId, Endpoint, EndpointId, EventId, EventStatus, HealthStatus, Mutation,
    MutationKind, PendingEvent, Principal, Record, SecurityRule, SendAttemptLog, Subscription,
    SubscriptionId,
};
pub use store::{memory::MemoryStore, RecordVisibility, RuleBasedVisibility, Store, StoreFuture};
pub use time::{Clock, SystemClock, TestClock};

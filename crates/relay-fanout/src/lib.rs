//! Event matching and fan-out for the relay event engine.
//!
//! Turns detected record mutations into pending events: the registry of
//! event types decides which mutations are interesting, per-subscriber
//! record-level authorization decides who may receive them, and a
//! pluggable payload builder renders the delivered content.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod event_types;
pub mod payload;

pub use engine::{FanoutEngine, FanoutOutcome};
pub use event_types::{EventCategory, EventTypeDefinition, EventTypeRegistry};
pub use payload::{ad_hoc_envelope, record_body, PayloadBuilder, RecordPayloadBuilder};

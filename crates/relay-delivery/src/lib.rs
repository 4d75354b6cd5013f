//! Delivery pipeline for the relay event engine.
//!
//! Takes pending events created by fan-out and delivers them over HTTP
//! with bounded retries: the state machine owns event status transitions,
//! the rate-limited sender performs individual attempts, the health
//! circuit breaker throttles endpoints that are down, and the runner ties
//! them together on a schedule.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod health;
pub mod lifecycle;
pub mod probe;
pub mod runner;
pub mod sender;

pub use error::{DeliveryError, Result};
pub use health::{HealthTracker, HealthWindow};
pub use lifecycle::DeliveryStateMachine;
pub use probe::{EndpointProber, ProbeResult};
pub use runner::{DeliveryRunner, RunSummary};
pub use sender::{AttemptOutcome, RateLimitedSender};

//! Time abstractions for testable and configurable timing operations.
//!
//! Provides a clock abstraction so retry scheduling, lease expiry, and
//! rate-limit sleeps can be tested deterministically. Production code uses
//! `SystemClock`; tests inject `TestClock` and advance it manually.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};

/// Clock abstraction for time operations.
///
/// Everything in the engine that reads the current time or sleeps goes
/// through this trait, so wall-clock scheduling (backoff offsets, lease
/// expiry, TTL caches) is controllable in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// In production this maps to `tokio::time::sleep`; in tests it advances
    /// virtual time immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real clock implementation using system time and tokio's async sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock for deterministic time control.
///
/// Time only moves when `advance` is called or a `sleep` resolves. Cloning
/// shares the underlying counter, so a clock handed to the engine and one
/// kept by the test stay in step.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Milliseconds since UNIX epoch.
    epoch_ms: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self { epoch_ms: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())) }
    }

    /// Creates a test clock starting at a specific time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { epoch_ms: Arc::new(AtomicI64::new(start.timestamp_millis())) }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.epoch_ms.fetch_add(millis, Ordering::AcqRel);
    }

    /// Jumps the clock to a specific time. The clock never moves backwards.
    pub fn jump_to(&self, target: DateTime<Utc>) {
        let target_ms = target.timestamp_millis();
        self.epoch_ms.fetch_max(target_ms, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.epoch_ms.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // In tests, sleep just advances the clock.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

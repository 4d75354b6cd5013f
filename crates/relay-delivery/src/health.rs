//! Per-endpoint health circuit breaker.
//!
//! Health is derived from a sliding window over the most recent attempt
//! outcomes. Windows are scoped to one run: the runner reconstructs them
//! from persisted attempt logs at the start of each endpoint batch, so no
//! shared memory state exists between concurrent runs.

use std::collections::VecDeque;

use relay_core::models::HealthStatus;

/// Fixed-capacity sliding window of attempt outcomes.
///
/// Pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct HealthWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl HealthWindow {
    /// Creates a window holding at most `capacity` outcomes.
    pub fn new(capacity: usize) -> Self {
        Self { outcomes: VecDeque::with_capacity(capacity), capacity }
    }

    /// Pushes an outcome, evicting the oldest when full.
    pub fn push(&mut self, successful: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(successful);
    }

    /// Number of outcomes currently held.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the window holds no outcomes.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Whether the window is at capacity.
    pub fn is_full(&self) -> bool {
        self.outcomes.len() >= self.capacity
    }

    /// The trip predicate: window full and every entry a failure.
    pub fn full_of_failures(&self) -> bool {
        self.is_full() && self.outcomes.iter().all(|&successful| !successful)
    }

    /// Outcomes oldest-first, for inspection in tests.
    pub fn outcomes(&self) -> impl Iterator<Item = bool> + '_ {
        self.outcomes.iter().copied()
    }
}

/// Tracks one endpoint's health across a batch of attempts.
///
/// With no configured threshold the breaker is inert: it never changes
/// state, and endpoints stay wherever the store last put them.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    window: Option<HealthWindow>,
    state: HealthStatus,
}

impl HealthTracker {
    /// Creates a tracker starting from the endpoint's persisted state.
    pub fn new(threshold: Option<u32>, initial: HealthStatus) -> Self {
        let window = threshold.map(|n| HealthWindow::new(n as usize));
        Self { window, state: initial }
    }

    /// Seeds the window from persisted outcomes, oldest first, without
    /// evaluating any transition.
    pub fn seed<I: IntoIterator<Item = bool>>(&mut self, outcomes: I) {
        if let Some(window) = &mut self.window {
            for successful in outcomes {
                window.push(successful);
            }
        }
    }

    /// Pushes one outcome and evaluates the transition rules. Returns the
    /// state after evaluation.
    pub fn observe(&mut self, successful: bool) -> HealthStatus {
        let Some(window) = &mut self.window else {
            return self.state;
        };
        window.push(successful);

        self.state = match (successful, self.state) {
            (true, HealthStatus::Probation) => HealthStatus::Healthy,
            (false, HealthStatus::Probation) => HealthStatus::Unhealthy,
            (false, HealthStatus::Healthy) if window.full_of_failures() => HealthStatus::Unhealthy,
            (_, state) => state,
        };
        self.state
    }

    /// Current health state.
    pub fn state(&self) -> HealthStatus {
        self.state
    }
}

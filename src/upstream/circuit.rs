//! Per-upstream circuit breaker (spec.md §4.5): opens after `failures`
//! consecutive failures within `window`, half-opens after `open_for`.
//!
//! No crate in the pack carries a dedicated circuit-breaker type (monocore's
//! `DockerRegistry` relies solely on `reqwest-retry`'s transient-error
//! retries); this is built from scratch in the same minimal,
//! explicit-state-field style as the teacher's `UploadSession` and
//! `ContainerRegistry`.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

pub struct CircuitBreaker {
    state: Mutex<State>,
    consecutive_failures: Mutex<Vec<Instant>>,
    failure_threshold: usize,
    failure_window: Duration,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, failure_window: Duration, open_duration: Duration) -> Self {
        Self {
            state: Mutex::new(State::Closed),
            consecutive_failures: Mutex::new(Vec::new()),
            failure_threshold,
            failure_window,
            open_duration,
        }
    }

    /// Whether a new call is currently permitted. An open breaker past its
    /// `open_duration` moves to half-open and permits exactly one probe.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Closed | State::HalfOpen => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.open_duration {
                    *state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        *self.state.lock().unwrap() = State::Closed;
        self.consecutive_failures.lock().unwrap().clear();
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut failures = self.consecutive_failures.lock().unwrap();
        failures.push(now);
        failures.retain(|t| now.duration_since(*t) <= self.failure_window);

        if failures.len() >= self.failure_threshold {
            *self.state.lock().unwrap() = State::Open { opened_at: now };
        }
    }
}

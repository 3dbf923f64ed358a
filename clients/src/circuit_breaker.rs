//! Circuit breaker with consecutive-failure tripping and a single
//! half-open trial.
//!
//! Closed: calls pass, each failure bumps a consecutive counter and any
//! success resets it; the counter reaching the threshold opens the
//! circuit. Open: calls fail fast until the cooldown elapses, then the
//! breaker moves to half-open. HalfOpen: exactly one trial call is
//! admitted; its outcome alone decides whether the breaker closes or
//! reopens. Callers racing the trial observe the circuit as open.

use co_core::types::CircuitState;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    state: Mutex<CircuitState>,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    trial_in_flight: AtomicBool,
    last_failure_at: Mutex<Option<i64>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            trial_in_flight: AtomicBool::new(false),
            last_failure_at: Mutex::new(None),
        }
    }

    /// Gate for an outgoing call. `Err` carries the remaining cooldown.
    pub fn check(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = self.opened_at.lock();
                let elapsed = opened_at.map_or(Duration::ZERO, |at| {
                    Instant::now().duration_since(at)
                });
                if elapsed >= self.settings.cooldown {
                    *state = CircuitState::HalfOpen;
                    self.trial_in_flight.store(true, Ordering::SeqCst);
                    tracing::info!("Circuit breaker transitioned to half-open");
                    Ok(())
                } else {
                    Err(self.settings.cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Ok(())
                } else {
                    // A trial is already in flight.
                    Err(Duration::ZERO)
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.trial_in_flight.store(false, Ordering::SeqCst);
                *self.opened_at.lock() = None;
                tracing::info!("Circuit breaker closed after successful trial");
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        *self.last_failure_at.lock() = Some(chrono::Utc::now().timestamp());

        match *state {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.settings.failure_threshold {
                    *state = CircuitState::Open;
                    *self.opened_at.lock() = Some(Instant::now());
                    metrics::counter!("circuit_breaker_opened_total").increment(1);
                    tracing::error!(
                        consecutive_failures = failures,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                *self.opened_at.lock() = Some(Instant::now());
                self.trial_in_flight.store(false, Ordering::SeqCst);
                metrics::counter!("circuit_breaker_opened_total").increment(1);
                tracing::error!("Circuit breaker reopened after failed trial");
            }
            CircuitState::Open => {}
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_failure_at(&self) -> Option<i64> {
        *self.last_failure_at.lock()
    }
}

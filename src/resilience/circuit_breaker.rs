//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: calls pass through, outcomes are counted
//! - Open: dependency assumed down, calls fail fast without running
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure percentage over the rolling window >= threshold
//! Open → Half-Open: reset timeout elapsed since opening
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! The Open → Half-Open move is evaluated when the breaker is next consulted
//! (a call or a state read), not by a timer.
//!
//! Transitions and call outcomes are broadcast to subscribers. Sending never
//! waits, and a lagging subscriber only loses old events.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::rolling::{Outcome, RollingCounts};
use super::timeout::{TimeoutMode, TimeoutPolicy};
use super::PolicyError;
use crate::clock::Clock;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerPhase::Closed => "closed",
            BreakerPhase::Open => "open",
            BreakerPhase::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Per-call cap on the wrapped operation.
    pub timeout: Duration,
    pub timeout_mode: TimeoutMode,
    pub error_threshold_percentage: f64,
    pub reset_timeout: Duration,
    pub rolling_window: Duration,
    pub rolling_buckets: u32,
    /// Calls needed in the window before the threshold is considered.
    pub volume_threshold: u32,
    /// Trial calls allowed concurrently while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            timeout_mode: TimeoutMode::Detach,
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_millis(30_000),
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
            volume_threshold: 0,
            half_open_max_calls: 1,
        }
    }
}

/// Something observable happened inside a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BreakerEvent {
    StateChanged {
        breaker: String,
        from: BreakerPhase,
        to: BreakerPhase,
    },
    Success { breaker: String },
    Failure { breaker: String },
    Timeout { breaker: String },
    Rejected { breaker: String },
}

/// Point-in-time view for health and monitoring endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub phase: BreakerPhase,
    pub rolling_failures: u32,
    pub rolling_total: u32,
    pub failure_percentage: f64,
    /// Milliseconds since the breaker last opened, while open.
    pub open_for_ms: Option<u64>,
}

#[derive(Debug)]
struct State {
    phase: BreakerPhase,
    counts: RollingCounts,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    timeout: TimeoutPolicy,
    state: Mutex<State>,
    events: broadcast::Sender<BreakerEvent>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("phase", &self.state.lock().phase)
            .finish()
    }
}

/// Permission to run one call. A trial permit hands its half-open slot back
/// when dropped, even if the call never completes.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial {
            let mut state = self.breaker.state.lock();
            state.trials_in_flight = state.trials_in_flight.saturating_sub(1);
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let timeout = TimeoutPolicy::new(config.timeout).with_mode(config.timeout_mode);
        let counts = RollingCounts::new(config.rolling_window, config.rolling_buckets);

        Self {
            name: name.into(),
            config,
            clock,
            timeout,
            state: Mutex::new(State {
                phase: BreakerPhase::Closed,
                counts,
                opened_at: None,
                trials_in_flight: 0,
            }),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Current phase, applying a due Open → Half-Open move first.
    pub fn phase(&self) -> BreakerPhase {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state, self.clock.now());
        state.phase
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state, now);
        let (rolling_failures, rolling_total) = state.counts.totals(now);

        BreakerSnapshot {
            name: self.name.clone(),
            phase: state.phase,
            rolling_failures,
            rolling_total,
            failure_percentage: state.counts.failure_percentage(now),
            open_for_ms: match state.phase {
                BreakerPhase::Open => state
                    .opened_at
                    .map(|at| now.saturating_duration_since(at).as_millis() as u64),
                _ => None,
            },
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Fails with [`PolicyError::CircuitOpen`] without calling `op` while the
    /// circuit is open or all half-open trial slots are taken. Otherwise `op`
    /// runs under the configured call timeout and its outcome is recorded.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, PolicyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PolicyError>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.acquire()?;
        let result = self.timeout.run(op()).await;

        match &result {
            Ok(_) => self.on_success(&permit),
            Err(err) => self.on_failure(&permit, err),
        }
        result
    }

    fn acquire(&self) -> Result<Permit<'_>, PolicyError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state, now);

        let phase = state.phase;
        let trial = match phase {
            BreakerPhase::Closed => false,
            BreakerPhase::HalfOpen if state.trials_in_flight < self.config.half_open_max_calls => {
                state.trials_in_flight += 1;
                true
            }
            BreakerPhase::Open | BreakerPhase::HalfOpen => {
                debug!(breaker = %self.name, %phase, "call short-circuited");
                self.emit(BreakerEvent::Rejected {
                    breaker: self.name.clone(),
                });
                return Err(PolicyError::CircuitOpen {
                    name: self.name.clone(),
                });
            }
        };

        Ok(Permit {
            breaker: self,
            trial,
        })
    }

    fn on_success(&self, permit: &Permit<'_>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.emit(BreakerEvent::Success {
            breaker: self.name.clone(),
        });

        let phase = state.phase;
        match phase {
            BreakerPhase::HalfOpen if permit.trial => {
                state.counts.clear();
                state.opened_at = None;
                self.transition(&mut state, BreakerPhase::Closed);
            }
            BreakerPhase::Closed => state.counts.record(Outcome::Success, now),
            // Late result from a call admitted before the circuit opened.
            _ => {}
        }
    }

    fn on_failure(&self, permit: &Permit<'_>, err: &PolicyError) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.emit(if err.is_timeout() {
            BreakerEvent::Timeout {
                breaker: self.name.clone(),
            }
        } else {
            BreakerEvent::Failure {
                breaker: self.name.clone(),
            }
        });

        let phase = state.phase;
        match phase {
            BreakerPhase::HalfOpen if permit.trial => self.open(&mut state, now),
            BreakerPhase::Closed => {
                state.counts.record(Outcome::Failure, now);
                let (_, total) = state.counts.totals(now);
                let percentage = state.counts.failure_percentage(now);
                if total >= self.config.volume_threshold
                    && percentage >= self.config.error_threshold_percentage
                {
                    warn!(
                        breaker = %self.name,
                        failure_percentage = percentage,
                        total,
                        "failure threshold reached, opening circuit"
                    );
                    self.open(&mut state, now);
                }
            }
            _ => {}
        }
    }

    fn open(&self, state: &mut State, now: Instant) {
        state.opened_at = Some(now);
        self.transition(state, BreakerPhase::Open);
    }

    fn maybe_half_open(&self, state: &mut State, now: Instant) {
        if state.phase != BreakerPhase::Open {
            return;
        }
        let due = state
            .opened_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.config.reset_timeout);
        if due {
            state.trials_in_flight = 0;
            self.transition(state, BreakerPhase::HalfOpen);
        }
    }

    fn transition(&self, state: &mut State, to: BreakerPhase) {
        let from = state.phase;
        if from == to {
            return;
        }
        state.phase = to;
        info!(breaker = %self.name, %from, %to, "circuit state changed");
        self.emit(BreakerEvent::StateChanged {
            breaker: self.name.clone(),
            from,
            to,
        });
    }

    fn emit(&self, event: BreakerEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(clock: &ManualClock, volume_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "inventory",
            BreakerConfig {
                volume_threshold,
                reset_timeout: Duration::from_secs(30),
                ..BreakerConfig::default()
            },
            Arc::new(clock.clone()),
        )
    }

    async fn call(breaker: &CircuitBreaker, calls: &Arc<AtomicU32>, fail: bool) -> Result<u32, PolicyError> {
        let calls = Arc::clone(calls);
        breaker
            .execute(move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if fail {
                    Err(PolicyError::operation("downstream error"))
                } else {
                    Ok(n)
                }
            })
            .await
    }

    #[tokio::test]
    async fn test_opens_at_threshold_and_short_circuits() {
        let clock = ManualClock::new();
        let breaker = breaker(&clock, 4);
        let calls = Arc::new(AtomicU32::new(0));

        call(&breaker, &calls, false).await.unwrap();
        call(&breaker, &calls, false).await.unwrap();
        call(&breaker, &calls, true).await.unwrap_err();
        assert_eq!(breaker.phase(), BreakerPhase::Closed);

        call(&breaker, &calls, true).await.unwrap_err();
        assert_eq!(breaker.phase(), BreakerPhase::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let err = call(&breaker, &calls, false).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let clock = ManualClock::new();
        let breaker = breaker(&clock, 0);
        let calls = Arc::new(AtomicU32::new(0));

        call(&breaker, &calls, true).await.unwrap_err();
        assert_eq!(breaker.phase(), BreakerPhase::Open);

        clock.advance(Duration::from_secs(29));
        assert!(call(&breaker, &calls, false).await.unwrap_err().is_circuit_open());

        clock.advance(Duration::from_secs(1));
        assert_eq!(breaker.phase(), BreakerPhase::HalfOpen);
        assert_eq!(call(&breaker, &calls, false).await.unwrap(), 2);
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
        assert_eq!(breaker.snapshot().rolling_total, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let clock = ManualClock::new();
        let breaker = breaker(&clock, 0);
        let calls = Arc::new(AtomicU32::new(0));

        call(&breaker, &calls, true).await.unwrap_err();
        clock.advance(Duration::from_secs(30));

        call(&breaker, &calls, true).await.unwrap_err();
        assert_eq!(breaker.phase(), BreakerPhase::Open);

        clock.advance(Duration::from_secs(10));
        assert!(call(&breaker, &calls, false).await.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_half_open_limits_trials() {
        let clock = ManualClock::new();
        let breaker = Arc::new(breaker(&clock, 0));
        let calls = Arc::new(AtomicU32::new(0));

        call(&breaker, &calls, true).await.unwrap_err();
        clock.advance(Duration::from_secs(30));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .execute(move || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok::<(), PolicyError>(())
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert!(call(&breaker, &calls, false).await.unwrap_err().is_circuit_open());

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(
            "slow",
            BreakerConfig {
                timeout: Duration::from_millis(50),
                ..BreakerConfig::default()
            },
            Arc::new(clock.clone()),
        );
        let mut events = breaker.subscribe();

        let err = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, PolicyError>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(breaker.phase(), BreakerPhase::Open);
        assert_eq!(
            events.recv().await.unwrap(),
            BreakerEvent::Timeout {
                breaker: "slow".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            BreakerEvent::StateChanged {
                breaker: "slow".to_string(),
                from: BreakerPhase::Closed,
                to: BreakerPhase::Open,
            }
        );
    }

    #[tokio::test]
    async fn test_volume_threshold_delays_opening() {
        let clock = ManualClock::new();
        let breaker = breaker(&clock, 3);
        let calls = Arc::new(AtomicU32::new(0));

        call(&breaker, &calls, true).await.unwrap_err();
        call(&breaker, &calls, true).await.unwrap_err();
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
        call(&breaker, &calls, true).await.unwrap_err();
        assert_eq!(breaker.phase(), BreakerPhase::Open);
    }

    #[tokio::test]
    async fn test_snapshot_reports_rolling_counts() {
        let clock = ManualClock::new();
        let breaker = breaker(&clock, 10);
        let calls = Arc::new(AtomicU32::new(0));

        call(&breaker, &calls, false).await.unwrap();
        call(&breaker, &calls, true).await.unwrap_err();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.phase, BreakerPhase::Closed);
        assert_eq!(snapshot.rolling_failures, 1);
        assert_eq!(snapshot.rolling_total, 2);
        assert_eq!(snapshot.failure_percentage, 50.0);
        assert_eq!(snapshot.open_for_ms, None);
    }
}

//! Per-datasource circuit breakers.
//!
//! Each key owns a small state machine guarded by its own mutex, so transitions
//! on one datasource never contend with another. Operations themselves run
//! outside the lock; only the bookkeeping before and after is serialised.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ProcessingError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Open => "open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a closed breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before admitting a probe.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    /// Moves an expired open breaker to half-open.
    fn current_state(&mut self, key: &str, open_timeout: Duration) -> CircuitState {
        if self.state == CircuitState::Open {
            let expired = self
                .opened_at
                .map(|opened| opened.elapsed() >= open_timeout)
                .unwrap_or(true);
            if expired {
                self.state = CircuitState::HalfOpen;
                self.probe_in_flight = false;
                info!(breaker = key, "circuit breaker half-open, admitting probe");
            }
        }
        self.state
    }

    fn trip(&mut self, key: &str) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        warn!(
            breaker = key,
            failures = self.consecutive_failures,
            "circuit breaker opened"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Regular,
    Probe,
}

/// Clears the probe flag if a probe future is dropped before it reports back.
struct ProbeGuard {
    breaker: Arc<Mutex<Breaker>>,
    armed: bool,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}

#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<Mutex<Breaker>>>>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn breaker(&self, key: &str) -> Arc<Mutex<Breaker>> {
        if let Some(existing) = self.breakers.read().get(key) {
            return existing.clone();
        }
        self.breakers
            .write()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Breaker::new())))
            .clone()
    }

    /// Runs `op` under the breaker for `key`.
    ///
    /// An open breaker rejects the call with [`ProcessingError::CircuitOpen`]
    /// without invoking `op`. Otherwise the operation's own error is returned
    /// unchanged and counted against the breaker.
    pub async fn execute<T, F, Fut>(&self, key: &str, op: F) -> Result<T, ProcessingError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProcessingError>>,
    {
        let breaker = self.breaker(key);
        let admission = self.admit(key, &breaker)?;

        let mut guard = ProbeGuard {
            breaker: breaker.clone(),
            armed: admission == Admission::Probe,
        };

        let outcome = op().await;

        guard.armed = false;
        self.record(key, &breaker, admission, outcome.is_ok());
        outcome
    }

    fn admit(&self, key: &str, breaker: &Mutex<Breaker>) -> Result<Admission, ProcessingError> {
        let mut breaker = breaker.lock();
        match breaker.current_state(key, self.config.open_timeout) {
            CircuitState::Closed => Ok(Admission::Regular),
            CircuitState::HalfOpen if !breaker.probe_in_flight => {
                breaker.probe_in_flight = true;
                Ok(Admission::Probe)
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                debug!(breaker = key, "call rejected by open circuit");
                Err(ProcessingError::CircuitOpen(key.to_string()))
            }
        }
    }

    fn record(&self, key: &str, breaker: &Mutex<Breaker>, admission: Admission, success: bool) {
        let mut breaker = breaker.lock();
        match (admission, success) {
            (Admission::Probe, true) => {
                breaker.probe_in_flight = false;
                breaker.consecutive_failures = 0;
                breaker.state = CircuitState::Closed;
                breaker.opened_at = None;
                info!(breaker = key, "circuit breaker closed after successful probe");
            }
            (Admission::Probe, false) => {
                breaker.probe_in_flight = false;
                breaker.consecutive_failures += 1;
                breaker.trip(key);
            }
            // Results of calls admitted before a trip do not move a breaker
            // that is no longer closed.
            (Admission::Regular, true) => {
                if breaker.state == CircuitState::Closed {
                    breaker.consecutive_failures = 0;
                }
            }
            (Admission::Regular, false) => {
                if breaker.state == CircuitState::Closed {
                    breaker.consecutive_failures += 1;
                    if breaker.consecutive_failures >= self.config.failure_threshold {
                        breaker.trip(key);
                    }
                }
            }
        }
    }

    /// State of the breaker for `key`; keys never executed are closed.
    pub fn get_state(&self, key: &str) -> CircuitState {
        let breaker = match self.breakers.read().get(key) {
            Some(breaker) => breaker.clone(),
            None => return CircuitState::Closed,
        };
        let mut breaker = breaker.lock();
        breaker.current_state(key, self.config.open_timeout)
    }

    pub fn is_healthy(&self, key: &str) -> bool {
        self.get_state(key) != CircuitState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(threshold: u32) -> CircuitBreakerManager {
        CircuitBreakerManager::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            open_timeout: Duration::from_secs(30),
        })
    }

    async fn fail(manager: &CircuitBreakerManager, key: &str) -> ProcessingError {
        manager
            .execute(key, || async {
                Err::<(), _>(ProcessingError::Render("boom".into()))
            })
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn unknown_key_is_closed_and_healthy() {
        let manager = CircuitBreakerManager::default();
        assert_eq!(manager.get_state("nothing"), CircuitState::Closed);
        assert!(manager.is_healthy("nothing"));
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures_and_skips_operation() {
        let manager = manager(3);
        for _ in 0..3 {
            let err = fail(&manager, "analytics").await;
            assert!(matches!(err, ProcessingError::Render(_)));
        }
        assert_eq!(manager.get_state("analytics"), CircuitState::Open);
        assert!(!manager.is_healthy("analytics"));

        let calls = AtomicUsize::new(0);
        let err = manager
            .execute("analytics", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProcessingError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::CircuitOpen(key) if key == "analytics"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(manager.is_healthy("onboarding"));
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let manager = manager(2);
        fail(&manager, "db").await;
        manager
            .execute("db", || async { Ok::<_, ProcessingError>(1) })
            .await
            .expect("success");
        fail(&manager, "db").await;
        assert_eq!(manager.get_state("db"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_closes_on_success() {
        let manager = manager(1);
        fail(&manager, "db").await;
        assert_eq!(manager.get_state("db"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(manager.get_state("db"), CircuitState::HalfOpen);
        assert!(manager.is_healthy("db"));

        let value = manager
            .execute("db", || async { Ok::<_, ProcessingError>("rows") })
            .await
            .expect("probe succeeds");
        assert_eq!(value, "rows");
        assert_eq!(manager.get_state("db"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let manager = manager(1);
        fail(&manager, "db").await;
        tokio::time::advance(Duration::from_secs(30)).await;

        fail(&manager, "db").await;
        assert_eq!(manager.get_state("db"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(manager.get_state("db"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_probe() {
        let manager = Arc::new(manager(1));
        fail(&manager, "db").await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .execute("db", || async move {
                        let _ = release_rx.await;
                        Ok::<_, ProcessingError>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let err = manager
            .execute("db", || async { Ok::<_, ProcessingError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::CircuitOpen(_)));

        let _ = release_tx.send(());
        probe.await.expect("join").expect("probe succeeds");
        assert_eq!(manager.get_state("db"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_the_slot() {
        let manager = manager(1);
        fail(&manager, "db").await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let pending = manager.execute("db", || std::future::pending::<Result<(), ProcessingError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        manager
            .execute("db", || async { Ok::<_, ProcessingError>(()) })
            .await
            .expect("second probe admitted");
        assert_eq!(manager.get_state("db"), CircuitState::Closed);
    }
}

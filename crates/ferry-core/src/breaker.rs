// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Three-state circuit breaker guarding calls into the backend agent.
//!
//! `CLOSED → OPEN` after `failure_threshold` net failures, `OPEN → HALF_OPEN`
//! once `open_timeout` has elapsed, `HALF_OPEN → CLOSED` after
//! `success_threshold` consecutive successes.  Failures older than the
//! monitoring window decay one at a time so a slow trickle of old errors
//! never trips the breaker.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use ferry_config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// Fast-fail: the breaker is open and the wrapped function was not
    /// invoked.
    #[error("circuit open: backend temporarily unavailable")]
    Open,
    /// The wrapped function ran and failed.
    #[error(transparent)]
    Inner(#[from] anyhow::Error),
}

struct BreakerState {
    state: CircuitState,
    /// Timestamps of recent failures; the length is the failure count.
    failures: VecDeque<Instant>,
    /// Consecutive successes while half-open.
    successes: u32,
    reopen_at: Option<Instant>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                successes: 0,
                reopen_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Run `f` under the breaker.  Admission is decided before the call; the
    /// outcome is recorded after.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !self.admit() {
            return Err(BreakerError::Open);
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn admit(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        // Window decay: one stale failure forgiven per call.
        if inner.state == CircuitState::Closed {
            if let Some(oldest) = inner.failures.front() {
                if now.duration_since(*oldest)
                    > Duration::from_millis(self.config.monitoring_window_ms)
                {
                    inner.failures.pop_front();
                }
            }
        }

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.reopen_at.is_some_and(|t| now >= t) {
                    info!("circuit breaker half-open: admitting a probe call");
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    inner.reopen_at = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.failures.pop_back();
            }
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    info!("circuit breaker closed after successful probes");
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    warn!(
                        failures = inner.failures.len(),
                        "circuit breaker opened: backend failing"
                    );
                    inner.state = CircuitState::Open;
                    inner.reopen_at =
                        Some(now + Duration::from_millis(self.config.open_timeout_ms));
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker re-opened: probe call failed");
                inner.state = CircuitState::Open;
                inner.successes = 0;
                inner.reopen_at = Some(now + Duration::from_millis(self.config.open_timeout_ms));
            }
            CircuitState::Open => {}
        }
    }

    /// Test hook: force the breaker open immediately.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Open;
        inner.reopen_at =
            Some(Instant::now() + Duration::from_millis(self.config.open_timeout_ms));
    }

    /// Test hook: reset the breaker to closed with no recorded failures.
    pub fn force_closed(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.successes = 0;
        inner.reopen_at = None;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

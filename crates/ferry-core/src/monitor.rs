// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-session token-usage estimation with advisory threshold warnings.
//!
//! Estimates use the 4-chars-per-token heuristic; the backend never reports
//! exact counts over the bridge protocol, so this is intentionally coarse.
//! Warnings are advisory text chunks — the session keeps working either way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// Context window assumed for the backend model.
pub const CONTEXT_LIMIT_TOKENS: usize = 200_000;

const WARNING_RATIO: f64 = 0.80;
const CRITICAL_RATIO: f64 = 0.95;

/// Sweep cadence for idle-session eviction.
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageLevel {
    Warning,
    Critical,
}

struct SessionUsage {
    estimated_tokens: usize,
    messages: usize,
    turn_count: usize,
    last_activity: Instant,
}

pub struct ContextMonitor {
    sessions: Mutex<HashMap<String, SessionUsage>>,
    limit: usize,
    idle_threshold: Duration,
}

impl ContextMonitor {
    pub fn new() -> Self {
        Self::with_limit(CONTEXT_LIMIT_TOKENS)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            limit,
            idle_threshold: Duration::from_secs(3600),
        }
    }

    pub fn with_idle_threshold(mut self, idle_threshold: Duration) -> Self {
        self.idle_threshold = idle_threshold;
        self
    }

    /// `⌈len/4⌉` — the estimate applied to every tracked message.
    pub fn estimate_tokens(text: &str) -> usize {
        text.len().div_ceil(4)
    }

    /// Record a message for the session and return the advisory level the
    /// accumulated usage has reached, if any.
    pub fn record(&self, session_id: &str, text: &str) -> Option<UsageLevel> {
        let mut sessions = self.sessions.lock().unwrap();
        let usage = sessions.entry(session_id.to_string()).or_insert(SessionUsage {
            estimated_tokens: 0,
            messages: 0,
            turn_count: 0,
            last_activity: Instant::now(),
        });
        usage.estimated_tokens += Self::estimate_tokens(text);
        usage.messages += 1;
        usage.last_activity = Instant::now();

        let ratio = (usage.estimated_tokens as f64 / self.limit as f64).min(1.0);
        if ratio >= CRITICAL_RATIO {
            Some(UsageLevel::Critical)
        } else if ratio >= WARNING_RATIO {
            Some(UsageLevel::Warning)
        } else {
            None
        }
    }

    /// Bump the turn counter (one per `session/prompt`).
    pub fn record_turn(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(usage) = sessions.get_mut(session_id) {
            usage.turn_count += 1;
            usage.last_activity = Instant::now();
        }
    }

    pub fn estimated_tokens(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|u| u.estimated_tokens)
            .unwrap_or(0)
    }

    /// Forget a session's usage (called on dispose).
    pub fn forget(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    /// Evict entries idle longer than the threshold.  Advisory bookkeeping
    /// only — actual session lifecycle belongs to the session manager.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, usage| usage.last_activity.elapsed() < self.idle_threshold);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "context monitor evicted idle sessions");
        }
        evicted
    }

    /// Spawn the periodic sweep task.  The task holds a weak handle so it
    /// winds down when the monitor is dropped.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // first tick is immediate; skip it
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(monitor) => {
                        monitor.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

impl Default for ContextMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

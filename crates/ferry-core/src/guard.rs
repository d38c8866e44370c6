// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Process-wide admission control: concurrent sessions, in-flight operations,
//! and memory pressure.  Counters are exact; RSS comes from
//! `/proc/self/statm` on Linux and reads as zero elsewhere, which disables
//! the memory gate rather than guessing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};
use tracing::{debug, warn};

use ferry_config::LimitsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

type GcHook = Box<dyn Fn() + Send + Sync>;

pub struct ResourceGuard {
    limits: LimitsConfig,
    sessions: AtomicUsize,
    /// Operation ids currently holding a slot.  A set (rather than a bare
    /// counter) makes double-finish harmless.
    operations: Mutex<HashSet<String>>,
    gc_hook: Option<GcHook>,
}

impl ResourceGuard {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            sessions: AtomicUsize::new(0),
            operations: Mutex::new(HashSet::new()),
            gc_hook: None,
        }
    }

    /// Install a hook invoked when memory crosses the critical threshold.
    pub fn with_gc_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.gc_hook = Some(Box::new(hook));
        self
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    /// Reserve a session slot.  Returns `false` at the limit.
    pub fn add_session(&self) -> bool {
        loop {
            let current = self.sessions.load(Ordering::Acquire);
            if current >= self.limits.max_concurrent_sessions {
                return false;
            }
            if self
                .sessions
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn remove_session(&self) {
        let previous = self.sessions.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            Some(n.saturating_sub(1))
        });
        debug_assert!(previous.is_ok());
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Admission check without reserving.
    pub fn can_start_operation(&self) -> bool {
        if self.memory_pressure_critical() {
            return false;
        }
        let ops = self.operations.lock().unwrap().len();
        if ops >= self.limits.max_concurrent_operations {
            return false;
        }
        // Derived FD estimate: stdio plus two pipes per session plus one per
        // in-flight operation.  Deliberately coarse; it exists to refuse
        // admission long before the process hits its rlimit.
        let fd_estimate = 3 + 2 * self.session_count() + ops;
        fd_estimate < 1024
    }

    /// Reserve an operation slot atomically.  Returns `false` when admission
    /// is denied or the id already holds a slot.
    pub fn start_operation(&self, id: &str) -> bool {
        if self.memory_pressure_critical() {
            if let Some(hook) = &self.gc_hook {
                debug!("memory critical: invoking gc hook");
                hook();
            } else {
                warn!(
                    rss_mib = self.rss_mib(),
                    "memory critical: refusing new operations"
                );
            }
            return false;
        }
        let mut ops = self.operations.lock().unwrap();
        if ops.len() >= self.limits.max_concurrent_operations {
            return false;
        }
        ops.insert(id.to_string())
    }

    /// Release the slot held by `id`.  Idempotent.
    pub fn finish_operation(&self, id: &str) {
        self.operations.lock().unwrap().remove(id);
    }

    pub fn operation_count(&self) -> usize {
        self.operations.lock().unwrap().len()
    }

    // ── Memory / health ───────────────────────────────────────────────────────

    /// Resident set size in MiB; `0` when the platform offers no cheap probe.
    pub fn rss_mib(&self) -> u64 {
        read_rss_bytes() / (1024 * 1024)
    }

    fn memory_pressure_critical(&self) -> bool {
        let rss = self.rss_mib();
        rss > 0 && rss >= self.limits.memory_critical_mib
    }

    pub fn health(&self) -> HealthLevel {
        let rss = self.rss_mib();
        let ops = self.operation_count();
        let sessions = self.session_count();

        if (rss > 0 && rss >= self.limits.memory_critical_mib)
            || ops >= self.limits.max_concurrent_operations
            || sessions >= self.limits.max_concurrent_sessions
        {
            return HealthLevel::Critical;
        }
        if (rss > 0 && rss >= self.limits.memory_warning_mib)
            || ops * 2 >= self.limits.max_concurrent_operations
            || sessions * 2 >= self.limits.max_concurrent_sessions
        {
            return HealthLevel::Warning;
        }
        HealthLevel::Healthy
    }

    /// Snapshot for `--diagnose` and health requests.
    pub fn report(&self) -> Value {
        json!({
            "health": self.health().as_str(),
            "sessions": self.session_count(),
            "max_sessions": self.limits.max_concurrent_sessions,
            "operations": self.operation_count(),
            "max_operations": self.limits.max_concurrent_operations,
            "rss_mib": self.rss_mib(),
            "memory_warning_mib": self.limits.memory_warning_mib,
            "memory_critical_mib": self.limits.memory_critical_mib,
        })
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> u64 {
    // statm field 2 is resident pages.
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|f| f.parse().ok())
        .unwrap_or(0);
    pages * 4096
}

#[cfg(not(target_os = "linux"))]
fn read_rss_bytes() -> u64 {
    0
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

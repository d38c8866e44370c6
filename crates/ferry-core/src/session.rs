// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Session lifecycle and per-session mutual exclusion.
//!
//! Each session carries its own turn lock; the executor holds it for the
//! whole turn and a concurrent `session/prompt` fails fast with
//! `SESSION_BUSY` instead of queueing.  The map lock is held only for
//! add/remove/lookup, never across a turn.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use ferry_config::PermissionMode;
use ferry_protocol::PlanEntry;

use crate::error::BridgeError;
use crate::guard::ResourceGuard;
use crate::toolcall::ToolCallRecord;

/// Handle to one in-flight turn: at most one exists per session.
#[derive(Debug)]
pub struct TurnHandle {
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
    event_count: AtomicU64,
}

impl TurnHandle {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
            event_count: AtomicU64::new(0),
        }
    }

    pub fn record_event(&self) {
        self.event_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }
}

/// In-memory conversation session.
pub struct Session {
    pub id: String,
    /// Workspace root; absolute paths outside it require confirmation.
    pub cwd: PathBuf,
    /// Declared external tool servers, passed through to the backend opaque.
    pub mcp_servers: Vec<Value>,
    pub created_at: DateTime<Utc>,

    mode: Mutex<PermissionMode>,
    backend_handle: Mutex<Option<String>>,
    /// Held by the turn executor for the duration of one turn.
    turn_lock: tokio::sync::Mutex<()>,
    current_turn: Mutex<Option<std::sync::Arc<TurnHandle>>>,
    current_plan: Mutex<Vec<PlanEntry>>,
    active_tool_calls: Mutex<HashMap<String, ToolCallRecord>>,
    /// Tool names granted `allow_always` (or blanket-denied) by the host.
    allow_always: Mutex<HashSet<String>>,
    reject_always: Mutex<HashSet<String>>,
    last_activity: Mutex<DateTime<Utc>>,
}

impl Session {
    fn new(id: String, cwd: PathBuf, mode: PermissionMode, mcp_servers: Vec<Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            cwd,
            mcp_servers,
            created_at: now,
            mode: Mutex::new(mode),
            backend_handle: Mutex::new(None),
            turn_lock: tokio::sync::Mutex::new(()),
            current_turn: Mutex::new(None),
            current_plan: Mutex::new(Vec::new()),
            active_tool_calls: Mutex::new(HashMap::new()),
            allow_always: Mutex::new(HashSet::new()),
            reject_always: Mutex::new(HashSet::new()),
            last_activity: Mutex::new(now),
        }
    }

    // ── Permission mode ───────────────────────────────────────────────────────

    pub fn permission_mode(&self) -> PermissionMode {
        *self.mode.lock().unwrap()
    }

    /// Mode changes persist for the rest of the session ("for this turn
    /// onward" per the inline marker contract).
    pub fn set_permission_mode(&self, mode: PermissionMode) {
        *self.mode.lock().unwrap() = mode;
    }

    // ── Backend conversation handle ───────────────────────────────────────────

    pub fn backend_handle(&self) -> Option<String> {
        self.backend_handle.lock().unwrap().clone()
    }

    pub fn set_backend_handle(&self, handle: String) {
        *self.backend_handle.lock().unwrap() = Some(handle);
    }

    // ── Turn lock ─────────────────────────────────────────────────────────────

    /// Try to claim the session for one turn.  Returns the lock guard and the
    /// fresh turn handle, or `SessionBusy` when a turn is already running.
    pub fn begin_turn(
        &self,
    ) -> Result<(tokio::sync::MutexGuard<'_, ()>, std::sync::Arc<TurnHandle>), BridgeError> {
        let guard = self
            .turn_lock
            .try_lock()
            .map_err(|_| BridgeError::SessionBusy(self.id.clone()))?;
        let handle = std::sync::Arc::new(TurnHandle::new());
        *self.current_turn.lock().unwrap() = Some(handle.clone());
        self.touch();
        Ok((guard, handle))
    }

    /// Clear the turn handle once the executor has returned.
    pub fn end_turn(&self) {
        *self.current_turn.lock().unwrap() = None;
        self.touch();
    }

    /// Fire the in-flight turn's cancel token, if any.  Idempotent.
    pub fn cancel_turn(&self) {
        if let Some(handle) = self.current_turn.lock().unwrap().as_ref() {
            handle.cancel.cancel();
        }
    }

    // ── Plan / tool call state ────────────────────────────────────────────────

    pub fn set_plan(&self, entries: Vec<PlanEntry>) {
        *self.current_plan.lock().unwrap() = entries;
    }

    pub fn plan(&self) -> Vec<PlanEntry> {
        self.current_plan.lock().unwrap().clone()
    }

    pub fn insert_tool_call(&self, record: ToolCallRecord) {
        self.active_tool_calls
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn with_tool_call<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ToolCallRecord) -> R,
    ) -> Option<R> {
        self.active_tool_calls.lock().unwrap().get_mut(id).map(f)
    }

    /// Remove a record once it is terminal and its final update was sent.
    pub fn remove_tool_call(&self, id: &str) -> Option<ToolCallRecord> {
        self.active_tool_calls.lock().unwrap().remove(id)
    }

    /// Drain every non-terminal record (cancellation path).
    pub fn drain_open_tool_calls(&self) -> Vec<ToolCallRecord> {
        let mut calls = self.active_tool_calls.lock().unwrap();
        let open_ids: Vec<String> = calls
            .iter()
            .filter(|(_, r)| !r.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        open_ids
            .into_iter()
            .filter_map(|id| calls.remove(&id))
            .collect()
    }

    pub fn active_tool_call_count(&self) -> usize {
        self.active_tool_calls.lock().unwrap().len()
    }

    // ── Standing permission grants ────────────────────────────────────────────

    pub fn grant_always(&self, tool_name: &str) {
        self.allow_always.lock().unwrap().insert(tool_name.to_string());
    }

    pub fn is_granted_always(&self, tool_name: &str) -> bool {
        self.allow_always.lock().unwrap().contains(tool_name)
    }

    pub fn deny_always(&self, tool_name: &str) {
        self.reject_always.lock().unwrap().insert(tool_name.to_string());
    }

    pub fn is_denied_always(&self, tool_name: &str) -> bool {
        self.reject_always.lock().unwrap().contains(tool_name)
    }

    // ── Activity ──────────────────────────────────────────────────────────────

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock().unwrap()
    }
}

/// Owns every session in the process.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, std::sync::Arc<Session>>>,
    guard: std::sync::Arc<ResourceGuard>,
    initial_mode: PermissionMode,
}

impl SessionManager {
    pub fn new(guard: std::sync::Arc<ResourceGuard>, initial_mode: PermissionMode) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            guard,
            initial_mode,
        }
    }

    /// Create a session with a fresh id.
    pub fn create(
        &self,
        cwd: PathBuf,
        mcp_servers: Vec<Value>,
    ) -> Result<std::sync::Arc<Session>, BridgeError> {
        self.insert(Uuid::new_v4().to_string(), cwd, mcp_servers)
    }

    /// Adopt a host-supplied session id.  Returns the existing session when
    /// the id is already live; otherwise creates a fresh one bound to it
    /// (memory-only sessions — no history replay).
    pub fn adopt(
        &self,
        session_id: &str,
        cwd: PathBuf,
        mcp_servers: Vec<Value>,
    ) -> Result<std::sync::Arc<Session>, BridgeError> {
        if let Some(existing) = self.sessions.lock().unwrap().get(session_id) {
            return Ok(existing.clone());
        }
        self.insert(session_id.to_string(), cwd, mcp_servers)
    }

    fn insert(
        &self,
        id: String,
        cwd: PathBuf,
        mcp_servers: Vec<Value>,
    ) -> Result<std::sync::Arc<Session>, BridgeError> {
        if !self.guard.add_session() {
            return Err(BridgeError::Resource(
                "session limit reached".to_string(),
            ));
        }
        let session = std::sync::Arc::new(Session::new(
            id.clone(),
            cwd,
            self.initial_mode,
            mcp_servers,
        ));
        self.sessions.lock().unwrap().insert(id.clone(), session.clone());
        info!(session_id = %id, "session created");
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Result<std::sync::Arc<Session>, BridgeError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))
    }

    /// Fire the session's cancel token.  Idempotent; unknown ids are a no-op
    /// (cancel is a notification and has no error channel).
    pub fn cancel(&self, session_id: &str) {
        if let Ok(session) = self.get(session_id) {
            debug!(session_id, "cancelling in-flight turn");
            session.cancel_turn();
        }
    }

    /// Cancel, release resources, and forget the session.
    pub fn dispose(&self, session_id: &str) {
        let removed = self.sessions.lock().unwrap().remove(session_id);
        if let Some(session) = removed {
            session.cancel_turn();
            self.guard.remove_session();
            info!(session_id, "session disposed");
        }
    }

    /// Dispose every session (shutdown path).
    pub fn dispose_all(&self) {
        let all: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        for id in all {
            self.dispose(&id);
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

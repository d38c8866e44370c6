// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The turn executor: one `session/prompt` from pre-flight to stop reason.
//!
//! Owns the session for the duration (the facade holds the turn lock) and
//! drives the backend event stream, translating each event into ordered
//! `session/update` notifications.  The cancel token is checked at every
//! yield point; all host-bound writes go through the single transport writer,
//! so the final response cannot overtake any update.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use ferry_backend::{BackendAgent, BackendEvent, TurnRequest};
use ferry_protocol::{ContentBlock, SessionUpdate, StopReason, ToolCallStatus};
use ferry_config::PermissionMode;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::error::BridgeError;
use crate::guard::ResourceGuard;
use crate::host::HostClient;
use crate::monitor::{ContextMonitor, UsageLevel, CONTEXT_LIMIT_TOKENS};
use crate::permission::PermissionBroker;
use crate::plan::PlanTracker;
use crate::session::{Session, TurnHandle};
use crate::toolcall::{synthesize_diff, ToolCallRecord};

/// Inline markers a host may embed in prompt text to switch permission modes
/// mid-conversation.  First marker wins; all are stripped before the prompt
/// reaches the backend.
const MODE_MARKERS: &[(&str, PermissionMode)] = &[
    ("[ACP:PERMISSION:ACCEPT_EDITS]", PermissionMode::AcceptEdits),
    ("[ACP:PERMISSION:BYPASS]", PermissionMode::BypassPermissions),
    ("[ACP:PERMISSION:DEFAULT]", PermissionMode::Default),
];

/// Delay before a pending tool call is reported as running.
const IN_PROGRESS_DELAY: Duration = Duration::from_millis(100);

/// Trailing debounce for plan updates.
const PLAN_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct TurnExecutor {
    pub session: Arc<Session>,
    pub host: Arc<dyn HostClient>,
    pub backend: Arc<dyn BackendAgent>,
    pub breaker: Arc<CircuitBreaker>,
    pub guard: Arc<ResourceGuard>,
    pub monitor: Arc<ContextMonitor>,
    /// Turn budget forwarded to the backend; `0` means unlimited.
    pub max_turns: u32,
}

impl TurnExecutor {
    /// Run one turn to completion.  Errors returned here are bridge
    /// scaffolding failures and become method errors; backend failures are
    /// surfaced in-band and still produce a stop reason.
    pub async fn run(
        &self,
        prompt_blocks: &[ContentBlock],
        handle: Arc<TurnHandle>,
    ) -> Result<StopReason, BridgeError> {
        let op_id = format!("{}:{}", self.session.id, uuid::Uuid::new_v4());
        if !self.guard.start_operation(&op_id) {
            return Err(BridgeError::Resource("operation limit reached".into()));
        }
        let result = self.run_inner(prompt_blocks, handle).await;
        self.guard.finish_operation(&op_id);
        result
    }

    async fn run_inner(
        &self,
        prompt_blocks: &[ContentBlock],
        handle: Arc<TurnHandle>,
    ) -> Result<StopReason, BridgeError> {
        let session = &self.session;

        // ── Pre-flight ────────────────────────────────────────────────────────
        let prompt = self.apply_mode_markers(concat_prompt(prompt_blocks));

        self.monitor.record_turn(&session.id);
        if let Some(level) = self.monitor.record(&session.id, &prompt) {
            self.emit_usage_advisory(level).await;
        }

        let request = TurnRequest {
            prompt: prompt.clone(),
            resume_id: session.backend_handle(),
            max_turns: (self.max_turns > 0).then_some(self.max_turns),
            permission_mode: session.permission_mode().as_str().to_string(),
        };

        let backend = self.backend.clone();
        let stream = match self.breaker.call(move || async move {
            backend.start_turn(request).await
        }).await {
            Ok(stream) => stream,
            Err(BreakerError::Open) => {
                self.emit_text(
                    "The backend agent is temporarily unavailable; please try again shortly.",
                )
                .await;
                return Ok(StopReason::EndTurn);
            }
            Err(BreakerError::Inner(e)) => {
                warn!(error = %e, "backend failed to start the turn");
                self.emit_text(&format!("Backend error: {e:#}")).await;
                return Ok(StopReason::EndTurn);
            }
        };
        let mut stream = stream;

        // Synthetic plan for complex prompts, sent before streaming begins.
        let mut plan = PlanTracker::from_prompt(&prompt);
        if plan.is_dirty() {
            self.flush_plan(&mut plan).await;
        }
        let mut plan_deadline: Option<Instant> = None;

        // Pending pending→in_progress upgrades, oldest first.
        let mut upgrades: VecDeque<(Instant, String)> = VecDeque::new();

        // ── Event loop ────────────────────────────────────────────────────────
        loop {
            let next_deadline = match (upgrades.front().map(|(t, _)| *t), plan_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let sleep_target =
                next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => {
                    return Ok(self.finish_cancelled().await);
                }
                _ = tokio::time::sleep_until(sleep_target), if next_deadline.is_some() => {
                    self.fire_timers(&mut upgrades, &mut plan, &mut plan_deadline).await;
                }
                event = stream.next() => {
                    let event = match event {
                        None => {
                            // Stream ended without a terminal marker; treat it
                            // as a completed turn rather than wedging the host.
                            debug!("backend stream ended without terminal event");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "backend stream error");
                            self.emit_text(&format!("Backend error: {e:#}")).await;
                            break;
                        }
                        Some(Ok(event)) => event,
                    };
                    handle.record_event();
                    match event {
                        BackendEvent::SessionAssigned { id } => {
                            session.set_backend_handle(id);
                        }
                        BackendEvent::AssistantText { text } => {
                            self.monitor.record(&session.id, &text);
                            self.emit_text(&text).await;
                        }
                        BackendEvent::AssistantThought { text } => {
                            self.host
                                .session_update(
                                    &session.id,
                                    SessionUpdate::AgentThoughtChunk {
                                        content: ContentBlock::text(text),
                                    },
                                )
                                .await;
                        }
                        BackendEvent::ToolUse { id, name, input } => {
                            self.on_tool_use(id, &name, input, &handle, &mut upgrades).await;
                        }
                        BackendEvent::ToolResult { id, output } => {
                            upgrades.retain(|(_, pending)| pending != &id);
                            if self.on_tool_result(&id, output).await {
                                plan.advance();
                                if plan.is_dirty() {
                                    // Trailing debounce: every completion pushes
                                    // the flush another 500 ms out.
                                    plan_deadline = Some(Instant::now() + PLAN_DEBOUNCE);
                                }
                            }
                        }
                        BackendEvent::ToolError { id, message } => {
                            upgrades.retain(|(_, pending)| pending != &id);
                            self.finish_tool_call(
                                &id,
                                ToolCallStatus::Failed,
                                vec![ContentBlock::text(message)],
                            )
                            .await;
                        }
                        BackendEvent::TurnEnd => break,
                        BackendEvent::TurnError { message } => {
                            self.emit_text(&format!("Backend error: {message}")).await;
                            break;
                        }
                    }
                }
            }
        }

        // Trailing plan state flushes before the response is sent.
        if plan.is_dirty() {
            self.flush_plan(&mut plan).await;
        }
        Ok(StopReason::EndTurn)
    }

    // ── Pre-flight helpers ────────────────────────────────────────────────────

    /// Apply the first inline permission marker and strip all of them.
    fn apply_mode_markers(&self, prompt: String) -> String {
        let first = MODE_MARKERS
            .iter()
            .filter_map(|(marker, mode)| prompt.find(marker).map(|pos| (pos, *mode)))
            .min_by_key(|(pos, _)| *pos);
        if let Some((_, mode)) = first {
            debug!(mode = mode.as_str(), "inline permission marker applied");
            self.session.set_permission_mode(mode);
            let mut cleaned = prompt;
            for (marker, _) in MODE_MARKERS {
                cleaned = cleaned.replace(marker, "");
            }
            cleaned.trim().to_string()
        } else {
            prompt
        }
    }

    async fn emit_usage_advisory(&self, level: UsageLevel) {
        let used = self.monitor.estimated_tokens(&self.session.id);
        let text = match level {
            UsageLevel::Warning => format!(
                "Note: this conversation has used roughly {used} of {CONTEXT_LIMIT_TOKENS} \
                 context tokens. Consider starting a fresh session for unrelated work."
            ),
            UsageLevel::Critical => format!(
                "Warning: this conversation is close to the {CONTEXT_LIMIT_TOKENS}-token \
                 context limit (~{used} used). Replies may lose earlier context."
            ),
        };
        self.emit_text(&text).await;
    }

    // ── Event handlers ────────────────────────────────────────────────────────

    async fn on_tool_use(
        &self,
        id: String,
        name: &str,
        input: serde_json::Value,
        handle: &TurnHandle,
        upgrades: &mut VecDeque<(Instant, String)>,
    ) {
        let record = ToolCallRecord::new(id.clone(), name, input);
        self.session.insert_tool_call(record.clone());

        self.host
            .session_update(
                &self.session.id,
                SessionUpdate::ToolCall {
                    tool_call_id: record.id.clone(),
                    title: record.title.clone(),
                    kind: record.kind,
                    status: ToolCallStatus::Pending,
                    raw_input: Some(record.raw_input.clone()),
                    locations: record.locations.clone(),
                },
            )
            .await;

        let allowed =
            PermissionBroker::check(self.host.as_ref(), &self.session, &record, &handle.cancel)
                .await;
        if allowed {
            upgrades.push_back((Instant::now() + IN_PROGRESS_DELAY, id));
        } else {
            // The backend is expected to refuse the tool itself (there is no
            // veto hook on the adapter); the host still sees the denial.
            self.finish_tool_call(
                &id,
                ToolCallStatus::Failed,
                vec![ContentBlock::text("Permission denied")],
            )
            .await;
        }
    }

    /// Returns `true` when the result completed a live tool call.
    async fn on_tool_result(&self, id: &str, output: serde_json::Value) -> bool {
        let raw_input = self
            .session
            .with_tool_call(id, |record| record.raw_input.clone());
        let Some(raw_input) = raw_input else {
            // Result for a call this turn never saw (or one already finished,
            // e.g. after a permission denial).
            debug!(tool_call_id = id, "dropping result for unknown tool call");
            return false;
        };

        let mut content = Vec::new();
        if let Some(diff) = synthesize_diff(&raw_input) {
            content.push(diff);
        } else if let Some(text) = render_output(&output) {
            content.push(ContentBlock::text(text));
        }
        self.finish_tool_call(id, ToolCallStatus::Completed, content).await;
        true
    }

    /// Emit the single terminal update for a tool call and retire its record.
    async fn finish_tool_call(
        &self,
        id: &str,
        status: ToolCallStatus,
        content: Vec<ContentBlock>,
    ) {
        let was_open = self
            .session
            .with_tool_call(id, |record| {
                if record.is_terminal() {
                    false
                } else {
                    record.status = status;
                    true
                }
            })
            .unwrap_or(false);
        if !was_open {
            return;
        }
        self.host
            .session_update(
                &self.session.id,
                SessionUpdate::ToolCallUpdate {
                    tool_call_id: id.to_string(),
                    status: Some(status),
                    title: None,
                    content: (!content.is_empty()).then_some(content),
                },
            )
            .await;
        self.session.remove_tool_call(id);
    }

    async fn fire_timers(
        &self,
        upgrades: &mut VecDeque<(Instant, String)>,
        plan: &mut PlanTracker,
        plan_deadline: &mut Option<Instant>,
    ) {
        let now = Instant::now();
        while upgrades.front().is_some_and(|(t, _)| *t <= now) {
            let (_, id) = upgrades.pop_front().expect("front checked above");
            let still_pending = self
                .session
                .with_tool_call(&id, |record| {
                    if record.status == ToolCallStatus::Pending {
                        record.status = ToolCallStatus::InProgress;
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);
            if still_pending {
                self.host
                    .session_update(
                        &self.session.id,
                        SessionUpdate::ToolCallUpdate {
                            tool_call_id: id,
                            status: Some(ToolCallStatus::InProgress),
                            title: None,
                            content: None,
                        },
                    )
                    .await;
            }
        }
        if plan_deadline.is_some_and(|t| t <= now) {
            *plan_deadline = None;
            if plan.is_dirty() {
                self.flush_plan(plan).await;
            }
        }
    }

    async fn flush_plan(&self, plan: &mut PlanTracker) {
        let entries = plan.take_snapshot();
        self.session.set_plan(entries.clone());
        self.host
            .session_update(&self.session.id, SessionUpdate::Plan { entries })
            .await;
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    /// Wind the turn down after the cancel token fired: fail every open tool
    /// call, flush those updates, and abort the backend stream.  The response
    /// goes out promptly — the backend releases its resources on its own
    /// time.
    async fn finish_cancelled(&self) -> StopReason {
        for record in self.session.drain_open_tool_calls() {
            self.host
                .session_update(
                    &self.session.id,
                    SessionUpdate::ToolCallUpdate {
                        tool_call_id: record.id,
                        status: Some(ToolCallStatus::Failed),
                        title: None,
                        content: Some(vec![ContentBlock::text("cancelled")]),
                    },
                )
                .await;
        }
        self.backend.cancel().await;
        StopReason::Cancelled
    }

    async fn emit_text(&self, text: &str) {
        self.host
            .session_update(
                &self.session.id,
                SessionUpdate::AgentMessageChunk {
                    content: ContentBlock::text(text),
                },
            )
            .await;
    }
}

/// Concatenate the textual parts of a prompt.  Embedded resources arrive as
/// context-tagged blocks; images and audio carry no text and are skipped.
fn concat_prompt(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.clone()),
            ContentBlock::Resource { resource } => Some(format!(
                "<context uri=\"{}\">\n{}\n</context>",
                resource.uri, resource.text
            )),
            ContentBlock::ResourceLink { uri, title } => Some(match title {
                Some(t) => format!("[{t}]({uri})"),
                None => format!("<resource uri=\"{uri}\" />"),
            }),
            ContentBlock::Image { .. } | ContentBlock::Diff { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain-text rendering of a tool result payload.
fn render_output(output: &serde_json::Value) -> Option<String> {
    match output {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => (!s.is_empty()).then(|| s.clone()),
        other => serde_json::to_string_pretty(other).ok(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

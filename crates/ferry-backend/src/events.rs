// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

/// Events streamed by a backend agent during one turn.
///
/// Adapters must produce a finite stream terminated by `TurnEnd` or
/// `TurnError`, and must emit `ToolUse` before the matching `ToolResult` /
/// `ToolError`.  `SessionAssigned` should appear once per adopted turn so the
/// bridge can resume the backend conversation later.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// The backend assigned (or confirmed) its own conversation id.
    SessionAssigned { id: String },
    /// A chunk of assistant-visible text.
    AssistantText { text: String },
    /// A chunk of reasoning text, rendered separately by hosts.
    AssistantThought { text: String },
    /// The backend started a tool invocation.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// A tool invocation finished with output.
    ToolResult { id: String, output: Value },
    /// A tool invocation failed.
    ToolError { id: String, message: String },
    /// The turn completed normally.
    TurnEnd,
    /// The turn aborted; the message is surfaced to the user in-band.
    TurnError { message: String },
}

impl BackendEvent {
    /// `true` for the two events that terminate a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnEnd | Self::TurnError { .. })
    }
}

/// One prompt turn handed to a backend adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnRequest {
    /// Concatenated prompt text (inline permission markers already stripped).
    pub prompt: String,
    /// Backend-side conversation id from a previous `SessionAssigned`.
    pub resume_id: Option<String>,
    /// Turn budget; `None` leaves the backend's default in place.
    pub max_turns: Option<u32>,
    /// Current permission mode, forwarded so the backend can align its own
    /// tool gating with the bridge's.
    pub permission_mode: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

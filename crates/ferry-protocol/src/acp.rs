// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent Client Protocol schema.
//!
//! The bridge is the *agent* side of ACP: it implements `initialize`,
//! `session/new`, `session/load`, `authenticate`, `session/prompt`, and
//! `session/cancel`, and calls back into the host with `session/update`
//! notifications and `session/request_permission` requests.
//!
//! Field names follow the ACP wire spelling (camelCase); enum tags use
//! snake_case discriminators, matching the protocol documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Method names ──────────────────────────────────────────────────────────────

/// Agent-side methods (the bridge implements these).
pub mod agent_methods {
    pub const INITIALIZE: &str = "initialize";
    pub const AUTHENTICATE: &str = "authenticate";
    pub const SESSION_NEW: &str = "session/new";
    pub const SESSION_LOAD: &str = "session/load";
    pub const SESSION_PROMPT: &str = "session/prompt";
    pub const SESSION_CANCEL: &str = "session/cancel";
}

/// Client-side methods (the bridge calls these on the host).
pub mod client_methods {
    pub const SESSION_UPDATE: &str = "session/update";
    pub const REQUEST_PERMISSION: &str = "session/request_permission";
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
}

// ── initialize ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub client_capabilities: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub agent_capabilities: AgentCapabilities,
    pub auth_methods: Vec<AuthMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub load_session: bool,
    pub prompt_capabilities: PromptCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    pub image: bool,
    pub audio: bool,
    pub embedded_context: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMethod {
    pub id: String,
    pub name: String,
    pub description: String,
}

// ── session/new, session/load, authenticate ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    pub cwd: String,
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionParams {
    pub session_id: String,
    pub cwd: String,
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateParams {
    pub method_id: String,
}

// ── session/prompt ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    pub session_id: String,
    pub prompt: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub stop_reason: StopReason,
}

/// Why a prompt turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    Cancelled,
    MaxTokens,
    MaxTurns,
    Refusal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    pub session_id: String,
}

// ── Content blocks ────────────────────────────────────────────────────────────

/// Content model shared by prompts and updates.
///
/// Visual rendering belongs to the host; none of these variants carry control
/// significance beyond their data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        data: String,
        mime_type: String,
    },
    ResourceLink {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Resource {
        resource: EmbeddedResource,
    },
    #[serde(rename_all = "camelCase")]
    Diff {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_text: Option<String>,
        new_text: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    pub uri: String,
    pub text: String,
}

// ── session/update ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdateParams {
    pub session_id: String,
    pub update: SessionUpdate,
}

/// One streamed update within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    AgentMessageChunk {
        content: ContentBlock,
    },
    AgentThoughtChunk {
        content: ContentBlock,
    },
    UserMessageChunk {
        content: ContentBlock,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        title: String,
        kind: ToolKind,
        status: ToolCallStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_input: Option<Value>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        locations: Vec<ToolCallLocation>,
    },
    #[serde(rename_all = "camelCase")]
    ToolCallUpdate {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ToolCallStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Vec<ContentBlock>>,
    },
    Plan {
        entries: Vec<PlanEntry>,
    },
}

/// Tool categories as presented to the host.  The host may use these to pick
/// icons or grouping; the bridge derives them from tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Edit,
    Delete,
    Move,
    Search,
    Execute,
    Think,
    Fetch,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ToolCallStatus {
    /// Completed and failed are terminal; a record in either state receives
    /// no further updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallLocation {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

// ── Plans ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub content: String,
    pub priority: PlanPriority,
    pub status: PlanEntryStatus,
}

impl PlanEntry {
    pub fn new(
        content: impl Into<String>,
        priority: PlanPriority,
        status: PlanEntryStatus,
    ) -> Self {
        Self {
            content: content.into(),
            priority,
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

// ── session/request_permission ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    pub session_id: String,
    pub tool_call: PermissionToolCall,
    pub options: Vec<PermissionOption>,
}

/// The tool call a permission request refers to, summarized for the host's
/// confirmation dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionToolCall {
    pub tool_call_id: String,
    pub title: String,
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    pub option_id: String,
    pub name: String,
    pub kind: PermissionOptionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPermissionResult {
    pub outcome: PermissionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    #[serde(rename_all = "camelCase")]
    Selected { option_id: String },
    Cancelled,
}

// ── fs methods (client side) ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadTextFileParams {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadTextFileResult {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteTextFileParams {
    pub path: String,
    pub content: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Wire spellings ────────────────────────────────────────────────────────

    #[test]
    fn initialize_result_uses_camel_case() {
        let result = InitializeResult {
            protocol_version: "0.1.0".into(),
            agent_capabilities: AgentCapabilities {
                load_session: true,
                prompt_capabilities: PromptCapabilities {
                    image: true,
                    audio: false,
                    embedded_context: true,
                },
            },
            auth_methods: vec![],
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["protocolVersion"], "0.1.0");
        assert_eq!(v["agentCapabilities"]["loadSession"], true);
        assert_eq!(
            v["agentCapabilities"]["promptCapabilities"]["embeddedContext"],
            true
        );
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(StopReason::EndTurn).unwrap(),
            json!("end_turn")
        );
        assert_eq!(
            serde_json::to_value(StopReason::Cancelled).unwrap(),
            json!("cancelled")
        );
    }

    #[test]
    fn session_update_tag_is_session_update_field() {
        let update = SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text("hello"),
        };
        let v = serde_json::to_value(&update).unwrap();
        assert_eq!(v["sessionUpdate"], "agent_message_chunk");
        assert_eq!(v["content"]["type"], "text");
        assert_eq!(v["content"]["text"], "hello");
    }

    #[test]
    fn tool_call_update_wire_shape() {
        let update = SessionUpdate::ToolCall {
            tool_call_id: "tc-1".into(),
            title: "Read main.rs".into(),
            kind: ToolKind::Read,
            status: ToolCallStatus::Pending,
            raw_input: Some(json!({"file_path": "/w/main.rs"})),
            locations: vec![ToolCallLocation {
                path: "/w/main.rs".into(),
                line: None,
            }],
        };
        let v = serde_json::to_value(&update).unwrap();
        assert_eq!(v["sessionUpdate"], "tool_call");
        assert_eq!(v["toolCallId"], "tc-1");
        assert_eq!(v["kind"], "read");
        assert_eq!(v["status"], "pending");
        assert_eq!(v["rawInput"]["file_path"], "/w/main.rs");
    }

    #[test]
    fn tool_call_update_omits_absent_fields() {
        let update = SessionUpdate::ToolCallUpdate {
            tool_call_id: "tc-1".into(),
            status: Some(ToolCallStatus::InProgress),
            title: None,
            content: None,
        };
        let v = serde_json::to_value(&update).unwrap();
        assert_eq!(v["status"], "in_progress");
        assert!(v.get("title").is_none());
        assert!(v.get("content").is_none());
    }

    #[test]
    fn permission_outcome_round_trip() {
        let selected: RequestPermissionResult = serde_json::from_value(json!({
            "outcome": {"outcome": "selected", "optionId": "allow_once"}
        }))
        .unwrap();
        assert_eq!(
            selected.outcome,
            PermissionOutcome::Selected {
                option_id: "allow_once".into()
            }
        );

        let cancelled: RequestPermissionResult =
            serde_json::from_value(json!({"outcome": {"outcome": "cancelled"}})).unwrap();
        assert_eq!(cancelled.outcome, PermissionOutcome::Cancelled);
    }

    #[test]
    fn plan_entry_round_trip() {
        let entry = PlanEntry::new("Analyze requirements", PlanPriority::High, PlanEntryStatus::InProgress);
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["priority"], "high");
        assert_eq!(v["status"], "in_progress");
        let back: PlanEntry = serde_json::from_value(v).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn diff_block_omits_old_text_when_creating() {
        let block = ContentBlock::Diff {
            path: "/w/new.rs".into(),
            old_text: None,
            new_text: "fn main() {}".into(),
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "diff");
        assert!(v.get("oldText").is_none());
        assert_eq!(v["newText"], "fn main() {}");
    }

    #[test]
    fn prompt_params_parse_minimal_host_frame() {
        let params: PromptParams = serde_json::from_value(json!({
            "sessionId": "s-1",
            "prompt": [{"type": "text", "text": "hi"}]
        }))
        .unwrap();
        assert_eq!(params.session_id, "s-1");
        assert_eq!(params.prompt, vec![ContentBlock::text("hi")]);
    }

    #[test]
    fn tool_kind_spellings() {
        for (kind, s) in [
            (ToolKind::Read, "read"),
            (ToolKind::Execute, "execute"),
            (ToolKind::Fetch, "fetch"),
            (ToolKind::Other, "other"),
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(s));
        }
    }

    #[test]
    fn fs_method_params_round_trip() {
        let read: ReadTextFileParams =
            serde_json::from_value(json!({"path": "/w/a.rs", "line": 3})).unwrap();
        assert_eq!(read.path, "/w/a.rs");
        assert_eq!(read.line, Some(3));
        assert_eq!(read.limit, None);

        let write = WriteTextFileParams {
            path: "/w/a.rs".into(),
            content: "fn main() {}".into(),
        };
        let v = serde_json::to_value(&write).unwrap();
        assert_eq!(v["content"], "fn main() {}");
    }

    #[test]
    fn terminal_statuses() {
        assert!(ToolCallStatus::Completed.is_terminal());
        assert!(ToolCallStatus::Failed.is_terminal());
        assert!(!ToolCallStatus::Pending.is_terminal());
        assert!(!ToolCallStatus::InProgress.is_terminal());
    }
}

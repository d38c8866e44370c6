// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Permission brokering for backend tool calls.
//!
//! Classification happens bridge-side from the tool name and input shape;
//! only operations that fail the safety rules reach the host as a
//! `session/request_permission` round trip.  The turn's cancel token doubles
//! as the abort signal for a pending prompt, and a cancelled prompt is a
//! deny, never an error.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ferry_protocol::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, PermissionToolCall,
    RequestPermissionParams, ToolKind,
};
use ferry_config::PermissionMode;

use crate::host::HostClient;
use crate::session::Session;
use crate::toolcall::ToolCallRecord;

/// Commands that always require confirmation when they appear as any token
/// of an execute operation.
const DANGER_COMMANDS: &[&str] = &["rm", "sudo", "chmod", "chown", "mv", "cp", "dd"];

/// A tool invocation reduced to the fields permission rules look at.
/// Everything else stays in the record's `raw_input`.
#[derive(Debug, Clone)]
pub struct ToolOperation {
    pub tool_name: String,
    pub op_type: ToolKind,
    pub affected_paths: Vec<PathBuf>,
    pub command: Option<String>,
}

impl ToolOperation {
    pub fn from_call(name: &str, kind: ToolKind, input: &Value) -> Self {
        let mut affected_paths = Vec::new();
        for key in ["file_path", "path", "destination"] {
            if let Some(p) = input[key].as_str() {
                affected_paths.push(PathBuf::from(p));
            }
        }
        if let Some(paths) = input["paths"].as_array() {
            affected_paths.extend(paths.iter().filter_map(Value::as_str).map(PathBuf::from));
        }
        Self {
            tool_name: name.to_string(),
            op_type: kind,
            affected_paths,
            command: input["command"].as_str().map(str::to_string),
        }
    }
}

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem, so `/w/src/../../etc` escapes `/w` even when nothing exists
/// at that path.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// An absolute path that is not lexically contained in `cwd`.
fn escapes_workspace(path: &Path, cwd: &Path) -> bool {
    if !path.is_absolute() {
        return false;
    }
    !normalize(path).starts_with(normalize(cwd))
}

fn command_is_dangerous(command: &str) -> bool {
    command
        .split_whitespace()
        .any(|token| DANGER_COMMANDS.contains(&token))
}

/// `true` means the host must confirm before the tool may run.
fn requires_confirmation(op: &ToolOperation, cwd: &Path) -> bool {
    if op.op_type == ToolKind::Delete {
        return true;
    }
    if op.op_type == ToolKind::Execute {
        if let Some(command) = &op.command {
            if command_is_dangerous(command) {
                return true;
            }
        }
    }
    op.affected_paths.iter().any(|p| escapes_workspace(p, cwd))
}

/// The option set offered to the host for a given operation.
fn options_for(op: &ToolOperation) -> Vec<PermissionOption> {
    let mut options = vec![PermissionOption {
        option_id: "allow_once".into(),
        name: "Allow once".into(),
        kind: PermissionOptionKind::AllowOnce,
    }];
    // A standing grant for deletions would defeat the point of confirming
    // them.
    if op.op_type != ToolKind::Delete {
        options.push(PermissionOption {
            option_id: "allow_always".into(),
            name: "Allow always".into(),
            kind: PermissionOptionKind::AllowAlways,
        });
    }
    options.push(PermissionOption {
        option_id: "reject_once".into(),
        name: "Reject once".into(),
        kind: PermissionOptionKind::RejectOnce,
    });
    options.push(PermissionOption {
        option_id: "reject_always".into(),
        name: "Reject always".into(),
        kind: PermissionOptionKind::RejectAlways,
    });
    options
}

/// Brokered decision for one tool call.
pub struct PermissionBroker;

impl PermissionBroker {
    /// Decide whether `record`'s operation may proceed, asking the host when
    /// required.  Returns `true` for allow.
    ///
    /// Prompts within a turn are issued serially — the executor awaits this
    /// call before consuming the next backend event, so at most one request
    /// is outstanding per turn.
    pub async fn check(
        host: &dyn HostClient,
        session: &Session,
        record: &ToolCallRecord,
        cancel: &CancellationToken,
    ) -> bool {
        let op = ToolOperation::from_call(&record.name, record.kind, &record.raw_input);

        // 1. Mode short-circuit.
        match session.permission_mode() {
            PermissionMode::BypassPermissions => return true,
            PermissionMode::AcceptEdits => {
                if matches!(op.op_type, ToolKind::Read | ToolKind::Search) {
                    return true;
                }
            }
            PermissionMode::Default | PermissionMode::Plan => {}
        }

        // Standing answers from earlier prompts in this session.
        if session.is_denied_always(&op.tool_name) {
            return false;
        }
        if session.is_granted_always(&op.tool_name) {
            return true;
        }

        // 2. No auto-deny list today.  3. Confirmation test.
        if !requires_confirmation(&op, &session.cwd) {
            return true;
        }

        let params = RequestPermissionParams {
            session_id: session.id.clone(),
            tool_call: PermissionToolCall {
                tool_call_id: record.id.clone(),
                title: record.title.clone(),
                kind: record.kind,
                raw_input: Some(record.raw_input.clone()),
            },
            options: options_for(&op),
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(tool = %op.tool_name, "permission prompt aborted by turn cancellation");
                return false;
            }
            result = host.request_permission(params) => match result {
                Ok(r) => r.outcome,
                Err(e) => {
                    debug!(error = %e, "permission request failed; denying");
                    return false;
                }
            },
        };

        match outcome {
            // 5. Cancelled prompt → deny, turn proceeds.
            PermissionOutcome::Cancelled => false,
            PermissionOutcome::Selected { option_id } => match option_id.as_str() {
                "allow_once" => true,
                "allow_always" => {
                    session.grant_always(&op.tool_name);
                    true
                }
                "reject_always" => {
                    session.deny_always(&op.tool_name);
                    false
                }
                _ => false,
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Tool call bookkeeping: name → kind classification, human-readable titles,
//! file locations, and diff synthesis for edit-shaped inputs.
//!
//! Classification is observable to the host (it drives icons and permission
//! prompts), so it lives in one table rather than scattered string checks.
//! Unknown input fields stay inside `raw_input` and never influence control
//! flow.

use serde_json::Value;

use ferry_protocol::{ContentBlock, ToolCallLocation, ToolCallStatus, ToolKind};

/// Bridge-side record of one backend tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    /// Backend tool name, kept for permission grant bookkeeping.
    pub name: String,
    pub kind: ToolKind,
    pub title: String,
    pub status: ToolCallStatus,
    pub locations: Vec<ToolCallLocation>,
    /// The backend's input object, passed through untouched.
    pub raw_input: Value,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, name: &str, input: Value) -> Self {
        let kind = classify_tool(name);
        Self {
            id: id.into(),
            name: name.to_string(),
            kind,
            title: derive_title(name, kind, &input),
            status: ToolCallStatus::Pending,
            locations: derive_locations(&input),
            raw_input: input,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fixed name → kind table with substring fallbacks.
///
/// Exact (case-insensitive) names come first; when nothing matches, the
/// substring rules catch conventional families (`*_search`, `run_*`, …).
pub fn classify_tool(name: &str) -> ToolKind {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "read" | "read_file" | "cat" | "view" | "open" => return ToolKind::Read,
        "edit" | "write" | "edit_file" | "write_file" | "create_file" | "apply_patch"
        | "patch" | "notebookedit" => return ToolKind::Edit,
        "delete" | "delete_file" | "remove" | "rm" => return ToolKind::Delete,
        "move" | "move_file" | "rename" | "mv" => return ToolKind::Move,
        "grep" | "search" | "find" | "glob" | "find_file" | "codebase_search" => {
            return ToolKind::Search
        }
        "bash" | "shell" | "run" | "exec" | "run_terminal_command" | "terminal" => {
            return ToolKind::Execute
        }
        "think" | "reason" | "plan" => return ToolKind::Think,
        "fetch" | "web_fetch" | "web_search" | "http_get" | "download" => return ToolKind::Fetch,
        _ => {}
    }

    // Order matters: "grep_and_run" should classify as search, matching the
    // first family listed in the protocol table.
    if contains_any(&lower, &["grep", "search", "find", "glob"]) {
        ToolKind::Search
    } else if contains_any(&lower, &["bash", "run", "exec", "shell", "command"]) {
        ToolKind::Execute
    } else if contains_any(&lower, &["delete", "remove"]) {
        ToolKind::Delete
    } else if contains_any(&lower, &["move", "rename"]) {
        ToolKind::Move
    } else if contains_any(&lower, &["read", "cat", "view"]) {
        ToolKind::Read
    } else if contains_any(&lower, &["edit", "write", "patch", "create"]) {
        ToolKind::Edit
    } else if contains_any(&lower, &["fetch", "web", "http", "download"]) {
        ToolKind::Fetch
    } else if lower.contains("think") {
        ToolKind::Think
    } else {
        ToolKind::Other
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Short human-readable title for the host's tool call list.
pub fn derive_title(name: &str, kind: ToolKind, input: &Value) -> String {
    let path = primary_path(input);
    let command = input["command"].as_str();
    match kind {
        ToolKind::Read => match path {
            Some(p) => format!("Read {p}"),
            None => name.to_string(),
        },
        ToolKind::Edit => match path {
            Some(p) => format!("Edit {p}"),
            None => name.to_string(),
        },
        ToolKind::Delete => match path {
            Some(p) => format!("Delete {p}"),
            None => name.to_string(),
        },
        ToolKind::Move => match (path, input["destination"].as_str()) {
            (Some(from), Some(to)) => format!("Move {from} → {to}"),
            (Some(from), None) => format!("Move {from}"),
            _ => name.to_string(),
        },
        ToolKind::Search => match input["pattern"].as_str().or_else(|| input["query"].as_str()) {
            Some(q) => format!("Search for \"{}\"", truncate(q, 40)),
            None => name.to_string(),
        },
        ToolKind::Execute => match command {
            Some(c) => format!("Run `{}`", truncate(c, 60)),
            None => name.to_string(),
        },
        ToolKind::Fetch => match input["url"].as_str() {
            Some(u) => format!("Fetch {}", truncate(u, 60)),
            None => name.to_string(),
        },
        ToolKind::Think | ToolKind::Other => name.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// The file path a tool input refers to, when it names one.
fn primary_path(input: &Value) -> Option<&str> {
    input["file_path"]
        .as_str()
        .or_else(|| input["path"].as_str())
}

/// File locations for the host's "go to" affordance.
pub fn derive_locations(input: &Value) -> Vec<ToolCallLocation> {
    let line = input["line"].as_u64().map(|n| n as u32);
    if let Some(path) = primary_path(input) {
        return vec![ToolCallLocation {
            path: path.to_string(),
            line,
        }];
    }
    if let Some(paths) = input["paths"].as_array() {
        return paths
            .iter()
            .filter_map(Value::as_str)
            .map(|p| ToolCallLocation {
                path: p.to_string(),
                line: None,
            })
            .collect();
    }
    Vec::new()
}

/// Build a diff content block when the tool input describes an edit
/// (`old_string`/`new_string`) or a file creation (`content`).
pub fn synthesize_diff(input: &Value) -> Option<ContentBlock> {
    let path = primary_path(input)?;
    if let (Some(old), Some(new)) = (input["old_string"].as_str(), input["new_string"].as_str()) {
        return Some(ContentBlock::Diff {
            path: path.to_string(),
            old_text: Some(old.to_string()),
            new_text: new.to_string(),
        });
    }
    if let Some(content) = input["content"].as_str() {
        return Some(ContentBlock::Diff {
            path: path.to_string(),
            old_text: None,
            new_text: content.to_string(),
        });
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

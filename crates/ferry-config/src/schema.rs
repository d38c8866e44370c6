// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Per-session policy governing automatic approval of tool calls.
///
/// The initial value comes from `FERRY_PERMISSION_MODE` (or `PERMISSION_MODE`);
/// a session may change its own mode mid-conversation via inline markers in
/// the prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Prompt the host for dangerous operations, allow the rest.
    #[default]
    Default,
    /// Auto-approve read and search operations; everything else goes
    /// through the normal confirmation rules.
    AcceptEdits,
    /// Never prompt; everything is allowed.
    BypassPermissions,
    /// Planning mode.  Classified like `Default`; the mode string is carried
    /// so the backend can adjust its own behaviour.
    Plan,
}

impl PermissionMode {
    /// Parse the wire/env spelling.  Returns `None` for unknown values so the
    /// caller can produce a diagnostic naming the offending input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "accept_edits" => Some(Self::AcceptEdits),
            "bypass_permissions" => Some(Self::BypassPermissions),
            "plan" => Some(Self::Plan),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "accept_edits",
            Self::BypassPermissions => "bypass_permissions",
            Self::Plan => "plan",
        }
    }
}

/// Which backend adapter to prefer at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Long-running interactive subprocess speaking NDJSON on its stdio.
    #[default]
    Subprocess,
    /// One HTTP completion request per turn.
    Http,
}

impl BackendMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subprocess" => Some(Self::Subprocess),
            "http" => Some(Self::Http),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subprocess => "subprocess",
            Self::Http => "http",
        }
    }
}

/// Eviction strategy for the optional response caches.  Recognized and
/// validated but not wired to any core component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    #[default]
    Lru,
    Lfu,
    Fifo,
}

impl CacheStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lru" => Some(Self::Lru),
            "lfu" => Some(Self::Lfu),
            "fifo" => Some(Self::Fifo),
            _ => None,
        }
    }
}

/// HTTP completion adapter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// API key sent as `Authorization: Bearer <key>`.  `None` disables auth
    /// (local servers).
    pub api_key: Option<String>,
    /// Model identifier forwarded to the API.
    pub model: Option<String>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Maximum tokens requested per completion.
    pub max_tokens: Option<u32>,
}

/// Process-wide admission limits enforced by the resource guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_concurrent_sessions: usize,
    pub max_concurrent_operations: usize,
    pub memory_warning_mib: u64,
    pub memory_critical_mib: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 100,
            max_concurrent_operations: 50,
            memory_warning_mib: 512,
            memory_critical_mib: 768,
        }
    }
}

/// Circuit breaker tuning, defaults matched to the backend's failure modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
    pub monitoring_window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 8,
            success_threshold: 3,
            open_timeout_ms: 10_000,
            monitoring_window_ms: 120_000,
        }
    }
}

/// Complete bridge configuration, resolved from the environment at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Initial permission mode for new sessions.
    pub permission_mode: PermissionMode,
    /// Turn budget forwarded to the backend.  `0` means unlimited.
    pub max_turns: u32,
    /// Raise stderr logging to debug level.
    pub debug: bool,
    /// Duplicate logs to this file (buffered writer).
    pub log_file: Option<String>,
    /// Preferred backend adapter.
    pub backend_mode: BackendMode,
    /// Executable path for the subprocess adapter.
    pub backend_path: String,
    pub http: HttpBackendConfig,
    pub limits: LimitsConfig,
    pub breaker: BreakerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            permission_mode: PermissionMode::default(),
            max_turns: 0,
            debug: false,
            log_file: None,
            backend_mode: BackendMode::default(),
            backend_path: "agent".to_string(),
            http: HttpBackendConfig::default(),
            limits: LimitsConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

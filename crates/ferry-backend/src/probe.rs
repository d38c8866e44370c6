// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Startup adapter selection.
//!
//! The preferred adapter comes from `BACKEND_MODE`; when its probe fails the
//! other adapter takes over and the reason is recorded for logs and
//! `--diagnose` output.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use ferry_config::{BackendMode, Config};

use crate::agent::BackendAgent;
use crate::http::HttpBackend;
use crate::subprocess::SubprocessBackend;

/// The outcome of adapter selection.
pub struct BackendSelection {
    pub backend: Arc<dyn BackendAgent>,
    /// The mode actually in use (may differ from the preference).
    pub mode: BackendMode,
    /// Why the preferred adapter was not used, when it was not.
    pub fallback_reason: Option<String>,
}

/// Check that `path` names an executable file, searching `PATH` for bare
/// names the way a shell would.
pub fn executable_exists(path: &str) -> bool {
    fn is_executable(p: &Path) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            p.is_file()
                && p.metadata()
                    .map(|m| m.permissions().mode() & 0o111 != 0)
                    .unwrap_or(false)
        }
        #[cfg(not(unix))]
        {
            p.is_file()
        }
    }

    let p = Path::new(path);
    if p.components().count() > 1 {
        return is_executable(p);
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(path))))
        .unwrap_or(false)
}

/// Pick the backend adapter per configuration, falling back when the
/// preferred one fails its probe.
pub fn select_backend(config: &Config) -> BackendSelection {
    match config.backend_mode {
        BackendMode::Subprocess => {
            if executable_exists(&config.backend_path) {
                BackendSelection {
                    backend: Arc::new(SubprocessBackend::new(config.backend_path.clone())),
                    mode: BackendMode::Subprocess,
                    fallback_reason: None,
                }
            } else {
                let reason = format!(
                    "backend executable {:?} not found; falling back to http adapter",
                    config.backend_path
                );
                warn!("{reason}");
                BackendSelection {
                    backend: Arc::new(HttpBackend::new(&config.http)),
                    mode: BackendMode::Http,
                    fallback_reason: Some(reason),
                }
            }
        }
        BackendMode::Http => {
            // The HTTP adapter has no synchronous probe (the endpoint may come
            // up after the bridge); a missing API key is the one configuration
            // that can be rejected early when the subprocess is available.
            if config.http.api_key.is_none() && executable_exists(&config.backend_path) {
                let reason = "BACKEND_API_KEY unset; falling back to subprocess adapter".to_string();
                warn!("{reason}");
                BackendSelection {
                    backend: Arc::new(SubprocessBackend::new(config.backend_path.clone())),
                    mode: BackendMode::Subprocess,
                    fallback_reason: Some(reason),
                }
            } else {
                BackendSelection {
                    backend: Arc::new(HttpBackend::new(&config.http)),
                    mode: BackendMode::Http,
                    fallback_reason: None,
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

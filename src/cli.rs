// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::Parser;

/// ACP bridge for local coding agents.
///
/// Reads JSON-RPC 2.0 frames (one per line) on stdin and writes responses
/// and `session/update` notifications on stdout.  All diagnostics go to
/// stderr; runtime behaviour is configured through the environment (see
/// PERMISSION_MODE, MAX_TURNS, BACKEND_MODE, BACKEND_PATH, LOG_FILE, DEBUG).
#[derive(Parser, Debug)]
#[command(name = "ferry", version, about, long_about = None)]
pub struct Cli {
    /// Print a JSON platform and backend health report, then exit.
    #[arg(long)]
    pub diagnose: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

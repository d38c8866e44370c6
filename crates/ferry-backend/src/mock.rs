// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Deterministic backend doubles for tests.  No network, no subprocesses —
//! each `start_turn` pops the next pre-scripted event sequence.

use std::sync::{Arc, Mutex};

use futures::stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::agent::{BackendAgent, EventStream};
use crate::events::{BackendEvent, TurnRequest};

/// A pre-scripted backend.  The outer `Vec` is the ordered list of turns; the
/// inner `Vec` is the event sequence emitted for that turn.  Requests are
/// recorded so tests can assert on what the executor sent.
pub struct ScriptedBackend {
    scripts: Arc<Mutex<Vec<Vec<BackendEvent>>>>,
    /// Every `TurnRequest` seen, in order.
    pub requests: Arc<Mutex<Vec<TurnRequest>>>,
    /// Count of `cancel` calls.
    pub cancels: Arc<Mutex<usize>>,
    /// When set, streams stall after the scripted events instead of ending —
    /// used by busy-session and cancellation tests that need a turn to stay
    /// in flight until told otherwise.
    hold_open: bool,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Vec<BackendEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
            cancels: Arc::new(Mutex::new(0)),
            hold_open: false,
        }
    }

    /// Keep each turn's stream open after its scripted events (no terminal
    /// event is appended; the stream pends forever).
    pub fn holding_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Convenience: a backend whose every turn answers with a single text
    /// chunk then ends.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            BackendEvent::AssistantText { text: r },
            BackendEvent::TurnEnd,
        ]])
    }

    /// Convenience: one turn that requests a tool call, then (after the
    /// bridge's permission handling) reports its result and ends.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        let id = tool_id.into();
        Self::new(vec![vec![
            BackendEvent::ToolUse {
                id: id.clone(),
                name: tool_name.into(),
                input,
            },
            BackendEvent::ToolResult {
                id,
                output: serde_json::Value::String("ok".into()),
            },
            BackendEvent::AssistantText {
                text: final_text.into(),
            },
            BackendEvent::TurnEnd,
        ]])
    }

    pub fn last_request(&self) -> Option<TurnRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn cancel_count(&self) -> usize {
        *self.cancels.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl BackendAgent for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn authenticate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start_turn(&self, req: TurnRequest) -> anyhow::Result<EventStream> {
        self.requests.lock().unwrap().push(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![
                    BackendEvent::AssistantText {
                        text: "[no more scripts]".into(),
                    },
                    BackendEvent::TurnEnd,
                ]
            } else {
                scripts.remove(0)
            }
        };

        if self.hold_open {
            // Feed the scripted events, then keep the channel open by leaking
            // a sender clone into a task that never completes.
            let (tx, rx) = mpsc::channel::<anyhow::Result<BackendEvent>>(64);
            tokio::spawn(async move {
                for event in events {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                std::future::pending::<()>().await;
            });
            Ok(Box::pin(ReceiverStream::new(rx)))
        } else {
            let wrapped: Vec<anyhow::Result<BackendEvent>> =
                events.into_iter().map(Ok).collect();
            Ok(Box::pin(stream::iter(wrapped)))
        }
    }

    async fn cancel(&self) {
        *self.cancels.lock().unwrap() += 1;
    }

    async fn version(&self) -> Option<String> {
        Some("scripted-0".into())
    }
}

/// A backend whose `start_turn` always fails.  Drives circuit breaker tests.
#[derive(Default)]
pub struct FailingBackend;

#[async_trait::async_trait]
impl BackendAgent for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn authenticate(&self) -> anyhow::Result<()> {
        anyhow::bail!("backend unavailable")
    }

    async fn start_turn(&self, _req: TurnRequest) -> anyhow::Result<EventStream> {
        anyhow::bail!("backend unavailable")
    }

    async fn cancel(&self) {}

    async fn version(&self) -> Option<String> {
        None
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

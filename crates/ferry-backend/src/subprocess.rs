// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Interactive subprocess adapter.
//!
//! The backend executable is spawned once with piped stdio and kept running
//! across turns.  The line protocol is NDJSON in both directions: the bridge
//! writes one command object per turn and reads `type`-tagged event objects
//! until the turn-end marker.  Child stderr is drained into tracing so
//! backend diagnostics land in the bridge's logs instead of corrupting the
//! protocol stream.
//!
//! The interactive protocol carries one conversation at a time, so turns
//! serialize on the child: a second `start_turn` waits until the current
//! turn's event stream has ended.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::agent::{BackendAgent, EventStream};
use crate::events::{BackendEvent, TurnRequest};
use crate::probe::executable_exists;

/// Commands written to the child, one JSON object per line.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireCommand<'a> {
    Prompt {
        prompt: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        resume_id: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_turns: Option<u32>,
        permission_mode: &'a str,
    },
    Cancel,
}

/// Events read from the child, one JSON object per line.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Session {
        id: String,
    },
    Text {
        text: String,
    },
    Thought {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        #[serde(default)]
        output: serde_json::Value,
    },
    ToolError {
        id: String,
        message: String,
    },
    Done,
    Error {
        message: String,
    },
}

fn map_wire_event(event: WireEvent) -> BackendEvent {
    match event {
        WireEvent::Session { id } => BackendEvent::SessionAssigned { id },
        WireEvent::Text { text } => BackendEvent::AssistantText { text },
        WireEvent::Thought { text } => BackendEvent::AssistantThought { text },
        WireEvent::ToolUse { id, name, input } => BackendEvent::ToolUse { id, name, input },
        WireEvent::ToolResult { id, output } => BackendEvent::ToolResult { id, output },
        WireEvent::ToolError { id, message } => BackendEvent::ToolError { id, message },
        WireEvent::Done => BackendEvent::TurnEnd,
        WireEvent::Error { message } => BackendEvent::TurnError { message },
    }
}

struct ChildReader {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

/// Backend adapter for a long-running interactive subprocess.
pub struct SubprocessBackend {
    path: String,
    /// stdin is split from the reader so `cancel` can write the sentinel
    /// while a turn task owns the read side.
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    reader: Arc<Mutex<Option<ChildReader>>>,
}

impl SubprocessBackend {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stdin: Arc::new(Mutex::new(None)),
            reader: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the child if it is not already running.  Both mutexes must be
    /// held by the caller.
    async fn ensure_spawned(
        &self,
        stdin_slot: &mut Option<ChildStdin>,
        reader_slot: &mut Option<ChildReader>,
    ) -> anyhow::Result<()> {
        if stdin_slot.is_some() && reader_slot.is_some() {
            return Ok(());
        }

        debug!(path = %self.path, "spawning backend subprocess");
        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning backend {:?}", self.path))?;

        let stdin = child.stdin.take().context("backend stdin unavailable")?;
        let stdout = child.stdout.take().context("backend stdout unavailable")?;
        let stderr = child.stderr.take().context("backend stderr unavailable")?;

        // Forward child diagnostics line by line.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "backend", "{line}");
            }
        });

        *stdin_slot = Some(stdin);
        *reader_slot = Some(ChildReader {
            child,
            lines: BufReader::new(stdout).lines(),
        });
        Ok(())
    }
}

#[async_trait::async_trait]
impl BackendAgent for SubprocessBackend {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn authenticate(&self) -> anyhow::Result<()> {
        // Credentials live with the backend; reachability is the only check.
        if !executable_exists(&self.path) {
            bail!("backend executable not found: {:?}", self.path);
        }
        Ok(())
    }

    async fn start_turn(&self, req: TurnRequest) -> anyhow::Result<EventStream> {
        let mut stdin_guard = self.stdin.clone().lock_owned().await;
        // Waiting here serializes turns: the previous turn's reader task holds
        // this lock until its terminal event.
        let mut reader_guard = self.reader.clone().lock_owned().await;
        self.ensure_spawned(&mut stdin_guard, &mut reader_guard).await?;

        let command = WireCommand::Prompt {
            prompt: &req.prompt,
            resume_id: req.resume_id.as_deref(),
            max_turns: req.max_turns,
            permission_mode: &req.permission_mode,
        };
        let mut line = serde_json::to_vec(&command)?;
        line.push(b'\n');

        let stdin = stdin_guard.as_mut().context("backend not running")?;
        if let Err(e) = stdin.write_all(&line).await {
            // Broken pipe means the child died between turns; drop the stale
            // handles so the next turn respawns.
            *stdin_guard = None;
            *reader_guard = None;
            return Err(anyhow::Error::new(e).context("writing prompt command to backend"));
        }
        stdin.flush().await.context("flushing backend stdin")?;
        drop(stdin_guard);

        let (tx, rx) = mpsc::channel::<anyhow::Result<BackendEvent>>(64);
        tokio::spawn(async move {
            // reader_guard is held for the life of the turn.
            let mut guard = reader_guard;
            loop {
                let reader = match guard.as_mut() {
                    Some(r) => r,
                    None => break,
                };
                match reader.lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WireEvent>(&line) {
                            Ok(event) => {
                                let mapped = map_wire_event(event);
                                let terminal = mapped.is_terminal();
                                if tx.send(Ok(mapped)).await.is_err() {
                                    // Consumer gone (turn cancelled).  Leave
                                    // the child running; the cancel sentinel
                                    // tells it to wind the turn down.
                                    break;
                                }
                                if terminal {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "unparseable backend event line");
                            }
                        }
                    }
                    Ok(None) => {
                        // Unexpected EOF: the child exited mid-turn.
                        let status = guard
                            .as_mut()
                            .map(|r| r.child.try_wait().ok().flatten())
                            .unwrap_or(None);
                        let _ = tx
                            .send(Err(anyhow::anyhow!(
                                "backend closed its event stream unexpectedly (exit: {status:?})"
                            )))
                            .await;
                        *guard = None;
                        break;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow::Error::new(e).context("reading backend event")))
                            .await;
                        *guard = None;
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn cancel(&self) {
        let mut stdin_guard = self.stdin.lock().await;
        if let Some(stdin) = stdin_guard.as_mut() {
            let mut line = match serde_json::to_vec(&WireCommand::Cancel) {
                Ok(l) => l,
                Err(_) => return,
            };
            line.push(b'\n');
            if let Err(e) = stdin.write_all(&line).await {
                debug!(error = %e, "cancel sentinel not delivered");
                return;
            }
            let _ = stdin.flush().await;
        }
    }

    async fn version(&self) -> Option<String> {
        let output = Command::new(&self.path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    // ── Wire mapping ──────────────────────────────────────────────────────────

    #[test]
    fn wire_events_map_to_backend_events() {
        let cases = [
            (r#"{"type":"session","id":"c-1"}"#, BackendEvent::SessionAssigned { id: "c-1".into() }),
            (r#"{"type":"text","text":"hi"}"#, BackendEvent::AssistantText { text: "hi".into() }),
            (
                r#"{"type":"thought","text":"hmm"}"#,
                BackendEvent::AssistantThought { text: "hmm".into() },
            ),
            (r#"{"type":"done"}"#, BackendEvent::TurnEnd),
            (
                r#"{"type":"error","message":"boom"}"#,
                BackendEvent::TurnError { message: "boom".into() },
            ),
        ];
        for (line, expected) in cases {
            let wire: WireEvent = serde_json::from_str(line).unwrap();
            assert_eq!(map_wire_event(wire), expected);
        }
    }

    #[test]
    fn tool_use_defaults_missing_input_to_null() {
        let wire: WireEvent =
            serde_json::from_str(r#"{"type":"tool_use","id":"t1","name":"Read"}"#).unwrap();
        assert_eq!(
            map_wire_event(wire),
            BackendEvent::ToolUse {
                id: "t1".into(),
                name: "Read".into(),
                input: serde_json::Value::Null,
            }
        );
    }

    #[test]
    fn prompt_command_wire_shape() {
        let cmd = WireCommand::Prompt {
            prompt: "hi",
            resume_id: Some("c-9"),
            max_turns: Some(4),
            permission_mode: "default",
        };
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v, json!({
            "type": "prompt",
            "prompt": "hi",
            "resume_id": "c-9",
            "max_turns": 4,
            "permission_mode": "default",
        }));
    }

    #[test]
    fn prompt_command_omits_absent_fields() {
        let cmd = WireCommand::Prompt {
            prompt: "hi",
            resume_id: None,
            max_turns: None,
            permission_mode: "default",
        };
        let v = serde_json::to_value(&cmd).unwrap();
        assert!(v.get("resume_id").is_none());
        assert!(v.get("max_turns").is_none());
    }

    // ── Against a scripted child process ──────────────────────────────────────

    #[cfg(unix)]
    fn fake_backend_script(body: &str) -> tempfile::TempPath {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        let path = file.into_temp_path();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn full_turn_against_fake_backend() {
        // Reads one command line, answers with a text chunk and a turn end.
        let script = fake_backend_script(
            r#"while read -r line; do
  printf '%s\n' '{"type":"session","id":"conv-1"}'
  printf '%s\n' '{"type":"text","text":"hello"}'
  printf '%s\n' '{"type":"done"}'
done"#,
        );
        let backend = SubprocessBackend::new(script.to_str().unwrap());

        let mut stream = backend
            .start_turn(TurnRequest {
                prompt: "hi".into(),
                permission_mode: "default".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        assert_eq!(
            events,
            vec![
                BackendEvent::SessionAssigned { id: "conv-1".into() },
                BackendEvent::AssistantText { text: "hello".into() },
                BackendEvent::TurnEnd,
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn two_turns_reuse_the_same_child() {
        let script = fake_backend_script(
            r#"n=0
while read -r line; do
  n=$((n+1))
  printf '{"type":"text","text":"turn %s"}\n' "$n"
  printf '%s\n' '{"type":"done"}'
done"#,
        );
        let backend = SubprocessBackend::new(script.to_str().unwrap());

        for expected in ["turn 1", "turn 2"] {
            let mut stream = backend
                .start_turn(TurnRequest {
                    prompt: "go".into(),
                    permission_mode: "default".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first, BackendEvent::AssistantText { text: expected.into() });
            let last = stream.next().await.unwrap().unwrap();
            assert_eq!(last, BackendEvent::TurnEnd);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_exit_mid_turn_surfaces_an_error() {
        // Emits one event then exits without a turn-end marker.
        let script = fake_backend_script(
            r#"read -r line
printf '%s\n' '{"type":"text","text":"partial"}'
exit 3"#,
        );
        let backend = SubprocessBackend::new(script.to_str().unwrap());
        let mut stream = backend
            .start_turn(TurnRequest {
                prompt: "hi".into(),
                permission_mode: "default".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap();
        assert!(err.is_err(), "missing turn-end must surface as an error");
    }

    #[tokio::test]
    async fn authenticate_fails_for_missing_executable() {
        let backend = SubprocessBackend::new("/nonexistent/backend-binary");
        assert!(backend.authenticate().await.is_err());
    }
}

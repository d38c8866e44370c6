// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP completion adapter.
//!
//! One request per turn against an OpenAI-style `/v1/completions` endpoint.
//! When the server supports SSE streaming the chunks are forwarded as they
//! arrive; otherwise the whole response body becomes a single synthetic
//! `AssistantText` event.  Either way the stream is terminated with
//! `TurnEnd`, matching the adapter contract.

use anyhow::{bail, Context};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use ferry_config::HttpBackendConfig;

use crate::agent::{BackendAgent, EventStream};
use crate::events::{BackendEvent, TurnRequest};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/v1";
const DEFAULT_MODEL: &str = "default";

/// Backend adapter for a stateless HTTP completion API.
pub struct HttpBackend {
    client: reqwest::Client,
    completions_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl HttpBackend {
    pub fn new(config: &HttpBackendConfig) -> Self {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Explicit base URL constructor; tests point this at a local listener.
    pub fn with_base_url(config: &HttpBackendConfig, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            completions_url: format!("{base}/completions"),
            api_key: config.api_key.clone(),
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
            temperature: config.temperature.unwrap_or(0.2),
            max_tokens: config.max_tokens.unwrap_or(4096),
        }
    }

    fn build_request(&self, req: &TurnRequest, stream: bool) -> reqwest::RequestBuilder {
        let mut body = json!({
            "model": self.model,
            "prompt": req.prompt,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": stream,
        });
        if let Some(resume) = &req.resume_id {
            body["conversation_id"] = json!(resume);
        }
        let mut builder = self.client.post(&self.completions_url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait::async_trait]
impl BackendAgent for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn authenticate(&self) -> anyhow::Result<()> {
        // A HEAD-style probe is not universally supported; an empty completion
        // with max_tokens=1 doubles as the auth check.
        let resp = self
            .build_request(
                &TurnRequest {
                    prompt: String::new(),
                    permission_mode: "default".into(),
                    ..Default::default()
                },
                false,
            )
            .send()
            .await
            .context("backend API unreachable")?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            bail!("backend API rejected credentials");
        }
        Ok(())
    }

    async fn start_turn(&self, req: TurnRequest) -> anyhow::Result<EventStream> {
        let response = self
            .build_request(&req, true)
            .send()
            .await
            .context("sending completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("backend API error {status}: {body}");
        }

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        let (tx, rx) = mpsc::channel::<anyhow::Result<BackendEvent>>(64);
        if is_sse {
            tokio::spawn(async move {
                let mut bytes = response.bytes_stream();
                let mut pending = String::new();
                'outer: while let Some(chunk) = bytes.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            let _ = tx
                                .send(Err(anyhow::Error::new(e).context("reading SSE stream")))
                                .await;
                            return;
                        }
                    };
                    pending.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(pos) = pending.find('\n') {
                        let line = pending[..pos].trim_end_matches('\r').to_string();
                        pending.drain(..=pos);
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();
                        if data == "[DONE]" {
                            break 'outer;
                        }
                        match serde_json::from_str::<Value>(data) {
                            Ok(v) => {
                                if let Some(text) = extract_completion_text(&v) {
                                    if !text.is_empty()
                                        && tx
                                            .send(Ok(BackendEvent::AssistantText { text }))
                                            .await
                                            .is_err()
                                    {
                                        return;
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "unparseable SSE data line"),
                        }
                    }
                }
                let _ = tx.send(Ok(BackendEvent::TurnEnd)).await;
            });
        } else {
            tokio::spawn(async move {
                match response.json::<Value>().await {
                    Ok(body) => {
                        if let Some(id) = body["conversation_id"].as_str() {
                            let _ = tx
                                .send(Ok(BackendEvent::SessionAssigned { id: id.to_string() }))
                                .await;
                        }
                        let text = extract_completion_text(&body).unwrap_or_default();
                        if !text.is_empty() {
                            let _ = tx.send(Ok(BackendEvent::AssistantText { text })).await;
                        }
                        let _ = tx.send(Ok(BackendEvent::TurnEnd)).await;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow::Error::new(e).context("decoding completion body")))
                            .await;
                    }
                }
            });
        }

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn cancel(&self) {
        // Stateless adapter: aborting a turn means the executor drops the
        // response stream, which closes the connection.  Nothing to signal.
        debug!("http backend cancel: connection dropped by stream consumer");
    }

    async fn version(&self) -> Option<String> {
        None
    }
}

/// Pull the completion text out of either the streaming-chunk or the
/// full-response body shape.
fn extract_completion_text(body: &Value) -> Option<String> {
    let choice = body["choices"].get(0)?;
    choice["text"]
        .as_str()
        .or_else(|| choice["delta"]["content"].as_str())
        .or_else(|| choice["message"]["content"].as_str())
        .map(str::to_string)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Body extraction ───────────────────────────────────────────────────────

    #[test]
    fn extracts_plain_completion_text() {
        let body = json!({"choices": [{"text": "hello"}]});
        assert_eq!(extract_completion_text(&body).as_deref(), Some("hello"));
    }

    #[test]
    fn extracts_chat_style_message_content() {
        let body = json!({"choices": [{"message": {"content": "hi there"}}]});
        assert_eq!(extract_completion_text(&body).as_deref(), Some("hi there"));
    }

    #[test]
    fn extracts_streaming_delta_content() {
        let body = json!({"choices": [{"delta": {"content": "chunk"}}]});
        assert_eq!(extract_completion_text(&body).as_deref(), Some("chunk"));
    }

    #[test]
    fn missing_choices_yields_none() {
        assert_eq!(extract_completion_text(&json!({})), None);
        assert_eq!(extract_completion_text(&json!({"choices": []})), None);
    }

    // ── Request construction ──────────────────────────────────────────────────

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let backend = HttpBackend::with_base_url(&HttpBackendConfig::default(), "http://x/v1/");
        assert_eq!(backend.completions_url, "http://x/v1/completions");
    }

    #[test]
    fn config_defaults_are_applied() {
        let backend = HttpBackend::new(&HttpBackendConfig::default());
        assert_eq!(backend.model, DEFAULT_MODEL);
        assert_eq!(backend.max_tokens, 4096);
        assert!((backend.temperature - 0.2).abs() < f32::EPSILON);
    }

    // ── Against a local HTTP listener ─────────────────────────────────────────

    async fn one_shot_server(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn full_response_becomes_text_and_turn_end() {
        use futures::StreamExt;
        let body = r#"{"conversation_id":"c-7","choices":[{"text":"answer"}]}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let base = one_shot_server(Box::leak(response.into_boxed_str())).await;

        let backend = HttpBackend::with_base_url(&HttpBackendConfig::default(), &base);
        let mut stream = backend
            .start_turn(TurnRequest {
                prompt: "q".into(),
                permission_mode: "default".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(e) = stream.next().await {
            events.push(e.unwrap());
        }
        assert_eq!(
            events,
            vec![
                BackendEvent::SessionAssigned { id: "c-7".into() },
                BackendEvent::AssistantText { text: "answer".into() },
                BackendEvent::TurnEnd,
            ]
        );
    }

    #[tokio::test]
    async fn sse_response_streams_chunks() {
        use futures::StreamExt;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n\
                    data: [DONE]\n\n";
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let base = one_shot_server(Box::leak(response.into_boxed_str())).await;

        let backend = HttpBackend::with_base_url(&HttpBackendConfig::default(), &base);
        let mut stream = backend
            .start_turn(TurnRequest {
                prompt: "q".into(),
                permission_mode: "default".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(e) = stream.next().await {
            events.push(e.unwrap());
        }
        assert_eq!(
            events,
            vec![
                BackendEvent::AssistantText { text: "he".into() },
                BackendEvent::AssistantText { text: "llo".into() },
                BackendEvent::TurnEnd,
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_is_an_adapter_error() {
        let response = "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 5\r\nconnection: close\r\n\r\noops!";
        let base = one_shot_server(response).await;
        let backend = HttpBackend::with_base_url(&HttpBackendConfig::default(), &base);
        let err = backend
            .start_turn(TurnRequest {
                prompt: "q".into(),
                permission_mode: "default".into(),
                ..Default::default()
            })
            .await;
        assert!(err.is_err());
    }
}

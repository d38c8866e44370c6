// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! ACP server methods, fanned out to the session manager, permission broker,
//! and turn executor.
//!
//! This is the single [`RpcHandler`] behind the endpoint: params are
//! validated here (−32602 with the serde field path), errors are translated
//! by kind, and `session/prompt` holds the session's turn lock for the whole
//! turn.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use ferry_backend::BackendAgent;
use ferry_config::Config;
use ferry_protocol::acp::agent_methods;
use ferry_protocol::jsonrpc::error_codes;
use ferry_protocol::{
    AgentCapabilities, AuthMethod, AuthenticateParams, CancelParams, ErrorObject,
    InitializeParams, InitializeResult, LoadSessionParams, NewSessionParams, NewSessionResult,
    PromptCapabilities, PromptParams, PromptResult,
};
use ferry_rpc::RpcHandler;

use crate::breaker::CircuitBreaker;
use crate::error::BridgeError;
use crate::guard::ResourceGuard;
use crate::host::HostClient;
use crate::monitor::ContextMonitor;
use crate::session::SessionManager;
use crate::turn::TurnExecutor;

/// Protocol revision the bridge answers `initialize` with.
const PROTOCOL_VERSION: &str = "0.1.0";

pub struct AgentFacade {
    pub sessions: Arc<SessionManager>,
    pub guard: Arc<ResourceGuard>,
    pub monitor: Arc<ContextMonitor>,
    pub breaker: Arc<CircuitBreaker>,
    pub backend: Arc<dyn BackendAgent>,
    pub host: Arc<dyn HostClient>,
    pub config: Arc<Config>,
}

impl AgentFacade {
    fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, BridgeError> {
        serde_json::from_value(params).map_err(|e| BridgeError::Validation(e.to_string()))
    }

    fn initialize(&self, params: InitializeParams) -> InitializeResult {
        info!(
            client_protocol = %params.protocol_version,
            "initialize: advertising capabilities"
        );
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            agent_capabilities: AgentCapabilities {
                // Adoption is always supported; sessions are memory-only and
                // a loaded id simply starts fresh.
                load_session: true,
                prompt_capabilities: PromptCapabilities {
                    image: true,
                    audio: false,
                    embedded_context: true,
                },
            },
            auth_methods: vec![AuthMethod {
                id: "backend".into(),
                name: "Backend".into(),
                description: "Authentication via backend agent".into(),
            }],
        }
    }

    async fn session_new(&self, params: NewSessionParams) -> Result<Value, BridgeError> {
        let session = self
            .sessions
            .create(PathBuf::from(params.cwd), params.mcp_servers)?;
        Ok(serde_json::to_value(NewSessionResult {
            session_id: session.id.clone(),
        })
        .expect("result serializes"))
    }

    async fn session_load(&self, params: LoadSessionParams) -> Result<Value, BridgeError> {
        self.sessions.adopt(
            &params.session_id,
            PathBuf::from(params.cwd),
            params.mcp_servers,
        )?;
        Ok(Value::Null)
    }

    async fn authenticate(&self, params: AuthenticateParams) -> Result<Value, BridgeError> {
        debug!(method_id = %params.method_id, "authenticate");
        self.backend
            .authenticate()
            .await
            .map_err(|e| BridgeError::AuthRequired(format!("{e:#}")))?;
        Ok(Value::Null)
    }

    async fn session_prompt(&self, params: PromptParams) -> Result<Value, BridgeError> {
        let session = self.sessions.get(&params.session_id)?;
        // The lock guard lives until the end of this call; a concurrent
        // prompt on the same session fails fast inside `begin_turn`.
        let (_turn_guard, handle) = session.begin_turn()?;

        let executor = TurnExecutor {
            session: session.clone(),
            host: self.host.clone(),
            backend: self.backend.clone(),
            breaker: self.breaker.clone(),
            guard: self.guard.clone(),
            monitor: self.monitor.clone(),
            max_turns: self.config.max_turns,
        };
        let result = executor.run(&params.prompt, handle).await;
        session.end_turn();

        let stop_reason = result?;
        Ok(serde_json::to_value(PromptResult { stop_reason }).expect("result serializes"))
    }

    async fn session_cancel(&self, params: CancelParams) {
        self.sessions.cancel(&params.session_id);
    }
}

#[async_trait]
impl RpcHandler for AgentFacade {
    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, ErrorObject> {
        let result = match method {
            agent_methods::INITIALIZE => {
                let params = Self::parse::<InitializeParams>(params)?;
                Ok(serde_json::to_value(self.initialize(params)).expect("result serializes"))
            }
            agent_methods::SESSION_NEW => {
                self.session_new(Self::parse(params)?).await
            }
            agent_methods::SESSION_LOAD => {
                self.session_load(Self::parse(params)?).await
            }
            agent_methods::AUTHENTICATE => {
                self.authenticate(Self::parse(params)?).await
            }
            agent_methods::SESSION_PROMPT => {
                self.session_prompt(Self::parse(params)?).await
            }
            other => {
                return Err(ErrorObject::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                ))
            }
        };
        result.map_err(|e| {
            debug!(method, error = %e, "request failed");
            e.to_error_object()
        })
    }

    async fn handle_notification(&self, method: &str, params: Value) {
        match method {
            agent_methods::SESSION_CANCEL => match Self::parse::<CancelParams>(params) {
                Ok(params) => self.session_cancel(params).await,
                Err(e) => warn!(error = %e, "malformed session/cancel ignored"),
            },
            other => debug!(method = other, "unhandled notification"),
        }
    }
}

impl AgentFacade {
    /// JSON health report for `--diagnose`.
    pub async fn diagnose(&self) -> Value {
        json!({
            "platform": std::env::consts::OS,
            "backend": {
                "adapter": self.backend.name(),
                "version": self.backend.version().await,
            },
            "resources": self.guard.report(),
            "sessions": self.sessions.count(),
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

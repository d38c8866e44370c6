// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Host-facing client seam.
//!
//! The turn executor and permission broker talk to the editor host through
//! this trait instead of the RPC endpoint directly, so tests can record
//! updates and script permission outcomes without a transport.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use ferry_protocol::acp::client_methods;
use ferry_protocol::{
    RequestPermissionParams, RequestPermissionResult, SessionUpdate, SessionUpdateParams,
};
use ferry_rpc::RpcEndpoint;

#[async_trait]
pub trait HostClient: Send + Sync {
    /// Send a `session/update` notification.  Updates for one session must be
    /// delivered in call order.
    async fn session_update(&self, session_id: &str, update: SessionUpdate);

    /// Issue `session/request_permission` and await the host's decision.
    async fn request_permission(
        &self,
        params: RequestPermissionParams,
    ) -> anyhow::Result<RequestPermissionResult>;
}

/// Production host client over the JSON-RPC endpoint.
pub struct AcpHost {
    endpoint: RpcEndpoint,
}

impl AcpHost {
    pub fn new(endpoint: RpcEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl HostClient for AcpHost {
    async fn session_update(&self, session_id: &str, update: SessionUpdate) {
        let params = SessionUpdateParams {
            session_id: session_id.to_string(),
            update,
        };
        let value = match serde_json::to_value(&params) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "unserializable session update dropped");
                return;
            }
        };
        self.endpoint.notify(client_methods::SESSION_UPDATE, value).await;
    }

    async fn request_permission(
        &self,
        params: RequestPermissionParams,
    ) -> anyhow::Result<RequestPermissionResult> {
        let value = serde_json::to_value(&params)?;
        let result: Value = self
            .endpoint
            .request(client_methods::REQUEST_PERMISSION, value)
            .await
            .map_err(anyhow::Error::new)?;
        Ok(serde_json::from_value(result)?)
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording host double shared by the core test suites.

    use std::sync::{Arc, Mutex};

    use super::*;
    use ferry_protocol::PermissionOutcome;

    /// Records every update and answers permission requests from a script.
    pub struct RecordingHost {
        pub updates: Arc<Mutex<Vec<(String, SessionUpdate)>>>,
        pub permission_requests: Arc<Mutex<Vec<RequestPermissionParams>>>,
        outcomes: Mutex<Vec<PermissionOutcome>>,
    }

    impl RecordingHost {
        pub fn new() -> Self {
            Self {
                updates: Arc::new(Mutex::new(Vec::new())),
                permission_requests: Arc::new(Mutex::new(Vec::new())),
                outcomes: Mutex::new(Vec::new()),
            }
        }

        /// Queue outcomes returned by successive permission requests.  When
        /// the queue runs dry the host answers `cancelled`.
        pub fn with_outcomes(self, outcomes: Vec<PermissionOutcome>) -> Self {
            *self.outcomes.lock().unwrap() = outcomes;
            self
        }

        pub fn updates_snapshot(&self) -> Vec<(String, SessionUpdate)> {
            self.updates.lock().unwrap().clone()
        }

        pub fn request_count(&self) -> usize {
            self.permission_requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HostClient for RecordingHost {
        async fn session_update(&self, session_id: &str, update: SessionUpdate) {
            self.updates
                .lock()
                .unwrap()
                .push((session_id.to_string(), update));
        }

        async fn request_permission(
            &self,
            params: RequestPermissionParams,
        ) -> anyhow::Result<RequestPermissionResult> {
            self.permission_requests.lock().unwrap().push(params);
            let outcome = {
                let mut outcomes = self.outcomes.lock().unwrap();
                if outcomes.is_empty() {
                    PermissionOutcome::Cancelled
                } else {
                    outcomes.remove(0)
                }
            };
            Ok(RequestPermissionResult { outcome })
        }
    }
}

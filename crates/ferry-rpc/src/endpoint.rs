// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! JSON-RPC endpoint: demultiplexes inbound frames and correlates outbound
//! requests with their responses.
//!
//! Inbound requests and notifications are dispatched to an [`RpcHandler`] on
//! their own task so a slow handler (a whole prompt turn lives inside one
//! handler call) never blocks the frame pump.  Exactly one response is written
//! per inbound request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use ferry_protocol::jsonrpc::{
    error_codes, error_frame, notification_frame, request_frame, result_frame,
};
use ferry_protocol::{ErrorObject, Incoming, RequestId};

use crate::transport::FrameWriter;

/// Endpoint-side failures for outbound calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The peer answered with an error response.
    #[error("peer error {}: {}", .0.code, .0.message)]
    Peer(ErrorObject),
    /// The connection shut down before the response arrived.
    #[error("connection destroyed")]
    ConnectionDestroyed,
}

/// Implemented by the agent facade; one handler per connection.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle an inbound request.  The returned value becomes the `result`
    /// member; an `Err` is translated to an error response by kind.
    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, ErrorObject>;

    /// Handle an inbound notification.  No response is ever written.
    async fn handle_notification(&self, method: &str, params: Value);
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, ErrorObject>>>>>;

/// One JSON-RPC endpoint bound to a transport writer.
#[derive(Clone)]
pub struct RpcEndpoint {
    writer: FrameWriter,
    next_id: Arc<AtomicI64>,
    pending: PendingMap,
}

impl RpcEndpoint {
    pub fn new(writer: FrameWriter) -> Self {
        Self {
            writer,
            next_id: Arc::new(AtomicI64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send a request to the peer and await its response.
    ///
    /// Cancellation-safe: dropping the returned future leaves a stale pending
    /// entry that is cleaned up on shutdown; the late response is discarded.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let frame = request_frame(&RequestId::Number(id), method, params);
        if self.writer.send(frame).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(RpcError::ConnectionDestroyed);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RpcError::Peer(e)),
            Err(_) => Err(RpcError::ConnectionDestroyed),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Value) {
        let frame = notification_frame(method, params);
        if self.writer.send(frame).await.is_err() {
            debug!(method, "notification dropped: transport closed");
        }
    }

    /// Feed one decoded inbound frame into the endpoint.
    ///
    /// `Value::Null` is the transport's marker for an undecodable line and is
    /// answered with a parse-error response carrying a null id.
    pub fn dispatch(&self, frame: Value, handler: Arc<dyn RpcHandler>) {
        if frame.is_null() {
            let error = ErrorObject::new(error_codes::PARSE_ERROR, "Parse error");
            let _ = self.writer.try_send(error_frame(None, &error));
            return;
        }

        match Incoming::classify(frame) {
            Incoming::Request { id, method, params } => {
                let writer = self.writer.clone();
                tokio::spawn(async move {
                    let frame = match handler.handle_request(&method, params).await {
                        Ok(result) => result_frame(&id, result),
                        Err(error) => error_frame(Some(&id), &error),
                    };
                    if writer.send(frame).await.is_err() {
                        debug!(%id, "response dropped: transport closed");
                    }
                });
            }
            Incoming::Notification { method, params } => {
                tokio::spawn(async move {
                    handler.handle_notification(&method, params).await;
                });
            }
            Incoming::Response { id, result } => self.resolve(id, result),
            Incoming::Invalid => {
                let error = ErrorObject::new(error_codes::INVALID_REQUEST, "Invalid Request");
                let _ = self.writer.try_send(error_frame(None, &error));
            }
        }
    }

    fn resolve(&self, id: RequestId, result: Result<Value, ErrorObject>) {
        let numeric = match &id {
            RequestId::Number(n) => *n,
            RequestId::String(_) => {
                // The bridge only issues numeric ids; a string id cannot match
                // any pending outbound request.
                warn!(%id, "response with unknown string id");
                return;
            }
        };
        let sender = self.pending.lock().unwrap().remove(&numeric);
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!(%id, "response with no pending request"),
        }
    }

    /// Reject every pending outbound request.  Called once at shutdown; any
    /// caller still awaiting receives `connection destroyed` (−32003).
    pub fn shutdown(&self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ErrorObject::new(
                error_codes::RESOURCE_EXHAUSTED,
                "connection destroyed",
            )));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

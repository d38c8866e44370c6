// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::events::{BackendEvent, TurnRequest};

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<BackendEvent>> + Send>>;

/// Uniform interface over the supported backend agents.
///
/// The bridge never sees the backend's own wire format; adapters translate it
/// into [`BackendEvent`] streams.  Errors returned from `start_turn` (as
/// opposed to `TurnError` events inside the stream) are counted by the
/// circuit breaker.
#[async_trait]
pub trait BackendAgent: Send + Sync {
    /// Adapter name for diagnostics ("subprocess" / "http" / test doubles).
    fn name(&self) -> &str;

    /// Verify credentials / reachability.  Called from `authenticate`; the
    /// bridge stores no credentials itself.
    async fn authenticate(&self) -> anyhow::Result<()>;

    /// Begin a streaming turn.
    async fn start_turn(&self, req: TurnRequest) -> anyhow::Result<EventStream>;

    /// Best-effort abort of the in-flight turn.  Must not block on the
    /// backend releasing resources.
    async fn cancel(&self);

    /// Backend version string, when the adapter can discover one.
    async fn version(&self) -> Option<String>;
}

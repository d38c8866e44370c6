// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod events;
mod http;
pub mod mock;
mod probe;
mod subprocess;

pub use agent::{BackendAgent, EventStream};
pub use events::{BackendEvent, TurnRequest};
pub use http::HttpBackend;
pub use probe::{select_backend, BackendSelection};
pub use subprocess::SubprocessBackend;

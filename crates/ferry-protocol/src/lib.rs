// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod acp;
pub mod jsonrpc;

pub use acp::*;
pub use jsonrpc::{ErrorObject, Incoming, RequestId, error_codes};

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod env;
mod schema;

pub use env::{from_env, from_vars};
pub use schema::{
    BackendMode, BreakerConfig, CacheStrategy, Config, HttpBackendConfig, LimitsConfig,
    PermissionMode,
};

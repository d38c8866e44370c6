// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod breaker;
mod error;
mod facade;
mod guard;
mod host;
mod monitor;
mod permission;
mod plan;
mod session;
mod toolcall;
mod turn;

pub use breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use error::BridgeError;
pub use facade::AgentFacade;
pub use guard::{HealthLevel, ResourceGuard};
pub use host::{AcpHost, HostClient};
pub use monitor::{ContextMonitor, UsageLevel, CONTEXT_LIMIT_TOKENS};
pub use permission::{PermissionBroker, ToolOperation};
pub use plan::PlanTracker;
pub use session::{Session, SessionManager, TurnHandle};
pub use toolcall::{classify_tool, derive_locations, derive_title, synthesize_diff, ToolCallRecord};
pub use turn::TurnExecutor;

//! tether core - Shared types for driving the Claude Code CLI
//!
//! This crate provides the domain types shared between the wire
//! protocol crate and the engine: token usage, money and the cost
//! model, session state, and tool-permission rules.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod cost;
pub mod error;
pub mod model;
pub mod pattern;
pub mod permission;
pub mod session;
pub mod usage;

// Re-exports for convenience
pub use cost::{estimate_cost, Money};
pub use error::{DomainError, DomainResult};
pub use model::{ModelChoice, Pricing};
pub use pattern::{command_pattern, pattern_matches};
pub use permission::{
    is_command_tool, AllowRule, AllowRules, PermissionDecision, PermissionRequest,
    PermissionResponse,
};
pub use session::{FinalFigures, SessionId, SessionState, SessionView, TurnSummary};
pub use usage::{TokenCount, TokenUsage};

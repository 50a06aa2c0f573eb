//! Outbound events for the rendering layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{Money, SessionId};

/// Every message the engine sends to the UI.
///
/// Serialises as `{"type": "<snake_case kind>", ...payload}` so a webview
/// can switch on `type` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// The CLI announced its session
    SessionInfo {
        session_id: SessionId,
        tools: Vec<String>,
        mcp_servers: Vec<String>,
    },

    /// Running totals after an assistant message
    TokenUpdate {
        total_input_tokens: u64,
        total_output_tokens: u64,
        current_input_tokens: u64,
        current_output_tokens: u64,
        cache_creation_tokens: u64,
        cache_read_tokens: u64,
        /// Local estimate for the running turn
        turn_cost: Money,
    },

    /// Final figures once a turn completes
    TotalsUpdate {
        total_cost: Money,
        total_input_tokens: u64,
        total_output_tokens: u64,
        request_count: u64,
        current_cost: Money,
        current_duration_ms: u64,
        current_turns: u32,
    },

    /// The user's message as typed (without protocol directives)
    UserInput { text: String },

    /// Assistant text
    Output { text: String },

    /// Assistant thinking
    Thinking { text: String },

    /// A tool invocation
    ToolUse {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        raw_input: Value,
        /// Rendered checklist for todo-list tools
        #[serde(skip_serializing_if = "Option::is_none")]
        checklist: Option<String>,
    },

    /// A tool's result
    ToolResult {
        content: String,
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        /// Kept for bookkeeping but not shown
        hidden: bool,
    },

    /// Whether a turn is running
    ProcessingState { active: bool },

    /// A tool is waiting for approval
    PermissionRequest {
        id: String,
        tool: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },

    /// Something went wrong; shown to the user
    Error { message: String },

    /// The CLI is not logged in
    LoginRequired { message: String },

    /// An interactive terminal was opened for login
    TerminalOpened { message: String },

    /// Informational notice (stopped, input ignored, restore done)
    Notice { message: String },

    /// Conversation state was reset
    SessionCleared,
}

impl UiEvent {
    pub fn processing(active: bool) -> Self {
        Self::ProcessingState { active }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    /// Returns the `type` tag this event serialises with.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionInfo { .. } => "session_info",
            Self::TokenUpdate { .. } => "token_update",
            Self::TotalsUpdate { .. } => "totals_update",
            Self::UserInput { .. } => "user_input",
            Self::Output { .. } => "output",
            Self::Thinking { .. } => "thinking",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::ProcessingState { .. } => "processing_state",
            Self::PermissionRequest { .. } => "permission_request",
            Self::Error { .. } => "error",
            Self::LoginRequired { .. } => "login_required",
            Self::TerminalOpened { .. } => "terminal_opened",
            Self::Notice { .. } => "notice",
            Self::SessionCleared => "session_cleared",
        }
    }
}

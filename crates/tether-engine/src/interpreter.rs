//! Turns decoded stream records into UI events and session updates.
//!
//! The CLI enforces record order itself (init, assistant/tool-result
//! pairs, one result), so the interpreter only remembers what it needs
//! across records within a turn: the tool names it has announced.

use serde_json::Value;
use tracing::{debug, info, trace};

use tether_core::{Pricing, SessionId, SessionState};
use tether_protocol::parse::{RawAssistant, RawResult, RawSystem, RawUser};
use tether_protocol::{tool_result_text, ContentBlock, StreamRecord, UiEvent};

use crate::hooks::EventSink;

/// Tools whose successful results are kept out of the transcript.
const QUIET_TOOLS: &[&str] = &["Read", "Edit", "MultiEdit", "TodoWrite"];

/// Tool whose input is rendered as a checklist.
const TODO_TOOL: &str = "TodoWrite";

/// Result text fragments that mean the CLI is not logged in.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "Invalid API key",
    "Please run /login",
    "authentication_error",
];

/// What the controller should do after a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading
    Continue,
    /// The terminal result arrived and totals were published
    Completed,
    /// The result reported an authentication failure
    LoginRequired { message: String },
}

/// Per-turn record interpreter.
#[derive(Debug, Clone)]
pub struct EventInterpreter {
    pricing: Pricing,
    /// Tool names announced this turn, in order
    tool_log: Vec<String>,
}

impl EventInterpreter {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            tool_log: Vec::new(),
        }
    }

    pub fn set_pricing(&mut self, pricing: Pricing) {
        self.pricing = pricing;
    }

    /// Forgets the previous turn's tool log.
    pub fn begin_turn(&mut self) {
        self.tool_log.clear();
    }

    /// Interprets one decoded JSON value.
    ///
    /// Values that aren't a known record are dropped.
    pub fn interpret(
        &mut self,
        value: Value,
        session: &mut SessionState,
        sink: &dyn EventSink,
    ) -> Outcome {
        let record = match StreamRecord::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognised stream record");
                return Outcome::Continue;
            }
        };
        trace!(kind = record.kind(), "Interpreting stream record");

        match record {
            StreamRecord::System(system) => {
                self.on_system(system, session, sink);
                Outcome::Continue
            }
            StreamRecord::Assistant(assistant) => {
                self.on_assistant(assistant, session, sink);
                Outcome::Continue
            }
            StreamRecord::User(user) => {
                self.on_user(user, sink);
                Outcome::Continue
            }
            StreamRecord::Result(result) => self.on_result(result, session, sink),
        }
    }

    fn on_system(&mut self, system: RawSystem, session: &mut SessionState, sink: &dyn EventSink) {
        if !system.is_init() {
            debug!(subtype = %system.subtype, "Ignoring system record");
            return;
        }
        let Some(id) = system.session_id.filter(|id| !id.is_empty()) else {
            debug!("Init record without session id");
            return;
        };

        let session_id = SessionId::new(id);
        info!(session_id = session_id.short(), tools = system.tools.len(), "Session initialised");
        session.set_id(session_id.clone());

        sink.emit(UiEvent::SessionInfo {
            session_id,
            tools: system.tools,
            mcp_servers: system.mcp_servers.into_iter().map(|s| s.name).collect(),
        });
    }

    fn on_assistant(
        &mut self,
        assistant: RawAssistant,
        session: &mut SessionState,
        sink: &dyn EventSink,
    ) {
        if let Some(raw) = assistant.message.usage {
            let usage = raw.to_usage();
            session.record_usage(&usage, &self.pricing);

            sink.emit(UiEvent::TokenUpdate {
                total_input_tokens: session.total_input().as_u64(),
                total_output_tokens: session.total_output().as_u64(),
                current_input_tokens: usage.input.as_u64(),
                current_output_tokens: usage.output.as_u64(),
                cache_creation_tokens: usage.cache_creation.as_u64(),
                cache_read_tokens: usage.cache_read.as_u64(),
                turn_cost: session.turn_cost(),
            });
        }

        for block in assistant.message.content {
            match block {
                ContentBlock::Text { text } => {
                    let text = text.trim();
                    if !text.is_empty() {
                        sink.emit(UiEvent::Output {
                            text: text.to_string(),
                        });
                    }
                }
                ContentBlock::Thinking { thinking } => {
                    let text = thinking.trim();
                    if !text.is_empty() {
                        sink.emit(UiEvent::Thinking {
                            text: text.to_string(),
                        });
                    }
                }
                ContentBlock::ToolUse { id, name, input } => {
                    let checklist = (name == TODO_TOOL).then(|| todo_checklist(&input));
                    self.tool_log.push(name.clone());
                    sink.emit(UiEvent::ToolUse {
                        tool_name: name,
                        tool_use_id: id,
                        raw_input: input,
                        checklist,
                    });
                }
                ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
            }
        }
    }

    fn on_user(&mut self, user: RawUser, sink: &dyn EventSink) {
        for block in user.message.content {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            else {
                continue;
            };

            let tool_name = self.tool_log.last().cloned();
            let quiet = tool_name
                .as_deref()
                .is_some_and(|name| QUIET_TOOLS.contains(&name));

            sink.emit(UiEvent::ToolResult {
                content: tool_result_text(&content),
                is_error,
                tool_use_id,
                tool_name,
                hidden: quiet && !is_error,
            });
        }
    }

    fn on_result(
        &mut self,
        result: RawResult,
        session: &mut SessionState,
        sink: &dyn EventSink,
    ) -> Outcome {
        if let Some(message) = auth_failure(&result) {
            info!("Result reports authentication failure");
            return Outcome::LoginRequired { message };
        }

        if let Some(id) = result.session_id.as_deref().filter(|id| !id.is_empty()) {
            session.set_id(SessionId::new(id));
        }

        let summary = session.finish_turn(&result.final_figures());
        sink.emit(UiEvent::processing(false));
        sink.emit(UiEvent::TotalsUpdate {
            total_cost: session.total_cost(),
            total_input_tokens: session.total_input().as_u64(),
            total_output_tokens: session.total_output().as_u64(),
            request_count: session.request_count(),
            current_cost: summary.cost,
            current_duration_ms: summary.duration_ms,
            current_turns: summary.num_turns,
        });

        if !result.is_success() {
            let message = result
                .result
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| format!("Claude finished with {}", result.subtype));
            sink.emit(UiEvent::error(message));
        }

        Outcome::Completed
    }
}

/// Returns the failure text if `result` is an authentication failure.
fn auth_failure(result: &RawResult) -> Option<String> {
    if result.is_success() {
        return None;
    }
    let text = result.result.as_deref()?;
    AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
        .then(|| text.to_string())
}

/// Renders a todo tool's items, one glyph-prefixed line each.
fn todo_checklist(input: &Value) -> String {
    input
        .get("todos")
        .and_then(Value::as_array)
        .map(|todos| {
            todos
                .iter()
                .map(|todo| {
                    let glyph = match todo.get("status").and_then(Value::as_str) {
                        Some("completed") => "✅",
                        Some("in_progress") => "🔄",
                        _ => "⏳",
                    };
                    let content = todo.get("content").and_then(Value::as_str).unwrap_or("");
                    format!("{glyph} {content}")
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

//! Parsing the CLI's `--output-format stream-json` records.
//!
//! Every line on stdout is one JSON object discriminated by `type`:
//! `system` (subtype `init`), `assistant`, `user` (tool results) and a
//! single terminal `result`.

use serde::Deserialize;
use serde_json::Value;
use tether_core::{FinalFigures, Money, TokenUsage};

use crate::ProtocolError;

/// One decoded stdout record.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    System(RawSystem),
    Assistant(RawAssistant),
    User(RawUser),
    Result(RawResult),
}

impl StreamRecord {
    /// Converts a decoded JSON value into a typed record.
    ///
    /// Unknown `type` values and shape mismatches are errors; callers
    /// treat them as noise.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value).map_err(ProtocolError::from)
    }

    /// Short name of the record kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::Result(_) => "result",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSystem {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<RawMcpServer>,
    #[serde(default)]
    pub model: Option<String>,
}

impl RawSystem {
    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMcpServer {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAssistant {
    pub message: RawMessage,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub message: RawMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "content_blocks")]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

/// Accepts either a block array or a bare string (user echo records).
fn content_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Content {
        Blocks(Vec<ContentBlock>),
        Text(String),
    }

    Ok(match Content::deserialize(deserializer)? {
        Content::Blocks(blocks) => blocks,
        Content::Text(text) => vec![ContentBlock::Text { text }],
    })
}

/// One content block of an assistant or user message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Block types we don't render (images, redacted thinking, ...)
    #[serde(other)]
    Unknown,
}

/// Token usage as reported by the CLI.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl RawUsage {
    pub fn to_usage(&self) -> TokenUsage {
        TokenUsage::new(
            self.input_tokens,
            self.output_tokens,
            self.cache_creation_input_tokens,
            self.cache_read_input_tokens,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawResult {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

impl RawResult {
    /// Returns true for a clean `success` record.
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }

    /// The authoritative figures carried by this record.
    pub fn final_figures(&self) -> FinalFigures {
        FinalFigures {
            usage: self.usage.map(|u| u.to_usage()),
            cost: self.total_cost_usd.map(Money::from_usd),
            duration_ms: self.duration_ms,
            num_turns: self.num_turns,
        }
    }
}

/// Renders a tool result payload as display text.
///
/// Strings pass through; arrays of text blocks are joined; anything else
/// is pretty-printed JSON.
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) if items.iter().all(is_text_block) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn is_text_block(item: &Value) -> bool {
    item.get("type").and_then(Value::as_str) == Some("text")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_system_init() {
        let record = StreamRecord::from_value(json!({
            "type": "system",
            "subtype": "init",
            "session_id": "sess-1",
            "tools": ["Bash", "Read"],
            "mcp_servers": [{"name": "tether-permissions", "status": "connected"}]
        }))
        .unwrap();

        let StreamRecord::System(system) = record else {
            panic!("expected system record");
        };
        assert!(system.is_init());
        assert_eq!(system.session_id.as_deref(), Some("sess-1"));
        assert_eq!(system.tools, vec!["Bash", "Read"]);
        assert_eq!(system.mcp_servers[0].name, "tether-permissions");
    }

    #[test]
    fn test_parse_assistant_blocks() {
        let record = StreamRecord::from_value(json!({
            "type": "assistant",
            "message": {
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "Hello"},
                    {"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {"command": "ls"}},
                    {"type": "image", "source": {}}
                ],
                "usage": {"input_tokens": 10, "output_tokens": 3, "cache_read_input_tokens": 7}
            }
        }))
        .unwrap();

        let StreamRecord::Assistant(assistant) = record else {
            panic!("expected assistant record");
        };
        assert_eq!(assistant.message.content.len(), 4);
        assert!(matches!(assistant.message.content[3], ContentBlock::Unknown));
        let usage = assistant.message.usage.unwrap().to_usage();
        assert_eq!(usage, TokenUsage::new(10, 3, 0, 7));
    }

    #[test]
    fn test_parse_result_figures() {
        let record = StreamRecord::from_value(json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "result": "done",
            "session_id": "sess-1",
            "total_cost_usd": 0.0042,
            "duration_ms": 2500,
            "num_turns": 3,
            "usage": {"input_tokens": 120, "output_tokens": 50}
        }))
        .unwrap();

        let StreamRecord::Result(result) = record else {
            panic!("expected result record");
        };
        assert!(result.is_success());
        let figures = result.final_figures();
        assert_eq!(figures.cost, Some(Money::from_usd(0.0042)));
        assert_eq!(figures.usage, Some(TokenUsage::new(120, 50, 0, 0)));
        assert_eq!(figures.num_turns, 3);
    }

    #[test]
    fn test_unknown_record_type_is_error() {
        assert!(StreamRecord::from_value(json!({"type": "stream_event"})).is_err());
        assert!(StreamRecord::from_value(json!({"no_type": true})).is_err());
    }

    #[test]
    fn test_user_string_content() {
        let record = StreamRecord::from_value(json!({
            "type": "user",
            "message": {"role": "user", "content": "plain text"}
        }))
        .unwrap();
        assert_eq!(record.kind(), "user");
    }

    #[test]
    fn test_tool_result_text() {
        assert_eq!(tool_result_text(&json!("ok")), "ok");
        assert_eq!(
            tool_result_text(&json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])),
            "a\nb"
        );
        assert_eq!(tool_result_text(&json!({"k": 1})), "{\n  \"k\": 1\n}");
        assert_eq!(tool_result_text(&Value::Null), "");
    }
}

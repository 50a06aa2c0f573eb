//! Tool permission requests, decisions and always-allow rules.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{DomainError, DomainResult};
use crate::pattern::{command_pattern, pattern_matches};

/// Tools whose input carries a shell command; they get pattern rules
/// instead of blanket allows.
const COMMAND_TOOLS: &[&str] = &["Bash"];

/// Returns true if approvals for `tool` are keyed by command pattern.
pub fn is_command_tool(tool: &str) -> bool {
    COMMAND_TOOLS.contains(&tool)
}

/// A pending tool-approval request written by the CLI's approval hook.
///
/// File name convention: `<id>.request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub input: Value,
}

impl PermissionRequest {
    /// Parses a request file's contents.
    pub fn from_json(text: &str) -> DomainResult<Self> {
        let request: Self = serde_json::from_str(text).map_err(|e| DomainError::ParseError {
            field: "permission request".to_string(),
            reason: e.to_string(),
        })?;
        if request.id.trim().is_empty() {
            return Err(DomainError::EmptyRequestId);
        }
        Ok(request)
    }

    /// The shell command, for command tools.
    pub fn command(&self) -> Option<&str> {
        if !is_command_tool(&self.tool) {
            return None;
        }
        self.input.get("command").and_then(Value::as_str)
    }

    /// Pattern shown next to the prompt and stored on "always allow".
    pub fn display_pattern(&self) -> Option<String> {
        self.command().map(command_pattern)
    }
}

/// Response file written back for the approval hook: `<id>.response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub id: String,
    pub approved: bool,
    /// ISO-8601 with millisecond precision, UTC
    pub timestamp: String,
}

impl PermissionResponse {
    pub fn new(id: impl Into<String>, approved: bool, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            approved,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// The human's answer to a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Deny,
    Approve,
    /// Approve and remember for future prompts
    AlwaysAllow,
}

impl PermissionDecision {
    /// The boolean written to the response file.
    pub fn approved(&self) -> bool {
        !matches!(self, Self::Deny)
    }

    pub fn remember(&self) -> bool {
        matches!(self, Self::AlwaysAllow)
    }
}

impl fmt::Display for PermissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deny => write!(f, "deny"),
            Self::Approve => write!(f, "approve"),
            Self::AlwaysAllow => write!(f, "always allow"),
        }
    }
}

// ============================================================================
// Always-Allow Rules
// ============================================================================

/// Rule for one tool: blanket `true`, or a set of command patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowRule {
    Blanket(bool),
    Patterns(Vec<String>),
}

/// The persisted document: `{"alwaysAllow": {"<tool>": true | [..]}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowRules {
    #[serde(rename = "alwaysAllow", default)]
    always_allow: BTreeMap<String, AllowRule>,
}

impl AllowRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tool: &str) -> Option<&AllowRule> {
        self.always_allow.get(tool)
    }

    pub fn tools(&self) -> impl Iterator<Item = (&str, &AllowRule)> {
        self.always_allow.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.always_allow.is_empty()
    }

    /// Allows every invocation of `tool`.
    pub fn allow_tool(&mut self, tool: &str) {
        self.always_allow
            .insert(tool.to_string(), AllowRule::Blanket(true));
    }

    /// Adds a command pattern for `tool`. Duplicates and tools that are
    /// already blanket-allowed are left alone.
    pub fn allow_pattern(&mut self, tool: &str, pattern: &str) {
        match self.always_allow.get_mut(tool) {
            Some(AllowRule::Blanket(true)) => {}
            Some(AllowRule::Patterns(patterns)) => {
                if !patterns.iter().any(|p| p == pattern) {
                    patterns.push(pattern.to_string());
                }
            }
            _ => {
                self.always_allow.insert(
                    tool.to_string(),
                    AllowRule::Patterns(vec![pattern.to_string()]),
                );
            }
        }
    }

    /// Removes a single pattern, or the whole tool entry when `pattern` is
    /// `None`. A tool whose pattern list becomes empty disappears.
    ///
    /// Returns true if anything changed.
    pub fn remove(&mut self, tool: &str, pattern: Option<&str>) -> bool {
        let Some(pattern) = pattern else {
            return self.always_allow.remove(tool).is_some();
        };

        let Some(AllowRule::Patterns(patterns)) = self.always_allow.get_mut(tool) else {
            return false;
        };
        let before = patterns.len();
        patterns.retain(|p| p != pattern);
        let changed = patterns.len() != before;
        if patterns.is_empty() {
            self.always_allow.remove(tool);
        }
        changed
    }

    /// Records an "always allow" answer for `request`.
    pub fn remember(&mut self, request: &PermissionRequest) {
        match request.display_pattern() {
            Some(pattern) => self.allow_pattern(&request.tool, &pattern),
            None => self.allow_tool(&request.tool),
        }
    }

    /// Returns true if `request` would be approved without prompting.
    pub fn is_allowed(&self, request: &PermissionRequest) -> bool {
        match self.always_allow.get(&request.tool) {
            Some(AllowRule::Blanket(allowed)) => *allowed,
            Some(AllowRule::Patterns(patterns)) => request
                .command()
                .is_some_and(|cmd| patterns.iter().any(|p| pattern_matches(p, cmd))),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bash(id: &str, command: &str) -> PermissionRequest {
        PermissionRequest {
            id: id.to_string(),
            tool: "Bash".to_string(),
            input: json!({ "command": command }),
        }
    }

    #[test]
    fn test_request_parsing() {
        let request = PermissionRequest::from_json(
            r#"{"id":"abc","tool":"Bash","input":{"command":"git commit -m \"x\""}}"#,
        )
        .unwrap();
        assert_eq!(request.id, "abc");
        assert_eq!(request.display_pattern().as_deref(), Some("git commit *"));
    }

    #[test]
    fn test_request_rejects_empty_id() {
        let err = PermissionRequest::from_json(r#"{"id":" ","tool":"Read"}"#).unwrap_err();
        assert_eq!(err, DomainError::EmptyRequestId);
    }

    #[test]
    fn test_non_command_tool_has_no_pattern() {
        let request = PermissionRequest {
            id: "1".to_string(),
            tool: "Write".to_string(),
            input: json!({ "command": "rm -rf /" }),
        };
        assert_eq!(request.display_pattern(), None);
    }

    #[test]
    fn test_response_timestamp_format() {
        let at = DateTime::parse_from_rfc3339("2025-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        let response = PermissionResponse::new("abc", true, at);
        assert_eq!(response.timestamp, "2025-01-02T03:04:05.678Z");
    }

    #[test]
    fn test_decision_flags() {
        assert!(!PermissionDecision::Deny.approved());
        assert!(PermissionDecision::Approve.approved());
        assert!(PermissionDecision::AlwaysAllow.approved());
        assert!(PermissionDecision::AlwaysAllow.remember());
        assert!(!PermissionDecision::Approve.remember());
    }

    #[test]
    fn test_remember_dedups_patterns() {
        let mut rules = AllowRules::new();
        rules.remember(&bash("1", "npm i lodash"));
        rules.remember(&bash("2", "npm i serde"));

        assert_eq!(
            rules.get("Bash"),
            Some(&AllowRule::Patterns(vec!["npm i *".to_string()]))
        );
    }

    #[test]
    fn test_remove_last_pattern_drops_tool() {
        let mut rules = AllowRules::new();
        rules.allow_pattern("Bash", "npm i *");
        assert!(rules.remove("Bash", Some("npm i *")));
        assert!(rules.get("Bash").is_none());
        assert!(!rules.remove("Bash", Some("npm i *")));
    }

    #[test]
    fn test_blanket_allow_subsumes_patterns() {
        let mut rules = AllowRules::new();
        rules.allow_tool("Bash");
        rules.allow_pattern("Bash", "git add *");
        assert_eq!(rules.get("Bash"), Some(&AllowRule::Blanket(true)));
        assert!(rules.is_allowed(&bash("1", "anything")));
    }

    #[test]
    fn test_is_allowed_by_pattern() {
        let mut rules = AllowRules::new();
        rules.allow_pattern("Bash", "git commit *");
        assert!(rules.is_allowed(&bash("1", "git commit -m wip")));
        assert!(!rules.is_allowed(&bash("2", "git push")));
    }

    #[test]
    fn test_rules_json_shape() {
        let mut rules = AllowRules::new();
        rules.allow_tool("Read");
        rules.allow_pattern("Bash", "npm i *");

        let value = serde_json::to_value(&rules).unwrap();
        assert_eq!(
            value,
            json!({ "alwaysAllow": { "Bash": ["npm i *"], "Read": true } })
        );

        let parsed: AllowRules = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, rules);
    }
}

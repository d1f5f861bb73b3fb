//! Conversation log types.
//!
//! Each (experiment, agent) pair owns one append-only log of [`Message`]s with
//! strictly increasing positions. Content is a sequence of typed parts so tool
//! requests and tool results can be correlated by id.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id, echoed back in the matching [`ToolResult`].
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// The outcome of one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            content: message.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }
}

/// Token and cost accounting for a model-produced message.
///
/// Synthetic messages (turn starts, tool results) carry zeroes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

/// A message that has not been appended yet; the store assigns its position.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub usage: Usage,
}

impl NewMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
            usage: Usage::default(),
        }
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: results.into_iter().map(ContentPart::ToolResult).collect(),
            usage: Usage::default(),
        }
    }

    pub fn agent(content: Vec<ContentPart>, usage: Usage) -> Self {
        Self {
            role: Role::Agent,
            content,
            usage,
        }
    }
}

/// A persisted log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub experiment_id: i64,
    pub agent_index: i64,
    pub position: i64,
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub usage: Usage,
}

impl Message {
    /// A user message made only of text: the only place a model context may begin.
    pub fn is_turn_start(&self) -> bool {
        self.role == Role::User
            && !self.content.is_empty()
            && self.content.iter().all(ContentPart::is_text)
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    /// An agent message that requested at least one tool. Valid truncation point.
    pub fn is_tool_request(&self) -> bool {
        self.role == Role::Agent && self.tool_calls().next().is_some()
    }

    /// Concatenated text parts, for display.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(role: Role, content: Vec<ContentPart>) -> Message {
        Message {
            experiment_id: 1,
            agent_index: 0,
            position: 0,
            role,
            content,
            usage: Usage::default(),
        }
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "list_pull_requests".to_string(),
            arguments: json!({}),
        }
    }

    #[test]
    fn pure_text_user_message_is_turn_start() {
        let msg = message(Role::User, vec![ContentPart::text("hello")]);
        assert!(msg.is_turn_start());
    }

    #[test]
    fn tool_result_message_is_not_turn_start() {
        let result = ToolResult::success(&call("t1"), "ok");
        let msg = message(
            Role::User,
            vec![ContentPart::text("note"), ContentPart::ToolResult(result)],
        );
        assert!(!msg.is_turn_start());
    }

    #[test]
    fn empty_or_agent_messages_are_not_turn_starts() {
        assert!(!message(Role::User, vec![]).is_turn_start());
        assert!(!message(Role::Agent, vec![ContentPart::text("hi")]).is_turn_start());
    }

    #[test]
    fn agent_message_with_call_is_tool_request() {
        let msg = message(
            Role::Agent,
            vec![ContentPart::text("let me look"), ContentPart::ToolCall(call("t1"))],
        );
        assert!(msg.is_tool_request());
        assert_eq!(msg.tool_calls().count(), 1);
        assert_eq!(msg.text(), "let me look");
    }

    #[test]
    fn content_parts_use_type_tag() {
        let part = ContentPart::ToolCall(call("abc"));
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["id"], "abc");

        let parsed: ContentPart =
            serde_json::from_value(json!({"type": "text", "text": "hi"})).unwrap();
        assert_eq!(parsed, ContentPart::text("hi"));
    }

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!("agent".parse::<Role>().unwrap(), Role::Agent);
        assert!("system".parse::<Role>().is_err());
    }
}

//! Session event types decoded from the agent engine's record stream.
//!
//! The engine emits one JSON record per line, discriminated by a `type`
//! field (`system`, `assistant`, `user`, `result`). A single assistant
//! record may carry both text and tool calls, so one record decodes into
//! zero or more [`SessionEvent`]s. Decoding tolerates unknown record types,
//! unknown content blocks and extra fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event observed during an agent session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The engine initialized a session.
    SessionStart(SessionStart),
    /// Free text produced by the assistant.
    AssistantMessage { text: String },
    /// The assistant invoked a tool.
    ToolInvocation(ToolInvocation),
    /// A tool returned its result to the assistant.
    ToolResult(ToolResult),
    /// The engine reported how the session ended.
    TerminalOutcome(TerminalOutcome),
}

/// Discriminant of a [`SessionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    AssistantMessage,
    ToolInvocation,
    ToolResult,
    TerminalOutcome,
}

impl SessionEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::SessionStart(_) => EventKind::SessionStart,
            SessionEvent::AssistantMessage { .. } => EventKind::AssistantMessage,
            SessionEvent::ToolInvocation(_) => EventKind::ToolInvocation,
            SessionEvent::ToolResult(_) => EventKind::ToolResult,
            SessionEvent::TerminalOutcome(_) => EventKind::TerminalOutcome,
        }
    }

    /// Returns true for terminal-outcome events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::TerminalOutcome(_))
    }
}

/// Session initialization details.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionStart {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// A tool call issued by the assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The result of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// The engine's report on how a session ended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalOutcome {
    /// Engine-specific termination subtype, e.g. `success` or
    /// `error_max_turns`.
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub num_turns: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_error: bool,
    /// Aggregate usage block; used only when `model_usage` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<AggregateUsage>,
    /// Per-model usage, keyed by model identifier.
    #[serde(default, rename = "modelUsage")]
    pub model_usage: BTreeMap<String, ModelUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Token usage for one underlying model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    #[serde(default, rename = "inputTokens")]
    pub input_tokens: u64,
    #[serde(default, rename = "outputTokens")]
    pub output_tokens: u64,
}

/// Session-wide token usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireRecord {
    System(SystemRecord),
    Assistant(MessageRecord),
    User(MessageRecord),
    Result(TerminalOutcome),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct SystemRecord {
    #[serde(default)]
    subtype: String,
    #[serde(flatten)]
    start: SessionStart,
}

#[derive(Debug, Default, Deserialize)]
struct MessageRecord {
    #[serde(default)]
    message: MessageBody,
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Decodes one raw transcript record into session events.
///
/// Records of unknown type decode to an empty list; malformed JSON is an
/// error so callers can decide whether to skip it.
pub fn decode_record(raw: &str) -> Result<Vec<SessionEvent>, serde_json::Error> {
    let record: WireRecord = serde_json::from_str(raw)?;
    let events = match record {
        WireRecord::System(system) if system.subtype == "init" => {
            vec![SessionEvent::SessionStart(system.start)]
        }
        WireRecord::System(_) | WireRecord::Unknown => Vec::new(),
        WireRecord::Assistant(msg) => match msg.message.content {
            Content::Text(text) => vec![SessionEvent::AssistantMessage { text }],
            Content::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } if !text.is_empty() => {
                        Some(SessionEvent::AssistantMessage { text })
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        Some(SessionEvent::ToolInvocation(ToolInvocation { id, name, input }))
                    }
                    _ => None,
                })
                .collect(),
        },
        // Plain-text user content is the prompt itself, not a tool result.
        WireRecord::User(msg) => match msg.message.content {
            Content::Text(_) => Vec::new(),
            Content::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => Some(SessionEvent::ToolResult(ToolResult {
                        tool_use_id,
                        content: flatten_tool_content(content),
                        is_error,
                    })),
                    _ => None,
                })
                .collect(),
        },
        WireRecord::Result(outcome) => vec![SessionEvent::TerminalOutcome(outcome)],
    };
    Ok(events)
}

fn flatten_tool_content(content: Value) -> String {
    match content {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

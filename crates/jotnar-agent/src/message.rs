//! Conversation shape exchanged with the model backend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    ToolResult { name: String, content: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub input: serde_json::Value,
}

/// What the model produced on one turn: either it wants tools invoked, or
/// it believes it's done and handed back final text for schema validation.
#[derive(Debug, Clone)]
pub enum ModelTurn {
    ToolCalls(Vec<ToolCall>),
    FinalText(String),
}

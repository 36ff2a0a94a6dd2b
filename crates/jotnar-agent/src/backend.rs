//! Model backend: the thing the runner feeds a conversation and tool
//! catalogue to, and that replies with either tool calls or final text.
//!
//! Grounded in borg-agent's `ClaudeBackend` (`claude.rs`): spawn the model
//! CLI with `--output-format stream-json`, stream stdout line by line,
//! parse each line as an event, surface stderr as warnings, and resolve
//! once the process exits.

use crate::error::AgentError;
use crate::message::{Message, ModelTurn, ToolCall};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn next_turn(
        &self,
        messages: &[Message],
        tool_names: &[String],
    ) -> Result<ModelTurn, AgentError>;
}

/// NDJSON event shape emitted by the model CLI's `stream-json` output
/// format, a small subset of what a real assistant stream carries.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ToolUse { name: String, input: serde_json::Value },
    Text { text: String },
    #[serde(other)]
    Unknown,
}

/// Runs the model as a subprocess, one turn per invocation.
pub struct CliModelBackend {
    pub bin: String,
    pub model: String,
    pub timeout_s: u64,
}

impl CliModelBackend {
    pub fn new(bin: impl Into<String>, model: impl Into<String>, timeout_s: u64) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
            timeout_s,
        }
    }

    fn render_conversation(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| match m {
                Message::System { content } => format!("[system]\n{content}"),
                Message::User { content } => format!("[user]\n{content}"),
                Message::Assistant { content } => format!("[assistant]\n{content}"),
                Message::ToolResult { name, content } => format!("[tool:{name}]\n{content}"),
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

#[async_trait]
impl ModelBackend for CliModelBackend {
    async fn next_turn(
        &self,
        messages: &[Message],
        tool_names: &[String],
    ) -> Result<ModelTurn, AgentError> {
        let prompt = Self::render_conversation(messages);

        let mut child = Command::new(&self.bin)
            .args([
                "--model",
                &self.model,
                "--output-format",
                "stream-json",
                "--allowed-tools",
                &tool_names.join(","),
                "--print",
                &prompt,
            ])
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::Backend(format!("failed to spawn {}: {e}", self.bin)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Backend("missing stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Backend("missing stderr".to_string()))?;

        let mut tool_calls = Vec::new();
        let mut text_parts = Vec::new();

        let io_future = async {
            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    line = stdout_lines.next_line() => {
                        match line.map_err(|e| AgentError::Backend(e.to_string()))? {
                            Some(l) => {
                                if let Ok(event) = serde_json::from_str::<StreamEvent>(&l) {
                                    match event {
                                        StreamEvent::ToolUse { name, input } => {
                                            tool_calls.push(ToolCall { name, input });
                                        }
                                        StreamEvent::Text { text } => text_parts.push(text),
                                        StreamEvent::Unknown => {}
                                    }
                                }
                            }
                            None => break,
                        }
                    }
                    line = stderr_lines.next_line() => {
                        if let Ok(Some(l)) = line {
                            if !l.is_empty() {
                                tracing::warn!(backend = %self.bin, "model stderr: {l}");
                            }
                        }
                    }
                }
            }
            Ok::<(), AgentError>(())
        };

        if self.timeout_s > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(self.timeout_s),
                io_future,
            )
            .await
            .map_err(|_| AgentError::Backend("model backend timed out".to_string()))??;
        } else {
            io_future.await?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::Backend(format!("failed waiting for model process: {e}")))?;
        if !status.success() {
            return Err(AgentError::Backend(format!(
                "model process exited with status {status}"
            )));
        }

        if !tool_calls.is_empty() {
            Ok(ModelTurn::ToolCalls(tool_calls))
        } else {
            Ok(ModelTurn::FinalText(text_parts.join("")))
        }
    }
}

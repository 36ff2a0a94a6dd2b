//! Tool Registry & Invocation (spec §4.1 / C1).
//!
//! A tool is a named, single-shot function over JSON: typed input in,
//! typed output out. The registry does lookup-by-name plus invocation,
//! collapsing every transport or validation failure into one
//! [`ToolError`] carrying a human-readable detail, this is the only
//! error variant the agent runner (C2) ever has to inspect when deciding
//! whether a tool call failed.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("tool error: {0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// A named, in-process or remote tool, invoked over opaque JSON.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Lookup-by-name plus typed invocation over a fixed set of registered
/// tools. Built fresh per agent run from whatever `tool_set` the caller
/// passes (spec §4.2's `run(...)` contract).
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub async fn invoke_raw(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::new(format!("no tool registered with name '{name}'")))?;
        tool.invoke(input).await
    }

    /// Invoke a tool with a typed input/output pair, converting
    /// (de)serialization failures into the same `ToolError` shape as a
    /// transport failure, the caller never has to distinguish them.
    pub async fn invoke<I: Serialize, O: DeserializeOwned>(
        &self,
        name: &str,
        input: &I,
    ) -> Result<O, ToolError> {
        let input_value = serde_json::to_value(input)
            .map_err(|e| ToolError::new(format!("failed to serialize input for '{name}': {e}")))?;
        let output_value = self.invoke_raw(name, input_value).await?;
        serde_json::from_value(output_value)
            .map_err(|e| ToolError::new(format!("output from '{name}' failed validation: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(input)
        }
    }

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Payload {
        value: String,
    }

    #[tokio::test]
    async fn invoke_round_trips_typed_payload() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Echo));

        let input = Payload { value: "hi".into() };
        let output: Payload = registry.invoke("echo", &input).await.expect("invoke");
        assert_eq!(input, output);
    }

    #[tokio::test]
    async fn invoking_unknown_tool_is_a_tool_error() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke_raw("nonexistent", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(err.0.contains("nonexistent"));
    }

    #[tokio::test]
    async fn output_schema_mismatch_is_a_tool_error_not_a_panic() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct WrongShape {
            unexpected_field: u32,
        }

        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Echo));

        let input = Payload { value: "hi".into() };
        let result: Result<WrongShape, ToolError> = registry.invoke("echo", &input).await;
        assert!(result.is_err());
    }
}

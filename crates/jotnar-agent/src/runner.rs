//! Agent Runner (spec §4.2 / C2).
//!
//! Contract: `run(prompt_template, typed_input, expected_output_schema,
//! tool_set, caps) -> typed_output`. Invokes the model, lets it call tools
//! from the passed set, and loops until the model produces a JSON document
//! that validates against the expected output type or the caps are
//! exhausted. Never returns partial output, cap exhaustion is always an
//! `AgentError`.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use jotnar_tools::ToolRegistry;

use crate::backend::ModelBackend;
use crate::caps::AgentCaps;
use crate::error::AgentError;
use crate::message::{Message, ModelTurn};
use crate::trajectory::Trajectory;

pub struct AgentRunner {
    backend: Arc<dyn ModelBackend>,
}

impl AgentRunner {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    /// Render `prompt_template` with `{FIELD}` placeholders substituted
    /// from `typed_input`'s JSON object fields, the same mail-merge style
    /// templating the original prompts use (`render_prompt`).
    pub fn render_prompt(prompt_template: &str, typed_input: &impl Serialize) -> anyhow::Result<String> {
        let value = serde_json::to_value(typed_input)?;
        let mut rendered = prompt_template.to_string();
        if let serde_json::Value::Object(map) = value {
            for (key, value) in map {
                let placeholder = format!("{{{}}}", key.to_uppercase());
                let replacement = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                rendered = rendered.replace(&placeholder, &replacement);
            }
        }
        Ok(rendered)
    }

    pub async fn run<O: DeserializeOwned>(
        &self,
        prompt: String,
        tools: &ToolRegistry,
        caps: AgentCaps,
    ) -> Result<O, AgentError> {
        let mut messages = vec![Message::User { content: prompt }];
        let tool_names: Vec<String> = tools.names().into_iter().map(str::to_string).collect();
        let mut trajectory = Trajectory::default();
        let mut total_retries = 0u32;

        for iteration in 0..caps.max_iterations {
            let turn = self
                .backend
                .next_turn(&messages, &tool_names)
                .await?;
            let step_index = trajectory.record_turn(iteration, &turn);

            match turn {
                ModelTurn::FinalText(text) => match serde_json::from_str::<O>(&text) {
                    Ok(output) => return Ok(output),
                    Err(e) => {
                        total_retries += 1;
                        if total_retries > caps.total_max_retries {
                            return Err(AgentError::SchemaValidation(format!(
                                "{e}\ntrajectory:\n{}",
                                trajectory.render_pretty()
                            )));
                        }
                        messages.push(Message::Assistant { content: text });
                        messages.push(Message::User {
                            content: format!(
                                "Your last response did not validate against the required JSON schema: {e}. Please respond again with a document that matches it."
                            ),
                        });
                    }
                },
                ModelTurn::ToolCalls(calls) => {
                    let mut retries_this_step = 0u32;
                    for (call_index, call) in calls.iter().enumerate() {
                        let result = tools.invoke_raw(&call.name, call.input.clone()).await;
                        match result {
                            Ok(output) => {
                                trajectory.record_tool_result(step_index, call_index, Ok(output.clone()));
                                messages.push(Message::ToolResult {
                                    name: call.name.clone(),
                                    content: output.to_string(),
                                });
                            }
                            Err(e) => {
                                trajectory.record_tool_result(
                                    step_index,
                                    call_index,
                                    Err(e.to_string()),
                                );
                                retries_this_step += 1;
                                total_retries += 1;
                                if retries_this_step > caps.max_retries_per_step
                                    || total_retries > caps.total_max_retries
                                {
                                    return Err(AgentError::RetriesExhausted {
                                        total_max_retries: caps.total_max_retries,
                                    });
                                }
                                messages.push(Message::ToolResult {
                                    name: call.name.clone(),
                                    content: format!("error: {e}"),
                                });
                            }
                        }
                    }
                }
            }
        }

        Err(AgentError::IterationsExhausted {
            max_iterations: caps.max_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct OneShotBackend {
        response: String,
    }

    #[async_trait]
    impl ModelBackend for OneShotBackend {
        async fn next_turn(
            &self,
            _messages: &[Message],
            _tool_names: &[String],
        ) -> Result<ModelTurn, AgentError> {
            Ok(ModelTurn::FinalText(self.response.clone()))
        }
    }

    #[derive(serde::Deserialize, PartialEq, Debug)]
    struct Output {
        value: u32,
    }

    #[tokio::test]
    async fn valid_final_text_on_first_turn_returns_immediately() {
        let backend = Arc::new(OneShotBackend {
            response: r#"{"value": 7}"#.to_string(),
        });
        let runner = AgentRunner::new(backend);
        let tools = ToolRegistry::new();
        let caps = AgentCaps::default();

        let output: Output = runner.run("do the thing".to_string(), &tools, caps).await.unwrap();
        assert_eq!(output, Output { value: 7 });
    }

    struct AlwaysInvalidBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelBackend for AlwaysInvalidBackend {
        async fn next_turn(
            &self,
            _messages: &[Message],
            _tool_names: &[String],
        ) -> Result<ModelTurn, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ModelTurn::FinalText("not json".to_string()))
        }
    }

    #[tokio::test]
    async fn exhausting_iterations_yields_agent_error_not_partial_output() {
        let backend = Arc::new(AlwaysInvalidBackend {
            calls: AtomicU32::new(0),
        });
        let runner = AgentRunner::new(backend);
        let tools = ToolRegistry::new();
        let caps = AgentCaps {
            max_retries_per_step: 1,
            total_max_retries: 2,
            max_iterations: 5,
        };

        let result: Result<Output, AgentError> =
            runner.run("do the thing".to_string(), &tools, caps).await;
        assert!(result.is_err());
    }

    #[test]
    fn render_prompt_substitutes_uppercased_field_placeholders() {
        #[derive(serde::Serialize)]
        struct Input {
            issue: String,
        }
        let rendered = AgentRunner::render_prompt(
            "Analyze ticket {ISSUE} now.",
            &Input { issue: "RHEL-1".to_string() },
        )
        .unwrap();
        assert_eq!(rendered, "Analyze ticket RHEL-1 now.");
    }
}

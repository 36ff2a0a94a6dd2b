//! Records every turn of a run for post-hoc debugging.
//!
//! Grounded in the original implementation's use of
//! `GlobalTrajectoryMiddleware(pretty=True)` around every agent
//! invocation: nothing downstream depends on this, it exists purely so a
//! failed run can be inspected after the fact.

use crate::message::{ModelTurn, ToolCall};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryStep {
    pub iteration: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub final_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Trajectory {
    pub steps: Vec<TrajectoryStep>,
}

impl Trajectory {
    pub fn record_turn(&mut self, iteration: u32, turn: &ModelTurn) -> usize {
        let (tool_calls, final_text) = match turn {
            ModelTurn::ToolCalls(calls) => (
                calls
                    .iter()
                    .map(|c: &ToolCall| ToolCallRecord {
                        name: c.name.clone(),
                        input: c.input.clone(),
                        output: None,
                        error: None,
                    })
                    .collect(),
                None,
            ),
            ModelTurn::FinalText(text) => (Vec::new(), Some(text.clone())),
        };
        self.steps.push(TrajectoryStep {
            iteration,
            tool_calls,
            final_text,
        });
        self.steps.len() - 1
    }

    pub fn record_tool_result(
        &mut self,
        step_index: usize,
        call_index: usize,
        output: Result<serde_json::Value, String>,
    ) {
        if let Some(step) = self.steps.get_mut(step_index) {
            if let Some(record) = step.tool_calls.get_mut(call_index) {
                match output {
                    Ok(value) => record.output = Some(value),
                    Err(e) => record.error = Some(e),
                }
            }
        }
    }

    /// Pretty-printed for attaching to an `AgentError` when a run fails.
    pub fn render_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "<trajectory unavailable>".into())
    }
}

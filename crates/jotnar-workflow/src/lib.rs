//! Workflow Engine (spec §4.3 / C3).
//!
//! A Workflow is a named set of steps; each step is an async function
//! `(&mut State) -> next_step_name | END`. The engine holds the State
//! record, invokes the step named by the previous return starting at the
//! first registered step, and stops at [`Workflow::END`]. No parallelism:
//! steps run sequentially in the caller's task. State mutation is by
//! direct field assignment; the engine owns State exclusively for the
//! duration of the run.
//!
//! Grounded in the original implementation's `Workflow.add_step(name, fn)`
//! / step-returns-next-name-or-END usage (`agents/triage_agent.py`,
//! `agents/rebase_agent.py`).

use anyhow::Result;
use jotnar_core::error::JotnarError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// What a step hands back: the name of the next step to run, or `END`.
pub type StepOutcome = String;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type StepFn<State> =
    Box<dyn for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<StepOutcome>> + Send + Sync>;

pub struct Workflow<State> {
    steps: HashMap<String, StepFn<State>>,
    order: Vec<String>,
}

impl<State> Default for Workflow<State> {
    fn default() -> Self {
        Self {
            steps: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<State> Workflow<State> {
    /// Sentinel returned by a step to end the run.
    pub const END: &'static str = "__end__";

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. The first step ever registered is the run's entry
    /// point. Re-registering an existing name replaces it but does not
    /// move its position in the start-order list.
    pub fn add_step<F, Fut>(mut self, name: impl Into<String>, step: F) -> Self
    where
        F: for<'a> Fn(&'a mut State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutcome>> + Send + 'static,
    {
        let name = name.into();
        if !self.steps.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.steps
            .insert(name, Box::new(move |state| Box::pin(step(state))));
        self
    }

    /// Run the workflow to completion, starting at the first registered
    /// step and following each step's returned next-step-name until `END`.
    pub async fn run(&self, mut state: State) -> Result<State> {
        let mut current = self.order.first().cloned().ok_or_else(|| {
            anyhow::Error::new(JotnarError::programming("workflow has no registered steps"))
        })?;

        loop {
            if current == Self::END {
                return Ok(state);
            }
            let step = self.steps.get(&current).ok_or_else(|| {
                anyhow::Error::new(JotnarError::programming(format!(
                    "workflow has no step named '{current}'"
                )))
            })?;
            tracing::debug!(step = %current, "running workflow step");
            current = step(&mut state).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        value: i32,
        log: Vec<String>,
    }

    #[tokio::test]
    async fn runs_steps_in_returned_order_until_end() {
        let workflow = Workflow::<Counter>::new()
            .add_step("increment", |state: &mut Counter| async move {
                state.value += 1;
                state.log.push("increment".to_string());
                Ok("double".to_string())
            })
            .add_step("double", |state: &mut Counter| async move {
                state.value *= 2;
                state.log.push("double".to_string());
                Ok(Workflow::<Counter>::END.to_string())
            });

        let result = workflow.run(Counter::default()).await.unwrap();
        assert_eq!(result.value, 2);
        assert_eq!(result.log, vec!["increment", "double"]);
    }

    #[tokio::test]
    async fn unknown_next_step_name_is_an_error() {
        let workflow = Workflow::<Counter>::new().add_step(
            "only_step",
            |_state: &mut Counter| async move { Ok("does_not_exist".to_string()) },
        );
        let result = workflow.run(Counter::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn a_step_can_branch_based_on_state() {
        let workflow = Workflow::<Counter>::new()
            .add_step("check", |state: &mut Counter| async move {
                if state.value > 0 {
                    Ok("positive".to_string())
                } else {
                    Ok("non_positive".to_string())
                }
            })
            .add_step("positive", |state: &mut Counter| async move {
                state.log.push("positive".to_string());
                Ok(Workflow::<Counter>::END.to_string())
            })
            .add_step("non_positive", |state: &mut Counter| async move {
                state.log.push("non_positive".to_string());
                Ok(Workflow::<Counter>::END.to_string())
            });

        let result = workflow
            .run(Counter { value: 5, log: Vec::new() })
            .await
            .unwrap();
        assert_eq!(result.log, vec!["positive"]);
    }
}

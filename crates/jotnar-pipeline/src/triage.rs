//! Triage pipeline (spec §4.6 / C6, triage half).
//!
//! Grounded in `agents/triage_agent.py`'s prompt/output contract and
//! `triage_agent.py::_map_version_to_branch` for the post-analysis branch
//! step; the label-cleanup-before-relabel and retry-then-`error_list`
//! handling for an explicit `error` resolution are grounded in
//! `common/constants.py::JiraLabels` usage patterns described in spec §4.6
//! and §7.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use jotnar_core::branch;
use jotnar_core::labels::StateLabel;
use jotnar_core::schemas::{
    BackportData, ClarificationNeededData, CveEligibility, ErrorData, NoActionData, PipelineState,
    RebaseData, Resolution, Task, TriageInput, TriageOutput,
};
use jotnar_queue::{names::QueueName, WorkQueue};
use jotnar_tools::forge::{BranchListOutput, GetInternalRhelBranchesInput};
use jotnar_tools::registry::ToolRegistry;
use jotnar_tools::tracker::{
    AddIssueCommentInput, EditIssueLabelsInput, IssueDetailsInput, StatusOutput, VerifyIssueAuthorInput,
};
use jotnar_agent::AgentRunner;
use jotnar_workflow::Workflow;

/// Prompt handed to the agent runner for `run_triage_analysis`. The
/// content itself is out of scope (spec §1 Non-goals); only the
/// `{ISSUE}` substitution point and the expected JSON shape matter here.
pub const TRIAGE_PROMPT_TEMPLATE: &str = include_str!("prompts/triage.txt");

/// A resolved outcome awaiting application via [`comment_in_issue`], or a
/// deferred error awaiting Task-level retry bookkeeping in the worker loop.
#[derive(Debug, Clone)]
pub enum Terminal {
    Rebase(RebaseData, String),
    Backport(BackportData, String),
    ClarificationNeeded(ClarificationNeededData),
    NoAction(NoActionData),
    /// An explicit `error` triage resolution. Unlike the other variants,
    /// this one is never applied directly by `comment_in_issue`. It
    /// short-circuits to `END` and the calling worker decides between a
    /// Task-level retry and finalizing with `triage_errored` (spec §4.6
    /// table, §7).
    Error(ErrorData),
}

#[derive(Debug, Clone)]
pub struct TriageState {
    pub issue: String,
    pub cve: Option<CveEligibility>,
    pub triage_output: Option<TriageOutput>,
    pub terminal: Option<Terminal>,
}

impl TriageState {
    pub fn new(issue: String) -> Self {
        Self {
            issue,
            cve: None,
            triage_output: None,
            terminal: None,
        }
    }
}

/// Apply the label-cleanup, relabel, follow-up push, and comment for a
/// single resolved (non-deferred) outcome, shared between
/// `comment_in_issue` and the worker's error-retry-exhaustion path.
pub async fn finalize(
    tools: &ToolRegistry,
    queue: &WorkQueue,
    issue: &str,
    label: StateLabel,
    comment: String,
    follow_up: Option<(QueueName, serde_json::Value)>,
) -> Result<()> {
    tools
        .invoke::<_, StatusOutput>(
            "edit_issue_labels",
            &EditIssueLabelsInput {
                issue: issue.to_string(),
                add: Vec::new(),
                remove: StateLabel::all_strings().into_iter().map(String::from).collect(),
            },
        )
        .await
        .map_err(|e| anyhow!("removing existing jotnar labels: {e}"))?;

    tools
        .invoke::<_, StatusOutput>(
            "edit_issue_labels",
            &EditIssueLabelsInput {
                issue: issue.to_string(),
                add: vec![label.as_str().to_string()],
                remove: Vec::new(),
            },
        )
        .await
        .map_err(|e| anyhow!("applying {label} label: {e}"))?;

    if let Some((q, payload)) = follow_up {
        queue.push_tail_value(q, payload).await.context("pushing follow-up task")?;
    }

    tools
        .invoke::<_, StatusOutput>(
            "add_issue_comment",
            &AddIssueCommentInput {
                issue: issue.to_string(),
                body: comment,
                private: true,
            },
        )
        .await
        .map_err(|e| anyhow!("posting comment: {e}"))?;

    Ok(())
}

/// Build the triage Workflow, wiring every named step to its tools,
/// bounded to the issue key carried in `State` (spec §4.6 steps 1-5).
pub fn build_workflow(
    tools: Arc<ToolRegistry>,
    agent: Arc<AgentRunner>,
    queue: Arc<WorkQueue>,
    max_build_attempts: u32,
    current_y_streams: Vec<u32>,
) -> Workflow<TriageState> {
    let cve_tools = tools.clone();
    let cve_queue = queue.clone();
    let triage_agent = agent.clone();
    let triage_tools = tools.clone();
    let author_tools = tools.clone();
    let branch_tools = tools.clone();
    let finalize_tools = tools;
    let finalize_queue = queue;

    Workflow::new()
        .add_step("check_cve_eligibility", move |state: &mut TriageState| {
            let tools = cve_tools.clone();
            let queue = cve_queue.clone();
            async move {
                let eligibility: CveEligibility = tools
                    .invoke("check_cve_triage_eligibility", &IssueDetailsInput { issue: state.issue.clone() })
                    .await
                    .map_err(|e| anyhow!("check_cve_triage_eligibility: {e}"))?;

                // An eligibility-check error is terminal on its own, unlike
                // an agent's own `error` resolution, which defers to the
                // Task-level retry loop.
                if let Some(detail) = eligibility.error.clone() {
                    finalize(
                        &tools,
                        &queue,
                        &state.issue,
                        StateLabel::TriageErrored,
                        format!("Decision: error\nDetails: {detail}"),
                        None,
                    )
                    .await?;
                    state.cve = Some(eligibility);
                    return Ok(Workflow::<TriageState>::END.to_string());
                }

                if !eligibility.is_eligible_for_triage {
                    state.terminal = Some(Terminal::NoAction(NoActionData {
                        reasoning: eligibility.reason.clone(),
                        jira_issue: state.issue.clone(),
                    }));
                    state.cve = Some(eligibility);
                    return Ok("comment_in_issue".to_string());
                }

                state.cve = Some(eligibility);
                Ok("run_triage_analysis".to_string())
            }
        })
        .add_step("run_triage_analysis", move |state: &mut TriageState| {
            let agent = triage_agent.clone();
            let tools = triage_tools.clone();
            async move {
                let prompt = AgentRunner::render_prompt(
                    TRIAGE_PROMPT_TEMPLATE,
                    &TriageInput { issue: state.issue.clone() },
                )?;
                let output: TriageOutput = agent
                    .run(prompt, &tools, Default::default())
                    .await
                    .map_err(|e| anyhow!("run_triage_analysis: {e}"))?;

                let next = match output.resolution() {
                    Resolution::Rebase => "verify_rebase_author",
                    Resolution::Backport => "determine_target_branch",
                    Resolution::ClarificationNeeded => {
                        if let TriageOutput::ClarificationNeeded(d) = &output {
                            state.terminal = Some(Terminal::ClarificationNeeded(d.clone()));
                        }
                        "comment_in_issue"
                    }
                    Resolution::NoAction => {
                        if let TriageOutput::NoAction(d) = &output {
                            state.terminal = Some(Terminal::NoAction(d.clone()));
                        }
                        "comment_in_issue"
                    }
                    Resolution::Error => {
                        if let TriageOutput::Error(d) = &output {
                            state.terminal = Some(Terminal::Error(d.clone()));
                        }
                        state.triage_output = Some(output.clone());
                        return Ok(Workflow::<TriageState>::END.to_string());
                    }
                };
                state.triage_output = Some(output);
                Ok(next.to_string())
            }
        })
        .add_step("verify_rebase_author", move |state: &mut TriageState| {
            let tools = author_tools.clone();
            async move {
                let verified: jotnar_tools::tracker::BoolOutput = tools
                    .invoke("verify_issue_author", &VerifyIssueAuthorInput { issue: state.issue.clone() })
                    .await
                    .map_err(|e| anyhow!("verify_issue_author: {e}"))?;

                if verified.value {
                    return Ok("determine_target_branch".to_string());
                }

                let rebase = match &state.triage_output {
                    Some(TriageOutput::Rebase(d)) => d.clone(),
                    _ => return Err(anyhow!("verify_rebase_author reached without a rebase resolution")),
                };
                state.terminal = Some(Terminal::ClarificationNeeded(ClarificationNeededData {
                    findings: format!(
                        "Triage selected rebase of {} to {}, but the issue author is not a verified organization member.",
                        rebase.package, rebase.version
                    ),
                    additional_info_needed: "Confirmation from a verified organization member that this rebase is appropriate.".to_string(),
                    jira_issue: state.issue.clone(),
                }));
                Ok("comment_in_issue".to_string())
            }
        })
        .add_step("determine_target_branch", move |state: &mut TriageState| {
            let tools = branch_tools.clone();
            let current_y_streams = current_y_streams.clone();
            async move {
                let (package, fix_version) = match &state.triage_output {
                    Some(TriageOutput::Rebase(d)) => (d.package.clone(), d.fix_version.clone()),
                    Some(TriageOutput::Backport(d)) => (d.package.clone(), d.fix_version.clone()),
                    _ => return Err(anyhow!("determine_target_branch reached without rebase/backport data")),
                };

                let Some(fix_version) = fix_version else {
                    state.terminal = Some(Terminal::Error(ErrorData {
                        details: "triage resolution is missing a fix_version".to_string(),
                        jira_issue: state.issue.clone(),
                    }));
                    return Ok(Workflow::<TriageState>::END.to_string());
                };

                let cve_needs_internal_fix = state.cve.as_ref().map(CveEligibility::needs_internal_fix).unwrap_or(false);
                let parsed = branch::parse_fix_version(&fix_version);
                let y_stream_exists = parsed.map(|p| current_y_streams.contains(&p.major)).unwrap_or(false);
                let is_zstream = parsed.map(|p| p.is_zstream).unwrap_or(false);

                let internal_branches = if is_zstream && !cve_needs_internal_fix {
                    let output: BranchListOutput = tools
                        .invoke("get_internal_rhel_branches", &GetInternalRhelBranchesInput { package: package.clone() })
                        .await
                        .map_err(|e| anyhow!("get_internal_rhel_branches: {e}"))?;
                    output.branches
                } else {
                    Vec::new()
                };

                let target_branch = branch::determine_target_branch(
                    &fix_version,
                    cve_needs_internal_fix,
                    y_stream_exists,
                    &internal_branches,
                );

                let Some(target_branch) = target_branch else {
                    state.terminal = Some(Terminal::Error(ErrorData {
                        details: format!("could not parse fix_version '{fix_version}'"),
                        jira_issue: state.issue.clone(),
                    }));
                    return Ok(Workflow::<TriageState>::END.to_string());
                };

                state.terminal = match state.triage_output.clone() {
                    Some(TriageOutput::Rebase(d)) => Some(Terminal::Rebase(d, target_branch)),
                    Some(TriageOutput::Backport(d)) => Some(Terminal::Backport(d, target_branch)),
                    _ => unreachable!("checked above"),
                };
                Ok("comment_in_issue".to_string())
            }
        })
        .add_step("comment_in_issue", move |state: &mut TriageState| {
            let tools = finalize_tools.clone();
            let queue = finalize_queue.clone();
            async move {
                let terminal = state
                    .terminal
                    .take()
                    .ok_or_else(|| anyhow!("comment_in_issue reached with no terminal outcome"))?;

                let (label, comment, follow_up) = match terminal {
                    Terminal::Rebase(data, target_branch) => {
                        let comment = format!(
                            "Decision: rebase\nPackage: {}\nVersion: {}\nTarget branch: {target_branch}",
                            data.package, data.version
                        );
                        let pipeline = PipelineState::from_rebase(data, target_branch.clone(), max_build_attempts);
                        let task = Task::new(&pipeline)?;
                        let queue_name = QueueName::rebase_queue_for_branch(Some(&target_branch));
                        (StateLabel::RebaseInProgress, comment, Some((queue_name, serde_json::to_value(&task)?)))
                    }
                    Terminal::Backport(data, target_branch) => {
                        let comment = format!(
                            "Decision: backport\nPackage: {}\nPatch: {}\nJustification: {}\nTarget branch: {target_branch}",
                            data.package, data.patch_url, data.justification
                        );
                        let pipeline = PipelineState::from_backport(data, target_branch.clone(), max_build_attempts);
                        let task = Task::new(&pipeline)?;
                        let queue_name = QueueName::backport_queue_for_branch(Some(&target_branch));
                        (StateLabel::BackportInProgress, comment, Some((queue_name, serde_json::to_value(&task)?)))
                    }
                    Terminal::ClarificationNeeded(d) => {
                        let comment = format!(
                            "Decision: clarification-needed\nFindings: {}\nAdditional info needed: {}",
                            d.findings, d.additional_info_needed
                        );
                        (StateLabel::NeedsAttention, comment, Some((QueueName::ClarificationNeededQueue, serde_json::to_value(&d)?)))
                    }
                    Terminal::NoAction(d) => {
                        let comment = format!("Decision: no-action\nReasoning: {}", d.reasoning);
                        (StateLabel::NoActionNeeded, comment, Some((QueueName::NoActionList, serde_json::to_value(&d)?)))
                    }
                    Terminal::Error(_) => {
                        return Err(anyhow!(
                            "comment_in_issue must never be reached with a deferred Error terminal"
                        ));
                    }
                };

                finalize(&tools, &queue, &state.issue, label, comment, follow_up).await?;
                Ok(Workflow::<TriageState>::END.to_string())
            }
        })
}

/// Owns the triage queue consumer loop. Dequeues a `TriageInput` Task,
/// runs the workflow, and owns the Task-level retry-then-finalize decision
/// for the agent's own explicit `error` resolution, which ends the
/// workflow at `END` without commenting (spec §4.6), the same way it does
/// for a thrown `Err`. An eligibility-check error is unrelated: it is
/// finalized immediately inside the workflow itself.
pub struct TriageWorker {
    pub tools: Arc<ToolRegistry>,
    pub queue: Arc<WorkQueue>,
    pub config: Arc<jotnar_core::config::Config>,
    pub workflow: Workflow<TriageState>,
}

impl TriageWorker {
    pub fn new(
        tools: Arc<ToolRegistry>,
        agent: Arc<AgentRunner>,
        queue: Arc<WorkQueue>,
        config: Arc<jotnar_core::config::Config>,
    ) -> Self {
        let workflow = build_workflow(
            tools.clone(),
            agent,
            queue.clone(),
            config.max_build_attempts,
            config.current_y_streams.clone(),
        );
        Self { tools, queue, config, workflow }
    }

    async fn finalize_as_errored(&self, issue: &str, details: &str) -> Result<()> {
        let error_data = ErrorData { details: details.to_string(), jira_issue: issue.to_string() };
        finalize(
            &self.tools,
            &self.queue,
            issue,
            StateLabel::TriageErrored,
            format!("Triage could not reach a decision after repeated retries.\nLast error: {details}"),
            Some((QueueName::ErrorList, serde_json::to_value(&error_data)?)),
        )
        .await
    }

    async fn handle_deferred_error(&self, queue_name: QueueName, task: Task, details: String) {
        if task.attempts < self.config.max_task_retries {
            if let Err(e) = self.queue.requeue_with_incremented_attempts(queue_name, task).await {
                tracing::error!(error = %e, "failed to requeue triage task after a deferred error");
            }
            return;
        }
        let issue = match task.metadata_as::<TriageInput>() {
            Ok(input) => input.issue,
            Err(_) => "unknown".to_string(),
        };
        if let Err(e) = self.finalize_as_errored(&issue, &details).await {
            tracing::error!(issue = %issue, error = %e, "failed to finalize an exhausted triage task as errored");
        }
    }

    /// Consume triage tasks until the queue pop times out and `shutdown`
    /// observes a cancellation (spec §5 "Cancellation and timeouts").
    pub async fn run(&self, shutdown: &tokio::sync::Notify) {
        let queues = [QueueName::TriageQueue];
        let timeout = std::time::Duration::from_secs(self.config.queue_pop_timeout_s);
        loop {
            let popped = tokio::select! {
                popped = self.queue.blocking_pop_head(&queues, timeout) => popped,
                _ = shutdown.notified() => return,
            };
            let (queue_name, task) = match popped {
                Ok(Some(popped)) => popped,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "failed to pop a triage task");
                    continue;
                }
            };

            let input: TriageInput = match task.metadata_as() {
                Ok(input) => input,
                Err(e) => {
                    tracing::error!(error = %e, "triage task has unparseable metadata, dropping");
                    continue;
                }
            };

            match self.workflow.run(TriageState::new(input.issue)).await {
                Ok(final_state) => {
                    if let Some(Terminal::Error(data)) = final_state.terminal {
                        self.handle_deferred_error(queue_name, task, data.details).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempts = task.attempts, "triage workflow step failed");
                    jotnar_core::error::abort_on_programming_error(&e);
                    self.handle_deferred_error(queue_name, task, e.to_string()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_state_starts_empty() {
        let state = TriageState::new("RHEL-1".to_string());
        assert!(state.terminal.is_none());
        assert!(state.cve.is_none());
    }
}

//! Backport pipeline (spec §4.6 / C6, backport half).
//!
//! Mirrors [`crate::rebase`] step for step, same fork/clone/build/commit
//! machinery, but the agent applies a named upstream patch instead of
//! bumping to a new upstream version (grounded in `agents/backport_agent.py`'s
//! consumer loop).

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use jotnar_core::config::Config;
use jotnar_core::distgit::{commit_message, merge_request_description, DistGitClone};
use jotnar_core::labels::StateLabel;
use jotnar_core::schemas::{ErrorData, PipelineState, PipelineSubject};
use jotnar_queue::{names::QueueName, WorkQueue};
use jotnar_tools::forge::{
    AddMergeRequestLabelsInput, CloneRepositoryInput, ForkRepositoryInput, OpenMergeRequestInput,
    PushToRemoteRepositoryInput, StatusOk, UrlOutput,
};
use jotnar_tools::lookaside::SourcesInput;
use jotnar_tools::registry::ToolRegistry;
use jotnar_tools::tracker::{AddIssueCommentInput, ChangeIssueStatusInput, EditIssueLabelsInput, StatusOutput};
use jotnar_agent::AgentRunner;
use jotnar_workflow::Workflow;

use crate::rebase::{apply_mr_label_best_effort, is_fusa_branch, LogAgentOutput, FUSA_LABEL, LOG_AGENT_PROMPT};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BackportAgentOutput {
    pub files_to_git_add: Vec<String>,
    pub title: String,
    pub description: String,
    pub srpm_path: String,
}

#[derive(Debug, Clone, serde::Serialize)]
struct BackportAgentInput<'a> {
    issue: &'a str,
    package: &'a str,
    patch_url: &'a str,
    justification: &'a str,
    clone_path: &'a str,
    branch: &'a str,
    build_error: &'a str,
}

#[derive(Debug, Clone, serde::Serialize)]
struct LogAgentInput<'a> {
    issue: &'a str,
    title: &'a str,
    description: &'a str,
    build_succeeded: bool,
}

pub const BACKPORT_AGENT_PROMPT: &str = include_str!("prompts/backport_agent.txt");

pub struct BackportWorker {
    pub tools: Arc<ToolRegistry>,
    pub agent: Arc<AgentRunner>,
    pub queue: Arc<WorkQueue>,
    pub config: Arc<Config>,
}

impl BackportWorker {
    pub fn build_workflow(&self) -> Workflow<PipelineState> {
        let tools_begin = self.tools.clone();
        let config_begin = self.config.clone();
        let tools_backport = self.tools.clone();
        let agent_backport = self.agent.clone();
        let tools_build = self.tools.clone();
        let tools_stage = self.tools.clone();
        let tools_log = self.tools.clone();
        let agent_log = self.agent.clone();
        let tools_commit = self.tools.clone();
        let config_commit = self.config.clone();
        let tools_fusa = self.tools.clone();
        let config_fusa = self.config.clone();
        let tools_finish = self.tools.clone();
        let config_finish = self.config.clone();
        let queue_finish = self.queue.clone();

        Workflow::new()
            .add_step("change_status_and_fork", move |state: &mut PipelineState| {
                let tools = tools_begin.clone();
                let config = config_begin.clone();
                async move {
                    if config.dry_run {
                        tracing::info!(issue = %state.jira_issue, "dry run: would change issue status to In Progress");
                    } else {
                        tools
                            .invoke::<_, StatusOutput>(
                                "change_issue_status",
                                &ChangeIssueStatusInput {
                                    issue: state.jira_issue.clone(),
                                    target_status: "In Progress".to_string(),
                                },
                            )
                            .await
                            .map_err(|e| anyhow!("change_issue_status: {e}"))?;
                    }

                    let repository = format!("rhel/rpms/{}", state.package);
                    let fork: UrlOutput = tools
                        .invoke("fork_repository", &ForkRepositoryInput { repository: repository.clone() })
                        .await
                        .map_err(|e| anyhow!("fork_repository: {e}"))?;
                    state.fork_url = Some(fork.url.clone());

                    let clone_path = DistGitClone::scoped_path(&config.clone_base_path, &state.jira_issue, &state.package);
                    tools
                        .invoke::<_, StatusOk>(
                            "clone_repository",
                            &CloneRepositoryInput {
                                repository: fork.url,
                                target_path: clone_path.clone(),
                                branch: state.target_branch.clone(),
                            },
                        )
                        .await
                        .map_err(|e| anyhow!("clone_repository: {e}"))?;
                    state.local_clone_path = Some(clone_path);

                    let update_branch = PipelineState::update_branch_name("jotnar-backport", &state.jira_issue);
                    let clone = DistGitClone::new(state.local_clone_path.clone().expect("just set"));
                    clone
                        .checkout_new_branch(&update_branch)
                        .context("checking out update branch")?;
                    state.update_branch = Some(update_branch);

                    Ok("run_backport_agent".to_string())
                }
            })
            .add_step("run_backport_agent", move |state: &mut PipelineState| {
                let tools = tools_backport.clone();
                let agent = agent_backport.clone();
                async move {
                    let PipelineSubject::Backport { patch_url, justification } = &state.subject else {
                        return Err(anyhow!("run_backport_agent reached with a non-backport subject"));
                    };
                    let clone_path = state
                        .local_clone_path
                        .clone()
                        .ok_or_else(|| anyhow!("run_backport_agent requires a prepared clone"))?;

                    let prompt = AgentRunner::render_prompt(
                        BACKPORT_AGENT_PROMPT,
                        &BackportAgentInput {
                            issue: &state.jira_issue,
                            package: &state.package,
                            patch_url,
                            justification,
                            clone_path: &clone_path,
                            branch: &state.target_branch,
                            build_error: state.outputs.build_error.as_deref().unwrap_or("none"),
                        },
                    )?;
                    let output: BackportAgentOutput = agent
                        .run(prompt, &tools, Default::default())
                        .await
                        .map_err(|e| anyhow!("run_backport_agent: {e}"))?;

                    state.outputs.files_to_git_add = output.files_to_git_add;
                    state.outputs.title = Some(output.title);
                    state.outputs.description = Some(output.description);
                    state.outputs.srpm_path = Some(output.srpm_path);
                    Ok("build_and_retry".to_string())
                }
            })
            .add_step("build_and_retry", move |state: &mut PipelineState| {
                let tools = tools_build.clone();
                async move {
                    let clone_path = state
                        .local_clone_path
                        .clone()
                        .ok_or_else(|| anyhow!("build_and_retry requires a prepared clone"))?;
                    let srpm_path = state
                        .outputs
                        .srpm_path
                        .clone()
                        .ok_or_else(|| anyhow!("build_and_retry requires an srpm from run_backport_agent"))?;

                    tools
                        .invoke::<_, StatusOutput>(
                            "upload_sources",
                            &SourcesInput {
                                clone_path: clone_path.clone(),
                                package: state.package.clone(),
                                branch: state.target_branch.clone(),
                                files: vec![srpm_path.clone()],
                            },
                        )
                        .await
                        .map_err(|e| anyhow!("upload_sources: {e}"))?;

                    let build: jotnar_tools::builder::BuildResultOutput = tools
                        .invoke(
                            "build_package",
                            &jotnar_tools::builder::BuildPackageInput {
                                srpm_path,
                                branch: state.target_branch.clone(),
                                ticket_id: state.jira_issue.clone(),
                            },
                        )
                        .await
                        .map_err(|e| anyhow!("build_package: {e}"))?;

                    if build.success {
                        state.outputs.build_error = None;
                        return Ok("stage_changes".to_string());
                    }

                    state.outputs.build_error = build.error_message.or_else(|| Some("build failed".to_string()));
                    state.outputs.log.push(format!(
                        "build attempt failed ({} attempts remaining): {}",
                        state.remaining_build_attempts.saturating_sub(1),
                        state.outputs.build_error.as_deref().unwrap_or("unknown error")
                    ));

                    if state.remaining_build_attempts == 0 {
                        state.success = Some(false);
                        state.error = state.outputs.build_error.clone();
                        return Ok("comment_in_issue".to_string());
                    }
                    state.remaining_build_attempts -= 1;
                    Ok("run_backport_agent".to_string())
                }
            })
            .add_step("stage_changes", move |state: &mut PipelineState| {
                let _tools = tools_stage.clone();
                async move {
                    let clone_path = state
                        .local_clone_path
                        .clone()
                        .ok_or_else(|| anyhow!("stage_changes requires a prepared clone"))?;
                    let clone = DistGitClone::new(clone_path);
                    clone
                        .stage_changes(&state.outputs.files_to_git_add)
                        .context("staging changes")?;
                    Ok("run_log_agent".to_string())
                }
            })
            .add_step("run_log_agent", move |state: &mut PipelineState| {
                let tools = tools_log.clone();
                let agent = agent_log.clone();
                async move {
                    let title = state.outputs.title.clone().unwrap_or_else(|| format!("Backport for {}", state.package));
                    let description = state.outputs.description.clone().unwrap_or_default();
                    let prompt = AgentRunner::render_prompt(
                        LOG_AGENT_PROMPT,
                        &LogAgentInput {
                            issue: &state.jira_issue,
                            title: &title,
                            description: &description,
                            build_succeeded: state.outputs.build_error.is_none(),
                        },
                    )?;
                    let output: LogAgentOutput = agent
                        .run(prompt, &tools, Default::default())
                        .await
                        .map_err(|e| anyhow!("run_log_agent: {e}"))?;
                    state.outputs.log.push(output.log_entry);
                    Ok("commit_push_and_open_mr".to_string())
                }
            })
            .add_step("commit_push_and_open_mr", move |state: &mut PipelineState| {
                let tools = tools_commit.clone();
                let config = config_commit.clone();
                async move {
                    let clone_path = state
                        .local_clone_path
                        .clone()
                        .ok_or_else(|| anyhow!("commit_push_and_open_mr requires a prepared clone"))?;
                    let title = state.outputs.title.clone().unwrap_or_else(|| format!("Backport for {}", state.package));
                    let description = state.outputs.description.clone().unwrap_or_default();

                    let clone = DistGitClone::new(clone_path.clone());
                    clone
                        .commit(&commit_message(&title, &description, &state.jira_issue))
                        .context("committing changes")?;

                    if config.dry_run {
                        state.success = Some(true);
                        return Ok("comment_in_issue".to_string());
                    }

                    let update_branch = state
                        .update_branch
                        .clone()
                        .ok_or_else(|| anyhow!("commit_push_and_open_mr requires an update branch"))?;
                    tools
                        .invoke::<_, StatusOk>(
                            "push_to_remote_repository",
                            &PushToRemoteRepositoryInput {
                                repository: state.fork_url.clone().unwrap_or_default(),
                                clone_path,
                                branch: update_branch.clone(),
                                force: false,
                            },
                        )
                        .await
                        .map_err(|e| anyhow!("push_to_remote_repository: {e}"))?;

                    let mr: UrlOutput = tools
                        .invoke(
                            "open_merge_request",
                            &OpenMergeRequestInput {
                                fork_url: state.fork_url.clone().unwrap_or_default(),
                                title: title.clone(),
                                description: merge_request_description(&description, &state.jira_issue, &state.outputs.log),
                                target: state.target_branch.clone(),
                                source: update_branch,
                            },
                        )
                        .await
                        .map_err(|e| anyhow!("open_merge_request: {e}"))?;
                    apply_mr_label_best_effort(&tools, &mr.url, StateLabel::NeedsAttention.as_str(), &state.jira_issue).await;
                    state.merge_request_url = Some(mr.url);
                    state.success = Some(true);
                    Ok("apply_fusa_label_if_applicable".to_string())
                }
            })
            .add_step("apply_fusa_label_if_applicable", move |state: &mut PipelineState| {
                let tools = tools_fusa.clone();
                let config = config_fusa.clone();
                async move {
                    if config.dry_run || !config.fusa_packages.contains(&state.package) || !is_fusa_branch(&state.target_branch) {
                        return Ok("comment_in_issue".to_string());
                    }
                    if let Err(e) = tools
                        .invoke::<_, StatusOutput>(
                            "edit_issue_labels",
                            &EditIssueLabelsInput {
                                issue: state.jira_issue.clone(),
                                add: vec![FUSA_LABEL.to_string()],
                                remove: Vec::new(),
                            },
                        )
                        .await
                    {
                        tracing::warn!(issue = %state.jira_issue, error = %e, "failed to apply FuSa label, continuing");
                    }
                    if let Some(mr_url) = state.merge_request_url.clone() {
                        apply_mr_label_best_effort(&tools, &mr_url, FUSA_LABEL, &state.jira_issue).await;
                    }
                    Ok("comment_in_issue".to_string())
                }
            })
            .add_step("comment_in_issue", move |state: &mut PipelineState| {
                let tools = tools_finish.clone();
                let config = config_finish.clone();
                let queue = queue_finish.clone();
                async move {
                    let succeeded = state.success.unwrap_or(false);

                    if config.dry_run {
                        tracing::info!(issue = %state.jira_issue, succeeded, "dry run: skipping label and comment updates");
                        return Ok(Workflow::<PipelineState>::END.to_string());
                    }

                    let label = if succeeded { StateLabel::Backported } else { StateLabel::BackportFailed };
                    let comment = if succeeded {
                        format!(
                            "Backport complete.\nMerge request: {}\n\n{}",
                            state.merge_request_url.as_deref().unwrap_or("(unknown)"),
                            state.outputs.log.join("\n")
                        )
                    } else {
                        format!(
                            "Backport failed after exhausting build retries.\nLast error: {}\n\n{}",
                            state.error.as_deref().unwrap_or("unknown error"),
                            state.outputs.log.join("\n")
                        )
                    };

                    tools
                        .invoke::<_, StatusOutput>(
                            "edit_issue_labels",
                            &EditIssueLabelsInput {
                                issue: state.jira_issue.clone(),
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
                                issue: state.jira_issue.clone(),
                                add: vec![label.as_str().to_string()],
                                remove: Vec::new(),
                            },
                        )
                        .await
                        .map_err(|e| anyhow!("applying {label} label: {e}"))?;
                    tools
                        .invoke::<_, StatusOutput>(
                            "add_issue_comment",
                            &AddIssueCommentInput { issue: state.jira_issue.clone(), body: comment, private: true },
                        )
                        .await
                        .map_err(|e| anyhow!("posting comment: {e}"))?;

                    if succeeded {
                        queue
                            .push_tail_value(QueueName::CompletedBackportList, &*state)
                            .await
                            .context("recording completed backport")?;
                    }
                    Ok(Workflow::<PipelineState>::END.to_string())
                }
            })
    }

    /// Finalize an exhausted backport task: relabel the issue
    /// `backport_errored`, record the failure in `error_list`, and comment.
    async fn finalize_as_errored(&self, issue: &str, details: &str) -> Result<()> {
        let error_data = ErrorData { details: details.to_string(), jira_issue: issue.to_string() };

        self.tools
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
        self.tools
            .invoke::<_, StatusOutput>(
                "edit_issue_labels",
                &EditIssueLabelsInput {
                    issue: issue.to_string(),
                    add: vec![StateLabel::BackportErrored.as_str().to_string()],
                    remove: Vec::new(),
                },
            )
            .await
            .map_err(|e| anyhow!("applying backport_errored label: {e}"))?;
        self.queue
            .push_tail_value(QueueName::ErrorList, &error_data)
            .await
            .context("recording errored backport")?;
        self.tools
            .invoke::<_, StatusOutput>(
                "add_issue_comment",
                &AddIssueCommentInput {
                    issue: issue.to_string(),
                    body: format!("Backport could not complete after repeated retries.\nLast error: {details}"),
                    private: true,
                },
            )
            .await
            .map_err(|e| anyhow!("posting comment: {e}"))?;
        Ok(())
    }

    /// Consume backport tasks until the queue pop times out and `shutdown`
    /// observes a cancellation (spec §5 "Cancellation and timeouts").
    pub async fn run(&self, queues: &[QueueName], shutdown: &tokio::sync::Notify) {
        let workflow = self.build_workflow();
        let timeout = std::time::Duration::from_secs(self.config.queue_pop_timeout_s);
        loop {
            let popped = tokio::select! {
                popped = self.queue.blocking_pop_head(queues, timeout) => popped,
                _ = shutdown.notified() => return,
            };
            let (queue_name, task) = match popped {
                Ok(Some(popped)) => popped,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "failed to pop a backport task");
                    continue;
                }
            };

            let state: PipelineState = match task.metadata_as() {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!(error = %e, "backport task has unparseable metadata, dropping");
                    continue;
                }
            };
            let jira_issue = state.jira_issue.clone();

            match workflow.run(state).await {
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, attempts = task.attempts, "backport workflow step failed");
                    jotnar_core::error::abort_on_programming_error(&e);
                    if task.attempts < self.config.max_task_retries {
                        if let Err(e) = self.queue.requeue_with_incremented_attempts(queue_name, task).await {
                            tracing::error!(error = %e, "failed to requeue backport task");
                        }
                    } else if let Err(finalize_err) = self.finalize_as_errored(&jira_issue, &e.to_string()).await {
                        tracing::error!(issue = %jira_issue, error = %finalize_err, "failed to finalize an exhausted backport task as errored");
                    }
                }
            }
        }
    }
}

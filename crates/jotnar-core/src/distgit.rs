//! Subprocess wrapper around dist-git clone/fork/commit/push operations.
//!
//! Grounded in borg-core's `git.rs` `Git` wrapper (the `exec`/result-check
//! shape is carried over directly); the commit/MR message composition and
//! the `*.spec`-glob staging fallback are grounded in
//! `agents/rebase_agent.py::stage_changes` / `commit_push_and_open_mr`.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Command;

/// Attribution footer appended to every commit and MR this system opens.
pub const I_AM_JOTNAR: &str = "by Jotnar, a Red Hat Enterprise Linux packaging AI agent.";
pub const CAREFULLY_REVIEW_CHANGES: &str =
    "Carefully review the changes and make sure they are correct.";

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// A checkout of a package's dist-git repository, scoped to one ticket
/// (spec §3 "Lifecycles", clone directories are keyed by ticket id under
/// a configured base path).
pub struct DistGitClone {
    pub path: String,
}

impl DistGitClone {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// `<base>/<ticket>/<package>`, the convention ingestion/the janitor rely
    /// on when scanning for stale clones.
    pub fn scoped_path(base: &str, ticket: &str, package: &str) -> String {
        Path::new(base)
            .join(ticket)
            .join(package)
            .to_string_lossy()
            .into_owned()
    }

    fn exec(&self, dir: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn git -C {dir} {}", args.join(" ")))?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }

    /// Shallow clone `source_url` at `branch` into `self.path`.
    pub fn clone_branch(&self, source_url: &str, branch: &str) -> Result<()> {
        if let Some(parent) = Path::new(&self.path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating clone parent dir {}", parent.display()))?;
        }
        let output = Command::new("git")
            .args([
                "clone",
                "--branch",
                branch,
                "--depth",
                "1",
                source_url,
                &self.path,
            ])
            .output()
            .with_context(|| format!("failed to spawn git clone {source_url}"))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git clone {source_url} -b {branch} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(())
    }

    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        let result = self.exec(&self.path, &["checkout", "-b", branch])?;
        if !result.success() {
            return Err(anyhow!(
                "git checkout -b {branch} failed: {}",
                result.combined_output()
            ));
        }
        Ok(())
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        let result = self.exec(&self.path, &["remote", "add", name, url])?;
        if !result.success() {
            return Err(anyhow!(
                "git remote add {name} {url} failed: {}",
                result.combined_output()
            ));
        }
        Ok(())
    }

    /// Stage the files the rebase/log agent named, falling back to every
    /// `*.spec` in the clone root when the agent named none
    /// (`agents/rebase_agent.py::stage_changes`).
    pub fn stage_changes(&self, files_to_commit: &[String]) -> Result<()> {
        let files: Vec<String> = if files_to_commit.is_empty() {
            glob_spec_files(&self.path)?
        } else {
            files_to_commit.to_vec()
        };
        if files.is_empty() {
            return Err(anyhow!("no files to stage in {}", self.path));
        }
        let mut args = vec!["add"];
        args.extend(files.iter().map(String::as_str));
        let result = self.exec(&self.path, &args)?;
        if !result.success() {
            return Err(anyhow!(
                "git add {:?} failed in {}: {}",
                files,
                self.path,
                result.combined_output()
            ));
        }
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        let result = self.exec(&self.path, &["commit", "-m", message])?;
        if !result.success() {
            return Err(anyhow!(
                "git commit failed in {}: {}",
                self.path,
                result.combined_output()
            ));
        }
        Ok(())
    }

    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let result = self.exec(&self.path, &["push", remote, branch])?;
        if !result.success() {
            return Err(anyhow!(
                "git push {remote} {branch} failed: {}",
                result.combined_output()
            ));
        }
        Ok(())
    }
}

fn glob_spec_files(dir: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading dir {dir}"))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".spec") {
            out.push(name);
        }
    }
    Ok(out)
}

/// Compose the commit message for a rebase/backport MR (spec §4.6 step 6,
/// grounded verbatim in `commit_push_and_open_mr`'s f-string).
pub fn commit_message(title: &str, description: &str, jira_issue: &str) -> String {
    format!(
        "{title}\n\n{description}\n\nResolves: {jira_issue}\n\nThis commit was created {I_AM_JOTNAR}\n\nAssisted-by: Jotnar\n"
    )
}

/// Compose the merge request description, including the accumulated
/// per-attempt log.
pub fn merge_request_description(description: &str, jira_issue: &str, log: &[String]) -> String {
    format!(
        "This merge request was created {I_AM_JOTNAR}\n{CAREFULLY_REVIEW_CHANGES}\n\n{description}\n\nResolves: {jira_issue}\n\nStatus of the rebase:\n\n{}",
        log.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_path_keys_on_ticket_then_package() {
        let path = DistGitClone::scoped_path("/var/lib/jotnar/clones", "RHEL-1", "bash");
        assert!(path.ends_with("RHEL-1/bash") || path.ends_with("RHEL-1\\bash"));
    }

    #[test]
    fn commit_message_carries_resolves_and_attribution() {
        let msg = commit_message("Rebase bash to 5.2", "Updates to 5.2.", "RHEL-99");
        assert!(msg.contains("Resolves: RHEL-99"));
        assert!(msg.contains(I_AM_JOTNAR));
        assert!(msg.contains("Assisted-by: Jotnar"));
    }

    #[test]
    fn mr_description_includes_log_entries_in_order() {
        let log = vec!["attempt 1 failed".to_string(), "attempt 2 succeeded".to_string()];
        let desc = merge_request_description("Updates to 5.2.", "RHEL-99", &log);
        let idx1 = desc.find("attempt 1 failed").unwrap();
        let idx2 = desc.find("attempt 2 succeeded").unwrap();
        assert!(idx1 < idx2);
        assert!(desc.contains(CAREFULLY_REVIEW_CHANGES));
    }
}

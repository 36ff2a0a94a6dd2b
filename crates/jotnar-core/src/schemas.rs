//! Cross-cutting schemas shared between pipeline stages (spec §3 / C9).
//!
//! Every inter-stage payload is a typed record with validated JSON
//! serialization; every payload that can be parsed out of a queue item
//! carries `jira_issue` so a worker can correlate back to the ticket
//! without parsing the rest of the fields (spec §4.9).

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque uppercase tracker issue identifier, e.g. `RHEL-12345`.
/// Case-insensitive upstream; always canonicalized to upper case on entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueKey(String);

impl IssueKey {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssueKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for IssueKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The queue element (spec §3 "Task"). `metadata` is opaque to the queue
/// itself; each producing stage defines its own shape (see module docs on
/// [`TriageInput`], [`PipelineState`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub attempts: u32,
}

impl Task {
    pub fn new(metadata: impl Serialize) -> anyhow::Result<Self> {
        Ok(Self {
            metadata: serde_json::to_value(metadata)?,
            attempts: 0,
        })
    }

    pub fn metadata_as<T: for<'de> Deserialize<'de>>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.metadata.clone())?)
    }
}

/// Input to the triage pipeline: just the issue key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageInput {
    pub issue: String,
}

/// Closed discriminant for triage resolutions. An unknown discriminant
/// observed on the wire (e.g. a malformed agent response) must be treated
/// as `Error` by the caller, it is never legitimate except transiently at
/// the triage step (spec §9 "Dynamic agent outputs").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    Rebase,
    Backport,
    ClarificationNeeded,
    NoAction,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseData {
    pub package: String,
    pub version: String,
    pub jira_issue: String,
    #[serde(default)]
    pub fix_version: Option<String>,
    #[serde(default)]
    pub cve_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackportData {
    pub package: String,
    pub patch_url: String,
    pub justification: String,
    pub jira_issue: String,
    #[serde(default)]
    pub fix_version: Option<String>,
    #[serde(default)]
    pub cve_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationNeededData {
    pub findings: String,
    pub additional_info_needed: String,
    pub jira_issue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoActionData {
    pub reasoning: String,
    pub jira_issue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub details: String,
    pub jira_issue: String,
}

/// Tagged union produced by the triage step (spec §3 "Triage Output").
/// Every variant carries its own `jira_issue` via its payload so callers
/// never need to match on the discriminant just to correlate the ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resolution", content = "data", rename_all = "kebab-case")]
pub enum TriageOutput {
    Rebase(RebaseData),
    Backport(BackportData),
    ClarificationNeeded(ClarificationNeededData),
    NoAction(NoActionData),
    Error(ErrorData),
}

impl TriageOutput {
    pub fn resolution(&self) -> Resolution {
        match self {
            Self::Rebase(_) => Resolution::Rebase,
            Self::Backport(_) => Resolution::Backport,
            Self::ClarificationNeeded(_) => Resolution::ClarificationNeeded,
            Self::NoAction(_) => Resolution::NoAction,
            Self::Error(_) => Resolution::Error,
        }
    }

    pub fn jira_issue(&self) -> &str {
        match self {
            Self::Rebase(d) => &d.jira_issue,
            Self::Backport(d) => &d.jira_issue,
            Self::ClarificationNeeded(d) => &d.jira_issue,
            Self::NoAction(d) => &d.jira_issue,
            Self::Error(d) => &d.jira_issue,
        }
    }

    /// Human-readable summary posted as a private tracker comment.
    pub fn format_for_comment(&self) -> String {
        match self {
            Self::Rebase(d) => format!(
                "Decision: rebase\nPackage: {}\nVersion: {}",
                d.package, d.version
            ),
            Self::Backport(d) => format!(
                "Decision: backport\nPackage: {}\nPatch: {}\nJustification: {}",
                d.package, d.patch_url, d.justification
            ),
            Self::ClarificationNeeded(d) => format!(
                "Decision: clarification-needed\nFindings: {}\nAdditional info needed: {}",
                d.findings, d.additional_info_needed
            ),
            Self::NoAction(d) => format!("Decision: no-action\nReasoning: {}", d.reasoning),
            Self::Error(d) => format!("Decision: error\nDetails: {}", d.details),
        }
    }
}

/// Result of the `check_cve_triage_eligibility` tool call (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CveEligibility {
    pub is_cve: bool,
    pub is_eligible_for_triage: bool,
    pub reason: String,
    #[serde(default)]
    pub needs_internal_fix: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CveEligibility {
    /// Whether the CVE needs an internal RHEL fix before a public stream fix
    /// (spec §3 "Target Branch"). Only meaningful when `is_cve` is true.
    pub fn needs_internal_fix(&self) -> bool {
        self.is_cve && self.needs_internal_fix.unwrap_or(false)
    }
}

/// Per-stage output accumulated as the rebase/backport pipeline advances
/// through its steps. Each agent invocation overwrites the field it owns;
/// `rebase_log`/`stage_log` is append-only across build-retry re-entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOutputs {
    pub log: Vec<String>,
    pub build_error: Option<String>,
    pub srpm_path: Option<String>,
    pub files_to_git_add: Vec<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Mutable per-ticket record threaded through the rebase/backport workflow
/// (spec §3 "Pipeline State"). Reconstructed from `Task.metadata` on every
/// dequeue, it is never itself persisted beyond that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub jira_issue: String,
    pub package: String,
    pub target_branch: String,
    /// Rebase target version, or the backport patch URL, kind-specific.
    pub subject: PipelineSubject,
    pub local_clone_path: Option<String>,
    pub fork_url: Option<String>,
    pub update_branch: Option<String>,
    pub remaining_build_attempts: u32,
    pub outputs: StageOutputs,
    pub merge_request_url: Option<String>,
    pub success: Option<bool>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PipelineSubject {
    Rebase { version: String },
    Backport { patch_url: String, justification: String },
}

impl PipelineState {
    pub fn from_rebase(data: RebaseData, target_branch: String, max_build_attempts: u32) -> Self {
        Self {
            jira_issue: data.jira_issue,
            package: data.package,
            target_branch,
            subject: PipelineSubject::Rebase { version: data.version },
            local_clone_path: None,
            fork_url: None,
            update_branch: None,
            remaining_build_attempts: max_build_attempts,
            outputs: StageOutputs::default(),
            merge_request_url: None,
            success: None,
            error: None,
        }
    }

    pub fn from_backport(data: BackportData, target_branch: String, max_build_attempts: u32) -> Self {
        Self {
            jira_issue: data.jira_issue,
            package: data.package,
            target_branch,
            subject: PipelineSubject::Backport {
                patch_url: data.patch_url,
                justification: data.justification,
            },
            local_clone_path: None,
            fork_url: None,
            update_branch: None,
            remaining_build_attempts: max_build_attempts,
            outputs: StageOutputs::default(),
            merge_request_url: None,
            success: None,
            error: None,
        }
    }

    pub fn is_rebase(&self) -> bool {
        matches!(self.subject, PipelineSubject::Rebase { .. })
    }

    /// Named update-branch convention: `<prefix>-<issue-key>`.
    pub fn update_branch_name(prefix: &str, issue: &str) -> String {
        format!("{prefix}-{issue}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Testable property 5, Triage Output payloads round-trip through JSON.
    #[test]
    fn triage_output_round_trips_through_json_for_every_variant() {
        let variants = vec![
            TriageOutput::Rebase(RebaseData {
                package: "bash".into(),
                version: "5.2".into(),
                jira_issue: "RHEL-1".into(),
                fix_version: Some("rhel-9.4".into()),
                cve_id: None,
            }),
            TriageOutput::Backport(BackportData {
                package: "bash".into(),
                patch_url: "https://example.com/patch".into(),
                justification: "fixes the bug".into(),
                jira_issue: "RHEL-2".into(),
                fix_version: None,
                cve_id: Some("CVE-2025-0001".into()),
            }),
            TriageOutput::ClarificationNeeded(ClarificationNeededData {
                findings: "found something".into(),
                additional_info_needed: "need a patch link".into(),
                jira_issue: "RHEL-3".into(),
            }),
            TriageOutput::NoAction(NoActionData {
                reasoning: "feature request".into(),
                jira_issue: "RHEL-4".into(),
            }),
            TriageOutput::Error(ErrorData {
                details: "package not found".into(),
                jira_issue: "RHEL-5".into(),
            }),
        ];

        for variant in variants {
            let json = serde_json::to_string(&variant).expect("serialize");
            let parsed: TriageOutput = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(variant.resolution(), parsed.resolution());
            assert_eq!(variant.jira_issue(), parsed.jira_issue());
        }
    }

    #[test]
    fn issue_key_canonicalizes_to_upper_case() {
        assert_eq!(IssueKey::new("rhel-123").as_str(), "RHEL-123");
        assert_eq!(IssueKey::from("Rhel-456").as_str(), "RHEL-456");
    }

    #[test]
    fn task_metadata_round_trips() {
        let input = TriageInput { issue: "RHEL-9".into() };
        let task = Task::new(&input).expect("new task");
        assert_eq!(task.attempts, 0);
        let back: TriageInput = task.metadata_as().expect("metadata_as");
        assert_eq!(back.issue, input.issue);
    }

    #[test]
    fn cve_eligibility_needs_internal_fix_requires_is_cve() {
        let not_cve = CveEligibility {
            is_cve: false,
            is_eligible_for_triage: true,
            reason: "not a cve".into(),
            needs_internal_fix: Some(true),
            error: None,
        };
        assert!(!not_cve.needs_internal_fix());
    }
}

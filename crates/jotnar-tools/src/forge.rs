//! Forge (dist-git/GitLab-alike) tools (spec §4.1 table, forge rows).
//!
//! Grounded in `mcp_server/gitlab_tools.py`: the `gitlab.com/redhat`
//! namespace check, the fork-naming convention (`centos-stream` ->
//! `centos`, namespace segments joined by `_`, prefixed onto the repo
//! name), and the 409-means-MR-already-exists reuse path in
//! `open_merge_request`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::registry::{Tool, ToolError};

pub struct ForgeClient {
    http: Client,
    base_url: String,
    token: String,
    expected_host: String,
    expected_root_namespace: String,
}

impl ForgeClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("building forge http client");
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
            expected_host: "gitlab.com".to_string(),
            expected_root_namespace: "redhat".to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.token)
    }
}

/// Derive the fork repository name from an upstream `gitlab.com/redhat/...`
/// URL, following the `centpkg fork` convention:
/// `gitlab.com/redhat/centos-stream/rpms/bash` -> `centos_rpms_bash`
/// `gitlab.com/redhat/rhel/rpms/bash` -> `rhel_rpms_bash`
pub fn derive_fork_name(upstream_path_segments: &[&str]) -> Result<String, ToolError> {
    if upstream_path_segments.first().copied() != Some("redhat") {
        return Err(ToolError::new(
            "unexpected GitLab project, expected gitlab.com/redhat",
        ));
    }
    let Some((repo_name, namespace_segments)) = upstream_path_segments.split_last() else {
        return Err(ToolError::new("upstream path has no repository name"));
    };
    let prefix: String = namespace_segments[1..]
        .iter()
        .map(|seg| seg.replace("centos-stream", "centos"))
        .collect::<Vec<_>>()
        .join("_");
    if prefix.is_empty() {
        Ok(repo_name.to_string())
    } else {
        Ok(format!("{prefix}_{repo_name}"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForkRepositoryInput {
    pub repository: String,
}

#[derive(Debug, Serialize)]
struct ForkRequestBody<'a> {
    repository: &'a str,
    name: &'a str,
    path: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UrlOutput {
    pub url: String,
}

pub struct ForkRepository {
    client: std::sync::Arc<ForgeClient>,
}

impl ForkRepository {
    pub fn new(client: std::sync::Arc<ForgeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ForkRepository {
    fn name(&self) -> &str {
        "fork_repository"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: ForkRepositoryInput = serde_json::from_value(input)
            .map_err(|e| ToolError::new(format!("invalid input for fork_repository: {e}")))?;

        let parsed = reqwest::Url::parse(&input.repository)
            .map_err(|e| ToolError::new(format!("invalid repository URL: {e}")))?;
        if parsed.host_str() != Some(self.client.expected_host.as_str()) {
            return Err(ToolError::new(format!(
                "unexpected git forge, expected {}",
                self.client.expected_host
            )));
        }
        let segments: Vec<&str> = parsed.path_segments().map(Iterator::collect).unwrap_or_default();
        if segments.first().copied() != Some(self.client.expected_root_namespace.as_str()) {
            return Err(ToolError::new(format!(
                "unexpected GitLab project, expected {}/{}",
                self.client.expected_host, self.client.expected_root_namespace
            )));
        }
        let fork_name = derive_fork_name(&segments)?;

        let response = self
            .client
            .auth(self.client.http.post(self.client.url("/forks")))
            .json(&ForkRequestBody {
                repository: &input.repository,
                name: &fork_name,
                path: &fork_name,
            })
            .send()
            .await
            .map_err(|e| ToolError::new(format!("fork_repository request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ToolError::new(format!(
                "fork_repository returned HTTP {}",
                response.status()
            )));
        }
        let output: UrlOutput = response
            .json()
            .await
            .map_err(|e| ToolError::new(format!("fork_repository response decode failed: {e}")))?;
        serde_json::to_value(output).map_err(|e| ToolError::new(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloneRepositoryInput {
    pub repository: String,
    pub target_path: String,
    pub branch: String,
}

pub struct CloneRepository;

#[async_trait]
impl Tool for CloneRepository {
    fn name(&self) -> &str {
        "clone_repository"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: CloneRepositoryInput = serde_json::from_value(input)
            .map_err(|e| ToolError::new(format!("invalid input for clone_repository: {e}")))?;
        let clone = jotnar_core::distgit::DistGitClone::new(input.target_path);
        clone
            .clone_branch(&input.repository, &input.branch)
            .map_err(|e| ToolError::new(format!("subprocess failure: {e}")))?;
        serde_json::to_value(StatusOk::default()).map_err(|e| ToolError::new(e.to_string()))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusOk {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushToRemoteRepositoryInput {
    pub repository: String,
    pub clone_path: String,
    pub branch: String,
    #[serde(default)]
    pub force: bool,
}

pub struct PushToRemoteRepository;

#[async_trait]
impl Tool for PushToRemoteRepository {
    fn name(&self) -> &str {
        "push_to_remote_repository"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: PushToRemoteRepositoryInput = serde_json::from_value(input).map_err(|e| {
            ToolError::new(format!("invalid input for push_to_remote_repository: {e}"))
        })?;
        let clone = jotnar_core::distgit::DistGitClone::new(input.clone_path);
        clone
            .push("origin", &input.branch)
            .map_err(|e| ToolError::new(format!("subprocess failure: {e}")))?;
        serde_json::to_value(StatusOk {
            status: "pushed".to_string(),
        })
        .map_err(|e| ToolError::new(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenMergeRequestInput {
    pub fork_url: String,
    pub title: String,
    pub description: String,
    pub target: String,
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddMergeRequestLabelsInput {
    pub merge_request_url: String,
    pub labels: Vec<String>,
}

pub struct AddMergeRequestLabels {
    client: std::sync::Arc<ForgeClient>,
}

impl AddMergeRequestLabels {
    pub fn new(client: std::sync::Arc<ForgeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for AddMergeRequestLabels {
    fn name(&self) -> &str {
        "add_merge_request_labels"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: AddMergeRequestLabelsInput = serde_json::from_value(input).map_err(|e| {
            ToolError::new(format!("invalid input for add_merge_request_labels: {e}"))
        })?;
        let response = self
            .client
            .auth(self.client.http.post(self.client.url("/merge_requests/labels")))
            .json(&input)
            .send()
            .await
            .map_err(|e| ToolError::new(format!("add_merge_request_labels request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ToolError::new(format!(
                "add_merge_request_labels returned HTTP {}",
                response.status()
            )));
        }
        serde_json::to_value(StatusOk {
            status: "labeled".to_string(),
        })
        .map_err(|e| ToolError::new(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct MergeRequestRecord {
    url: String,
    source_branch: String,
    target_branch: String,
}

pub struct OpenMergeRequest {
    client: std::sync::Arc<ForgeClient>,
}

impl OpenMergeRequest {
    pub fn new(client: std::sync::Arc<ForgeClient>) -> Self {
        Self { client }
    }

    /// Find an existing open MR for (source, target) after a 409, the
    /// "conflict means it already exists" reuse path.
    async fn find_existing(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Option<MergeRequestRecord>, ToolError> {
        let response = self
            .client
            .auth(self.client.http.get(self.client.url("/merge_requests")))
            .send()
            .await
            .map_err(|e| ToolError::new(format!("merge request lookup failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ToolError::new(format!(
                "merge request lookup returned HTTP {}",
                response.status()
            )));
        }
        let records: Vec<MergeRequestRecord> = response
            .json()
            .await
            .map_err(|e| ToolError::new(format!("merge request list decode failed: {e}")))?;
        Ok(records
            .into_iter()
            .find(|mr| mr.source_branch == source && mr.target_branch == target))
    }
}

#[async_trait]
impl Tool for OpenMergeRequest {
    fn name(&self) -> &str {
        "open_merge_request"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: OpenMergeRequestInput = serde_json::from_value(input)
            .map_err(|e| ToolError::new(format!("invalid input for open_merge_request: {e}")))?;

        let response = self
            .client
            .auth(self.client.http.post(self.client.url("/merge_requests")))
            .json(&input)
            .send()
            .await
            .map_err(|e| ToolError::new(format!("open_merge_request request failed: {e}")))?;

        let record = if response.status() == StatusCode::CONFLICT {
            match self.find_existing(&input.source, &input.target).await? {
                Some(existing) => existing,
                None => return Err(ToolError::new("409 reported but no matching MR was found")),
            }
        } else if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| ToolError::new(format!("open_merge_request response decode failed: {e}")))?
        } else {
            return Err(ToolError::new(format!(
                "open_merge_request returned HTTP {}",
                response.status()
            )));
        };

        serde_json::to_value(UrlOutput { url: record.url }).map_err(|e| ToolError::new(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetInternalRhelBranchesInput {
    pub package: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BranchListOutput {
    pub branches: Vec<String>,
}

pub struct GetInternalRhelBranches {
    client: std::sync::Arc<ForgeClient>,
}

impl GetInternalRhelBranches {
    pub fn new(client: std::sync::Arc<ForgeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GetInternalRhelBranches {
    fn name(&self) -> &str {
        "get_internal_rhel_branches"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: GetInternalRhelBranchesInput = serde_json::from_value(input).map_err(|e| {
            ToolError::new(format!("invalid input for get_internal_rhel_branches: {e}"))
        })?;
        let response = self
            .client
            .auth(
                self.client
                    .http
                    .get(self.client.url(&format!("/rhel/rpms/{}/branches", input.package))),
            )
            .send()
            .await
            .map_err(|e| ToolError::new(format!("get_internal_rhel_branches request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ToolError::new(format!(
                "failed to get branches for package {}: HTTP {}",
                input.package,
                response.status()
            )));
        }
        let output: BranchListOutput = response.json().await.map_err(|e| {
            ToolError::new(format!("get_internal_rhel_branches response decode failed: {e}"))
        })?;
        serde_json::to_value(output).map_err(|e| ToolError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_name_rewrites_centos_stream_and_joins_namespace_segments() {
        let name = derive_fork_name(&["redhat", "centos-stream", "rpms", "bash"]).unwrap();
        assert_eq!(name, "centos_rpms_bash");
    }

    #[test]
    fn fork_name_for_rhel_namespace() {
        let name = derive_fork_name(&["redhat", "rhel", "rpms", "bash"]).unwrap();
        assert_eq!(name, "rhel_rpms_bash");
    }

    #[test]
    fn fork_name_rejects_non_redhat_namespace() {
        let err = derive_fork_name(&["someoneelse", "rpms", "bash"]).unwrap_err();
        assert!(err.0.contains("redhat"));
    }
}

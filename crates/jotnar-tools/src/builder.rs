//! Builder tools (spec §4.1 table, `build_package`/`download_artifacts`).
//!
//! Build submission requires a Kerberos ticket (spec §4.7). Polling uses
//! its own interval, separate from the per-request HTTP timeout (spec §5:
//! "Build polling has its own interval (30 s) and overall deadline plus a
//! grace period").

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::kerberos::KerberosBroker;
use crate::registry::{Tool, ToolError};

pub struct BuilderClient {
    http: Client,
    base_url: String,
    broker: std::sync::Arc<KerberosBroker>,
    poll_interval: Duration,
    poll_deadline: Duration,
    /// Extra time tolerated past `poll_deadline` before giving up, to
    /// absorb a builder that's merely running slow rather than stuck.
    grace_period: Duration,
}

impl BuilderClient {
    pub fn new(
        base_url: impl Into<String>,
        broker: std::sync::Arc<KerberosBroker>,
        request_timeout: Duration,
        poll_interval: Duration,
        poll_deadline: Duration,
        grace_period: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("building builder http client");
        Self {
            http,
            base_url: base_url.into(),
            broker,
            poll_interval,
            poll_deadline,
            grace_period,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildPackageInput {
    pub srpm_path: String,
    pub branch: String,
    pub ticket_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildResultOutput {
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub artifact_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaskSubmission {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    /// One of "open", "closed", "failed", "canceled", builder-defined.
    state: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    artifact_urls: Vec<String>,
}

pub struct BuildPackage {
    client: std::sync::Arc<BuilderClient>,
}

impl BuildPackage {
    pub fn new(client: std::sync::Arc<BuilderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for BuildPackage {
    fn name(&self) -> &str {
        "build_package"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: BuildPackageInput = serde_json::from_value(input)
            .map_err(|e| ToolError::new(format!("invalid input for build_package: {e}")))?;

        self.client
            .broker
            .ensure_ticket()
            .await
            .map_err(|e| ToolError::new(format!("auth error: {e}")))?;

        let submission = self
            .client
            .http
            .post(self.client.url("/builds"))
            .json(&input)
            .send()
            .await
            .map_err(|e| ToolError::new(format!("build submission failed: {e}")))?;
        if !submission.status().is_success() {
            return Err(ToolError::new(format!(
                "build submission returned HTTP {}",
                submission.status()
            )));
        }
        let TaskSubmission { task_id } = submission
            .json()
            .await
            .map_err(|e| ToolError::new(format!("build submission decode failed: {e}")))?;

        let deadline = tokio::time::Instant::now()
            + self.client.poll_deadline
            + self.client.grace_period;
        loop {
            tokio::time::sleep(self.client.poll_interval).await;

            let response = self
                .client
                .http
                .get(self.client.url(&format!("/builds/{task_id}")))
                .send()
                .await
                .map_err(|e| ToolError::new(format!("build status poll failed: {e}")))?;
            if !response.status().is_success() {
                return Err(ToolError::new(format!(
                    "build status poll returned HTTP {}",
                    response.status()
                )));
            }
            let status: TaskStatus = response
                .json()
                .await
                .map_err(|e| ToolError::new(format!("build status decode failed: {e}")))?;

            match status.state.as_str() {
                "closed" => {
                    return serde_json::to_value(BuildResultOutput {
                        success: true,
                        error_message: None,
                        artifact_urls: status.artifact_urls,
                    })
                    .map_err(|e| ToolError::new(e.to_string()));
                }
                "failed" | "canceled" => {
                    return serde_json::to_value(BuildResultOutput {
                        success: false,
                        error_message: status
                            .error_message
                            .or_else(|| Some(format!("build ended in state '{}'", status.state))),
                        artifact_urls: Vec::new(),
                    })
                    .map_err(|e| ToolError::new(e.to_string()));
                }
                _ => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ToolError::new(format!(
                            "build {task_id} did not complete within deadline + grace period"
                        )));
                    }
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadArtifactsInput {
    pub urls: Vec<String>,
    pub target_dir: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusOutput {
    pub status: String,
}

pub struct DownloadArtifacts {
    http: Client,
}

impl DownloadArtifacts {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .expect("building download http client"),
        }
    }
}

#[async_trait]
impl Tool for DownloadArtifacts {
    fn name(&self) -> &str {
        "download_artifacts"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: DownloadArtifactsInput = serde_json::from_value(input)
            .map_err(|e| ToolError::new(format!("invalid input for download_artifacts: {e}")))?;

        std::fs::create_dir_all(&input.target_dir)
            .map_err(|e| ToolError::new(format!("could not create target dir: {e}")))?;

        for url in &input.urls {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| ToolError::new(format!("download of {url} failed: {e}")))?;
            if !response.status().is_success() {
                return Err(ToolError::new(format!(
                    "download of {url} returned HTTP {}",
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ToolError::new(format!("reading body of {url} failed: {e}")))?;
            let filename = url.rsplit('/').next().unwrap_or("artifact");
            let path = std::path::Path::new(&input.target_dir).join(filename);
            std::fs::write(&path, &bytes)
                .map_err(|e| ToolError::new(format!("writing {} failed: {e}", path.display())))?;
        }

        serde_json::to_value(StatusOutput {
            status: "downloaded".to_string(),
        })
        .map_err(|e| ToolError::new(e.to_string()))
    }
}

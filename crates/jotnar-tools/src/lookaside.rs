//! Lookaside cache tools (spec §4.1 table, `download_sources`/`upload_sources`).
//!
//! Both operations shell out to the packaging CLI (`centpkg`-alike) and
//! require a valid Kerberos ticket first, per spec §4.7: "invoked lazily by
//! the handful of tools that require it (lookaside upload, builder)".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

use crate::kerberos::KerberosBroker;
use crate::registry::{Tool, ToolError};

#[derive(Debug, Serialize, Deserialize)]
pub struct SourcesInput {
    pub clone_path: String,
    pub package: String,
    pub branch: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusOutput {
    pub status: String,
}

pub struct DownloadSources {
    broker: std::sync::Arc<KerberosBroker>,
}

impl DownloadSources {
    pub fn new(broker: std::sync::Arc<KerberosBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Tool for DownloadSources {
    fn name(&self) -> &str {
        "download_sources"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: SourcesInput = serde_json::from_value(input)
            .map_err(|e| ToolError::new(format!("invalid input for download_sources: {e}")))?;

        self.broker
            .ensure_ticket()
            .await
            .map_err(|e| ToolError::new(format!("auth error: {e}")))?;

        let output = Command::new("centpkg")
            .current_dir(&input.clone_path)
            .args(["sources"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ToolError::new(format!("subprocess failure: {e}")))?;
        if !output.status.success() {
            return Err(ToolError::new(format!(
                "centpkg sources failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        serde_json::to_value(StatusOutput {
            status: "downloaded".to_string(),
        })
        .map_err(|e| ToolError::new(e.to_string()))
    }
}

pub struct UploadSources {
    broker: std::sync::Arc<KerberosBroker>,
}

impl UploadSources {
    pub fn new(broker: std::sync::Arc<KerberosBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Tool for UploadSources {
    fn name(&self) -> &str {
        "upload_sources"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: SourcesInput = serde_json::from_value(input)
            .map_err(|e| ToolError::new(format!("invalid input for upload_sources: {e}")))?;

        self.broker
            .ensure_ticket()
            .await
            .map_err(|e| ToolError::new(format!("auth error: {e}")))?;

        if input.files.is_empty() {
            return Err(ToolError::new("upload_sources requires at least one file"));
        }

        let mut args = vec!["new-sources".to_string()];
        args.extend(input.files.iter().cloned());

        let output = Command::new("centpkg")
            .current_dir(&input.clone_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ToolError::new(format!("subprocess failure: {e}")))?;
        if !output.status.success() {
            return Err(ToolError::new(format!(
                "centpkg new-sources failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        serde_json::to_value(StatusOutput {
            status: "uploaded".to_string(),
        })
        .map_err(|e| ToolError::new(e.to_string()))
    }
}

//! Issue tracker tools (spec §4.1 table, tracker rows).
//!
//! Grounded in `beeai/jira_issue_fetcher.py`'s REST usage pattern (bearer
//! token, `reqwest` JSON client) and `beeai/common/models.py::CVEEligibilityResult`
//! for `check_cve_triage_eligibility`'s output shape.

use async_trait::async_trait;
use jotnar_core::schemas::CveEligibility;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::registry::{Tool, ToolError};

pub struct TrackerClient {
    http: Client,
    base_url: String,
    token: String,
}

impl TrackerClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("building tracker http client");
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.token)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueDetailsInput {
    pub issue: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueRecord {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub labels: Vec<String>,
    pub remote_links: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetIssueFieldsInput {
    pub issue: String,
    #[serde(default)]
    pub fix_versions: Option<Vec<String>>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub target_end: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddIssueCommentInput {
    pub issue: String,
    pub body: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeIssueStatusInput {
    pub issue: String,
    pub target_status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EditIssueLabelsInput {
    pub issue: String,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyIssueAuthorInput {
    pub issue: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusOutput {
    pub status: String,
}

macro_rules! tracker_tool {
    ($ty:ident, $name:literal, $input:ty, $output:ty, $method:ident, $path_expr:expr) => {
        pub struct $ty {
            client: std::sync::Arc<TrackerClient>,
        }

        impl $ty {
            pub fn new(client: std::sync::Arc<TrackerClient>) -> Self {
                Self { client }
            }
        }

        #[async_trait]
        impl Tool for $ty {
            fn name(&self) -> &str {
                $name
            }

            async fn invoke(
                &self,
                input: serde_json::Value,
            ) -> Result<serde_json::Value, ToolError> {
                let input: $input = serde_json::from_value(input)
                    .map_err(|e| ToolError::new(format!("invalid input for {}: {e}", $name)))?;
                let path = $path_expr(&input);
                let request = self.client.http.$method(self.client.url(&path));
                let request = self.client.auth(request).json(&input);
                let response = request
                    .send()
                    .await
                    .map_err(|e| ToolError::new(format!("{} request failed: {e}", $name)))?;
                if !response.status().is_success() {
                    return Err(ToolError::new(format!(
                        "{} returned HTTP {}",
                        $name,
                        response.status()
                    )));
                }
                let output: $output = response
                    .json()
                    .await
                    .map_err(|e| ToolError::new(format!("{} response decode failed: {e}", $name)))?;
                serde_json::to_value(output)
                    .map_err(|e| ToolError::new(format!("{} output encode failed: {e}", $name)))
            }
        }
    };
}

tracker_tool!(
    GetIssueDetails,
    "get_issue_details",
    IssueDetailsInput,
    IssueRecord,
    get,
    |i: &IssueDetailsInput| format!("/issue/{}", i.issue)
);

tracker_tool!(
    SetIssueFields,
    "set_issue_fields",
    SetIssueFieldsInput,
    StatusOutput,
    put,
    |i: &SetIssueFieldsInput| format!("/issue/{}/fields", i.issue)
);

tracker_tool!(
    AddIssueComment,
    "add_issue_comment",
    AddIssueCommentInput,
    StatusOutput,
    post,
    |i: &AddIssueCommentInput| format!("/issue/{}/comment", i.issue)
);

tracker_tool!(
    ChangeIssueStatus,
    "change_issue_status",
    ChangeIssueStatusInput,
    StatusOutput,
    post,
    |i: &ChangeIssueStatusInput| format!("/issue/{}/transitions", i.issue)
);

tracker_tool!(
    EditIssueLabels,
    "edit_issue_labels",
    EditIssueLabelsInput,
    StatusOutput,
    post,
    |i: &EditIssueLabelsInput| format!("/issue/{}/labels", i.issue)
);

#[derive(Debug, Serialize, Deserialize)]
pub struct BoolOutput {
    pub value: bool,
}

tracker_tool!(
    VerifyIssueAuthor,
    "verify_issue_author",
    VerifyIssueAuthorInput,
    BoolOutput,
    get,
    |i: &VerifyIssueAuthorInput| format!("/issue/{}/verify-author", i.issue)
);

tracker_tool!(
    CheckCveTriageEligibility,
    "check_cve_triage_eligibility",
    IssueDetailsInput,
    CveEligibility,
    get,
    |i: &IssueDetailsInput| format!("/issue/{}/cve-eligibility", i.issue)
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_match_the_component_table() {
        let client = std::sync::Arc::new(TrackerClient::new("http://x", "t", Duration::from_secs(1)));
        assert_eq!(GetIssueDetails::new(client.clone()).name(), "get_issue_details");
        assert_eq!(SetIssueFields::new(client.clone()).name(), "set_issue_fields");
        assert_eq!(AddIssueComment::new(client.clone()).name(), "add_issue_comment");
        assert_eq!(ChangeIssueStatus::new(client.clone()).name(), "change_issue_status");
        assert_eq!(EditIssueLabels::new(client.clone()).name(), "edit_issue_labels");
        assert_eq!(VerifyIssueAuthor::new(client.clone()).name(), "verify_issue_author");
        assert_eq!(
            CheckCveTriageEligibility::new(client).name(),
            "check_cve_triage_eligibility"
        );
    }
}

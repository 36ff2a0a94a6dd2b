//! Ingestion & Dedup (spec §4.5 / C5).
//!
//! Grounded in `beeai/jira_issue_fetcher/jira_issue_fetcher.py`:
//! paginated search limited to `key`/`labels`, a fixed 5 req/s rate limit,
//! exponential backoff on HTTP 429 (base 2, 4 total tries), and the
//! existing-key dedup scan across every queue before enqueueing.

use anyhow::{Context, Result};
use jotnar_core::labels::StateLabel;
use jotnar_core::schemas::{Task, TriageInput};
use jotnar_queue::{names::QueueName, WorkQueue};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

const MAX_TRIES: u32 = 4;
const BACKOFF_BASE_SECS: u64 = 2;

/// A search hit: just enough to decide push-or-skip (spec §4.5: "Fields
/// retrieved are limited to `key` and `labels`").
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    issues: Vec<SearchIssue>,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct SearchIssue {
    key: String,
    fields: SearchIssueFields,
}

#[derive(Debug, Deserialize)]
struct SearchIssueFields {
    #[serde(default)]
    labels: Vec<String>,
}

/// Paginated, rate-limited issue search client.
pub struct IssueSearchClient {
    http: Client,
    base_url: String,
    token: String,
    query: String,
    page_size: u32,
    rate_limit_delay: Duration,
    last_request: tokio::sync::Mutex<Option<tokio::time::Instant>>,
}

impl IssueSearchClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, query: impl Into<String>, page_size: u32) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(90))
                .build()
                .expect("building issue search http client"),
            base_url: base_url.into(),
            token: token.into(),
            query: query.into(),
            page_size,
            // 5 calls per second, per spec §4.5 and the original fetcher's RATE_LIMIT_CALLS_PER_SECOND.
            rate_limit_delay: Duration::from_millis(200),
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit_delay {
                tokio::time::sleep(self.rate_limit_delay - elapsed).await;
            }
        }
        *last = Some(tokio::time::Instant::now());
    }

    async fn search_page(&self, start_at: u32) -> Result<SearchResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.throttle().await;
            let response = self
                .http
                .post(format!("{}/rest/api/2/search", self.base_url.trim_end_matches('/')))
                .bearer_auth(&self.token)
                .json(&serde_json::json!({
                    "jql": self.query,
                    "startAt": start_at,
                    "maxResults": self.page_size,
                    "fields": ["key", "labels"],
                }))
                .send()
                .await
                .context("issue search request failed")?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt >= MAX_TRIES {
                    anyhow::bail!("issue search rate limited after {MAX_TRIES} attempts");
                }
                let delay = Duration::from_secs(BACKOFF_BASE_SECS.pow(attempt));
                tracing::warn!(attempt, delay_s = delay.as_secs(), "issue search rate limited, backing off");
                tokio::time::sleep(delay).await;
                continue;
            }

            let response = response.error_for_status().context("issue search returned an error status")?;
            return response.json::<SearchResponse>().await.context("decoding issue search response");
        }
    }

    /// Fetch every page of candidates, canonicalizing each key to upper case.
    pub async fn search_issues(&self) -> Result<Vec<Candidate>> {
        let mut out = Vec::new();
        let mut start_at = 0u32;
        loop {
            let page = self.search_page(start_at).await?;
            let got = page.issues.len();
            for issue in page.issues {
                out.push(Candidate {
                    key: issue.key.to_ascii_uppercase(),
                    labels: issue.fields.labels,
                });
            }
            if got == 0 || out.len() as u64 >= page.total {
                break;
            }
            start_at += self.page_size;
        }
        Ok(out)
    }
}

/// Recover an issue key from a raw JSON payload, regardless of which queue
/// it came from; every inter-stage schema carries either `jira_issue` or
/// (for triage input) `issue` (spec §4.5 step 1 / §4.9).
fn issue_key_from_value(value: &serde_json::Value) -> Option<String> {
    value
        .get("jira_issue")
        .or_else(|| value.get("issue"))
        .and_then(|v| v.as_str())
        .map(str::to_ascii_uppercase)
}

/// Scan every queue's contents to build the set of issue keys already
/// represented somewhere in the system (spec §4.5 step 1).
pub async fn existing_issue_keys(queue: &WorkQueue) -> Result<HashSet<String>> {
    let mut existing = HashSet::new();

    for q in QueueName::input_queues() {
        for task in queue.list(q).await.with_context(|| format!("scanning {q} for dedup"))? {
            if let Some(key) = issue_key_from_value(&task.metadata) {
                existing.insert(key);
            }
        }
    }
    for q in QueueName::data_queues() {
        for value in queue
            .list_as::<serde_json::Value>(q)
            .await
            .with_context(|| format!("scanning {q} for dedup"))?
        {
            if let Some(key) = issue_key_from_value(&value) {
                existing.insert(key);
            }
        }
    }

    Ok(existing)
}

/// Run one ingestion pass: search, dedup, push. Returns the number of
/// fresh triage Tasks pushed.
pub async fn run_ingestion_pass(queue: &WorkQueue, search: &IssueSearchClient) -> Result<usize> {
    let candidates = search.search_issues().await?;
    if candidates.is_empty() {
        return Ok(0);
    }

    let mut existing = existing_issue_keys(queue).await?;
    let mut pushed = 0usize;

    for candidate in candidates {
        let jotnar_labels: Vec<&String> = candidate
            .labels
            .iter()
            .filter(|l| StateLabel::is_jotnar_label(l))
            .collect();
        let has_retry_needed = jotnar_labels
            .iter()
            .any(|l| l.as_str() == StateLabel::RetryNeeded.as_str());

        if has_retry_needed {
            // Manual retrigger: force re-processing even if stale state lingers elsewhere.
            existing.remove(&candidate.key);
        } else if !jotnar_labels.is_empty() {
            existing.insert(candidate.key.clone());
        }

        if existing.contains(&candidate.key) {
            continue;
        }

        let task = Task::new(TriageInput { issue: candidate.key.clone() })?;
        queue.push_tail(QueueName::TriageQueue, &task).await?;
        existing.insert(candidate.key.clone());
        pushed += 1;
        tracing::info!(issue = %candidate.key, "pushed fresh triage task");
    }

    Ok(pushed)
}

/// Run [`run_ingestion_pass`] once every `interval`, forever, until
/// `shutdown` fires.
pub async fn run(queue: &WorkQueue, search: &IssueSearchClient, interval: Duration, shutdown: &tokio::sync::Notify) {
    loop {
        match run_ingestion_pass(queue, search).await {
            Ok(pushed) if pushed > 0 => tracing::info!(pushed, "ingestion pass complete"),
            Ok(_) => tracing::debug!("ingestion pass found nothing new"),
            Err(e) => tracing::error!(error = %e, "ingestion pass failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_key_from_value_prefers_jira_issue_over_issue() {
        let v = serde_json::json!({"jira_issue": "rhel-1", "issue": "rhel-2"});
        assert_eq!(issue_key_from_value(&v).as_deref(), Some("RHEL-1"));
    }

    #[test]
    fn issue_key_from_value_falls_back_to_issue_field() {
        let v = serde_json::json!({"issue": "rhel-9"});
        assert_eq!(issue_key_from_value(&v).as_deref(), Some("RHEL-9"));
    }

    #[test]
    fn issue_key_from_value_is_none_without_either_field() {
        let v = serde_json::json!({"package": "bash"});
        assert!(issue_key_from_value(&v).is_none());
    }
}

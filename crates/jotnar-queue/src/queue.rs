//! FIFO work queue (spec §4.4 "Work Queue" / C4).
//!
//! Grounded in borg-core's `db.rs` connection/query shape, re-targeted at
//! `tokio-postgres`/`deadpool-postgres` (see `SPEC_FULL.md` §C for why:
//! the teacher's workspace already declares this stack though its own
//! `Db` happens to use rusqlite). The semantics (push to tail, pop from
//! head, at-least-once, bounded blocking timeout) are grounded in
//! `beeai/jira_issue_fetcher.py`'s `lpush`/`brpop` usage and spec §5
//! "Cancellation and timeouts".

use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use jotnar_core::schemas::Task;
use std::time::Duration;

use crate::names::QueueName;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct WorkQueue {
    pool: Pool,
}

impl WorkQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.pool.get().await.context("acquiring db connection")?;
        client
            .batch_execute(include_str!("../schema.sql"))
            .await
            .context("applying schema.sql")?;
        Ok(())
    }

    /// Push `task` to the tail of `queue` (`lpush` in the original, list
    /// order is preserved by always popping from the opposite end).
    pub async fn push_tail(&self, queue: QueueName, task: &Task) -> Result<()> {
        let client = self.pool.get().await.context("acquiring db connection")?;
        let payload = serde_json::to_value(task)?;
        client
            .execute(
                "INSERT INTO queue_items (queue, payload) VALUES ($1, $2)",
                &[&queue.as_str(), &payload],
            )
            .await
            .context("push_tail")?;
        Ok(())
    }

    /// Push `task` to the head of `queue` instead of the tail, used
    /// exclusively for retries, which must surface before fresh work
    /// (spec §5 "Ordering guarantees": "retries are pushed to the head
    /// ... not the tail"). Head position is modeled as an id lower than
    /// every existing row for the queue.
    async fn push_head(&self, queue: QueueName, task: &Task) -> Result<()> {
        let client = self.pool.get().await.context("acquiring db connection")?;
        let payload = serde_json::to_value(task)?;
        client
            .execute(
                "INSERT INTO queue_items (id, queue, payload) \
                 VALUES (COALESCE((SELECT MIN(id) FROM queue_items WHERE queue = $1), 0) - 1, $1, $2)",
                &[&queue.as_str(), &payload],
            )
            .await
            .context("push_head")?;
        Ok(())
    }

    /// Pop the oldest item across any of `queues`, blocking up to `timeout`
    /// (spec §5: default 30s so shutdown can be observed). Returns `None`
    /// on timeout with nothing ready, callers loop back to their own
    /// shutdown check.
    pub async fn blocking_pop_head(
        &self,
        queues: &[QueueName],
        timeout: Duration,
    ) -> Result<Option<(QueueName, Task)>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(popped) = self.try_pop_head(queues).await? {
                return Ok(Some(popped));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - tokio::time::Instant::now())).await;
        }
    }

    async fn try_pop_head(&self, queues: &[QueueName]) -> Result<Option<(QueueName, Task)>> {
        let mut client = self.pool.get().await.context("acquiring db connection")?;
        let txn = client.transaction().await.context("begin txn")?;

        let names: Vec<&str> = queues.iter().map(QueueName::as_str).collect();
        let row = txn
            .query_opt(
                "SELECT id, queue, payload FROM queue_items \
                 WHERE queue = ANY($1) \
                 ORDER BY id ASC \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1",
                &[&names],
            )
            .await
            .context("select head")?;

        let Some(row) = row else {
            txn.rollback().await.ok();
            return Ok(None);
        };

        let id: i64 = row.get(0);
        let queue_str: String = row.get(1);
        let payload: serde_json::Value = row.get(2);

        txn.execute("DELETE FROM queue_items WHERE id = $1", &[&id])
            .await
            .context("delete popped item")?;
        txn.commit().await.context("commit pop")?;

        let queue = QueueName::from_str(&queue_str)
            .with_context(|| format!("unrecognized queue name in storage: {queue_str}"))?;
        let task: Task = serde_json::from_value(payload).context("decode task payload")?;
        Ok(Some((queue, task)))
    }

    /// Re-enqueue `task` with `attempts` incremented, to the **head** of
    /// its original queue so it surfaces before fresh work, the only
    /// mutation a Task undergoes besides destruction (spec §3
    /// "Lifecycles", spec §5 "Ordering guarantees").
    pub async fn requeue_with_incremented_attempts(
        &self,
        queue: QueueName,
        mut task: Task,
    ) -> Result<()> {
        task.attempts += 1;
        self.push_head(queue, &task).await
    }

    /// Scan the full contents of `queue` without removing anything, used
    /// by ingestion's existing-key dedup (spec §4.5).
    pub async fn list(&self, queue: QueueName) -> Result<Vec<Task>> {
        let client = self.pool.get().await.context("acquiring db connection")?;
        let rows = client
            .query(
                "SELECT payload FROM queue_items WHERE queue = $1 ORDER BY id ASC",
                &[&queue.as_str()],
            )
            .await
            .context("list")?;
        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.get(0);
                serde_json::from_value(payload).context("decode task payload")
            })
            .collect()
    }

    /// Same as [`list`](Self::list) but decodes rows as an arbitrary typed
    /// schema object rather than a `Task`, used to scan the data queues
    /// (error/no-action/completed lists), which hold terminal results, not
    /// retryable Tasks.
    pub async fn list_as<T: for<'de> serde::Deserialize<'de>>(
        &self,
        queue: QueueName,
    ) -> Result<Vec<T>> {
        let client = self.pool.get().await.context("acquiring db connection")?;
        let rows = client
            .query(
                "SELECT payload FROM queue_items WHERE queue = $1 ORDER BY id ASC",
                &[&queue.as_str()],
            )
            .await
            .context("list_as")?;
        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.get(0);
                serde_json::from_value(payload).context("decode schema payload")
            })
            .collect()
    }

    /// Push an arbitrary serializable schema object (not a `Task`) to a
    /// data queue, used for terminal results (error/no-action/completed).
    pub async fn push_tail_value(&self, queue: QueueName, value: impl serde::Serialize) -> Result<()> {
        let client = self.pool.get().await.context("acquiring db connection")?;
        let payload = serde_json::to_value(value)?;
        client
            .execute(
                "INSERT INTO queue_items (queue, payload) VALUES ($1, $2)",
                &[&queue.as_str(), &payload],
            )
            .await
            .context("push_tail_value")?;
        Ok(())
    }
}

//! Scheduled/delayed work items (spec §4.4 "scheduled items").
//!
//! Grounded directly in `supervisor/work_queue.py`: `pop_first_ready_work_item`
//! atomically claims the earliest-ready item and reschedules it
//! `WORK_ITEM_RETRY_DELAY` (15 minutes) out rather than deleting it, a
//! visibility-timeout pattern. The item only leaves the set when a caller
//! explicitly calls `remove`, i.e. once it has actually been handled.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use deadpool_postgres::Pool;

const RETRY_DELAY: ChronoDuration = ChronoDuration::minutes(15);

pub struct ScheduledQueue {
    pool: Pool,
}

impl ScheduledQueue {
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

    /// Schedule `items` to become ready `delay` from now (default zero,
    /// immediately ready). Upserts: rescheduling an already-present item
    /// moves its ready time.
    pub async fn schedule(&self, items: &[String], delay: ChronoDuration) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let ready_at = Utc::now() + delay;
        let client = self.pool.get().await.context("acquiring db connection")?;
        for item in items {
            client
                .execute(
                    "INSERT INTO scheduled_items (item, ready_at) VALUES ($1, $2) \
                     ON CONFLICT (item) DO UPDATE SET ready_at = EXCLUDED.ready_at",
                    &[item, &ready_at],
                )
                .await
                .context("schedule")?;
        }
        Ok(())
    }

    /// Atomically claim the earliest-ready item whose `ready_at <= now()`,
    /// immediately rescheduling it `RETRY_DELAY` out. Returns `None` if
    /// nothing is ready yet.
    pub async fn pop_first_ready(&self) -> Result<Option<String>> {
        let mut client = self.pool.get().await.context("acquiring db connection")?;
        let txn = client.transaction().await.context("begin txn")?;

        let now = Utc::now();
        let row = txn
            .query_opt(
                "SELECT item FROM scheduled_items \
                 WHERE ready_at <= $1 \
                 ORDER BY ready_at ASC \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1",
                &[&now],
            )
            .await
            .context("select first ready")?;

        let Some(row) = row else {
            txn.rollback().await.ok();
            return Ok(None);
        };

        let item: String = row.get(0);
        let next_ready = now + RETRY_DELAY;
        txn.execute(
            "UPDATE scheduled_items SET ready_at = $1 WHERE item = $2",
            &[&next_ready, &item],
        )
        .await
        .context("reschedule claimed item")?;
        txn.commit().await.context("commit pop_first_ready")?;

        Ok(Some(item))
    }

    /// Block (polling) until an item is ready, or return after one
    /// `poll_interval` tick if none is, callers own their own shutdown loop.
    pub async fn wait_first_ready(&self, poll_interval: std::time::Duration) -> Result<String> {
        loop {
            if let Some(item) = self.pop_first_ready().await? {
                return Ok(item);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn remove(&self, items: &[String]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let client = self.pool.get().await.context("acquiring db connection")?;
        client
            .execute("DELETE FROM scheduled_items WHERE item = ANY($1)", &[&items])
            .await
            .context("remove")?;
        Ok(())
    }

    pub async fn all_items(&self) -> Result<Vec<String>> {
        let client = self.pool.get().await.context("acquiring db connection")?;
        let rows = client
            .query("SELECT item FROM scheduled_items ORDER BY ready_at ASC", &[])
            .await
            .context("all_items")?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }
}

/// Ready timestamp helper exposed for tests that need to assert ordering
/// without a live database.
pub fn ready_at_after(delay: ChronoDuration) -> DateTime<Utc> {
    Utc::now() + delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_at_after_moves_into_the_future_for_positive_delay() {
        let now = Utc::now();
        let ready = ready_at_after(ChronoDuration::minutes(15));
        assert!(ready > now);
    }
}

//! Connection pool construction (spec §4.4 / C4).
//!
//! The queue and the scheduled-items set share one pool; both run
//! `ensure_schema` against it at startup, which is idempotent (`CREATE
//! TABLE IF NOT EXISTS`).

use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

/// Build a pool from a `postgres://` URL. TLS is intentionally not
/// negotiated here; connections are expected to run over a trusted
/// network or a local socket, matching the teacher's own connection setup.
pub fn build_pool(queue_url: &str) -> Result<Pool> {
    let pg_config: tokio_postgres::Config = queue_url.parse().context("parsing JOTNAR_QUEUE_URL")?;
    let manager_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };
    let manager = Manager::from_config(pg_config, NoTls, manager_config);
    Pool::builder(manager)
        .max_size(16)
        .build()
        .context("building postgres connection pool")
}

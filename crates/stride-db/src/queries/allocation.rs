//! Exclusive lease over timeline/plan item id allocation.
//!
//! Compiled plans carry caller-allocated ids computed from the current
//! maxima, so two compilations must never read the maxima concurrently.

use anyhow::{Context, Result};
use sqlx::PgConnection;

/// Advisory lock key shared by every id-allocating transaction.
pub const ID_ALLOCATION_LOCK: i64 = 0x5354_5249_4445_0001;

/// Block until this transaction holds the allocation lease.
///
/// The lock is transaction-scoped: it is released on commit or rollback.
/// Calling this outside a transaction releases it immediately, which is
/// always a bug.
pub async fn acquire_id_lease(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(ID_ALLOCATION_LOCK)
        .execute(conn)
        .await
        .context("failed to acquire id allocation lock")?;

    Ok(())
}

/// Current maximum timeline and plan item ids (0 when the tables are empty).
pub async fn current_max_ids(conn: &mut PgConnection) -> Result<(i64, i64)> {
    let timeline_max: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM timelines")
        .fetch_one(&mut *conn)
        .await
        .context("failed to read max timeline id")?;

    let item_max: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM plan_items")
        .fetch_one(&mut *conn)
        .await
        .context("failed to read max plan item id")?;

    Ok((timeline_max, item_max))
}

//! Identity allocation for new telemetry rows.
//!
//! Each entity kind draws from its own counter in the `id_sequence` table.
//! Allocation is a single `UPDATE ... RETURNING` statement, so two callers
//! can never observe the same value: `SQLite` serializes writers, and the
//! increment and the read happen in one step.
//!
//! The write path allocates inside the same transaction that inserts the
//! row. A rejected insert rolls the counter back with it, so failed writes
//! never consume identifiers.

use freerange_types::EntityKind;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::TelemetryError;

/// Allocate the next identifier for `kind` on an open connection or transaction.
pub(crate) async fn allocate_in(
    conn: &mut SqliteConnection,
    kind: EntityKind,
) -> Result<i64, TelemetryError> {
    let id = sqlx::query_scalar::<_, i64>(
        r"UPDATE id_sequence SET last_id = last_id + 1
          WHERE entity = ?1
          RETURNING last_id",
    )
    .bind(kind.as_str())
    .fetch_one(conn)
    .await?;

    tracing::trace!(%kind, id, "Allocated identifier");
    Ok(id)
}

/// Stand-alone access to the identifier counters.
pub struct IdentityAllocator<'a> {
    pool: &'a SqlitePool,
}

impl<'a> IdentityAllocator<'a> {
    /// Create an allocator bound to a connection pool.
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Reserve the next identifier for `kind` in its own transaction.
    ///
    /// The reserved value is never handed out again, even if no row is ever
    /// written with it.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Storage`] if the counter cannot be advanced.
    pub async fn allocate(&self, kind: EntityKind) -> Result<i64, TelemetryError> {
        let mut tx = self.pool.begin().await?;
        let id = allocate_in(&mut tx, kind).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// The highest identifier handed out so far for `kind` (0 if none).
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Storage`] if the query fails.
    pub async fn last_allocated(&self, kind: EntityKind) -> Result<i64, TelemetryError> {
        let id = sqlx::query_scalar::<_, i64>(r"SELECT last_id FROM id_sequence WHERE entity = ?1")
            .bind(kind.as_str())
            .fetch_one(self.pool)
            .await?;
        Ok(id)
    }
}

//! Batch persistence seam
//!
//! [`BatchStore`] is what the buffered handlers flush into. [`PgBatchStore`]
//! implements it for any record type that declares its table mapping through
//! [`TableRecord`].

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::error::{Result, SieveError};

/// Sink accepting batches of typed records
///
/// Implementations must be safe to call concurrently and must fail, not
/// silently drop, when any record of the batch could not be written.
#[async_trait]
pub trait BatchStore<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Write all records, returning the number written
    async fn batch_write(&self, records: &[T]) -> Result<u64>;
}

/// Explicit field-to-column mapping of a persisted record
pub trait TableRecord: Send + Sync + 'static {
    const TABLE: &'static str;
    /// Column order used by [`TableRecord::push_row`]
    const COLUMNS: &'static [&'static str];
    /// Unique key to upsert on; plain insert when `None`
    const CONFLICT_KEY: Option<&'static str> = None;

    /// Bind one value per column, in `COLUMNS` order
    fn push_row(&self, row: Separated<'_, '_, Postgres, &'static str>);
}

/// Multi-row `INSERT ... VALUES` statement for a batch
pub fn insert_query<R: TableRecord>(records: &[R]) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO ");
    qb.push(R::TABLE)
        .push(" (")
        .push(R::COLUMNS.join(", "))
        .push(") ");

    qb.push_values(records, |row, record| record.push_row(row));

    if let Some(key) = R::CONFLICT_KEY {
        let updates: Vec<String> = R::COLUMNS
            .iter()
            .filter(|column| **column != key)
            .map(|column| format!("{} = EXCLUDED.{}", column, column))
            .collect();

        qb.push(" ON CONFLICT (").push(key).push(")");
        if updates.is_empty() {
            qb.push(" DO NOTHING");
        } else {
            qb.push(" DO UPDATE SET ").push(updates.join(", "));
        }
    }

    qb
}

/// PostgreSQL batch inserter for one record type
pub struct PgBatchStore<R> {
    pool: PgPool,
    _record: PhantomData<fn() -> R>,
}

impl<R> PgBatchStore<R> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _record: PhantomData,
        }
    }
}

impl<R> Clone for PgBatchStore<R> {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

#[async_trait]
impl<R: TableRecord> BatchStore<R> for PgBatchStore<R> {
    async fn batch_write(&self, records: &[R]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut qb = insert_query(records);
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| SieveError::BatchWrite(format!("{}: {}", R::TABLE, e)))?;

        debug!(
            table = R::TABLE,
            rows = result.rows_affected(),
            "Batch written"
        );

        Ok(result.rows_affected())
    }
}

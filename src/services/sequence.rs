use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::entities::sequence_counter::{Column, Entity as SequenceCounterEntity};
use crate::errors::ServiceError;

/// Named monotonic counters backed by a single atomic upsert per mint.
#[derive(Clone)]
pub struct SequenceCounter {
    db: Arc<DatabaseConnection>,
}

impl SequenceCounter {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Mints the next value of `name` in its own statement.
    pub async fn next(&self, name: &str) -> Result<i64, ServiceError> {
        Self::next_value(&*self.db, name).await
    }

    /// Reads the last minted value without changing it.
    pub async fn current(&self, name: &str) -> Result<Option<i64>, ServiceError> {
        let row = SequenceCounterEntity::find_by_id(name.to_string())
            .one(&*self.db)
            .await?;
        Ok(row.map(|r| r.value))
    }

    /// Increments `name` and returns the new value; the first call returns 1.
    ///
    /// Runs as one `INSERT .. ON CONFLICT DO UPDATE .. RETURNING` statement on
    /// `conn`, so concurrent callers never observe the same value and a caller
    /// inside a transaction gives the value back on rollback.
    #[instrument(skip(conn))]
    pub async fn next_value<C>(conn: &C, name: &str) -> Result<i64, ServiceError>
    where
        C: ConnectionTrait,
    {
        let stmt = Query::insert()
            .into_table(SequenceCounterEntity)
            .columns([Column::Name, Column::Value])
            .values([name.into(), 1i64.into()])
            .map_err(|e| ServiceError::InternalError(format!("sequence insert: {}", e)))?
            .on_conflict(
                OnConflict::column(Column::Name)
                    .value(
                        Column::Value,
                        Expr::col((SequenceCounterEntity, Column::Value)).add(1),
                    )
                    .to_owned(),
            )
            .returning_col(Column::Value)
            .to_owned();

        let backend = conn.get_database_backend();
        let row = conn
            .query_one(backend.build(&stmt))
            .await
            .map_err(|e| {
                error!("Failed to advance sequence {}: {}", name, e);
                ServiceError::from(e)
            })?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("sequence {} returned no row", name))
            })?;

        let value: i64 = row.try_get("", "value")?;
        debug!(sequence = name, value, "sequence advanced");
        Ok(value)
    }
}

//! Cursor repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use blipscan_core::error::{StorageError, StorageResult};
use blipscan_core::models::IndexerCursor;
use blipscan_core::ports::CursorRepository;

use super::database::Database;
use super::helpers::{to_i64, to_u64};

/// PostgreSQL implementation of CursorRepository.
pub struct PgCursorRepository {
    pool: PgPool,
}

impl PgCursorRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl CursorRepository for PgCursorRepository {
    async fn get_cursor(&self, program_id: &str) -> StorageResult<Option<IndexerCursor>> {
        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT program_id, last_signature, last_slot, last_indexed_at
            FROM indexer_cursor
            WHERE program_id = $1
            "#,
        )
        .bind(program_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(CursorRow::into_cursor).transpose()
    }

    async fn set_cursor(&self, cursor: &IndexerCursor) -> StorageResult<()> {
        // The guard on the update keeps last_slot from moving backward.
        sqlx::query(
            r#"
            INSERT INTO indexer_cursor (program_id, last_signature, last_slot, last_indexed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (program_id) DO UPDATE SET
                last_signature = EXCLUDED.last_signature,
                last_slot = EXCLUDED.last_slot,
                last_indexed_at = EXCLUDED.last_indexed_at
            WHERE indexer_cursor.last_slot <= EXCLUDED.last_slot
            "#,
        )
        .bind(&cursor.program_id)
        .bind(&cursor.last_signature)
        .bind(to_i64(cursor.last_slot, "cursor.last_slot")?)
        .bind(cursor.last_indexed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    program_id: String,
    last_signature: String,
    last_slot: i64,
    last_indexed_at: chrono::DateTime<chrono::Utc>,
}

impl CursorRow {
    fn into_cursor(self) -> StorageResult<IndexerCursor> {
        Ok(IndexerCursor {
            program_id: self.program_id,
            last_signature: self.last_signature,
            last_slot: to_u64(self.last_slot, "cursor.last_slot")?,
            last_indexed_at: self.last_indexed_at,
        })
    }
}

//! Transition event repository implementation for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use blipscan_core::error::{StorageError, StorageResult};
use blipscan_core::models::{Address, TransitionEvent};
use blipscan_core::ports::EventRepository;

use super::helpers::{parse_address, parse_event_kind, parse_optional_address, to_i64, to_u64};

/// PostgreSQL implementation of EventRepository.
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn list_events_for_deal(&self, escrow: &Address) -> StorageResult<Vec<TransitionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT deal_id, escrow_address, event_kind, signature, slot, block_time, signer
            FROM deal_events
            WHERE escrow_address = $1
            ORDER BY slot ASC, block_time ASC, id ASC
            "#,
        )
        .bind(escrow.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(EventRow::into_event).collect()
    }
}

/// Append an event inside the caller's transaction.
///
/// Insert-only. Returns `false` when the same (signature, escrow, kind)
/// was already recorded.
pub(super) async fn insert_event(
    conn: &mut PgConnection,
    event: &TransitionEvent,
) -> StorageResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO deal_events (
            deal_id, escrow_address, event_kind, signature, slot, block_time, signer
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (signature, escrow_address, event_kind) DO NOTHING
        "#,
    )
    .bind(&event.deal_id)
    .bind(event.escrow_address.to_string())
    .bind(event.kind.as_str())
    .bind(&event.signature)
    .bind(to_i64(event.slot, "deal_events.slot")?)
    .bind(event.block_time)
    .bind(event.signer.map(|s| s.to_string()))
    .execute(&mut *conn)
    .await
    .map_err(|e| StorageError::QueryError(e.to_string()))?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EventRow {
    deal_id: String,
    escrow_address: String,
    event_kind: String,
    signature: String,
    slot: i64,
    block_time: DateTime<Utc>,
    signer: Option<String>,
}

impl EventRow {
    fn into_event(self) -> StorageResult<TransitionEvent> {
        Ok(TransitionEvent {
            deal_id: self.deal_id,
            escrow_address: parse_address(&self.escrow_address, "deal_events.escrow_address")?,
            kind: parse_event_kind(&self.event_kind)?,
            signature: self.signature,
            slot: to_u64(self.slot, "deal_events.slot")?,
            block_time: self.block_time,
            signer: parse_optional_address(self.signer.as_deref(), "deal_events.signer")?,
        })
    }
}

//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `blipscan-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite store implementing `ProjectionStore`
//! - Individual repos: `PgDealRepository`, `PgEventRepository`, `PgCursorRepository`
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod cursor_repo;
mod database;
mod deal_repo;
mod event_repo;
mod helpers;

pub use cursor_repo::PgCursorRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use deal_repo::PgDealRepository;
pub use event_repo::PgEventRepository;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::trace;

use blipscan_core::error::{StorageError, StorageResult};
use blipscan_core::models::{
    Address, ChainPoint, Deal, DealStatus, EventKind, TransitionEvent, TransitionOutcome,
};
use blipscan_core::ports::{CursorRepository, DealRepository, EventRepository, ProjectionStore};

use event_repo::insert_event;
use helpers::{parse_address, parse_optional_address, parse_status, status_array, to_i64};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `ProjectionStore` trait.
///
/// Every write runs in its own transaction covering the deal row and the
/// event it produces. Status guards are evaluated by the `UPDATE` itself,
/// never by reading the row first.
pub struct PgRepositories {
    db: Arc<Database>,
    deals: PgDealRepository,
    events: PgEventRepository,
    cursor: PgCursorRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        let pool = db.pool().clone();
        Self {
            deals: PgDealRepository::new(pool.clone()),
            events: PgEventRepository::new(pool),
            cursor: PgCursorRepository::new(&db),
            db,
        }
    }

    async fn begin(&self) -> StorageResult<Transaction<'static, Postgres>> {
        self.db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))
    }

    /// Append the event of an applied update, or explain why nothing matched.
    async fn finish_transition(
        &self,
        mut tx: Transaction<'static, Postgres>,
        escrow: &Address,
        kind: EventKind,
        point: &ChainPoint,
        updated: Option<UpdatedDeal>,
    ) -> StorageResult<TransitionOutcome> {
        let Some(updated) = updated else {
            let outcome = match current_status(&mut tx, escrow).await? {
                Some(current) => TransitionOutcome::Rejected { current },
                None => TransitionOutcome::UnknownDeal,
            };
            trace!(escrow = %escrow.short(), ?outcome, "Transition not applied");
            return Ok(outcome);
        };

        let signer = match kind {
            EventKind::Locked => parse_optional_address(updated.taker.as_deref(), "deals.taker")?,
            _ => Some(parse_address(&updated.maker, "deals.maker")?),
        };
        let event = TransitionEvent {
            deal_id: updated.deal_id,
            escrow_address: *escrow,
            kind,
            signature: point.signature.clone(),
            slot: point.slot,
            block_time: point.block_time,
            signer,
        };
        insert_event(&mut tx, &event).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(TransitionOutcome::Applied)
    }
}

#[async_trait]
impl ProjectionStore for PgRepositories {
    fn deals(&self) -> &dyn DealRepository {
        &self.deals
    }

    fn events(&self) -> &dyn EventRepository {
        &self.events
    }

    fn cursor(&self) -> &dyn CursorRepository {
        &self.cursor
    }

    async fn upsert_create(&self, deal: &Deal, point: &ChainPoint) -> StorageResult<bool> {
        let mut tx = self.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO deals (
                escrow_address, deal_id, signature, maker, taker, arbiter, treasury, mint,
                amount, fee_bps, status, created_slot, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::NUMERIC, $10, $11, $12, $13)
            ON CONFLICT (escrow_address) DO NOTHING
            "#,
        )
        .bind(deal.escrow_address.to_string())
        .bind(&deal.deal_id)
        .bind(&deal.signature)
        .bind(deal.maker.to_string())
        .bind(deal.taker.map(|t| t.to_string()))
        .bind(deal.arbiter.to_string())
        .bind(deal.treasury.to_string())
        .bind(deal.mint.to_string())
        .bind(deal.amount.to_string())
        .bind(i32::from(deal.fee_bps))
        .bind(deal.status.as_str())
        .bind(to_i64(deal.created_slot, "deals.created_slot")?)
        .bind(deal.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?
        .rows_affected();

        if inserted == 0 {
            // Dropping the transaction rolls it back.
            return Ok(false);
        }

        let event = TransitionEvent {
            deal_id: deal.deal_id.clone(),
            escrow_address: deal.escrow_address,
            kind: EventKind::Created,
            signature: point.signature.clone(),
            slot: point.slot,
            block_time: point.block_time,
            signer: Some(deal.maker),
        };
        insert_event(&mut tx, &event).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(true)
    }

    async fn apply_lock(
        &self,
        escrow: &Address,
        taker: Option<&Address>,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome> {
        let mut tx = self.begin().await?;

        let updated = sqlx::query_as::<_, UpdatedDeal>(
            r#"
            UPDATE deals SET
                status = 'locked',
                taker = COALESCE($2, taker),
                locked_slot = $3,
                locked_at = $4,
                updated_at = NOW()
            WHERE escrow_address = $1 AND status = ANY($5)
            RETURNING deal_id, maker, taker
            "#,
        )
        .bind(escrow.to_string())
        .bind(taker.map(|t| t.to_string()))
        .bind(to_i64(point.slot, "deals.locked_slot")?)
        .bind(point.block_time)
        .bind(status_array(allowed_from))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        self.finish_transition(tx, escrow, EventKind::Locked, point, updated)
            .await
    }

    async fn apply_release(
        &self,
        escrow: &Address,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome> {
        let mut tx = self.begin().await?;

        let updated = sqlx::query_as::<_, UpdatedDeal>(
            r#"
            UPDATE deals SET
                status = 'released',
                released_slot = $2,
                released_at = $3,
                updated_at = NOW()
            WHERE escrow_address = $1 AND status = ANY($4)
            RETURNING deal_id, maker, taker
            "#,
        )
        .bind(escrow.to_string())
        .bind(to_i64(point.slot, "deals.released_slot")?)
        .bind(point.block_time)
        .bind(status_array(allowed_from))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        self.finish_transition(tx, escrow, EventKind::Released, point, updated)
            .await
    }

    async fn apply_refund(
        &self,
        escrow: &Address,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome> {
        let mut tx = self.begin().await?;

        let updated = sqlx::query_as::<_, UpdatedDeal>(
            r#"
            UPDATE deals SET
                status = 'refunded',
                updated_at = NOW()
            WHERE escrow_address = $1 AND status = ANY($2)
            RETURNING deal_id, maker, taker
            "#,
        )
        .bind(escrow.to_string())
        .bind(status_array(allowed_from))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        self.finish_transition(tx, escrow, EventKind::Refunded, point, updated)
            .await
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Columns returned by a guarded status update.
#[derive(sqlx::FromRow)]
struct UpdatedDeal {
    deal_id: String,
    maker: String,
    taker: Option<String>,
}

async fn current_status(
    conn: &mut PgConnection,
    escrow: &Address,
) -> StorageResult<Option<DealStatus>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT status FROM deals WHERE escrow_address = $1")
        .bind(escrow.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

    row.map(|(status,)| parse_status(&status)).transpose()
}

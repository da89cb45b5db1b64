//! Deal repository implementation for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use blipscan_core::error::{StorageError, StorageResult};
use blipscan_core::models::{Address, Deal};
use blipscan_core::ports::DealRepository;

use super::helpers::{parse_address, parse_amount, parse_optional_address, parse_status, to_u64};

/// Columns selected for a [`DealRow`]. `amount` is read as text to keep
/// the full `u64` range.
const DEAL_COLUMNS: &str = r#"
    escrow_address, deal_id, signature, maker, taker, arbiter, treasury, mint,
    amount::TEXT AS amount, fee_bps, status,
    created_slot, created_at, locked_slot, locked_at, released_slot, released_at
"#;

/// PostgreSQL implementation of DealRepository.
pub struct PgDealRepository {
    pool: PgPool,
}

impl PgDealRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DealRepository for PgDealRepository {
    async fn get_deal(&self, escrow: &Address) -> StorageResult<Option<Deal>> {
        let sql = format!("SELECT {DEAL_COLUMNS} FROM deals WHERE escrow_address = $1");
        let row = sqlx::query_as::<_, DealRow>(&sql)
            .bind(escrow.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(DealRow::into_deal).transpose()
    }

    async fn list_deals_by_maker(&self, maker: &Address, limit: u32) -> StorageResult<Vec<Deal>> {
        let sql = format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE maker = $1 \
             ORDER BY created_slot DESC, escrow_address LIMIT $2"
        );
        let rows = sqlx::query_as::<_, DealRow>(&sql)
            .bind(maker.to_string())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(DealRow::into_deal).collect()
    }
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct DealRow {
    escrow_address: String,
    deal_id: String,
    signature: String,
    maker: String,
    taker: Option<String>,
    arbiter: String,
    treasury: String,
    mint: String,
    amount: String,
    fee_bps: i32,
    status: String,
    created_slot: i64,
    created_at: DateTime<Utc>,
    locked_slot: Option<i64>,
    locked_at: Option<DateTime<Utc>>,
    released_slot: Option<i64>,
    released_at: Option<DateTime<Utc>>,
}

impl DealRow {
    fn into_deal(self) -> StorageResult<Deal> {
        let fee_bps = u16::try_from(self.fee_bps).map_err(|_| {
            StorageError::SerializationError(format!("deals.fee_bps out of range: {}", self.fee_bps))
        })?;

        Ok(Deal {
            escrow_address: parse_address(&self.escrow_address, "deals.escrow_address")?,
            deal_id: self.deal_id,
            signature: self.signature,
            maker: parse_address(&self.maker, "deals.maker")?,
            taker: parse_optional_address(self.taker.as_deref(), "deals.taker")?,
            arbiter: parse_address(&self.arbiter, "deals.arbiter")?,
            treasury: parse_address(&self.treasury, "deals.treasury")?,
            mint: parse_address(&self.mint, "deals.mint")?,
            amount: parse_amount(&self.amount, "deals.amount")?,
            fee_bps,
            status: parse_status(&self.status)?,
            created_slot: to_u64(self.created_slot, "deals.created_slot")?,
            created_at: self.created_at,
            locked_slot: self
                .locked_slot
                .map(|s| to_u64(s, "deals.locked_slot"))
                .transpose()?,
            locked_at: self.locked_at,
            released_slot: self
                .released_slot
                .map(|s| to_u64(s, "deals.released_slot"))
                .transpose()?,
            released_at: self.released_at,
        })
    }
}

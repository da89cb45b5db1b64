//! Port traits for the projection store.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `blipscan-storage`).

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{
    Address, ChainPoint, Deal, DealStatus, IndexerCursor, TransitionEvent, TransitionOutcome,
};

// =============================================================================
// Repository Traits
// =============================================================================

/// Read access to deals.
#[async_trait]
pub trait DealRepository: Send + Sync {
    /// Get a deal by escrow address.
    async fn get_deal(&self, escrow: &Address) -> StorageResult<Option<Deal>>;

    /// Most recent deals created by `maker`, newest first.
    async fn list_deals_by_maker(&self, maker: &Address, limit: u32) -> StorageResult<Vec<Deal>>;
}

/// Read access to transition events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// All events of a deal in chain order.
    async fn list_events_for_deal(&self, escrow: &Address) -> StorageResult<Vec<TransitionEvent>>;
}

/// Repository for indexer cursor state.
#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Get current cursor for a program.
    async fn get_cursor(&self, program_id: &str) -> StorageResult<Option<IndexerCursor>>;

    /// Upsert the cursor. A cursor with a lower slot than the stored one
    /// is ignored, so `last_slot` never moves backward.
    async fn set_cursor(&self, cursor: &IndexerCursor) -> StorageResult<()>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Combined repository access for the indexer.
///
/// The only component allowed to write deals and events. Every write
/// operation stores the deal change and its transition event in a single
/// transaction, and every conditional check is done by the store itself.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Access the deal repository.
    fn deals(&self) -> &dyn DealRepository;

    /// Access the event repository.
    fn events(&self) -> &dyn EventRepository;

    /// Access the cursor repository.
    fn cursor(&self) -> &dyn CursorRepository;

    /// Insert a new deal and its `created` event.
    ///
    /// Returns `false` (and writes nothing) if a deal already exists for
    /// the escrow address.
    async fn upsert_create(&self, deal: &Deal, point: &ChainPoint) -> StorageResult<bool>;

    /// Move a deal to `locked`, record the taker, and append a `locked` event.
    async fn apply_lock(
        &self,
        escrow: &Address,
        taker: Option<&Address>,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome>;

    /// Move a deal to `released` and append a `released` event.
    async fn apply_release(
        &self,
        escrow: &Address,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome>;

    /// Move a deal to `refunded` and append a `refunded` event.
    async fn apply_refund(
        &self,
        escrow: &Address,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome>;
}

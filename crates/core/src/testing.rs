//! In-memory chain source and projection store for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{ChainError, ChainResult, StorageError, StorageResult};
use crate::escrow::{EscrowRecord, encode_escrow};
use crate::models::{
    Address, ChainPoint, Deal, DealStatus, EventKind, IndexerCursor, InstructionKind,
    TransitionEvent, TransitionOutcome,
};
use crate::ports::{
    ChainAccount, ChainSource, ChainTransaction, CursorRepository, DealRepository,
    EventRepository, ProjectionStore, SignatureInfo, SignatureQuery,
};

pub const PROGRAM: Address = Address([200; 32]);

pub fn addr(n: u8) -> Address {
    Address([n; 32])
}

pub fn record(maker: Address, taker: Option<Address>) -> EscrowRecord {
    EscrowRecord {
        version: 1,
        deal_id: [0x5a; 32],
        maker,
        taker,
        arbiter: addr(30),
        treasury: addr(31),
        mint: addr(32),
        amount: 1_500_000,
        fee_bps: 100,
        status: DealStatus::Funded,
        escrow_bump: 255,
        signer_bump: 254,
    }
}

pub fn escrow_data(maker: Address, taker: Option<Address>) -> Vec<u8> {
    encode_escrow(&record(maker, taker))
}

/// A successful program transaction touching `keys`.
pub fn escrow_tx(
    signature: &str,
    slot: u64,
    kind: InstructionKind,
    keys: Vec<Address>,
) -> ChainTransaction {
    ChainTransaction {
        signature: signature.to_string(),
        slot,
        block_time: Some(1_700_000_000 + slot as i64),
        log_messages: vec![
            format!("Program {PROGRAM} invoke [1]"),
            format!("Program log: {}", kind.log_marker()),
            format!("Program {PROGRAM} success"),
        ],
        account_keys: keys,
        failed: false,
    }
}

// =============================================================================
// Chain
// =============================================================================

#[derive(Default)]
pub struct FakeChain {
    /// Newest first, like the RPC.
    signatures: RwLock<Vec<SignatureInfo>>,
    transactions: RwLock<HashMap<String, ChainTransaction>>,
    accounts: RwLock<HashMap<Address, ChainAccount>>,
    failing_accounts: RwLock<HashSet<Address>>,
    stalled_accounts: RwLock<HashSet<Address>>,
    fail_listing: AtomicBool,
    account_fetches: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Land a transaction; it becomes the newest signature.
    pub async fn push(&self, tx: ChainTransaction) {
        self.signatures.write().await.insert(
            0,
            SignatureInfo {
                signature: tx.signature.clone(),
                slot: tx.slot,
                block_time: tx.block_time,
                failed: tx.failed,
            },
        );
        self.transactions
            .write()
            .await
            .insert(tx.signature.clone(), tx);
    }

    /// Land a signature the node cannot return a transaction for.
    pub async fn push_missing(&self, signature: &str, slot: u64) {
        self.signatures.write().await.insert(
            0,
            SignatureInfo {
                signature: signature.to_string(),
                slot,
                block_time: None,
                failed: false,
            },
        );
    }

    pub async fn put_account(&self, address: Address, owner: Address, data: Vec<u8>) {
        self.accounts
            .write()
            .await
            .insert(address, ChainAccount { owner, data });
    }

    /// Close an account, as the program does once a deal settles.
    pub async fn remove_account(&self, address: &Address) {
        self.accounts.write().await.remove(address);
    }

    pub async fn fail_account(&self, address: Address) {
        self.failing_accounts.write().await.insert(address);
    }

    /// Requests for this account never complete.
    pub async fn stall_account(&self, address: Address) {
        self.stalled_accounts.write().await.insert(address);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn account_fetches(&self) -> usize {
        self.account_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn current_slot(&self) -> ChainResult<u64> {
        Ok(self
            .signatures
            .read()
            .await
            .first()
            .map(|s| s.slot)
            .unwrap_or_default())
    }

    async fn list_signatures(
        &self,
        program: &Address,
        query: &SignatureQuery,
    ) -> ChainResult<Vec<SignatureInfo>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ChainError::RpcError("listing unavailable".into()));
        }
        assert_eq!(*program, PROGRAM);

        let all = self.signatures.read().await;
        let start = match &query.before {
            Some(before) => match all.iter().position(|s| &s.signature == before) {
                Some(i) => i + 1,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };

        Ok(all[start..]
            .iter()
            .take_while(|s| query.until.as_ref() != Some(&s.signature))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, signature: &str) -> ChainResult<Option<ChainTransaction>> {
        Ok(self.transactions.read().await.get(signature).cloned())
    }

    async fn get_account(&self, address: &Address) -> ChainResult<Option<ChainAccount>> {
        self.account_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_accounts.read().await.contains(address) {
            return Err(ChainError::Timeout(std::time::Duration::from_secs(1)));
        }
        if self.stalled_accounts.read().await.contains(address) {
            std::future::pending::<()>().await;
        }
        Ok(self.accounts.read().await.get(address).cloned())
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    deals: HashMap<Address, Deal>,
    events: Vec<TransitionEvent>,
    cursors: HashMap<String, IndexerCursor>,
}

/// Mirrors the conditional semantics of the PostgreSQL store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    cursor_writes: AtomicUsize,
    fail_cursor_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_events(&self) -> Vec<TransitionEvent> {
        self.state.read().await.events.clone()
    }

    pub async fn deal_count(&self) -> usize {
        self.state.read().await.deals.len()
    }

    pub fn cursor_writes(&self) -> usize {
        self.cursor_writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_cursor_writes(&self, fail: bool) {
        self.fail_cursor_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn clear_cursor(&self) {
        self.state.write().await.cursors.clear();
    }

    async fn transition(
        &self,
        escrow: &Address,
        target: DealStatus,
        taker: Option<&Address>,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome> {
        let mut state = self.state.write().await;
        let Some(deal) = state.deals.get_mut(escrow) else {
            return Ok(TransitionOutcome::UnknownDeal);
        };
        if !allowed_from.contains(&deal.status) {
            return Ok(TransitionOutcome::Rejected {
                current: deal.status,
            });
        }

        deal.status = target;
        let kind = match target {
            DealStatus::Locked => {
                if let Some(taker) = taker {
                    deal.taker = Some(*taker);
                }
                deal.locked_slot = Some(point.slot);
                deal.locked_at = Some(point.block_time);
                EventKind::Locked
            }
            DealStatus::Released => {
                deal.released_slot = Some(point.slot);
                deal.released_at = Some(point.block_time);
                EventKind::Released
            }
            DealStatus::Refunded => EventKind::Refunded,
            DealStatus::Funded => {
                return Err(StorageError::QueryError("cannot transition to funded".into()));
            }
        };
        let signer = match kind {
            EventKind::Locked => deal.taker,
            _ => Some(deal.maker),
        };
        let event = TransitionEvent {
            deal_id: deal.deal_id.clone(),
            escrow_address: *escrow,
            kind,
            signature: point.signature.clone(),
            slot: point.slot,
            block_time: point.block_time,
            signer,
        };
        append(&mut state.events, event);
        Ok(TransitionOutcome::Applied)
    }
}

fn append(events: &mut Vec<TransitionEvent>, event: TransitionEvent) {
    let duplicate = events.iter().any(|e| {
        e.signature == event.signature
            && e.escrow_address == event.escrow_address
            && e.kind == event.kind
    });
    if !duplicate {
        events.push(event);
    }
}

#[async_trait]
impl DealRepository for MemoryStore {
    async fn get_deal(&self, escrow: &Address) -> StorageResult<Option<Deal>> {
        Ok(self.state.read().await.deals.get(escrow).cloned())
    }

    async fn list_deals_by_maker(&self, maker: &Address, limit: u32) -> StorageResult<Vec<Deal>> {
        let state = self.state.read().await;
        let mut deals: Vec<Deal> = state
            .deals
            .values()
            .filter(|d| d.maker == *maker)
            .cloned()
            .collect();
        deals.sort_by(|a, b| b.created_slot.cmp(&a.created_slot));
        deals.truncate(limit as usize);
        Ok(deals)
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn list_events_for_deal(&self, escrow: &Address) -> StorageResult<Vec<TransitionEvent>> {
        let mut events: Vec<TransitionEvent> = self
            .state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.escrow_address == *escrow)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.slot, e.block_time));
        Ok(events)
    }
}

#[async_trait]
impl CursorRepository for MemoryStore {
    async fn get_cursor(&self, program_id: &str) -> StorageResult<Option<IndexerCursor>> {
        Ok(self.state.read().await.cursors.get(program_id).cloned())
    }

    async fn set_cursor(&self, cursor: &IndexerCursor) -> StorageResult<()> {
        if self.fail_cursor_writes.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionError("store unavailable".into()));
        }
        self.cursor_writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        let keep_existing = state
            .cursors
            .get(&cursor.program_id)
            .is_some_and(|existing| existing.last_slot > cursor.last_slot);
        if !keep_existing {
            state
                .cursors
                .insert(cursor.program_id.clone(), cursor.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectionStore for MemoryStore {
    fn deals(&self) -> &dyn DealRepository {
        self
    }

    fn events(&self) -> &dyn EventRepository {
        self
    }

    fn cursor(&self) -> &dyn CursorRepository {
        self
    }

    async fn upsert_create(&self, deal: &Deal, point: &ChainPoint) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        if state.deals.contains_key(&deal.escrow_address) {
            return Ok(false);
        }
        state.deals.insert(deal.escrow_address, deal.clone());
        append(
            &mut state.events,
            TransitionEvent {
                deal_id: deal.deal_id.clone(),
                escrow_address: deal.escrow_address,
                kind: EventKind::Created,
                signature: point.signature.clone(),
                slot: point.slot,
                block_time: point.block_time,
                signer: Some(deal.maker),
            },
        );
        Ok(true)
    }

    async fn apply_lock(
        &self,
        escrow: &Address,
        taker: Option<&Address>,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome> {
        self.transition(escrow, DealStatus::Locked, taker, point, allowed_from)
            .await
    }

    async fn apply_release(
        &self,
        escrow: &Address,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome> {
        self.transition(escrow, DealStatus::Released, None, point, allowed_from)
            .await
    }

    async fn apply_refund(
        &self,
        escrow: &Address,
        point: &ChainPoint,
        allowed_from: &[DealStatus],
    ) -> StorageResult<TransitionOutcome> {
        self.transition(escrow, DealStatus::Refunded, None, point, allowed_from)
            .await
    }
}

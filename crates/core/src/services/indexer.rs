//! Core indexer service - polls the program's transactions and projects them.
//!
//! Each tick lists the signatures newer than the persisted cursor, turns
//! every transaction into a projection step and writes the steps in chain
//! order, one chunk at a time. The cursor moves after each chunk, never
//! past a signature that has not been projected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{ChainError, DecodeError, IndexerError, IndexerResult, StorageResult};
use crate::escrow::{EscrowRecord, classify, decode_escrow};
use crate::metrics::{
    ProcessingTimer, record_cursor_slot, record_decode_error, record_poll_cycle,
    record_transaction_processed, record_transaction_skipped,
};
use crate::models::{
    Address, ChainPoint, DealStatus, ESCROW_DISCRIMINATOR, IndexerCursor, InstructionKind,
    TransitionGuard, TransitionOutcome,
};
use crate::ports::{ChainSource, ProjectionStore, SignatureInfo, SignatureQuery};
use super::resolver::{AccountResolver, ResolvedAccount, ResolverConfig, candidate_keys};

/// Largest page the RPC accepts for signature listing.
pub const MAX_PAGE_SIZE: usize = 1000;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the indexer service.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Program whose transactions are indexed.
    pub program_id: Address,
    /// Time between two poll cycles.
    pub poll_interval: Duration,
    /// Signatures requested per listing call, and per projected chunk.
    pub page_size: usize,
    /// Listing calls on the first run, when no cursor exists yet. A walk
    /// from an existing cursor always reaches it.
    pub max_pages: usize,
    /// Transactions fetched and resolved concurrently.
    pub fetch_concurrency: usize,
    /// Account probes in flight per transaction.
    pub probe_concurrency: usize,
    /// Account keys probed per transaction.
    pub max_account_probes: usize,
    /// Timeout of every chain call.
    pub rpc_timeout: Duration,
    /// Policy for transitions on existing deals.
    pub transition_guard: TransitionGuard,
    /// Consecutive failed cycles before `run` gives up. 0 retries forever.
    pub max_consecutive_failures: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            program_id: Address::ZERO,
            poll_interval: Duration::from_millis(5000),
            page_size: 50,
            max_pages: 20,
            fetch_concurrency: 4,
            probe_concurrency: 4,
            max_account_probes: 32,
            rpc_timeout: Duration::from_secs(30),
            transition_guard: TransitionGuard::Strict,
            max_consecutive_failures: 20,
        }
    }
}

impl IndexerConfig {
    /// Reject settings the poll loop cannot run with.
    pub fn validate(&self) -> IndexerResult<()> {
        let invalid = |msg: String| Err(IndexerError::ConfigError(msg));

        if self.program_id.is_zero() {
            return invalid("program id must be set".into());
        }
        if self.poll_interval.is_zero() {
            return invalid("poll interval must be greater than zero".into());
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return invalid(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            ));
        }
        if self.max_pages == 0 {
            return invalid("max pages must be at least 1".into());
        }
        if self.fetch_concurrency == 0 || self.probe_concurrency == 0 {
            return invalid("concurrency limits must be at least 1".into());
        }
        if self.max_account_probes == 0 {
            return invalid("max account probes must be at least 1".into());
        }
        Ok(())
    }

    /// Settings handed to the account resolver.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            program_id: self.program_id,
            max_probes: self.max_account_probes,
            probe_concurrency: self.probe_concurrency,
            probe_timeout: self.rpc_timeout,
        }
    }
}

// =============================================================================
// Batch bookkeeping
// =============================================================================

/// Counts of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Signatures listed in this cycle.
    pub signatures: usize,
    /// Transactions that changed the projection.
    pub processed: usize,
    /// Transactions deliberately ignored.
    pub skipped: usize,
    /// Transactions that could not be fetched.
    pub failed: usize,
    /// Slot the cursor was advanced to, if it moved.
    pub cursor_slot: Option<u64>,
}

/// Why a transaction left no trace in the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    FailedTx,
    MissingTx,
    Fetch,
    Unclassified,
    NoAccount,
    Decode,
    Duplicate,
    UnknownDeal,
    Rejected,
}

impl SkipReason {
    fn as_str(&self) -> &'static str {
        match self {
            SkipReason::FailedTx => "failed_tx",
            SkipReason::MissingTx => "missing_tx",
            SkipReason::Fetch => "fetch",
            SkipReason::Unclassified => "unclassified",
            SkipReason::NoAccount => "no_account",
            SkipReason::Decode => "decode",
            SkipReason::Duplicate => "duplicate",
            SkipReason::UnknownDeal => "unknown_deal",
            SkipReason::Rejected => "rejected",
        }
    }
}

/// Which deal a lock or settle transaction refers to.
#[derive(Debug, Clone)]
enum EscrowRef {
    /// Found live on chain.
    Resolved(Address),
    /// The account is gone; any key may name a stored deal.
    Candidates(Vec<Address>),
}

/// A store write derived from one transaction.
#[derive(Debug, Clone)]
enum Step {
    Create {
        escrow: Address,
        record: EscrowRecord,
        point: ChainPoint,
    },
    Lock {
        escrow: EscrowRef,
        taker: Option<Address>,
        point: ChainPoint,
    },
    Settle {
        kind: InstructionKind,
        escrow: EscrowRef,
        point: ChainPoint,
    },
}

// =============================================================================
// IndexerService
// =============================================================================

/// Main indexer service.
///
/// # Flow
///
/// 1. Read the cursor and list newer signatures (paged, newest-first)
/// 2. Reverse to oldest-first and split into chunks of `page_size`
/// 3. Fetch, classify, resolve and decode a chunk concurrently
/// 4. Apply the resulting writes one by one in chain order
/// 5. Persist the cursor at the newest signature of the chunk
///
/// A crash before step 5 replays the chunk on restart; every store write
/// is idempotent so the replay converges.
pub struct IndexerService<S: ChainSource, R: ProjectionStore> {
    config: IndexerConfig,
    chain: Arc<S>,
    store: Arc<R>,
    resolver: AccountResolver<S>,
}

impl<S: ChainSource, R: ProjectionStore> IndexerService<S, R> {
    pub fn new(config: IndexerConfig, chain: Arc<S>, store: Arc<R>) -> Self {
        let resolver = AccountResolver::new(config.resolver_config(), chain.clone());
        Self {
            config,
            chain,
            store,
            resolver,
        }
    }

    /// Start the indexer.
    ///
    /// Polls until shutdown is signalled (or the sender is dropped), or
    /// until `max_consecutive_failures` cycles in a row have failed. A
    /// batch in progress always runs to completion before shutdown is
    /// observed.
    #[instrument(skip_all, fields(program = %self.config.program_id.short()))]
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        info!("⛓️  Starting indexer");
        self.config.validate()?;
        self.verify_sources().await?;

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown requested");
                        return Err(IndexerError::ShutdownRequested);
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match self.poll_once().await {
                Ok(report) => {
                    failures = 0;
                    if report.signatures > 0 {
                        info!(
                            signatures = report.signatures,
                            processed = report.processed,
                            skipped = report.skipped,
                            failed = report.failed,
                            slot = report.cursor_slot,
                            "📦 Batch indexed"
                        );
                    }
                }
                Err(e) => {
                    failures += 1;
                    record_poll_cycle("failed");
                    let limit = self.config.max_consecutive_failures;
                    if limit > 0 && failures >= limit {
                        error!(failures, error = %e, "❌ Too many failed poll cycles, giving up");
                        return Err(IndexerError::RetriesExhausted {
                            failures,
                            last_error: e.to_string(),
                        });
                    }
                    warn!(failures, error = %e, "⚠️  Poll cycle failed, retrying next tick");
                }
            }
        }
    }

    /// Check that both the store and the chain answer before polling.
    async fn verify_sources(&self) -> IndexerResult<()> {
        let program = self.config.program_id.to_string();
        let cursor = self
            .store
            .cursor()
            .get_cursor(&program)
            .await
            .map_err(|e| IndexerError::ConfigError(format!("store unreachable: {e}")))?;

        let slot = self
            .with_timeout(self.chain.current_slot())
            .await
            .map_err(|e| IndexerError::ConfigError(format!("chain source unreachable: {e}")))?;

        match cursor {
            Some(cursor) => info!(
                slot = cursor.last_slot,
                chain_slot = slot,
                "📍 Resuming from cursor"
            ),
            None => info!(chain_slot = slot, "📍 No cursor, starting from the newest transactions"),
        }
        Ok(())
    }

    /// Run one poll cycle.
    ///
    /// Errors mean the listing or the store failed and the rest of the
    /// cycle was abandoned; chunks already projected keep their cursor.
    /// Per-transaction problems are counted in the report instead.
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> IndexerResult<BatchReport> {
        let program = self.config.program_id.to_string();
        let cursor = self.store.cursor().get_cursor(&program).await?;

        let mut refs = self.fetch_new_signatures(cursor.as_ref()).await?;
        if refs.is_empty() {
            trace!("No new signatures");
            record_poll_cycle("empty");
            return Ok(BatchReport::default());
        }

        let _timer = ProcessingTimer::new();
        refs.reverse();
        refs.sort_by_key(|r| r.slot);

        let mut report = BatchReport {
            signatures: refs.len(),
            ..Default::default()
        };

        for chunk in refs.chunks(self.config.page_size.max(1)) {
            self.project_chunk(chunk, &mut report).await?;

            // Every write of the chunk is done; only now may the cursor move.
            if let Some(newest) = chunk.last() {
                let next = IndexerCursor {
                    program_id: program.clone(),
                    last_signature: newest.signature.clone(),
                    last_slot: newest.slot,
                    last_indexed_at: Utc::now(),
                };
                self.store.cursor().set_cursor(&next).await?;
                record_cursor_slot(newest.slot);
                report.cursor_slot = Some(newest.slot);
            }
        }

        record_poll_cycle("processed");
        Ok(report)
    }

    /// Prepare a chunk concurrently, then project it serially.
    async fn project_chunk(
        &self,
        chunk: &[SignatureInfo],
        report: &mut BatchReport,
    ) -> IndexerResult<()> {
        let prepared: Vec<Result<Step, SkipReason>> = stream::iter(chunk.to_vec())
            .map(|info| self.prepare(info))
            .buffered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        for (info, step) in chunk.iter().zip(prepared) {
            let outcome = match step {
                Ok(step) => self.project(step).await?,
                Err(reason) => Err(reason),
            };
            match outcome {
                Ok(kind) => {
                    report.processed += 1;
                    record_transaction_processed(kind.as_str());
                    debug!(signature = %info.signature, kind = %kind, "Transaction projected");
                }
                Err(reason) => {
                    if reason == SkipReason::Fetch {
                        report.failed += 1;
                    } else {
                        report.skipped += 1;
                    }
                    record_transaction_skipped(reason.as_str());
                    trace!(signature = %info.signature, reason = reason.as_str(), "Transaction skipped");
                }
            }
        }
        Ok(())
    }

    /// List every signature newer than the cursor, newest-first.
    ///
    /// Pages backward from the chain head until a short page, which means
    /// the cursor (or the start of history) was reached. Without a cursor
    /// the walk also stops after `max_pages` pages.
    async fn fetch_new_signatures(
        &self,
        cursor: Option<&IndexerCursor>,
    ) -> IndexerResult<Vec<SignatureInfo>> {
        let until = cursor.map(|c| c.last_signature.clone());
        let mut query = SignatureQuery {
            limit: self.config.page_size,
            before: None,
            until,
        };
        let mut signatures = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = self
                .with_timeout(
                    self.chain
                        .list_signatures(&self.config.program_id, &query),
                )
                .await?;
            pages += 1;

            let full = page.len() >= self.config.page_size;
            query.before = page.last().map(|s| s.signature.clone());
            signatures.extend(page);
            if !full {
                return Ok(signatures);
            }

            if cursor.is_none() && pages >= self.config.max_pages {
                debug!(
                    signatures = signatures.len(),
                    "First run stopped at the page budget"
                );
                return Ok(signatures);
            }
            if pages % self.config.max_pages.max(1) == 0 {
                info!(
                    pages,
                    signatures = signatures.len(),
                    "📚 Catching up on a backlog"
                );
            }
        }
    }

    /// Everything that can run concurrently: fetch, classify, resolve, decode.
    async fn prepare(&self, info: SignatureInfo) -> Result<Step, SkipReason> {
        if info.failed {
            return Err(SkipReason::FailedTx);
        }

        let tx = match self
            .with_timeout(self.chain.get_transaction(&info.signature))
            .await
        {
            Ok(Some(tx)) => tx,
            Ok(None) => return Err(SkipReason::MissingTx),
            Err(e) => {
                warn!(signature = %info.signature, error = %e, "⚠️  Failed to fetch transaction");
                return Err(SkipReason::Fetch);
            }
        };
        if tx.failed {
            return Err(SkipReason::FailedTx);
        }

        let kind = classify(&tx.log_messages).ok_or(SkipReason::Unclassified)?;
        let point = ChainPoint {
            signature: tx.signature.clone(),
            slot: tx.slot,
            block_time: block_time(tx.block_time.or(info.block_time)),
        };
        let resolved = self
            .resolver
            .resolve(&tx.account_keys, ESCROW_DISCRIMINATOR)
            .await;

        match kind {
            InstructionKind::CreateEscrow => {
                let account = self.require_account(resolved, &point, kind)?;
                let record = decode(&account, &point)?;
                Ok(Step::Create {
                    escrow: account.address,
                    record,
                    point,
                })
            }
            InstructionKind::LockForTaker => {
                let (escrow, taker) = match resolved {
                    Some(account) => {
                        let record = decode(&account, &point)?;
                        (EscrowRef::Resolved(account.address), record.taker)
                    }
                    // The stored taker is kept when the account is gone.
                    None => (self.closed_account(&tx.account_keys, &point, kind), None),
                };
                Ok(Step::Lock {
                    escrow,
                    taker,
                    point,
                })
            }
            InstructionKind::ReleaseToTaker | InstructionKind::RefundToMaker => {
                let escrow = match resolved {
                    Some(account) => EscrowRef::Resolved(account.address),
                    None => self.closed_account(&tx.account_keys, &point, kind),
                };
                Ok(Step::Settle {
                    kind,
                    escrow,
                    point,
                })
            }
        }
    }

    /// The escrow account was closed later in the same window; match the
    /// transaction's keys against stored deals at write time instead.
    fn closed_account(
        &self,
        account_keys: &[Address],
        point: &ChainPoint,
        kind: InstructionKind,
    ) -> EscrowRef {
        trace!(signature = %point.signature, kind = %kind, "No live escrow account");
        EscrowRef::Candidates(candidate_keys(account_keys, self.config.max_account_probes))
    }

    fn require_account(
        &self,
        resolved: Option<ResolvedAccount>,
        point: &ChainPoint,
        kind: InstructionKind,
    ) -> Result<ResolvedAccount, SkipReason> {
        resolved.ok_or_else(|| {
            debug!(signature = %point.signature, kind = %kind, "No escrow account found");
            SkipReason::NoAccount
        })
    }

    /// Apply one step. The outer error aborts the batch; the inner one is
    /// a skip.
    async fn project(&self, step: Step) -> StorageResult<Result<InstructionKind, SkipReason>> {
        let guard = self.config.transition_guard;

        let (kind, outcome) = match step {
            Step::Create {
                escrow,
                record,
                point,
            } => {
                let deal = record.to_new_deal(escrow, &point);
                if !self.store.upsert_create(&deal, &point).await? {
                    debug!(escrow = %escrow.short(), "Deal already indexed");
                    return Ok(Err(SkipReason::Duplicate));
                }
                info!(escrow = %escrow.short(), amount = deal.amount, "🆕 Deal created");
                return Ok(Ok(InstructionKind::CreateEscrow));
            }
            Step::Lock {
                escrow,
                taker,
                point,
            } => {
                let Some(escrow) = self.locate(escrow).await? else {
                    debug!(signature = %point.signature, "Locked account is not a known deal");
                    return Ok(Err(SkipReason::NoAccount));
                };
                let outcome = self
                    .store
                    .apply_lock(
                        &escrow,
                        taker.as_ref(),
                        &point,
                        guard.allowed_from(DealStatus::Locked),
                    )
                    .await?;
                (InstructionKind::LockForTaker, outcome)
            }
            Step::Settle {
                kind,
                escrow,
                point,
            } => {
                let Some(escrow) = self.locate(escrow).await? else {
                    debug!(signature = %point.signature, "Settled account is not a known deal");
                    return Ok(Err(SkipReason::NoAccount));
                };
                let outcome = if kind == InstructionKind::ReleaseToTaker {
                    self.store
                        .apply_release(&escrow, &point, guard.allowed_from(DealStatus::Released))
                        .await?
                } else {
                    self.store
                        .apply_refund(&escrow, &point, guard.allowed_from(DealStatus::Refunded))
                        .await?
                };
                (kind, outcome)
            }
        };

        Ok(match outcome {
            TransitionOutcome::Applied => {
                info!(kind = %kind, "🔁 Deal transitioned");
                Ok(kind)
            }
            TransitionOutcome::UnknownDeal => {
                debug!(kind = %kind, "Transition for unknown deal ignored");
                Err(SkipReason::UnknownDeal)
            }
            TransitionOutcome::Rejected { current } => {
                debug!(kind = %kind, current = %current, "Transition rejected by guard");
                Err(SkipReason::Rejected)
            }
        })
    }

    /// Pick the deal a transition refers to. Runs at write time
    /// so deals created earlier in the same batch are visible.
    async fn locate(&self, escrow: EscrowRef) -> StorageResult<Option<Address>> {
        match escrow {
            EscrowRef::Resolved(address) => Ok(Some(address)),
            EscrowRef::Candidates(keys) => {
                for key in keys {
                    if self.store.deals().get_deal(&key).await?.is_some() {
                        return Ok(Some(key));
                    }
                }
                Ok(None)
            }
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, ChainError>>,
    ) -> Result<T, ChainError> {
        timeout(self.config.rpc_timeout, call)
            .await
            .map_err(|_| ChainError::Timeout(self.config.rpc_timeout))?
    }
}

fn decode(account: &ResolvedAccount, point: &ChainPoint) -> Result<EscrowRecord, SkipReason> {
    decode_escrow(&account.account.data).map_err(|e: DecodeError| {
        record_decode_error();
        warn!(
            signature = %point.signature,
            escrow = %account.address.short(),
            error = %e,
            "⚠️  Failed to decode escrow account"
        );
        SkipReason::Decode
    })
}

fn block_time(unix: Option<i64>) -> DateTime<Utc> {
    unix.and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now)
}

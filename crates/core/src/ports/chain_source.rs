//! Port trait for the blockchain data source.
//!
//! This trait defines the interface for listing and fetching transactions
//! and accounts from a Solana cluster. Implementations live in the
//! infrastructure layer (e.g., `blipscan-solana`).

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::models::Address;

/// Reference to a transaction touching the monitored program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    /// Transaction signature (base58).
    pub signature: String,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Unix timestamp of the block, if the node knows it.
    pub block_time: Option<i64>,
    /// The transaction failed on chain.
    pub failed: bool,
}

/// Paging options for [`ChainSource::list_signatures`].
///
/// Results are always newest-first. `before` excludes everything at or
/// newer than the given signature; `until` stops at (and excludes) it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureQuery {
    pub limit: usize,
    pub before: Option<String>,
    pub until: Option<String>,
}

/// A confirmed transaction, reduced to what the indexer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    /// Program log output, in emission order.
    pub log_messages: Vec<String>,
    /// Static account keys followed by lookup-table loaded addresses.
    pub account_keys: Vec<Address>,
    /// The transaction failed on chain.
    pub failed: bool,
}

/// Current state of an on-chain account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAccount {
    /// Program that owns the account.
    pub owner: Address,
    /// Raw account data.
    pub data: Vec<u8>,
}

/// Port trait for the chain data source.
///
/// Every call may fail transiently; callers treat an error as
/// "no data this cycle".
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current slot of the cluster, used as a reachability check.
    async fn current_slot(&self) -> ChainResult<u64>;

    /// List signatures of transactions that reference `program`,
    /// newest-first.
    async fn list_signatures(
        &self,
        program: &Address,
        query: &SignatureQuery,
    ) -> ChainResult<Vec<SignatureInfo>>;

    /// Fetch a confirmed transaction. `None` when the node does not have it.
    async fn get_transaction(&self, signature: &str) -> ChainResult<Option<ChainTransaction>>;

    /// Fetch an account. `None` when the account does not exist.
    async fn get_account(&self, address: &Address) -> ChainResult<Option<ChainAccount>>;
}

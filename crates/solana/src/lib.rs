//! Solana RPC adapter for the Blipscan escrow indexer.
//!
//! This crate implements the [`ChainSource`] port from `blipscan-core`
//! over the Solana HTTP JSON-RPC API.
//!
//! # Features
//!
//! - Paged signature listing with `before`/`until` cursors
//! - Base64 transaction fetch supporting versioned transactions and
//!   address lookup tables
//! - Account fetch at the configured commitment
//!
//! # Usage
//!
//! ```ignore
//! use blipscan_solana::{SolanaClientConfig, SolanaRpcClient};
//!
//! let client = SolanaRpcClient::connect(SolanaClientConfig {
//!     rpc_url: "https://api.devnet.solana.com".to_string(),
//!     ..Default::default()
//! })?;
//! let slot = client.current_slot().await?;
//! ```
//!
//! [`ChainSource`]: blipscan_core::ports::ChainSource

mod client;

pub use client::{SolanaClientConfig, SolanaRpcClient};
pub use solana_sdk::commitment_config::CommitmentLevel;

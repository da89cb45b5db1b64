//! Core domain layer for the Blipscan escrow indexer.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! business logic services that turn the escrow program's transactions into
//! deal and event rows. It follows hexagonal architecture principles - this
//! is the innermost layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     blipscan (binary)                       │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │      blipscan-storage        │       blipscan-solana        │
//! │        (PostgreSQL)          │           (RPC)              │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                    blipscan-core  ← YOU ARE HERE            │
//! │           (models, escrow, ports, services)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Deal, TransitionEvent, IndexerCursor, etc.)
//! - [`escrow`] - Log classification and escrow account decoding
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Core business logic (IndexerService, AccountResolver)
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! - [`ports::ChainSource`] - List signatures, fetch transactions and accounts
//! - [`ports::ProjectionStore`] - The only writer of deals, events and the cursor
//!
//! ## Indexer Lifecycle
//!
//! 1. List signatures newer than the cursor
//! 2. Classify each transaction from its program logs
//! 3. Resolve and decode the escrow account it touched
//! 4. Apply the deal transition and its event atomically
//! 5. Advance the cursor once the whole batch is written

pub mod error;
pub mod escrow;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;

#[cfg(test)]
mod testing;

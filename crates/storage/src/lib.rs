//! Storage layer for the Blipscan escrow indexer.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `blipscan-core`. It owns connection pooling, migrations, and
//! every write to the deal and event tables.
//!
//! # Architecture
//!
//! The storage layer follows the repository pattern:
//!
//! - [`postgres::Database`] - Connection pool management
//! - [`postgres::PgRepositories`] - Transactional projection store
//! - Individual repositories for deals, events, and the cursor
//!
//! # Usage
//!
//! ```ignore
//! use blipscan_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! // Connect to the database
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//!
//! // Run migrations
//! db.migrate().await?;
//!
//! // Create repositories
//! let repositories = Arc::new(PgRepositories::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepositories, PurgeStats};

//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DecodeError`] - Malformed or unrecognized escrow account records
//! - [`DomainError`] - Business logic errors
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Solana RPC errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Decode Errors
// =============================================================================

/// The binary account record does not match the expected escrow layout.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The leading 8 bytes are not the escrow discriminator.
    #[error("Wrong discriminator: {0}")]
    WrongDiscriminator(String),

    /// The buffer ends before all declared fields.
    #[error("Truncated record: need at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum record length.
        expected: usize,
        /// Length of the buffer received.
        actual: usize,
    },

    /// The status byte does not map to a known variant.
    #[error("Invalid status index: {0}")]
    InvalidStatus(u8),

    /// Any other layout violation.
    #[error("Malformed record: {0}")]
    Malformed(String),
}

// =============================================================================
// Domain Errors
// =============================================================================

/// Business logic and domain rule violations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Escrow account could not be decoded.
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Address failed validation.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
///
/// These errors originate from storage operations like queries,
/// transactions, and data serialization.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Solana RPC and connectivity errors.
///
/// All of these are transient from the indexer's point of view: the
/// affected item is skipped and picked up again on a later tick.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Client could not be built or the endpoint is unreachable.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Request did not complete in time.
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The node returned an address or signature we cannot parse.
    #[error("Invalid chain data: {0}")]
    InvalidData(String),
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the main error type returned by [`crate::services::IndexerService`].
/// It wraps all lower-level errors and adds indexer-specific variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Blockchain connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Invalid configuration, or a collaborator unreachable at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Too many consecutive poll cycles failed.
    #[error("Giving up after {failures} consecutive failed poll cycles: {last_error}")]
    RetriesExhausted {
        /// Number of consecutive failures observed.
        failures: u32,
        /// Message of the most recent failure.
        last_error: String,
    },

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_conversion_chain() {
        // Storage -> Domain -> Indexer
        let storage_err = StorageError::QueryError("db failed".into());
        let domain_err: DomainError = storage_err.into();
        let indexer_err: IndexerError = domain_err.into();
        assert!(indexer_err.to_string().contains("db failed"));

        // Decode -> Domain
        let domain_err: DomainError = DecodeError::InvalidStatus(7).into();
        assert!(domain_err.to_string().contains('7'));

        // Chain -> Indexer
        let chain_err = ChainError::RpcError("rpc failed".into());
        let indexer_err: IndexerError = chain_err.into();
        assert!(indexer_err.to_string().contains("rpc failed"));
    }

    #[test]
    fn invalid_address_reaches_the_indexer_error() {
        let err = "not-a-key".parse::<crate::models::Address>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidAddress(_)));

        let indexer_err: IndexerError = err.into();
        assert!(indexer_err.to_string().contains("not-a-key"));
    }

    #[test]
    fn retries_exhausted_carries_last_error() {
        let err = IndexerError::RetriesExhausted {
            failures: 5,
            last_error: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains('5') && msg.contains("connection refused"));
    }
}

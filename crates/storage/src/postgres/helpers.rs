//! Shared helper functions for PostgreSQL row conversion.

use blipscan_core::error::{StorageError, StorageResult};
use blipscan_core::models::{Address, DealStatus, EventKind};

/// Parse a base58 address read back from a text column.
pub fn parse_address(value: &str, field_name: &str) -> StorageResult<Address> {
    value.parse().map_err(|e| {
        StorageError::SerializationError(format!("{field_name} is not a valid address: {e}"))
    })
}

/// Parse an optional base58 address.
pub fn parse_optional_address(
    value: Option<&str>,
    field_name: &str,
) -> StorageResult<Option<Address>> {
    value.map(|v| parse_address(v, field_name)).transpose()
}

/// Convert a chain counter to a `BIGINT` bind value.
pub fn to_i64(value: u64, field_name: &str) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{field_name} {value} does not fit in BIGINT"))
    })
}

/// Convert a `BIGINT` column back to an unsigned counter.
pub fn to_u64(value: i64, field_name: &str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{field_name} is negative: {value}"))
    })
}

/// Parse an amount stored as `NUMERIC` and selected as text.
pub fn parse_amount(value: &str, field_name: &str) -> StorageResult<u64> {
    value.parse().map_err(|_| {
        StorageError::SerializationError(format!(
            "{field_name} is not an unsigned 64-bit amount: {value}"
        ))
    })
}

pub fn parse_status(value: &str) -> StorageResult<DealStatus> {
    value
        .parse()
        .map_err(|e| StorageError::SerializationError(format!("deals.status: {e}")))
}

pub fn parse_event_kind(value: &str) -> StorageResult<EventKind> {
    value
        .parse()
        .map_err(|e| StorageError::SerializationError(format!("deal_events.event_kind: {e}")))
}

/// Allowed statuses as a `TEXT[]` bind value.
pub fn status_array(statuses: &[DealStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: u64::MAX passe par NUMERIC sans perte
    #[test]
    fn test_amount_keeps_full_u64_range() {
        let stored = u64::MAX.to_string();
        assert_eq!(parse_amount(&stored, "deals.amount").unwrap(), u64::MAX);
        assert!(parse_amount("-1", "deals.amount").is_err());
        assert!(parse_amount("1.5", "deals.amount").is_err());
    }

    // Test critique: un slot hors BIGINT est refusé, jamais tronqué
    #[test]
    fn test_slot_conversion_is_checked() {
        assert_eq!(to_i64(42, "slot").unwrap(), 42);
        let err = to_i64(u64::MAX, "slot").unwrap_err().to_string();
        assert!(err.contains("slot"));
        assert!(to_u64(-1, "slot").is_err());
    }

    #[test]
    fn test_address_roundtrip_and_field_name() {
        let address = Address([7; 32]);
        assert_eq!(
            parse_address(&address.to_string(), "deals.maker").unwrap(),
            address
        );
        assert_eq!(parse_optional_address(None, "deals.taker").unwrap(), None);

        let err = parse_address("not-base58!", "deals.maker")
            .unwrap_err()
            .to_string();
        assert!(err.contains("deals.maker"));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(parse_status("locked").unwrap(), DealStatus::Locked);
        assert!(parse_status("cancelled").is_err());
        assert_eq!(
            status_array(&[DealStatus::Funded, DealStatus::Locked]),
            vec!["funded".to_string(), "locked".to_string()]
        );
    }
}

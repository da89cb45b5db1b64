//! Domain models representing indexed escrow data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DecodeError, DomainError};

// =============================================================================
// Addresses & Discriminators
// =============================================================================

/// 32-byte Solana public key. Serialized as its base58 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// The all-zero key, used on-chain to mean "unset".
    pub const ZERO: Address = Address([0u8; 32]);

    /// Whether this is the all-zero key.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Get the inner bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First characters of the base58 form, for log lines.
    pub fn short(&self) -> String {
        let full = self.to_string();
        full.chars().take(8).collect()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl FromStr for Address {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| DomainError::InvalidAddress(format!("{s}: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            DomainError::InvalidAddress(format!("{s}: expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 8-byte account type prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Discriminator(pub [u8; 8]);

impl Discriminator {
    /// Whether `data` starts with this discriminator.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= 8 && data[..8] == self.0
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Discriminator of the program's `Escrow` account.
pub const ESCROW_DISCRIMINATOR: Discriminator =
    Discriminator([31, 213, 123, 187, 186, 22, 218, 155]);

// =============================================================================
// Instructions
// =============================================================================

/// Program instructions the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    CreateEscrow,
    LockForTaker,
    ReleaseToTaker,
    RefundToMaker,
}

impl InstructionKind {
    /// All kinds, in the order the classifier tests them.
    pub const ALL: [InstructionKind; 4] = [
        InstructionKind::CreateEscrow,
        InstructionKind::LockForTaker,
        InstructionKind::ReleaseToTaker,
        InstructionKind::RefundToMaker,
    ];

    /// Substring the program logs when this instruction runs.
    pub fn log_marker(&self) -> &'static str {
        match self {
            InstructionKind::CreateEscrow => "Instruction: CreateEscrow",
            InstructionKind::LockForTaker => "Instruction: LockForTaker",
            InstructionKind::ReleaseToTaker => "Instruction: ReleaseToTaker",
            InstructionKind::RefundToMaker => "Instruction: RefundToMaker",
        }
    }

    /// Snake-case name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionKind::CreateEscrow => "create_escrow",
            InstructionKind::LockForTaker => "lock_for_taker",
            InstructionKind::ReleaseToTaker => "release_to_taker",
            InstructionKind::RefundToMaker => "refund_to_maker",
        }
    }

    /// Event recorded when this instruction is projected.
    pub fn event_kind(&self) -> EventKind {
        match self {
            InstructionKind::CreateEscrow => EventKind::Created,
            InstructionKind::LockForTaker => EventKind::Locked,
            InstructionKind::ReleaseToTaker => EventKind::Released,
            InstructionKind::RefundToMaker => EventKind::Refunded,
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Deal status state machine
// =============================================================================

/// Lifecycle of an escrow deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Funded,
    Locked,
    Released,
    Refunded,
}

impl DealStatus {
    pub const ALL: [DealStatus; 4] = [
        DealStatus::Funded,
        DealStatus::Locked,
        DealStatus::Released,
        DealStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Funded => "funded",
            DealStatus::Locked => "locked",
            DealStatus::Released => "released",
            DealStatus::Refunded => "refunded",
        }
    }

    /// Released and refunded deals never change again under the strict guard.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DealStatus::Released | DealStatus::Refunded)
    }

    /// Statuses from which `self` may be entered under the strict guard.
    pub fn strict_predecessors(&self) -> &'static [DealStatus] {
        match self {
            DealStatus::Funded => &[],
            DealStatus::Locked => &[DealStatus::Funded],
            DealStatus::Released => &[DealStatus::Locked],
            DealStatus::Refunded => &[DealStatus::Funded, DealStatus::Locked],
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "funded" => Ok(DealStatus::Funded),
            "locked" => Ok(DealStatus::Locked),
            "released" => Ok(DealStatus::Released),
            "refunded" => Ok(DealStatus::Refunded),
            other => Err(DomainError::ValidationError(format!(
                "unknown deal status '{other}'"
            ))),
        }
    }
}

impl TryFrom<u8> for DealStatus {
    type Error = DecodeError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        DealStatus::ALL
            .get(index as usize)
            .copied()
            .ok_or(DecodeError::InvalidStatus(index))
    }
}

/// Policy for transitions on deals that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionGuard {
    /// Forward-only state machine: terminal deals never change and
    /// out-of-order or duplicate transitions are ignored.
    #[default]
    Strict,
    /// Any transition is applied as long as the deal row exists.
    Permissive,
}

impl TransitionGuard {
    /// Statuses a deal may currently hold for `target` to be applied.
    pub fn allowed_from(&self, target: DealStatus) -> &'static [DealStatus] {
        match self {
            TransitionGuard::Strict => target.strict_predecessors(),
            TransitionGuard::Permissive => &DealStatus::ALL,
        }
    }
}

impl FromStr for TransitionGuard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(TransitionGuard::Strict),
            "permissive" => Ok(TransitionGuard::Permissive),
            _ => Err(format!(
                "Invalid transition guard '{s}'. Use 'strict' or 'permissive'."
            )),
        }
    }
}

// =============================================================================
// Projected rows
// =============================================================================

/// One escrow deal, keyed by its on-chain account address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    /// Escrow account address (unique key).
    pub escrow_address: Address,
    /// On-chain deal identifier, lowercase hex.
    pub deal_id: String,
    /// Signature of the creating transaction.
    pub signature: String,
    pub maker: Address,
    /// Unset until the deal is locked.
    pub taker: Option<Address>,
    pub arbiter: Address,
    pub treasury: Address,
    pub mint: Address,
    /// Token amount in base units.
    pub amount: u64,
    /// Fee in basis points (0-10000).
    pub fee_bps: u16,
    pub status: DealStatus,
    pub created_slot: u64,
    pub created_at: DateTime<Utc>,
    pub locked_slot: Option<u64>,
    pub locked_at: Option<DateTime<Utc>>,
    pub released_slot: Option<u64>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Kind of a recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Locked,
    Released,
    Refunded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Locked => "locked",
            EventKind::Released => "released",
            EventKind::Refunded => "refunded",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventKind::Created),
            "locked" => Ok(EventKind::Locked),
            "released" => Ok(EventKind::Released),
            "refunded" => Ok(EventKind::Refunded),
            other => Err(DomainError::ValidationError(format!(
                "unknown event kind '{other}'"
            ))),
        }
    }
}

/// Immutable record of one observed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// On-chain deal identifier of the referenced deal.
    pub deal_id: String,
    /// Escrow address of the referenced deal.
    pub escrow_address: Address,
    pub kind: EventKind,
    pub signature: String,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
    pub signer: Option<Address>,
}

/// Where on chain a transition was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPoint {
    pub signature: String,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
}

/// Result of a conditional deal update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The deal was updated and the event appended.
    Applied,
    /// No deal exists for the address.
    UnknownDeal,
    /// The guard refused the transition from the current status.
    Rejected { current: DealStatus },
}

// =============================================================================
// Indexer State
// =============================================================================

/// Indexer cursor tracking progress.
///
/// One row per monitored program. Written only by the poll loop after a
/// batch has been fully attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerCursor {
    /// Monitored program (base58).
    pub program_id: String,
    /// Newest signature of the last committed batch.
    pub last_signature: String,
    /// Slot of `last_signature`.
    pub last_slot: u64,
    /// When the cursor was last written.
    pub last_indexed_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_base58_roundtrip() {
        let s = "HZ9ZSXtebTKYGRR7ZNsetroAT7Kh8ymKExcf5FF9dLNq";
        let addr: Address = s.parse().unwrap();
        assert_eq!(addr.to_string(), s);
        assert_eq!(addr.short(), "HZ9ZSXte");
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert!("3xyz".parse::<Address>().is_err());
        assert!("not base58 0OIl".parse::<Address>().is_err());
    }

    #[test]
    fn zero_address_is_system_program() {
        assert!(Address::ZERO.is_zero());
        assert_eq!(Address::ZERO.to_string(), "11111111111111111111111111111111");
    }

    #[test]
    fn discriminator_requires_full_prefix() {
        let mut data = ESCROW_DISCRIMINATOR.0.to_vec();
        assert!(ESCROW_DISCRIMINATOR.matches(&data));
        data.push(0);
        assert!(ESCROW_DISCRIMINATOR.matches(&data));
        assert!(!ESCROW_DISCRIMINATOR.matches(&data[..7]));
    }

    #[test]
    fn status_index_out_of_range_fails() {
        assert_eq!(DealStatus::try_from(0), Ok(DealStatus::Funded));
        assert_eq!(DealStatus::try_from(3), Ok(DealStatus::Refunded));
        assert_eq!(DealStatus::try_from(7), Err(DecodeError::InvalidStatus(7)));
    }

    #[test]
    fn strict_guard_is_forward_only() {
        let guard = TransitionGuard::Strict;
        assert_eq!(guard.allowed_from(DealStatus::Locked), &[DealStatus::Funded]);
        assert_eq!(guard.allowed_from(DealStatus::Released), &[DealStatus::Locked]);
        // refund without a prior lock is tolerated
        assert!(guard.allowed_from(DealStatus::Refunded).contains(&DealStatus::Funded));
        for target in DealStatus::ALL {
            for from in guard.allowed_from(target) {
                assert!(!from.is_terminal());
            }
        }
    }

    #[test]
    fn permissive_guard_allows_everything() {
        let guard: TransitionGuard = "PERMISSIVE".parse().unwrap();
        assert_eq!(guard.allowed_from(DealStatus::Released).len(), 4);
        assert!("lenient".parse::<TransitionGuard>().is_err());
    }

    #[test]
    fn serialized_names_match_stored_strings() {
        assert_eq!(
            serde_json::to_string(&DealStatus::Refunded).unwrap(),
            "\"refunded\""
        );
        assert_eq!(
            serde_json::to_string(&InstructionKind::LockForTaker).unwrap(),
            format!("\"{}\"", InstructionKind::LockForTaker.as_str())
        );
        let addr = Address([3; 32]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);
        assert!(serde_json::from_str::<Address>("\"3xyz\"").is_err());
    }

    #[test]
    fn status_and_kind_strings_roundtrip() {
        for status in DealStatus::ALL {
            assert_eq!(status.as_str().parse::<DealStatus>().unwrap(), status);
        }
        for kind in InstructionKind::ALL {
            let event = kind.event_kind();
            assert_eq!(event.as_str().parse::<EventKind>().unwrap(), event);
        }
    }
}

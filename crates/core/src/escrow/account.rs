//! Binary layout of the program's `Escrow` account.
//!
//! The account is Borsh-encoded behind an 8-byte discriminator:
//!
//! ```text
//! discriminator [8] | version u8 | deal_id [32] | maker | taker | arbiter
//! | treasury | mint (5 x [32]) | amount u64 | fee_bps u16 | status u8
//! | escrow_bump u8 | signer_bump u8
//! ```
//!
//! Accounts may be allocated larger than the record; trailing bytes are
//! ignored.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::DecodeError;
use crate::models::{Address, ChainPoint, Deal, DealStatus, ESCROW_DISCRIMINATOR};

/// Size of an encoded escrow record, discriminator included.
pub const ESCROW_ACCOUNT_LEN: usize = 8 + 1 + 32 + 5 * 32 + 8 + 2 + 1 + 1 + 1;

/// Upper bound of `fee_bps` (100%).
pub const MAX_FEE_BPS: u16 = 10_000;

#[derive(BorshSerialize, BorshDeserialize)]
struct RawEscrow {
    discriminator: [u8; 8],
    version: u8,
    deal_id: [u8; 32],
    maker: [u8; 32],
    taker: [u8; 32],
    arbiter: [u8; 32],
    treasury: [u8; 32],
    mint: [u8; 32],
    amount: u64,
    fee_bps: u16,
    status: u8,
    escrow_bump: u8,
    signer_bump: u8,
}

/// Decoded escrow account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowRecord {
    pub version: u8,
    pub deal_id: [u8; 32],
    pub maker: Address,
    /// `None` while the on-chain key is all zeros.
    pub taker: Option<Address>,
    pub arbiter: Address,
    pub treasury: Address,
    pub mint: Address,
    pub amount: u64,
    pub fee_bps: u16,
    pub status: DealStatus,
    pub escrow_bump: u8,
    pub signer_bump: u8,
}

impl EscrowRecord {
    /// Deal identifier rendered for storage.
    pub fn deal_id_hex(&self) -> String {
        hex::encode(self.deal_id)
    }

    /// Build the freshly created deal row for this record.
    ///
    /// New deals always start `funded`, whatever the account holds by the
    /// time it is read; later transitions are replayed from their own
    /// transactions.
    pub fn to_new_deal(&self, escrow_address: Address, point: &ChainPoint) -> Deal {
        Deal {
            escrow_address,
            deal_id: self.deal_id_hex(),
            signature: point.signature.clone(),
            maker: self.maker,
            taker: self.taker,
            arbiter: self.arbiter,
            treasury: self.treasury,
            mint: self.mint,
            amount: self.amount,
            fee_bps: self.fee_bps,
            status: DealStatus::Funded,
            created_slot: point.slot,
            created_at: point.block_time,
            locked_slot: None,
            locked_at: None,
            released_slot: None,
            released_at: None,
        }
    }
}

/// Decode an escrow account.
///
/// Fails on a foreign discriminator, a short buffer, an unknown status
/// index, or an out-of-range fee. An unknown status is never mapped to a
/// default.
pub fn decode_escrow(raw: &[u8]) -> Result<EscrowRecord, DecodeError> {
    if raw.len() < ESCROW_DISCRIMINATOR.0.len() {
        return Err(DecodeError::Truncated {
            expected: ESCROW_ACCOUNT_LEN,
            actual: raw.len(),
        });
    }
    if !ESCROW_DISCRIMINATOR.matches(raw) {
        return Err(DecodeError::WrongDiscriminator(hex::encode(&raw[..8])));
    }
    if raw.len() < ESCROW_ACCOUNT_LEN {
        return Err(DecodeError::Truncated {
            expected: ESCROW_ACCOUNT_LEN,
            actual: raw.len(),
        });
    }

    let mut buf = raw;
    let escrow =
        RawEscrow::deserialize(&mut buf).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let status = DealStatus::try_from(escrow.status)?;
    if escrow.fee_bps > MAX_FEE_BPS {
        return Err(DecodeError::Malformed(format!(
            "fee_bps {} exceeds {}",
            escrow.fee_bps, MAX_FEE_BPS
        )));
    }

    let taker = Address(escrow.taker);

    Ok(EscrowRecord {
        version: escrow.version,
        deal_id: escrow.deal_id,
        maker: Address(escrow.maker),
        taker: (!taker.is_zero()).then_some(taker),
        arbiter: Address(escrow.arbiter),
        treasury: Address(escrow.treasury),
        mint: Address(escrow.mint),
        amount: escrow.amount,
        fee_bps: escrow.fee_bps,
        status,
        escrow_bump: escrow.escrow_bump,
        signer_bump: escrow.signer_bump,
    })
}

/// Encode a record with the on-chain layout.
pub fn encode_escrow(record: &EscrowRecord) -> Vec<u8> {
    let status_index = DealStatus::ALL
        .iter()
        .position(|s| *s == record.status)
        .unwrap_or_default() as u8;

    let raw = RawEscrow {
        discriminator: ESCROW_DISCRIMINATOR.0,
        version: record.version,
        deal_id: record.deal_id,
        maker: record.maker.0,
        taker: record.taker.unwrap_or(Address::ZERO).0,
        arbiter: record.arbiter.0,
        treasury: record.treasury.0,
        mint: record.mint.0,
        amount: record.amount,
        fee_bps: record.fee_bps,
        status: status_index,
        escrow_bump: record.escrow_bump,
        signer_bump: record.signer_bump,
    };

    let mut out = Vec::with_capacity(ESCROW_ACCOUNT_LEN);
    // Writing into a Vec cannot fail.
    let _ = raw.serialize(&mut out);
    out
}

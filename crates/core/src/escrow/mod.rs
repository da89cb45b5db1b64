//! Escrow program knowledge: log classification and account decoding.
//!
//! Both are pure functions with no I/O.

mod account;
mod classify;

pub use account::{
    ESCROW_ACCOUNT_LEN, EscrowRecord, MAX_FEE_BPS, decode_escrow, encode_escrow,
};
pub use classify::classify;

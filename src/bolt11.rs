//! Amount decoding for BOLT-11 lightning invoices.
//!
//! Zap receipts carry the paid invoice in their `bolt11` tag. Only the amount
//! is needed, and it lives in the human-readable part: `ln` + currency prefix
//! + optional amount + optional multiplier, e.g. `lnbc2500u` is 2500 µBTC.

use bech32::{
    primitives::{checksum::Checksum, decode::CheckedHrpstring},
    Bech32,
};
use thiserror::Error;

/// Millisatoshis per whole bitcoin.
const MSAT_PER_BTC: u64 = 100_000_000_000;

/// Bech32 with the code length lifted to what the BCH code still detects.
///
/// Invoices with route hints regularly exceed the 1023 characters plain
/// bech32 allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceBech32 {}

impl Checksum for InvoiceBech32 {
    type MidstateRepr = u32;
    const CODE_LENGTH: usize = 7089;
    const CHECKSUM_LENGTH: usize = Bech32::CHECKSUM_LENGTH;
    const GENERATOR_SH: [u32; 5] = Bech32::GENERATOR_SH;
    const TARGET_RESIDUE: u32 = Bech32::TARGET_RESIDUE;
}

#[derive(Debug, Error, PartialEq)]
pub enum InvoiceError {
    #[error("invalid bech32 invoice: {0}")]
    Bech32(String),
    #[error("not a lightning invoice")]
    Prefix,
    #[error("invalid amount {0:?}")]
    Amount(String),
    #[error("amount is not a whole number of millisatoshis")]
    SubMillisatoshi,
    #[error("amount overflows")]
    Overflow,
}

/// Decode the invoice amount in millisatoshis.
///
/// Invoices that leave the amount open decode to zero.
pub fn amount_msat(invoice: &str) -> Result<u64, InvoiceError> {
    let checked = CheckedHrpstring::new::<InvoiceBech32>(invoice.trim())
        .map_err(|e| InvoiceError::Bech32(e.to_string()))?;
    amount_from_hrp(&checked.hrp().to_lowercase())
}

fn amount_from_hrp(hrp: &str) -> Result<u64, InvoiceError> {
    let rest = hrp.strip_prefix("ln").ok_or(InvoiceError::Prefix)?;
    let amount_at = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
    let (currency, amount) = rest.split_at(amount_at);
    if currency.is_empty() || !currency.chars().all(|c| c.is_ascii_lowercase()) {
        return Err(InvoiceError::Prefix);
    }
    if amount.is_empty() {
        return Ok(0);
    }

    let (digits, multiplier) = match amount.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&amount[..i], Some(c)),
        _ => (amount, None),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(InvoiceError::Amount(amount.to_string()));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| InvoiceError::Amount(amount.to_string()))?;

    let scale = |per_unit: u64| value.checked_mul(per_unit).ok_or(InvoiceError::Overflow);
    match multiplier {
        None => scale(MSAT_PER_BTC),
        Some('m') => scale(MSAT_PER_BTC / 1_000),
        Some('u') => scale(MSAT_PER_BTC / 1_000_000),
        Some('n') => scale(MSAT_PER_BTC / 1_000_000_000),
        // One pico-bitcoin is a tenth of a millisatoshi.
        Some('p') if value % 10 == 0 => Ok(value / 10),
        Some('p') => Err(InvoiceError::SubMillisatoshi),
        Some(_) => Err(InvoiceError::Amount(amount.to_string())),
    }
}

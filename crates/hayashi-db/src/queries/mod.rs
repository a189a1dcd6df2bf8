//! Row-level queries for the four ledger-entry tables.
//!
//! Column encoding conventions shared by every table:
//!
//! - account ids are StrKey-encoded text (`G...`), which also makes
//!   lexicographic `ORDER BY` on them meaningful
//! - assets, data names and full entries are base64-encoded XDR
//! - offer prices additionally store the precomputed `n/d` as a REAL column
//!   so the best-offer index can order on it

pub mod accounts;
pub mod data;
pub mod offers;
pub mod trustlines;

use crate::error::DbError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use stellar_xdr::curr::{
    AccountId, LedgerEntry, Limits, Price, PublicKey, ReadXdr, Uint256, WriteXdr,
};

/// Encode an account id to StrKey text.
pub(crate) fn encode_account_id(account_id: &AccountId) -> String {
    match &account_id.0 {
        PublicKey::PublicKeyTypeEd25519(key) => {
            stellar_strkey::ed25519::PublicKey(key.0).to_string()
        }
    }
}

/// Decode StrKey text back into an account id.
pub(crate) fn decode_account_id(strkey: &str) -> Result<AccountId, DbError> {
    let pk = stellar_strkey::ed25519::PublicKey::from_string(strkey)
        .map_err(|e| DbError::InvalidPublicKey(e.to_string()))?;
    Ok(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(pk.0))))
}

/// Encode any XDR value as base64 text.
pub(crate) fn encode_xdr<T: WriteXdr>(value: &T) -> Result<String, DbError> {
    Ok(BASE64.encode(value.to_xdr(Limits::none())?))
}

/// Decode a base64 text column into an XDR value.
pub(crate) fn decode_xdr<T: ReadXdr>(encoded: &str) -> Result<T, DbError> {
    let bytes = BASE64.decode(encoded)?;
    Ok(T::from_xdr(bytes, Limits::none())?)
}

/// Encode a full ledger entry for the `entry` column.
pub(crate) fn encode_entry(entry: &LedgerEntry) -> Result<String, DbError> {
    encode_xdr(entry)
}

/// Decode the `entry` column back into a ledger entry.
pub(crate) fn decode_entry(encoded: &str) -> Result<LedgerEntry, DbError> {
    decode_xdr(encoded)
}

/// Precomputed `n/d` used only for index ordering; exactness is not needed
/// here because ties are broken by `offerid` in the same index.
pub(crate) fn price_double(price: &Price) -> f64 {
    price.n as f64 / price.d as f64
}

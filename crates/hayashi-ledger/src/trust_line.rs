//! Trustline wrapper: uniform balance arithmetic over trustlines.
//!
//! Operations that move non-native assets around would otherwise have to
//! special-case the edge where an account holds its own issued asset (no
//! trustline row exists, the balance is by definition unbounded). The
//! wrapper folds that edge into a tagged variant: [`TrustLineWrapper::Issuer`]
//! reports unlimited balance and capacity and accepts every balance change,
//! while [`TrustLineWrapper::NonIssuer`] wraps a real trustline handle and
//! enforces its limit and liabilities.

use stellar_xdr::curr::{
    AccountId, Asset, LedgerEntryData, LedgerKey, LedgerKeyTrustLine, Liabilities, TrustLineAsset,
    TrustLineEntry, TrustLineEntryExt, TrustLineEntryV1, TrustLineEntryV1Ext, TrustLineFlags,
};

use crate::entry::{ConstLedgerStateEntry, LedgerStateEntry};
use crate::state::LedgerState;
use crate::{LedgerError, Result};

/// Issuer of a non-native asset, if any.
fn asset_issuer(asset: &Asset) -> Option<&AccountId> {
    match asset {
        Asset::Native => None,
        Asset::CreditAlphanum4(a) => Some(&a.issuer),
        Asset::CreditAlphanum12(a) => Some(&a.issuer),
    }
}

/// The trustline form of an asset; trustlines never exist for native.
fn trust_line_asset(asset: &Asset) -> Result<TrustLineAsset> {
    match asset {
        Asset::Native => Err(LedgerError::NativeAssetTrustLine),
        Asset::CreditAlphanum4(a) => Ok(TrustLineAsset::CreditAlphanum4(a.clone())),
        Asset::CreditAlphanum12(a) => Ok(TrustLineAsset::CreditAlphanum12(a.clone())),
    }
}

fn liabilities_of(trust_line: &TrustLineEntry) -> Liabilities {
    match &trust_line.ext {
        TrustLineEntryExt::V0 => Liabilities {
            buying: 0,
            selling: 0,
        },
        TrustLineEntryExt::V1(v1) => v1.liabilities.clone(),
    }
}

fn set_liabilities(trust_line: &mut TrustLineEntry, liabilities: Liabilities) {
    match &mut trust_line.ext {
        TrustLineEntryExt::V0 => {
            trust_line.ext = TrustLineEntryExt::V1(TrustLineEntryV1 {
                liabilities,
                ext: TrustLineEntryV1Ext::V0,
            });
        }
        TrustLineEntryExt::V1(v1) => v1.liabilities = liabilities,
    }
}

/// Mutable trustline facade over either a real trustline or the issuer edge.
pub enum TrustLineWrapper {
    /// The account issues the asset itself: unlimited in both directions.
    Issuer {
        /// The issuing account.
        account_id: AccountId,
        /// The issued asset.
        asset: Asset,
    },
    /// A real trustline, held through a mutable entry handle.
    NonIssuer {
        /// Handle over the trustline entry.
        entry: LedgerStateEntry,
    },
}

impl TrustLineWrapper {
    /// Load the trustline of `account_id` for `asset` from `state`.
    ///
    /// Returns the issuer variant when the account issues the asset, `None`
    /// when no trustline exists, and an error for the native asset.
    pub fn load(
        state: &mut LedgerState<'_>,
        account_id: &AccountId,
        asset: &Asset,
    ) -> Result<Option<Self>> {
        let trust_asset = trust_line_asset(asset)?;
        if asset_issuer(asset) == Some(account_id) {
            return Ok(Some(TrustLineWrapper::Issuer {
                account_id: account_id.clone(),
                asset: asset.clone(),
            }));
        }

        let key = LedgerKey::Trustline(LedgerKeyTrustLine {
            account_id: account_id.clone(),
            asset: trust_asset,
        });
        Ok(state
            .load(&key)?
            .map(|entry| TrustLineWrapper::NonIssuer { entry }))
    }

    fn read<R>(&self, f: impl FnOnce(&TrustLineEntry) -> R) -> Result<R> {
        match self {
            TrustLineWrapper::Issuer { .. } => Err(LedgerError::KeyNotFound),
            TrustLineWrapper::NonIssuer { entry } => {
                let current = entry.current();
                let LedgerEntryData::Trustline(trust_line) = &current.data else {
                    return Err(LedgerError::UnknownKeyType);
                };
                Ok(f(trust_line))
            }
        }
    }

    fn modify<R>(&self, f: impl FnOnce(&mut TrustLineEntry) -> R) -> Result<R> {
        match self {
            TrustLineWrapper::Issuer { .. } => Err(LedgerError::KeyNotFound),
            TrustLineWrapper::NonIssuer { entry } => {
                let mut current = entry.current_mut();
                let LedgerEntryData::Trustline(trust_line) = &mut current.data else {
                    return Err(LedgerError::UnknownKeyType);
                };
                Ok(f(trust_line))
            }
        }
    }

    /// The holding account.
    pub fn account_id(&self) -> Result<AccountId> {
        match self {
            TrustLineWrapper::Issuer { account_id, .. } => Ok(account_id.clone()),
            _ => self.read(|tl| tl.account_id.clone()),
        }
    }

    /// Current balance; unlimited for the issuer.
    pub fn balance(&self) -> Result<i64> {
        match self {
            TrustLineWrapper::Issuer { .. } => Ok(i64::MAX),
            _ => self.read(|tl| tl.balance),
        }
    }

    /// Apply a balance change.
    ///
    /// Returns whether the change fits: the new balance must stay above the
    /// selling liabilities and below the limit minus buying liabilities.
    /// Issuer balances absorb any change.
    pub fn add_balance(&self, delta: i64) -> Result<bool> {
        if let TrustLineWrapper::Issuer { .. } = self {
            return Ok(true);
        }
        self.modify(|tl| {
            if delta == 0 {
                return true;
            }
            let liabilities = liabilities_of(tl);
            let Some(new_balance) = tl.balance.checked_add(delta) else {
                return false;
            };
            let Some(max_balance) = tl.limit.checked_sub(liabilities.buying) else {
                return false;
            };
            if new_balance < liabilities.selling || new_balance > max_balance {
                return false;
            }
            tl.balance = new_balance;
            true
        })
    }

    /// Liabilities from open offers buying this asset; zero for the issuer.
    pub fn buying_liabilities(&self) -> Result<i64> {
        match self {
            TrustLineWrapper::Issuer { .. } => Ok(0),
            _ => self.read(|tl| liabilities_of(tl).buying),
        }
    }

    /// Liabilities from open offers selling this asset; zero for the issuer.
    pub fn selling_liabilities(&self) -> Result<i64> {
        match self {
            TrustLineWrapper::Issuer { .. } => Ok(0),
            _ => self.read(|tl| liabilities_of(tl).selling),
        }
    }

    /// Add buying liabilities; returns whether the change fits.
    pub fn add_buying_liabilities(&self, delta: i64) -> Result<bool> {
        if let TrustLineWrapper::Issuer { .. } = self {
            return Ok(true);
        }
        self.modify(|tl| {
            let mut liabilities = liabilities_of(tl);
            let Some(new_buying) = liabilities.buying.checked_add(delta) else {
                return false;
            };
            let Some(capacity) = tl.limit.checked_sub(tl.balance) else {
                return false;
            };
            if new_buying < 0 || new_buying > capacity {
                return false;
            }
            liabilities.buying = new_buying;
            set_liabilities(tl, liabilities);
            true
        })
    }

    /// Add selling liabilities; returns whether the change fits.
    pub fn add_selling_liabilities(&self, delta: i64) -> Result<bool> {
        if let TrustLineWrapper::Issuer { .. } = self {
            return Ok(true);
        }
        self.modify(|tl| {
            let mut liabilities = liabilities_of(tl);
            let Some(new_selling) = liabilities.selling.checked_add(delta) else {
                return false;
            };
            if new_selling < 0 || new_selling > tl.balance {
                return false;
            }
            liabilities.selling = new_selling;
            set_liabilities(tl, liabilities);
            true
        })
    }

    /// Whether the trustline is authorized to hold the asset.
    pub fn is_authorized(&self) -> Result<bool> {
        match self {
            TrustLineWrapper::Issuer { .. } => Ok(true),
            _ => self.read(|tl| tl.flags & (TrustLineFlags::AuthorizedFlag as u32) != 0),
        }
    }

    /// Balance available for spending after selling liabilities.
    pub fn available_balance(&self) -> Result<i64> {
        match self {
            TrustLineWrapper::Issuer { .. } => Ok(i64::MAX),
            _ => self.read(|tl| tl.balance - liabilities_of(tl).selling),
        }
    }

    /// Room left for receiving after buying liabilities.
    pub fn max_amount_receive(&self) -> Result<i64> {
        match self {
            TrustLineWrapper::Issuer { .. } => Ok(i64::MAX),
            _ => self.read(|tl| tl.limit - tl.balance - liabilities_of(tl).buying),
        }
    }

    /// Release the underlying handle.
    pub fn deactivate(self) {}
}

/// Read-only trustline facade.
pub enum ConstTrustLineWrapper {
    /// The account issues the asset itself.
    Issuer,
    /// A real trustline, held through a read-only handle.
    NonIssuer {
        /// Handle over the trustline snapshot.
        entry: ConstLedgerStateEntry,
    },
}

impl ConstTrustLineWrapper {
    /// Load the trustline of `account_id` for `asset` without recording it.
    pub fn load(
        state: &mut LedgerState<'_>,
        account_id: &AccountId,
        asset: &Asset,
    ) -> Result<Option<Self>> {
        let trust_asset = trust_line_asset(asset)?;
        if asset_issuer(asset) == Some(account_id) {
            return Ok(Some(ConstTrustLineWrapper::Issuer));
        }

        let key = LedgerKey::Trustline(LedgerKeyTrustLine {
            account_id: account_id.clone(),
            asset: trust_asset,
        });
        Ok(state
            .load_without_record(&key)?
            .map(|entry| ConstTrustLineWrapper::NonIssuer { entry }))
    }

    fn read<R>(&self, f: impl FnOnce(&TrustLineEntry) -> R) -> Result<R> {
        match self {
            ConstTrustLineWrapper::Issuer => Err(LedgerError::KeyNotFound),
            ConstTrustLineWrapper::NonIssuer { entry } => {
                let LedgerEntryData::Trustline(trust_line) = &entry.current().data else {
                    return Err(LedgerError::UnknownKeyType);
                };
                Ok(f(trust_line))
            }
        }
    }

    /// Current balance; unlimited for the issuer.
    pub fn balance(&self) -> Result<i64> {
        match self {
            ConstTrustLineWrapper::Issuer => Ok(i64::MAX),
            _ => self.read(|tl| tl.balance),
        }
    }

    /// Whether the trustline is authorized to hold the asset.
    pub fn is_authorized(&self) -> Result<bool> {
        match self {
            ConstTrustLineWrapper::Issuer => Ok(true),
            _ => self.read(|tl| tl.flags & (TrustLineFlags::AuthorizedFlag as u32) != 0),
        }
    }

    /// Balance available for spending after selling liabilities.
    pub fn available_balance(&self) -> Result<i64> {
        match self {
            ConstTrustLineWrapper::Issuer => Ok(i64::MAX),
            _ => self.read(|tl| tl.balance - liabilities_of(tl).selling),
        }
    }

    /// Room left for receiving after buying liabilities.
    pub fn max_amount_receive(&self) -> Result<i64> {
        match self {
            ConstTrustLineWrapper::Issuer => Ok(i64::MAX),
            _ => self.read(|tl| tl.limit - tl.balance - liabilities_of(tl).buying),
        }
    }

    /// Release the underlying handle.
    pub fn deactivate(self) {}
}

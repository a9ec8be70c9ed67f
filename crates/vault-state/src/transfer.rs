use std::sync::Arc;

use tracing::debug;
use vault_core::error::VaultError;
use vault_core::types::{AccountId, Balance};

use crate::db::StateDb;

/// Moves value between principals and the registry's custody.
///
/// Both directions may fail; the registry aborts the surrounding operation
/// when they do. Implementations must not assume they are the only caller
/// of the registry: calling back into it from here is rejected.
pub trait ValueTransfer: Send + Sync {
    /// Pull `amount` from `from` into custody.
    fn take_custody(&self, from: &AccountId, amount: Balance) -> Result<(), VaultError>;

    /// Push `amount` out of custody to `to`.
    fn release(&self, to: &AccountId, amount: Balance) -> Result<(), VaultError>;
}

/// Balance ledger kept in the same sled store as the registry. Custodied
/// value lives in the registry's custody counter, not in any account.
pub struct LedgerTransfer {
    db: Arc<StateDb>,
}

impl LedgerTransfer {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    /// Mint spendable balance (genesis / faucet only).
    pub fn fund(&self, account: &AccountId, amount: Balance) -> Result<Balance, VaultError> {
        self.db.credit(account, amount)
    }

    pub fn balance(&self, account: &AccountId) -> Result<Balance, VaultError> {
        self.db.balance(account)
    }
}

impl ValueTransfer for LedgerTransfer {
    fn take_custody(&self, from: &AccountId, amount: Balance) -> Result<(), VaultError> {
        let left = self.db.debit(from, amount)?;
        debug!(from = %from, amount, left, "value taken into custody");
        Ok(())
    }

    fn release(&self, to: &AccountId, amount: Balance) -> Result<(), VaultError> {
        if to.is_zero() {
            return Err(VaultError::TransferFailed("recipient is the null account".into()));
        }
        let now_has = self.db.credit(to, amount)?;
        debug!(to = %to, amount, balance = now_has, "value released from custody");
        Ok(())
    }
}

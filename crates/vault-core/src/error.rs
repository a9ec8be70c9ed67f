use thiserror::Error;

use crate::types::GrantId;

#[derive(Debug, Error)]
pub enum VaultError {
    // ── Grant creation ───────────────────────────────────────────────────────
    #[error("invalid amount: attached value must be greater than zero")]
    InvalidAmount,

    #[error("invalid beneficiary: the null account cannot receive a grant")]
    InvalidBeneficiary,

    #[error("unlock time must be in the future (unlock_at {unlock_at}, now {now})")]
    UnlockTimeNotFuture { unlock_at: i64, now: i64 },

    // ── Withdrawal ───────────────────────────────────────────────────────────
    #[error("grant not found: {0}")]
    NotFound(GrantId),

    #[error("grant {0} already withdrawn")]
    AlreadyWithdrawn(GrantId),

    #[error("grant not yet unlocked (unlocks at {unlock_at})")]
    NotYetUnlocked { unlock_at: i64 },

    #[error("caller is not authorized for this operation")]
    Unauthorized,

    // ── Value transfer ───────────────────────────────────────────────────────
    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },

    #[error("balance overflow")]
    BalanceOverflow,

    #[error("value transfer failed: {0}")]
    TransferFailed(String),

    /// The grant commit aborted and returning the deposit failed too. The
    /// donor has been debited `amount` with no grant recorded.
    #[error("deposit of {amount} not returned: commit failed ({commit}), refund failed ({refund})")]
    RefundFailed { amount: u128, commit: String, refund: String },

    // ── Registry integrity ───────────────────────────────────────────────────
    #[error("re-entrant registry call rejected")]
    Reentrant,

    #[error("store is owned by {stored}, registry configured with {configured}")]
    OwnerMismatch { stored: String, configured: String },

    #[error("custody mismatch: recorded {recorded}, active grants sum to {expected}")]
    CustodyMismatch { recorded: u128, expected: u128 },

    // ── Encoding / storage ───────────────────────────────────────────────────
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl VaultError {
    /// True for rejections caused by the request itself, as opposed to the
    /// store or the value-transfer facility.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            VaultError::InvalidAmount
                | VaultError::InvalidBeneficiary
                | VaultError::UnlockTimeNotFuture { .. }
                | VaultError::NotFound(_)
                | VaultError::AlreadyWithdrawn(_)
                | VaultError::NotYetUnlocked { .. }
                | VaultError::Unauthorized
                | VaultError::InsufficientBalance { .. }
                | VaultError::InvalidAccountId(_)
        )
    }
}

use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::types::{AccountId, Balance, GrantId, Timestamp};

// ── Grant ─────────────────────────────────────────────────────────────────────

/// One custodied deposit.
///
/// Everything except the withdrawal fields is fixed at creation. Grants are
/// never deleted; a withdrawn grant stays in the registry as an audit record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    /// Principal that attached the value.
    pub donor: AccountId,
    /// Principal the value is released to. Never the null account.
    pub beneficiary: AccountId,
    /// Custodied amount in base units. Always > 0.
    pub amount: Balance,
    /// Withdrawal is permitted once the clock reads `unlock_at` or later.
    pub unlock_at: Timestamp,
    /// Clock reading at creation; `unlock_at > created_at`.
    pub created_at: Timestamp,
    /// Flips false → true exactly once.
    pub withdrawn: bool,
    pub withdrawn_at: Option<Timestamp>,
}

impl Grant {
    /// Build a fresh, not-yet-withdrawn grant. Callers validate inputs first.
    pub fn new(
        id: GrantId,
        donor: AccountId,
        beneficiary: AccountId,
        amount: Balance,
        unlock_at: Timestamp,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            donor,
            beneficiary,
            amount,
            unlock_at,
            created_at,
            withdrawn: false,
            withdrawn_at: None,
        }
    }

    pub fn is_unlocked(&self, now: Timestamp) -> bool {
        now >= self.unlock_at
    }

    /// Still holding value in custody.
    pub fn is_active(&self) -> bool {
        !self.withdrawn
    }

    /// One-way transition to withdrawn.
    pub fn mark_withdrawn(&mut self, now: Timestamp) -> Result<(), VaultError> {
        if self.withdrawn {
            return Err(VaultError::AlreadyWithdrawn(self.id));
        }
        self.withdrawn = true;
        self.withdrawn_at = Some(now);
        Ok(())
    }

    pub fn status_label(&self) -> &'static str {
        if self.withdrawn {
            "Withdrawn"
        } else {
            "Active"
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::types::{AccountId, Balance, GrantId, Timestamp};

/// Notifications emitted after a state change commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    GrantOffered {
        grant_id: GrantId,
        donor: AccountId,
        beneficiary: AccountId,
        amount: Balance,
        unlock_at: Timestamp,
        at: Timestamp,
    },
    GrantWithdrawn {
        grant_id: GrantId,
        beneficiary: AccountId,
        amount: Balance,
        /// Caller that triggered the release.
        by: AccountId,
        at: Timestamp,
    },
}

impl VaultEvent {
    pub fn grant_id(&self) -> GrantId {
        match self {
            VaultEvent::GrantOffered { grant_id, .. } => *grant_id,
            VaultEvent::GrantWithdrawn { grant_id, .. } => *grant_id,
        }
    }

    pub fn amount(&self) -> Balance {
        match self {
            VaultEvent::GrantOffered { amount, .. } => *amount,
            VaultEvent::GrantWithdrawn { amount, .. } => *amount,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VaultEvent::GrantOffered { .. } => "GrantOffered",
            VaultEvent::GrantWithdrawn { .. } => "GrantWithdrawn",
        }
    }
}

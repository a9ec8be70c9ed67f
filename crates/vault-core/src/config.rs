use serde::{Deserialize, Serialize};

use crate::policy::WithdrawPolicy;
use crate::types::AccountId;

/// Construction-time registry settings. Immutable for the registry's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// The single controlling principal.
    pub owner: AccountId,
    /// Who may trigger a withdrawal.
    #[serde(default)]
    pub withdraw_policy: WithdrawPolicy,
}

impl VaultConfig {
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            withdraw_policy: WithdrawPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: WithdrawPolicy) -> Self {
        self.withdraw_policy = policy;
        self
    }
}

use vault_core::config::VaultConfig;
use vault_core::error::VaultError;
use vault_core::grant::Grant;
use vault_core::policy::WithdrawPolicy;
use vault_core::types::AccountId;

/// Identifies the controlling principal and gates privileged calls.
#[derive(Clone, Debug)]
pub struct AccessControl {
    owner: AccountId,
    withdraw_policy: WithdrawPolicy,
}

impl AccessControl {
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            owner: config.owner.clone(),
            withdraw_policy: config.withdraw_policy,
        }
    }

    pub fn owner(&self) -> &AccountId {
        &self.owner
    }

    pub fn withdraw_policy(&self) -> WithdrawPolicy {
        self.withdraw_policy
    }

    pub fn require_owner(&self, caller: &AccountId) -> Result<(), VaultError> {
        if *caller != self.owner {
            return Err(VaultError::Unauthorized);
        }
        Ok(())
    }

    /// Apply the configured withdraw policy for `caller` on `grant`.
    pub fn authorize_withdraw(&self, caller: &AccountId, grant: &Grant) -> Result<(), VaultError> {
        match self.withdraw_policy {
            WithdrawPolicy::Owner => self.require_owner(caller),
            policy if policy.permits(caller, &self.owner, grant) => Ok(()),
            _ => Err(VaultError::Unauthorized),
        }
    }
}

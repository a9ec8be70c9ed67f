use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use vault_core::config::VaultConfig;
use vault_core::policy::WithdrawPolicy;
use vault_core::types::{AccountId, Balance};

/// Spendable balance credited to an account when the store is first created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub account: AccountId,
    /// Base units (u128 as string).
    pub amount: String,
}

impl GenesisBalance {
    pub fn amount(&self) -> anyhow::Result<Balance> {
        self.amount
            .parse()
            .with_context(|| format!("genesis balance for {}: bad amount {:?}", self.account, self.amount))
    }
}

/// Node configuration file (`--config`, JSON).
///
/// ```json
/// {
///   "vault": { "owner": "<base58>", "withdraw_policy": "owner" },
///   "genesis_balances": [ { "account": "<base58>", "amount": "1000000000" } ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub vault: VaultConfig,
    #[serde(default)]
    pub genesis_balances: Vec<GenesisBalance>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading node config from {}", path.display()))?;
        serde_json::from_str(&json).context("parsing node config JSON")
    }

    /// Merge the optional config file with command-line overrides. The owner
    /// must come from one of the two.
    pub fn resolve(
        file: Option<NodeConfig>,
        owner: Option<AccountId>,
        withdraw_policy: Option<WithdrawPolicy>,
    ) -> anyhow::Result<NodeConfig> {
        let mut cfg = match (file, owner) {
            (Some(mut cfg), Some(owner)) => {
                cfg.vault.owner = owner;
                cfg
            }
            (Some(cfg), None) => cfg,
            (None, Some(owner)) => NodeConfig {
                vault: VaultConfig::new(owner),
                genesis_balances: Vec::new(),
            },
            (None, None) => bail!("no owner configured: pass --owner or a --config file"),
        };
        if let Some(policy) = withdraw_policy {
            cfg.vault.withdraw_policy = policy;
        }
        if cfg.vault.owner.is_zero() {
            bail!("the null account cannot own the vault");
        }
        Ok(cfg)
    }
}

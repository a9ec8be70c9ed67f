use serde::{Deserialize, Serialize};

use vault_core::event::VaultEvent;
use vault_core::grant::Grant;

/// JSON-serializable grant summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcGrant {
    pub grant_id: u64,
    pub donor: String,
    pub beneficiary: String,
    /// Base units (u128 as string).
    pub amount: String,
    pub unlock_at: i64,
    pub created_at: i64,
    pub withdrawn: bool,
    pub withdrawn_at: Option<i64>,
    /// "Active" or "Withdrawn".
    pub status: String,
}

impl From<&Grant> for RpcGrant {
    fn from(g: &Grant) -> Self {
        Self {
            grant_id: g.id.0,
            donor: g.donor.to_b58(),
            beneficiary: g.beneficiary.to_b58(),
            amount: g.amount.to_string(),
            unlock_at: g.unlock_at,
            created_at: g.created_at,
            withdrawn: g.withdrawn,
            withdrawn_at: g.withdrawn_at,
            status: g.status_label().to_string(),
        }
    }
}

/// Flattened event record returned by `vault_getEvents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEvent {
    /// "GrantOffered" or "GrantWithdrawn".
    pub kind: String,
    pub grant_id: u64,
    pub beneficiary: String,
    pub amount: String,
    pub at: i64,
    /// Set on GrantOffered.
    pub donor: Option<String>,
    /// Set on GrantOffered.
    pub unlock_at: Option<i64>,
    /// Set on GrantWithdrawn: the caller that triggered the release.
    pub by: Option<String>,
}

impl From<&VaultEvent> for RpcEvent {
    fn from(e: &VaultEvent) -> Self {
        match e {
            VaultEvent::GrantOffered { grant_id, donor, beneficiary, amount, unlock_at, at } => {
                Self {
                    kind: e.kind().to_string(),
                    grant_id: grant_id.0,
                    beneficiary: beneficiary.to_b58(),
                    amount: amount.to_string(),
                    at: *at,
                    donor: Some(donor.to_b58()),
                    unlock_at: Some(*unlock_at),
                    by: None,
                }
            }
            VaultEvent::GrantWithdrawn { grant_id, beneficiary, amount, by, at } => Self {
                kind: e.kind().to_string(),
                grant_id: grant_id.0,
                beneficiary: beneficiary.to_b58(),
                amount: amount.to_string(),
                at: *at,
                donor: None,
                unlock_at: None,
                by: Some(by.to_b58()),
            },
        }
    }
}

/// Node and registry summary returned by `vault_getInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcVaultInfo {
    pub protocol: String,
    pub api_version: String,
    pub node_version: String,
    pub owner: String,
    pub withdraw_policy: String,
    pub units_per_coin: String,
    pub grant_count: u64,
    pub event_count: u64,
    /// u128 as string.
    pub custody: String,
    /// The registry clock's current reading.
    pub now: i64,
}

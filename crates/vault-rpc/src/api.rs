use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcEvent, RpcGrant, RpcVaultInfo};

/// Vault JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "vault_" via `namespace = "vault"`.
/// Accounts are base-58 strings; amounts are u128 decimal strings.
#[rpc(server, namespace = "vault")]
pub trait VaultApi {
    /// Deposit `value` from `caller` for `beneficiary`, releasable at or after
    /// `unlock_at` (unix seconds). Returns the new grant id.
    #[method(name = "offerGrant")]
    async fn offer_grant(
        &self,
        caller: String,
        beneficiary: String,
        unlock_at: i64,
        value: String,
    ) -> RpcResult<u64>;

    /// Release grant `grant_id` to its beneficiary on behalf of `caller`.
    #[method(name = "withdraw")]
    async fn withdraw(&self, caller: String, grant_id: u64) -> RpcResult<bool>;

    #[method(name = "owner")]
    async fn owner(&self) -> RpcResult<String>;

    /// Get a grant by id, or null if it does not exist.
    #[method(name = "getGrant")]
    async fn get_grant(&self, grant_id: u64) -> RpcResult<Option<RpcGrant>>;

    /// Grants in id order. `limit` is capped at 200.
    #[method(name = "getGrants")]
    async fn get_grants(&self, offset: u32, limit: u32) -> RpcResult<Vec<RpcGrant>>;

    #[method(name = "getGrantsByBeneficiary")]
    async fn get_grants_by_beneficiary(&self, account_id: String) -> RpcResult<Vec<RpcGrant>>;

    #[method(name = "getGrantsByDonor")]
    async fn get_grants_by_donor(&self, account_id: String) -> RpcResult<Vec<RpcGrant>>;

    #[method(name = "describeGrant")]
    async fn describe_grant(&self, grant_id: u64) -> RpcResult<String>;

    /// Value currently held in custody.
    #[method(name = "getCustody")]
    async fn get_custody(&self) -> RpcResult<String>;

    /// Recompute custody from active grants. Errors if it disagrees with the
    /// recorded balance.
    #[method(name = "audit")]
    async fn audit(&self) -> RpcResult<String>;

    #[method(name = "getBalance")]
    async fn get_balance(&self, account_id: String) -> RpcResult<String>;

    /// Event log in emission order. `limit` is capped at 200.
    #[method(name = "getEvents")]
    async fn get_events(&self, offset: u32, limit: u32) -> RpcResult<Vec<RpcEvent>>;

    #[method(name = "getInfo")]
    async fn get_info(&self) -> RpcResult<RpcVaultInfo>;
}

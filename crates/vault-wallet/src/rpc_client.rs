use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde_json::json;

use vault_core::types::{AccountId, Balance, GrantId, Timestamp};
use vault_rpc::{RpcEvent, RpcGrant, RpcVaultInfo};

/// JSON-RPC 2.0 client used by the wallet to talk to a running node.
///
/// Plain HTTP POST with serde_json rather than the jsonrpsee client.
pub struct WalletRpcClient {
    url: String,
    client: reqwest::Client,
}

impl WalletRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("connecting to node at {}", self.url))?;

        let json: serde_json::Value = resp.json().await.context("parsing RPC response")?;

        if let Some(err) = json.get("error") {
            let code = err["code"].as_i64().unwrap_or_default();
            let message = err["message"].as_str().unwrap_or("unknown error");
            bail!("{method} failed ({code}): {message}");
        }

        Ok(json["result"].clone())
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<T> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).with_context(|| format!("parsing {method} response"))
    }

    async fn call_balance(&self, method: &str, params: serde_json::Value) -> anyhow::Result<Balance> {
        let s: String = self.call_as(method, params).await?;
        s.parse().with_context(|| format!("parsing {method} amount {s:?}"))
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    pub async fn offer_grant(
        &self,
        caller: &AccountId,
        beneficiary: &AccountId,
        unlock_at: Timestamp,
        amount: Balance,
    ) -> anyhow::Result<GrantId> {
        let id: u64 = self
            .call_as(
                "vault_offerGrant",
                json!([caller.to_b58(), beneficiary.to_b58(), unlock_at, amount.to_string()]),
            )
            .await?;
        Ok(GrantId(id))
    }

    pub async fn withdraw(&self, caller: &AccountId, id: GrantId) -> anyhow::Result<bool> {
        self.call_as("vault_withdraw", json!([caller.to_b58(), id.0]))
            .await
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub async fn owner(&self) -> anyhow::Result<String> {
        self.call_as("vault_owner", json!([])).await
    }

    pub async fn get_grant(&self, id: GrantId) -> anyhow::Result<Option<RpcGrant>> {
        self.call_as("vault_getGrant", json!([id.0])).await
    }

    pub async fn get_grants(&self, offset: u32, limit: u32) -> anyhow::Result<Vec<RpcGrant>> {
        self.call_as("vault_getGrants", json!([offset, limit])).await
    }

    pub async fn get_grants_by_beneficiary(&self, account: &AccountId) -> anyhow::Result<Vec<RpcGrant>> {
        self.call_as("vault_getGrantsByBeneficiary", json!([account.to_b58()]))
            .await
    }

    pub async fn get_grants_by_donor(&self, account: &AccountId) -> anyhow::Result<Vec<RpcGrant>> {
        self.call_as("vault_getGrantsByDonor", json!([account.to_b58()]))
            .await
    }

    pub async fn describe_grant(&self, id: GrantId) -> anyhow::Result<String> {
        self.call_as("vault_describeGrant", json!([id.0])).await
    }

    pub async fn get_balance(&self, account: &AccountId) -> anyhow::Result<Balance> {
        self.call_balance("vault_getBalance", json!([account.to_b58()]))
            .await
    }

    pub async fn get_custody(&self) -> anyhow::Result<Balance> {
        self.call_balance("vault_getCustody", json!([])).await
    }

    pub async fn audit(&self) -> anyhow::Result<Balance> {
        self.call_balance("vault_audit", json!([])).await
    }

    pub async fn get_events(&self, offset: u32, limit: u32) -> anyhow::Result<Vec<RpcEvent>> {
        self.call_as("vault_getEvents", json!([offset, limit])).await
    }

    pub async fn get_info(&self) -> anyhow::Result<RpcVaultInfo> {
        self.call_as("vault_getInfo", json!([])).await
    }
}

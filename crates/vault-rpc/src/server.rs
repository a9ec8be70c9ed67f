use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use vault_core::constants::{API_VERSION, PROTOCOL_NAME, UNITS_PER_COIN};
use vault_core::error::VaultError;
use vault_core::types::{AccountId, Balance, CallContext, GrantId};
use vault_state::GrantRegistry;

use crate::api::VaultApiServer;
use crate::call::VaultCall;
use crate::types::{RpcEvent, RpcGrant, RpcVaultInfo};

// ── Error codes ───────────────────────────────────────────────────────────────

pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

pub const INVALID_AMOUNT: i32 = -32001;
pub const INVALID_BENEFICIARY: i32 = -32002;
pub const UNLOCK_TIME_NOT_FUTURE: i32 = -32003;
pub const GRANT_NOT_FOUND: i32 = -32004;
pub const ALREADY_WITHDRAWN: i32 = -32005;
pub const NOT_YET_UNLOCKED: i32 = -32006;
pub const UNAUTHORIZED: i32 = -32007;
pub const INSUFFICIENT_BALANCE: i32 = -32008;
pub const TRANSFER_FAILED: i32 = -32009;
pub const REENTRANT: i32 = -32010;
pub const CUSTODY_MISMATCH: i32 = -32011;
pub const REFUND_FAILED: i32 = -32012;

/// Stable JSON-RPC error code for a registry error.
pub fn error_code(e: &VaultError) -> i32 {
    match e {
        VaultError::InvalidAmount => INVALID_AMOUNT,
        VaultError::InvalidBeneficiary => INVALID_BENEFICIARY,
        VaultError::UnlockTimeNotFuture { .. } => UNLOCK_TIME_NOT_FUTURE,
        VaultError::NotFound(_) => GRANT_NOT_FOUND,
        VaultError::AlreadyWithdrawn(_) => ALREADY_WITHDRAWN,
        VaultError::NotYetUnlocked { .. } => NOT_YET_UNLOCKED,
        VaultError::Unauthorized => UNAUTHORIZED,
        VaultError::InsufficientBalance { .. } => INSUFFICIENT_BALANCE,
        VaultError::TransferFailed(_) => TRANSFER_FAILED,
        VaultError::Reentrant => REENTRANT,
        VaultError::CustodyMismatch { .. } => CUSTODY_MISMATCH,
        VaultError::RefundFailed { .. } => REFUND_FAILED,
        VaultError::InvalidAccountId(_) => INVALID_PARAMS,
        VaultError::BalanceOverflow
        | VaultError::OwnerMismatch { .. }
        | VaultError::Serialization(_)
        | VaultError::Storage(_) => INTERNAL_ERROR,
    }
}

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn vault_err(e: VaultError) -> ErrorObject<'static> {
    if !e.is_rejection() {
        warn!(error = %e, "RPC: registry failure");
    }
    rpc_err(error_code(&e), e.to_string())
}

fn parse_account(s: &str) -> Result<AccountId, ErrorObject<'static>> {
    AccountId::from_b58(s).map_err(|e| rpc_err(INVALID_PARAMS, e.to_string()))
}

fn parse_amount(s: &str) -> Result<Balance, ErrorObject<'static>> {
    s.parse::<Balance>()
        .map_err(|e| rpc_err(INVALID_PARAMS, format!("invalid amount {s:?}: {e}")))
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    /// Read side. Queries go straight to the registry.
    pub registry: Arc<GrantRegistry>,
    /// Write side. Mutations are queued to the node's writer task.
    pub call_sender: Option<mpsc::Sender<VaultCall>>,
    pub node_version: String,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr`. Returns the bound address (useful
    /// with port 0) and a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<(SocketAddr, ServerHandle)> {
        let server = Server::builder().build(addr).await?;
        let bound = server.local_addr()?;
        let module = self.into_rpc();
        let handle = server.start(module);
        info!(addr = %bound, "RPC server started");
        Ok((bound, handle))
    }

    async fn submit<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, VaultError>>) -> VaultCall,
    ) -> RpcResult<T> {
        let Some(sender) = &self.state.call_sender else {
            warn!("RPC: mutating call received but no call queue configured");
            return Err(rpc_err(INTERNAL_ERROR, "node call queue not connected"));
        };
        let (tx, rx) = oneshot::channel();
        sender
            .send(make(tx))
            .await
            .map_err(|_| rpc_err(INTERNAL_ERROR, "node call queue closed"))?;
        rx.await
            .map_err(|_| rpc_err(INTERNAL_ERROR, "call dropped before completion"))?
            .map_err(vault_err)
    }
}

#[async_trait]
impl VaultApiServer for RpcServer {
    async fn offer_grant(
        &self,
        caller: String,
        beneficiary: String,
        unlock_at: i64,
        value: String,
    ) -> RpcResult<u64> {
        let ctx = CallContext::new(parse_account(&caller)?, parse_amount(&value)?);
        let beneficiary = parse_account(&beneficiary)?;
        let id = self
            .submit(|reply| VaultCall::OfferGrant { ctx, beneficiary, unlock_at, reply })
            .await?;
        Ok(id.0)
    }

    async fn withdraw(&self, caller: String, grant_id: u64) -> RpcResult<bool> {
        let caller = parse_account(&caller)?;
        self.submit(|reply| VaultCall::Withdraw {
            caller,
            grant_id: GrantId(grant_id),
            reply,
        })
        .await?;
        Ok(true)
    }

    async fn owner(&self) -> RpcResult<String> {
        Ok(self.state.registry.owner().to_b58())
    }

    async fn get_grant(&self, grant_id: u64) -> RpcResult<Option<RpcGrant>> {
        let grant = self
            .state
            .registry
            .find_grant(GrantId(grant_id))
            .map_err(vault_err)?;
        Ok(grant.as_ref().map(RpcGrant::from))
    }

    async fn get_grants(&self, offset: u32, limit: u32) -> RpcResult<Vec<RpcGrant>> {
        let grants = self.state.registry.grants(offset, limit).map_err(vault_err)?;
        Ok(grants.iter().map(RpcGrant::from).collect())
    }

    async fn get_grants_by_beneficiary(&self, account_id: String) -> RpcResult<Vec<RpcGrant>> {
        let id = parse_account(&account_id)?;
        let grants = self
            .state
            .registry
            .grants_for_beneficiary(&id)
            .map_err(vault_err)?;
        Ok(grants.iter().map(RpcGrant::from).collect())
    }

    async fn get_grants_by_donor(&self, account_id: String) -> RpcResult<Vec<RpcGrant>> {
        let id = parse_account(&account_id)?;
        let grants = self.state.registry.grants_for_donor(&id).map_err(vault_err)?;
        Ok(grants.iter().map(RpcGrant::from).collect())
    }

    async fn describe_grant(&self, grant_id: u64) -> RpcResult<String> {
        self.state
            .registry
            .describe(GrantId(grant_id))
            .map_err(vault_err)
    }

    async fn get_custody(&self) -> RpcResult<String> {
        let custody = self.state.registry.custody().map_err(vault_err)?;
        Ok(custody.to_string())
    }

    async fn audit(&self) -> RpcResult<String> {
        let custody = self.state.registry.audit().map_err(vault_err)?;
        Ok(custody.to_string())
    }

    async fn get_balance(&self, account_id: String) -> RpcResult<String> {
        let id = parse_account(&account_id)?;
        let balance = self.state.registry.balance(&id).map_err(vault_err)?;
        Ok(balance.to_string())
    }

    async fn get_events(&self, offset: u32, limit: u32) -> RpcResult<Vec<RpcEvent>> {
        let events = self.state.registry.events(offset, limit).map_err(vault_err)?;
        Ok(events.iter().map(RpcEvent::from).collect())
    }

    async fn get_info(&self) -> RpcResult<RpcVaultInfo> {
        let registry = &self.state.registry;
        Ok(RpcVaultInfo {
            protocol: PROTOCOL_NAME.to_string(),
            api_version: API_VERSION.to_string(),
            node_version: self.state.node_version.clone(),
            owner: registry.owner().to_b58(),
            withdraw_policy: registry.withdraw_policy().to_string(),
            units_per_coin: UNITS_PER_COIN.to_string(),
            grant_count: registry.grant_count().map_err(vault_err)?,
            event_count: registry.event_count().map_err(vault_err)?,
            custody: registry.custody().map_err(vault_err)?.to_string(),
            now: registry.now(),
        })
    }
}

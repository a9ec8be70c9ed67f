use tokio::sync::oneshot;
use tracing::debug;

use vault_core::error::VaultError;
use vault_core::types::{AccountId, CallContext, GrantId, Timestamp};
use vault_state::GrantRegistry;

/// A mutating registry call forwarded from the RPC layer to the node's
/// single writer task. The outcome goes back on `reply`.
#[derive(Debug)]
pub enum VaultCall {
    OfferGrant {
        ctx: CallContext,
        beneficiary: AccountId,
        unlock_at: Timestamp,
        reply: oneshot::Sender<Result<GrantId, VaultError>>,
    },
    Withdraw {
        caller: AccountId,
        grant_id: GrantId,
        reply: oneshot::Sender<Result<(), VaultError>>,
    },
}

impl VaultCall {
    pub fn name(&self) -> &'static str {
        match self {
            VaultCall::OfferGrant { .. } => "offerGrant",
            VaultCall::Withdraw { .. } => "withdraw",
        }
    }

    /// Run the call against `registry` and send the result to the waiting
    /// RPC handler. A dropped receiver is not an error.
    pub fn apply(self, registry: &GrantRegistry) {
        match self {
            VaultCall::OfferGrant { ctx, beneficiary, unlock_at, reply } => {
                let result = registry.offer_grant(&ctx, &beneficiary, unlock_at);
                if reply.send(result).is_err() {
                    debug!("offerGrant caller went away before the reply");
                }
            }
            VaultCall::Withdraw { caller, grant_id, reply } => {
                let result = registry.withdraw(&caller, grant_id);
                if reply.send(result).is_err() {
                    debug!(grant_id = grant_id.0, "withdraw caller went away before the reply");
                }
            }
        }
    }
}

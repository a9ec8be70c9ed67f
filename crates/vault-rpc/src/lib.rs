//! vault-rpc
//!
//! JSON-RPC 2.0 server for Vault nodes.
//!
//! Namespace: "vault"
//! Methods:
//!   vault_offerGrant              deposit value for a beneficiary (queued)
//!   vault_withdraw                release an unlocked grant (queued)
//!   vault_owner                   controlling principal
//!   vault_getGrant                one grant by id
//!   vault_getGrants               paged grant listing
//!   vault_getGrantsByBeneficiary  grants payable to an account
//!   vault_getGrantsByDonor        grants funded by an account
//!   vault_describeGrant           human-readable grant summary
//!   vault_getCustody              value currently held in custody
//!   vault_audit                   recompute custody from active grants
//!   vault_getBalance              ledger balance of an account
//!   vault_getEvents               paged event log
//!   vault_getInfo                 protocol, owner, policy and counters

pub mod api;
pub mod call;
pub mod server;
pub mod types;

pub use call::VaultCall;
pub use server::{error_code, RpcServer, RpcServerState};
pub use types::{RpcEvent, RpcGrant, RpcVaultInfo};

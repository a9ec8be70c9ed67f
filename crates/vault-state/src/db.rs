use std::path::Path;

use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::Transactional;

use vault_core::constants::ACCOUNT_ID_LEN;
use vault_core::error::VaultError;
use vault_core::event::VaultEvent;
use vault_core::grant::Grant;
use vault_core::types::{AccountId, Balance, GrantId};

const META_OWNER: &str = "owner";
const META_NEXT_GRANT_ID: &str = "next_grant_id";
const META_CUSTODY: &str = "custody";
const META_NEXT_EVENT_SEQ: &str = "next_event_seq";
const META_GENESIS: &str = "genesis_applied";

/// Persistent vault store backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   grants     GrantId BE bytes → bincode(Grant)
///   balances   AccountId bytes  → u128 LE (value-transfer ledger)
///   events     seq BE bytes     → bincode(VaultEvent)
///   meta       utf8 key bytes   → raw bytes
pub struct StateDb {
    _db: sled::Db,
    grants: sled::Tree,
    balances: sled::Tree,
    events: sled::Tree,
    meta: sled::Tree,
}

fn storage(e: sled::Error) -> VaultError {
    VaultError::Storage(e.to_string())
}

fn tx_error(e: TransactionError<VaultError>) -> VaultError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => storage(e),
    }
}

fn decode_u64(bytes: Option<sled::IVec>) -> Result<u64, VaultError> {
    match bytes {
        None => Ok(0),
        Some(b) => {
            let arr: [u8; 8] = b[..]
                .try_into()
                .map_err(|_| VaultError::Serialization("u64 meta value has wrong length".into()))?;
            Ok(u64::from_be_bytes(arr))
        }
    }
}

fn decode_balance(bytes: Option<sled::IVec>) -> Result<Balance, VaultError> {
    match bytes {
        None => Ok(0),
        Some(b) => {
            let arr: [u8; 16] = b[..]
                .try_into()
                .map_err(|_| VaultError::Serialization("balance value has wrong length".into()))?;
            Ok(u128::from_le_bytes(arr))
        }
    }
}

impl StateDb {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VaultError> {
        let db = sled::open(path).map_err(storage)?;
        let grants   = db.open_tree("grants").map_err(storage)?;
        let balances = db.open_tree("balances").map_err(storage)?;
        let events   = db.open_tree("events").map_err(storage)?;
        let meta     = db.open_tree("meta").map_err(storage)?;
        Ok(Self { _db: db, grants, balances, events, meta })
    }

    // ── Grants ───────────────────────────────────────────────────────────────

    pub fn get_grant(&self, id: GrantId) -> Result<Option<Grant>, VaultError> {
        match self.grants.get(id.to_key()).map_err(storage)? {
            Some(bytes) => {
                let grant = bincode::deserialize(&bytes)
                    .map_err(|e| VaultError::Serialization(e.to_string()))?;
                Ok(Some(grant))
            }
            None => Ok(None),
        }
    }

    /// Identifier the next created grant will receive.
    pub fn next_grant_id(&self) -> Result<GrantId, VaultError> {
        let raw = self.meta.get(META_NEXT_GRANT_ID).map_err(storage)?;
        Ok(GrantId(decode_u64(raw)?))
    }

    /// Number of grants ever created (withdrawn ones included).
    pub fn grant_count(&self) -> Result<u64, VaultError> {
        Ok(self.next_grant_id()?.0)
    }

    /// Grants in insertion order, skipping `offset` and returning at most `limit`.
    pub fn iter_grants(&self, offset: usize, limit: usize) -> Result<Vec<Grant>, VaultError> {
        let mut out = Vec::new();
        for item in self.grants.iter().skip(offset).take(limit) {
            let (_, bytes) = item.map_err(storage)?;
            let grant = bincode::deserialize(&bytes)
                .map_err(|e| VaultError::Serialization(e.to_string()))?;
            out.push(grant);
        }
        Ok(out)
    }

    /// All grants matching `pred`, in insertion order.
    pub fn grants_where<F>(&self, pred: F) -> Result<Vec<Grant>, VaultError>
    where
        F: Fn(&Grant) -> bool,
    {
        let mut out = Vec::new();
        for item in self.grants.iter() {
            let (_, bytes) = item.map_err(storage)?;
            let grant: Grant = bincode::deserialize(&bytes)
                .map_err(|e| VaultError::Serialization(e.to_string()))?;
            if pred(&grant) {
                out.push(grant);
            }
        }
        Ok(out)
    }

    /// Append a new grant and set the custody balance in one transaction.
    ///
    /// Fails without writing if `grant.id` is not the next free identifier.
    pub fn commit_new_grant(&self, grant: &Grant, custody: Balance) -> Result<(), VaultError> {
        let bytes = bincode::serialize(grant)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;
        let key = grant.id.to_key();
        let next = grant.id.next().to_key();
        let custody_bytes = custody.to_le_bytes();

        (&self.grants, &self.meta)
            .transaction(|(grants, meta)| -> ConflictableTransactionResult<(), VaultError> {
                let expected = decode_u64(meta.get(META_NEXT_GRANT_ID)?)
                    .map_err(ConflictableTransactionError::Abort)?;
                if expected != grant.id.0 {
                    return Err(ConflictableTransactionError::Abort(VaultError::Storage(
                        format!("grant id {} is not the next id {}", grant.id, expected),
                    )));
                }
                grants.insert(&key[..], bytes.as_slice())?;
                meta.insert(META_NEXT_GRANT_ID, &next[..])?;
                meta.insert(META_CUSTODY, &custody_bytes[..])?;
                Ok(())
            })
            .map_err(tx_error)
    }

    /// Overwrite an existing grant record and set the custody balance in one
    /// transaction.
    pub fn commit_grant_update(&self, grant: &Grant, custody: Balance) -> Result<(), VaultError> {
        let bytes = bincode::serialize(grant)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;
        let key = grant.id.to_key();
        let custody_bytes = custody.to_le_bytes();

        (&self.grants, &self.meta)
            .transaction(|(grants, meta)| -> ConflictableTransactionResult<(), VaultError> {
                if grants.get(&key[..])?.is_none() {
                    return Err(ConflictableTransactionError::Abort(VaultError::NotFound(grant.id)));
                }
                grants.insert(&key[..], bytes.as_slice())?;
                meta.insert(META_CUSTODY, &custody_bytes[..])?;
                Ok(())
            })
            .map_err(tx_error)
    }

    // ── Custody / owner ──────────────────────────────────────────────────────

    /// Total value currently held for active grants.
    pub fn custody(&self) -> Result<Balance, VaultError> {
        decode_balance(self.meta.get(META_CUSTODY).map_err(storage)?)
    }

    pub fn get_owner(&self) -> Result<Option<AccountId>, VaultError> {
        match self.meta.get(META_OWNER).map_err(storage)? {
            Some(bytes) => {
                let arr: [u8; ACCOUNT_ID_LEN] = bytes[..]
                    .try_into()
                    .map_err(|_| VaultError::Serialization("stored owner has wrong length".into()))?;
                Ok(Some(AccountId::from_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Record the owner. Only succeeds if no owner is stored yet or the stored
    /// owner is the same principal.
    pub fn init_owner(&self, owner: &AccountId) -> Result<(), VaultError> {
        let swapped = self
            .meta
            .compare_and_swap(META_OWNER, None as Option<&[u8]>, Some(&owner.as_bytes()[..]))
            .map_err(storage)?;
        match swapped {
            Ok(()) => Ok(()),
            Err(cas) => {
                let current = cas.current.map(|v| v.to_vec()).unwrap_or_default();
                if current.as_slice() == owner.as_bytes() {
                    Ok(())
                } else {
                    let stored = match <[u8; ACCOUNT_ID_LEN]>::try_from(current.as_slice()) {
                        Ok(arr) => AccountId::from_bytes(arr).to_b58(),
                        Err(_) => hex_preview(&current),
                    };
                    Err(VaultError::OwnerMismatch {
                        stored,
                        configured: owner.to_b58(),
                    })
                }
            }
        }
    }

    // ── Balances (value-transfer ledger) ─────────────────────────────────────

    pub fn balance(&self, account: &AccountId) -> Result<Balance, VaultError> {
        decode_balance(self.balances.get(account.as_bytes()).map_err(storage)?)
    }

    /// Add `amount` to `account`.
    pub fn credit(&self, account: &AccountId, amount: Balance) -> Result<Balance, VaultError> {
        let key = account.as_bytes();
        self.balances
            .transaction(|tree| -> ConflictableTransactionResult<Balance, VaultError> {
                let have = decode_balance(tree.get(&key[..])?)
                    .map_err(ConflictableTransactionError::Abort)?;
                let after = have
                    .checked_add(amount)
                    .ok_or(ConflictableTransactionError::Abort(VaultError::BalanceOverflow))?;
                tree.insert(&key[..], &after.to_le_bytes()[..])?;
                Ok(after)
            })
            .map_err(tx_error)
    }

    /// Remove `amount` from `account`, failing if the balance is short.
    pub fn debit(&self, account: &AccountId, amount: Balance) -> Result<Balance, VaultError> {
        let key = account.as_bytes();
        self.balances
            .transaction(|tree| -> ConflictableTransactionResult<Balance, VaultError> {
                let have = decode_balance(tree.get(&key[..])?)
                    .map_err(ConflictableTransactionError::Abort)?;
                if have < amount {
                    return Err(ConflictableTransactionError::Abort(
                        VaultError::InsufficientBalance { need: amount, have },
                    ));
                }
                let after = have - amount;
                tree.insert(&key[..], &after.to_le_bytes()[..])?;
                Ok(after)
            })
            .map_err(tx_error)
    }

    // ── Events ───────────────────────────────────────────────────────────────

    /// Append to the audit log. Returns the event's sequence number.
    pub fn append_event(&self, event: &VaultEvent) -> Result<u64, VaultError> {
        let bytes = bincode::serialize(event)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;

        (&self.events, &self.meta)
            .transaction(|(events, meta)| -> ConflictableTransactionResult<u64, VaultError> {
                let seq = decode_u64(meta.get(META_NEXT_EVENT_SEQ)?)
                    .map_err(ConflictableTransactionError::Abort)?;
                events.insert(&seq.to_be_bytes()[..], bytes.as_slice())?;
                meta.insert(META_NEXT_EVENT_SEQ, &(seq + 1).to_be_bytes()[..])?;
                Ok(seq)
            })
            .map_err(tx_error)
    }

    pub fn iter_events(&self, offset: usize, limit: usize) -> Result<Vec<VaultEvent>, VaultError> {
        let mut out = Vec::new();
        for item in self.events.iter().skip(offset).take(limit) {
            let (_, bytes) = item.map_err(storage)?;
            let event = bincode::deserialize(&bytes)
                .map_err(|e| VaultError::Serialization(e.to_string()))?;
            out.push(event);
        }
        Ok(out)
    }

    pub fn event_count(&self) -> Result<u64, VaultError> {
        decode_u64(self.meta.get(META_NEXT_EVENT_SEQ).map_err(storage)?)
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    /// True once genesis balances have been credited to this store.
    pub fn genesis_applied(&self) -> Result<bool, VaultError> {
        Ok(self.meta.contains_key(META_GENESIS).map_err(storage)?)
    }

    /// Credit every genesis balance and set the applied marker in one
    /// transaction. Returns `false` without writing if the store already has
    /// its genesis, so a failed or repeated start never credits twice.
    pub fn apply_genesis(&self, balances: &[(AccountId, Balance)]) -> Result<bool, VaultError> {
        (&self.balances, &self.meta)
            .transaction(|(tree, meta)| -> ConflictableTransactionResult<bool, VaultError> {
                if meta.get(META_GENESIS)?.is_some() {
                    return Ok(false);
                }
                for (account, amount) in balances {
                    let key = account.as_bytes();
                    let have = decode_balance(tree.get(&key[..])?)
                        .map_err(ConflictableTransactionError::Abort)?;
                    let after = have
                        .checked_add(*amount)
                        .ok_or(ConflictableTransactionError::Abort(VaultError::BalanceOverflow))?;
                    tree.insert(&key[..], &after.to_le_bytes()[..])?;
                }
                meta.insert(META_GENESIS, &b""[..])?;
                Ok(true)
            })
            .map_err(tx_error)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), VaultError> {
        self._db.flush().map_err(storage)?;
        Ok(())
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

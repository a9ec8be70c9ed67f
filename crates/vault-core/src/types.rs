use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::ACCOUNT_ID_LEN;
use crate::error::VaultError;

/// Amount in base units. u128 leaves headroom for 18-decimal assets.
pub type Balance = u128;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── AccountId ────────────────────────────────────────────────────────────────

/// 32-byte principal identifier. The all-zero id is the null account and is
/// never a valid beneficiary.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub [u8; ACCOUNT_ID_LEN]);

impl AccountId {
    /// The null account.
    pub const ZERO: AccountId = AccountId([0u8; ACCOUNT_ID_LEN]);

    pub fn from_bytes(b: [u8; ACCOUNT_ID_LEN]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ACCOUNT_ID_LEN]
    }

    /// Deterministic account derived as BLAKE3(label). Used for named dev
    /// accounts ("alice", "treasury") in configs and the wallet.
    pub fn from_label(label: &str) -> Self {
        Self(*blake3::hash(label.as_bytes()).as_bytes())
    }

    /// Base-58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, VaultError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| VaultError::InvalidAccountId(format!("{s}: {e}")))?;
        let arr: [u8; ACCOUNT_ID_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            VaultError::InvalidAccountId(format!(
                "{s}: expected {ACCOUNT_ID_LEN} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

/// Command-line form: `@label` names a dev account derived with
/// [`AccountId::from_label`], anything else is parsed as base-58.
impl FromStr for AccountId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('@') {
            Some(label) if !label.is_empty() => Ok(Self::from_label(label)),
            _ => Self::from_b58(s),
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", &self.to_b58()[..8])
    }
}

// Base-58 string in JSON, raw bytes in bincode.
impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_b58())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            AccountId::from_b58(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; ACCOUNT_ID_LEN]>::deserialize(deserializer).map(AccountId)
        }
    }
}

// ── GrantId ──────────────────────────────────────────────────────────────────

/// Registry-assigned grant identifier. Assigned in insertion order; the
/// order is the identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub struct GrantId(pub u64);

impl GrantId {
    /// Big-endian key bytes so sled iteration follows insertion order.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = key.try_into().ok()?;
        Some(Self(u64::from_be_bytes(arr)))
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── CallContext ──────────────────────────────────────────────────────────────

/// Authenticated caller plus the value attached to the call. Authentication
/// happens upstream; the registry trusts `caller` as given.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub caller: AccountId,
    /// Value attached to the call, in base units.
    pub value: Balance,
}

impl CallContext {
    pub fn new(caller: AccountId, value: Balance) -> Self {
        Self { caller, value }
    }

    /// A call carrying no value.
    pub fn bare(caller: AccountId) -> Self {
        Self { caller, value: 0 }
    }
}

/// ─── Vault Protocol Constants ───────────────────────────────────────────────
///
/// Amounts are always carried in base units (the smallest indivisible unit
/// of the custodied asset). One display coin is 10^9 base units.

// ── Units ────────────────────────────────────────────────────────────────────

/// 1 display coin expressed in base units.
pub const UNITS_PER_COIN: u128 = 1_000_000_000;

// ── Identity ─────────────────────────────────────────────────────────────────

/// Length of an account identifier in bytes.
pub const ACCOUNT_ID_LEN: usize = 32;

// ── Query limits ─────────────────────────────────────────────────────────────

/// Default page size for paged grant / event listings.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Hard cap on any paged listing.
pub const MAX_PAGE_SIZE: u32 = 200;

// ── Versioning ───────────────────────────────────────────────────────────────

/// Protocol name reported by `vault_getInfo`.
pub const PROTOCOL_NAME: &str = "Vault";

/// JSON-RPC API revision. Bump on breaking method or type changes.
pub const API_VERSION: &str = "1";

//! vault-state
//!
//! Persistent grant registry. `StateDb` holds grants, balances, the event
//! log and registry metadata in sled; `GrantRegistry` owns every state
//! transition on top of it. Time, value movement and event delivery are
//! injected through the `Clock`, `ValueTransfer` and `EventSink` traits.

pub mod access;
pub mod clock;
pub mod db;
pub mod events;
pub mod query;
pub mod registry;
pub mod transfer;

pub use access::AccessControl;
pub use clock::{Clock, ManualClock, SystemClock};
pub use db::StateDb;
pub use events::{EventSink, MemorySink, TracingSink};
pub use query::GrantQuery;
pub use registry::{validate_offer, GrantRegistry};
pub use transfer::{LedgerTransfer, ValueTransfer};

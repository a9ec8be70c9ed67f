pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod grant;
pub mod policy;
pub mod types;

pub use config::VaultConfig;
pub use constants::*;
pub use error::VaultError;
pub use event::VaultEvent;
pub use grant::Grant;
pub use policy::WithdrawPolicy;
pub use types::*;

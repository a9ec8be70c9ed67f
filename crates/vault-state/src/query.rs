use vault_core::error::VaultError;
use vault_core::grant::Grant;
use vault_core::types::{GrantId, Timestamp};

use crate::db::StateDb;

/// Read-only helpers over stored grants.
pub struct GrantQuery<'a> {
    db: &'a StateDb,
}

impl<'a> GrantQuery<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    pub fn get(&self, id: GrantId) -> Result<Option<Grant>, VaultError> {
        self.db.get_grant(id)
    }

    /// Returns true if the grant can be released at `now` (unlock_at <= now).
    pub fn is_unlocked(&self, id: GrantId, now: Timestamp) -> Result<bool, VaultError> {
        match self.db.get_grant(id)? {
            Some(g) => Ok(g.is_unlocked(now)),
            None => Err(VaultError::NotFound(id)),
        }
    }

    /// Human-readable summary of a grant's state.
    pub fn describe(&self, id: GrantId, now: Timestamp) -> Result<String, VaultError> {
        let g = self.db.get_grant(id)?.ok_or(VaultError::NotFound(id))?;

        let status = match g.withdrawn_at {
            Some(at) => format!("Withdrawn at Unix timestamp {}", at),
            None if g.withdrawn => "Withdrawn".to_string(),
            None => {
                let remaining = g.unlock_at - now;
                if remaining > 0 {
                    format!("Active, unlocks in {}", humanize_secs(remaining))
                } else {
                    "Active, unlocked and ready to withdraw".to_string()
                }
            }
        };

        Ok(format!(
            "Grant {} | {} units | donor: {} | beneficiary: {} | {}",
            id, g.amount, g.donor, g.beneficiary, status
        ))
    }
}

fn humanize_secs(secs: i64) -> String {
    match secs {
        s if s >= 86_400 => format!("{} days", s / 86_400),
        s if s >= 3_600 => format!("{} hours", s / 3_600),
        s if s >= 60 => format!("{} minutes", s / 60),
        s => format!("{} seconds", s),
    }
}

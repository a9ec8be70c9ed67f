use std::sync::Mutex;

use tracing::info;
use vault_core::event::VaultEvent;

/// Receives every event the registry emits, after the change has committed.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &VaultEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &VaultEvent) {
        match event {
            VaultEvent::GrantOffered { grant_id, donor, beneficiary, amount, unlock_at, at } => {
                info!(
                    grant_id = grant_id.0,
                    donor = %donor,
                    beneficiary = %beneficiary,
                    amount,
                    unlock_at,
                    at,
                    "GrantOffered"
                );
            }
            VaultEvent::GrantWithdrawn { grant_id, beneficiary, amount, by, at } => {
                info!(
                    grant_id = grant_id.0,
                    beneficiary = %beneficiary,
                    amount,
                    by = %by,
                    at,
                    "GrantWithdrawn"
                );
            }
        }
    }
}

/// Keeps events in memory. Handy for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<VaultEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VaultEvent> {
        self.events.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &VaultEvent) {
        if let Ok(mut v) = self.events.lock() {
            v.push(event.clone());
        }
    }
}

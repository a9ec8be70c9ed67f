use std::sync::atomic::{AtomicI64, Ordering};

use vault_core::types::Timestamp;

/// Source of the current time for registry calls. Readings never decrease.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock (UTC seconds), clamped so a backwards system-time step never
/// produces an earlier reading than one already handed out.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = chrono::Utc::now().timestamp();
        let prev = self.last.fetch_max(wall, Ordering::SeqCst);
        prev.max(wall)
    }
}

/// Manually driven clock for tests and dev nodes.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: AtomicI64::new(start) }
    }

    /// Move forward by `secs`. Negative steps are ignored.
    pub fn advance(&self, secs: i64) {
        if secs > 0 {
            self.now.fetch_add(secs, Ordering::SeqCst);
        }
    }

    /// Jump to `t` if it is not earlier than the current reading.
    pub fn set(&self, t: Timestamp) {
        self.now.fetch_max(t, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

use std::sync::atomic::{AtomicI64, Ordering};

use crate::model::Ms;

/// Source of "now" for the engine.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

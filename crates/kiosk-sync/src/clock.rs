use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Wall-clock source in seconds since epoch.
///
/// The progress timer compares a server-reported epoch timestamp against
/// local time; routing `now` through a trait keeps that math testable.
/// Interval/delay scheduling uses `tokio::time` directly.
pub trait Clock: Send + Sync {
    fn epoch_secs(&self) -> i64;
}

/// Real wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually advanced clock for tests.
#[derive(Clone, Default)]
pub struct ManualClock {
    secs: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(secs: i64) -> Self {
        Self {
            secs: Arc::new(AtomicI64::new(secs)),
        }
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn epoch_secs(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}

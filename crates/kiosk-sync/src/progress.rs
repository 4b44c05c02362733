use std::sync::{Arc, Mutex};

use kiosk_proto::config::ProgressConfig;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::clock::Clock;

/// Live countdown state for the active tab.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Elapsed fraction of the interval, clamped to 0..=1.
    pub fraction: f64,
    /// Whole seconds until the device switches tabs, never negative.
    pub seconds_remaining: i64,
}

/// Countdown derived from a fixed duration and a server-reported start
/// timestamp, re-evaluated once immediately and then on every tick.
///
/// The completion signal fires exactly once per timer, a short grace
/// delay after the fraction first reaches 1.  A timer is bound to one
/// `(duration, start)` pair — when either input changes the owner drops
/// this timer and starts a fresh one, which resets the fired flag by
/// construction.  Dropping the timer cancels the tick task and the grace
/// timer, whether or not it already fired.
pub struct ProgressTimer {
    rx: watch::Receiver<Progress>,
    task: AbortHandle,
    grace: Arc<Mutex<Option<AbortHandle>>>,
}

impl ProgressTimer {
    /// Returns `None` for non-positive durations: upstream data like that
    /// means "no progress display", not a division error.
    ///
    /// `on_complete` runs once, `completion_grace` after the countdown
    /// first reaches its end.
    pub fn start<F>(
        duration_secs: i64,
        start_epoch: i64,
        clock: Arc<dyn Clock>,
        cfg: &ProgressConfig,
        on_complete: F,
    ) -> Option<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if duration_secs <= 0 {
            debug!("progress timer suppressed: non-positive duration");
            return None;
        }

        let (tx, rx) = watch::channel(compute(clock.epoch_secs(), start_epoch, duration_secs));
        let grace: Arc<Mutex<Option<AbortHandle>>> = Arc::new(Mutex::new(None));

        let task = {
            let grace = Arc::clone(&grace);
            let tick = cfg.tick();
            let grace_delay = cfg.completion_grace();
            let on_complete = Arc::new(on_complete);
            tokio::spawn(async move {
                let mut completion_fired = false;
                let mut ticker = tokio::time::interval(tick);
                loop {
                    ticker.tick().await;
                    let progress = compute(clock.epoch_secs(), start_epoch, duration_secs);
                    tx.send_if_modified(|cur| {
                        if *cur != progress {
                            *cur = progress;
                            true
                        } else {
                            false
                        }
                    });

                    if progress.fraction >= 1.0 && !completion_fired {
                        completion_fired = true;
                        let callback = Arc::clone(&on_complete);
                        let handle = tokio::spawn(async move {
                            tokio::time::sleep(grace_delay).await;
                            callback();
                        })
                        .abort_handle();
                        if let Ok(mut slot) = grace.lock() {
                            *slot = Some(handle);
                        }
                        // Keep ticking so observers still see the clamped
                        // terminal value; only the signal is one-shot.
                        continue;
                    }
                }
            })
            .abort_handle()
        };

        Some(Self { rx, task, grace })
    }

    pub fn progress(&self) -> Progress {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.rx.clone()
    }
}

impl Drop for ProgressTimer {
    fn drop(&mut self) {
        self.task.abort();
        if let Ok(slot) = self.grace.lock() {
            if let Some(handle) = slot.as_ref() {
                handle.abort();
            }
        }
    }
}

fn compute(now: i64, start: i64, duration: i64) -> Progress {
    let elapsed = now - start;
    let fraction = (elapsed as f64 / duration as f64).clamp(0.0, 1.0);
    let seconds_remaining = (duration - elapsed).max(0);
    Progress {
        fraction,
        seconds_remaining,
    }
}

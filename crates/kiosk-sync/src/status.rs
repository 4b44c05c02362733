use std::sync::{Arc, Mutex};

use kiosk_proto::api::DeviceApi;
use kiosk_proto::config::SyncConfig;
use kiosk_proto::protocol::{DeviceStatus, StatusPatch};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Locally cached view of the device status.
///
/// Holds the last-known-good snapshot and refetches it on a fixed
/// interval.  Observers subscribe through a watch channel, so every
/// applied poll result (and every speculative patch) is visible to all
/// of them atomically.  Fetch failures keep the previous snapshot —
/// the cache never degrades to empty on a transient error.
///
/// The cache is an explicitly owned object: create it, spawn the poller,
/// and abort the returned handle on teardown.  Nothing here is global.
pub struct StatusCache {
    api: Arc<dyn DeviceApi>,
    cfg: SyncConfig,
    tx: watch::Sender<Option<DeviceStatus>>,
    meta: Mutex<FetchMeta>,
}

/// Bookkeeping for in-flight fetches.  `issued`/`applied` sequence
/// numbers implement stale-response suppression: a response is only
/// applied if no later-issued request has been applied already.
#[derive(Default)]
struct FetchMeta {
    issued: u64,
    applied: u64,
    last_success: Option<Instant>,
}

impl StatusCache {
    pub fn new(api: Arc<dyn DeviceApi>, cfg: SyncConfig) -> Arc<Self> {
        let (tx, _) = watch::channel(None);
        Arc::new(Self {
            api,
            cfg,
            tx,
            meta: Mutex::new(FetchMeta::default()),
        })
    }

    /// Subscribe to snapshot updates.  The receiver's current value is the
    /// latest snapshot (or `None` before the first successful poll).
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceStatus>> {
        self.tx.subscribe()
    }

    /// Latest snapshot, if any poll has succeeded yet.
    pub fn snapshot(&self) -> Option<DeviceStatus> {
        self.tx.borrow().clone()
    }

    /// Observer-triggered refresh.  Suppressed when the last successful
    /// fetch is within the staleness window, so several observers mounting
    /// at once cost a single request.
    pub async fn refresh(&self) {
        if let Ok(meta) = self.meta.lock() {
            if let Some(at) = meta.last_success {
                if at.elapsed() < self.cfg.min_staleness() {
                    debug!("status refresh suppressed: snapshot is fresh");
                    return;
                }
            }
        }
        self.fetch_once().await;
    }

    /// Forced re-poll, bypassing the staleness window.  Used to replace a
    /// speculative patch with an authoritative snapshot as soon as a
    /// mutation settles, and by the progress timer's completion signal.
    pub async fn invalidate(&self) {
        self.fetch_once().await;
    }

    /// Overlay a speculative patch on the cached snapshot.  No-op before
    /// the first successful poll.  The patch is discarded, not merged, by
    /// the next applied poll result (snapshots replace wholesale).
    pub fn apply_patch(&self, patch: &StatusPatch) {
        self.tx.send_if_modified(|cur| match cur {
            Some(status) => {
                status.apply(patch);
                true
            }
            None => false,
        });
    }

    /// Spawn the poll loop.  Ticks are skipped while nobody is subscribed.
    /// Abort the returned handle on teardown; a leaked poller is a bug.
    pub fn spawn_poller(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if cache.tx.receiver_count() > 0 {
                    cache.refresh().await;
                } else {
                    debug!("status poll skipped: no subscribers");
                }
                tokio::time::sleep(cache.cfg.poll_interval()).await;
            }
        })
    }

    async fn fetch_once(&self) {
        let seq = match self.meta.lock() {
            Ok(mut meta) => {
                meta.issued += 1;
                meta.issued
            }
            Err(_) => return,
        };

        match self.api.fetch_status().await {
            Ok(status) => {
                if let Ok(mut meta) = self.meta.lock() {
                    if seq > meta.applied {
                        meta.applied = seq;
                        meta.last_success = Some(Instant::now());
                        self.tx.send_replace(Some(status));
                    } else {
                        debug!(
                            "discarding stale status response (seq {} <= {})",
                            seq, meta.applied
                        );
                    }
                }
            }
            Err(e) => {
                warn!("status poll failed, keeping last snapshot: {}", e);
            }
        }
    }
}

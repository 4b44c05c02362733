use std::sync::{Arc, Mutex};

use kiosk_proto::api::DeviceApi;
use kiosk_proto::config::SyncConfig;
use kiosk_proto::protocol::PlaylistInfo;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Read-mostly cache of the playlist list.
///
/// The engine only consumes `interval_seconds` of the active playlist
/// from it, but the full list is exposed for presentational callers.
/// No periodic poller: refreshed on demand, invalidated when a playlist
/// activation settles.  Same issued/applied discipline as
/// [`crate::status::StatusCache`] so a slow response cannot overwrite a
/// newer one.
pub struct PlaylistCache {
    api: Arc<dyn DeviceApi>,
    cfg: SyncConfig,
    tx: watch::Sender<Vec<PlaylistInfo>>,
    meta: Mutex<FetchMeta>,
}

#[derive(Default)]
struct FetchMeta {
    issued: u64,
    applied: u64,
    last_success: Option<Instant>,
}

impl PlaylistCache {
    pub fn new(api: Arc<dyn DeviceApi>, cfg: SyncConfig) -> Arc<Self> {
        let (tx, _) = watch::channel(Vec::new());
        Arc::new(Self {
            api,
            cfg,
            tx,
            meta: Mutex::new(FetchMeta::default()),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<PlaylistInfo>> {
        self.tx.subscribe()
    }

    pub fn playlists(&self) -> Vec<PlaylistInfo> {
        self.tx.borrow().clone()
    }

    /// Tab-switch interval of the given playlist, if known.
    pub fn interval_for(&self, playlist_id: &str) -> Option<i64> {
        self.tx
            .borrow()
            .iter()
            .find(|p| p.id == playlist_id)
            .map(|p| p.interval_seconds)
    }

    /// Staleness-guarded fetch.
    pub async fn refresh(&self) {
        if let Ok(meta) = self.meta.lock() {
            if let Some(at) = meta.last_success {
                if at.elapsed() < self.cfg.min_staleness() {
                    debug!("playlist refresh suppressed: list is fresh");
                    return;
                }
            }
        }
        self.fetch_once().await;
    }

    /// Forced fetch, bypassing the staleness window.
    pub async fn invalidate(&self) {
        self.fetch_once().await;
    }

    async fn fetch_once(&self) {
        let seq = match self.meta.lock() {
            Ok(mut meta) => {
                meta.issued += 1;
                meta.issued
            }
            Err(_) => return,
        };

        match self.api.fetch_playlists().await {
            Ok(playlists) => {
                if let Ok(mut meta) = self.meta.lock() {
                    if seq > meta.applied {
                        meta.applied = seq;
                        meta.last_success = Some(Instant::now());
                        self.tx.send_replace(playlists);
                    } else {
                        debug!("discarding stale playlist response");
                    }
                }
            }
            Err(e) => {
                warn!("playlist fetch failed, keeping last list: {}", e);
            }
        }
    }
}

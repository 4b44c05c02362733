use std::sync::Arc;

use kiosk_proto::api::{ApiError, DeviceApi};
use kiosk_proto::config::{Config, ProgressConfig};
use kiosk_proto::protocol::DeviceStatus;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::mutate::Activator;
use crate::playlists::PlaylistCache;
use crate::preview::PreviewController;
use crate::progress::{Progress, ProgressTimer};
use crate::status::StatusCache;

/// The assembled sync engine: status cache, playlist cache, optimistic
/// activator, preview retry controller, and the driver that keeps a
/// progress timer running for whichever tab the device currently shows.
///
/// Owns every background task it starts; dropping the engine aborts all
/// of them, including any progress or cooldown timer still pending.
pub struct SyncEngine {
    status: Arc<StatusCache>,
    playlists: Arc<PlaylistCache>,
    activator: Activator,
    preview: PreviewController,
    progress_rx: watch::Receiver<Option<Progress>>,
    poller: JoinHandle<()>,
    driver: JoinHandle<()>,
}

/// Inputs the active-tab progress timer is bound to.  When any of these
/// change, the old timer is discarded and a fresh one starts (which also
/// re-arms the one-shot completion signal).
#[derive(Debug, Clone, PartialEq)]
struct ActiveKey {
    playlist_id: String,
    tab_id: String,
    opened_at: i64,
    interval_secs: i64,
}

impl SyncEngine {
    /// Must be called from within a tokio runtime.
    pub fn new(api: Arc<dyn DeviceApi>, clock: Arc<dyn Clock>, config: Config) -> Self {
        let status = StatusCache::new(Arc::clone(&api), config.sync.clone());
        let playlists = PlaylistCache::new(Arc::clone(&api), config.sync.clone());
        let activator = Activator::new(
            Arc::clone(&api),
            Arc::clone(&status),
            Arc::clone(&playlists),
        );
        let preview = PreviewController::new(config.preview.clone());

        let (progress_tx, progress_rx) = watch::channel(None);
        let poller = status.spawn_poller();
        let driver = tokio::spawn(drive_progress(
            Arc::clone(&status),
            Arc::clone(&playlists),
            clock,
            config.progress.clone(),
            progress_tx,
        ));

        info!("sync engine started");
        Self {
            status,
            playlists,
            activator,
            preview,
            progress_rx,
            poller,
            driver,
        }
    }

    /// Read subscription to the device status (None until the first
    /// successful poll).
    pub fn status(&self) -> watch::Receiver<Option<DeviceStatus>> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> Option<DeviceStatus> {
        self.status.snapshot()
    }

    /// Observer-triggered status refresh (suppressed inside the staleness
    /// window).
    pub async fn refresh_status(&self) {
        self.status.refresh().await;
    }

    /// Countdown for the active tab; `None` while nothing is active or the
    /// playlist interval is unknown/non-positive.
    pub fn progress(&self) -> watch::Receiver<Option<Progress>> {
        self.progress_rx.clone()
    }

    pub fn playlists(&self) -> &PlaylistCache {
        &self.playlists
    }

    pub fn preview(&self) -> &PreviewController {
        &self.preview
    }

    pub async fn activate_playlist(&self, playlist_id: &str) -> Result<(), ApiError> {
        self.activator.activate_playlist(playlist_id).await
    }

    pub async fn activate_tab(&self, playlist_id: &str, tab_id: &str) -> Result<(), ApiError> {
        self.activator.activate_tab(playlist_id, tab_id).await
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.poller.abort();
        self.driver.abort();
    }
}

/// Watch status changes and (re)start the progress timer whenever the
/// active `(playlist, tab, opened_at, interval)` tuple changes.  The
/// completion callback forces a status re-poll so the next active tab and
/// its fresh start timestamp are picked up right away.
async fn drive_progress(
    status: Arc<StatusCache>,
    playlists: Arc<PlaylistCache>,
    clock: Arc<dyn Clock>,
    cfg: ProgressConfig,
    progress_tx: watch::Sender<Option<Progress>>,
) {
    let mut status_rx = status.subscribe();
    let mut active: Option<(ActiveKey, ProgressTimer, watch::Receiver<Progress>)> = None;

    loop {
        let snapshot = status_rx.borrow_and_update().clone();
        let desired = desired_key(snapshot.as_ref(), &playlists).await;

        let current = active.as_ref().map(|(key, _, _)| key.clone());
        if current != desired {
            active = None;
            match desired {
                Some(key) => {
                    debug!(
                        "active tab {} of {} opened at {}, interval {}s",
                        key.tab_id, key.playlist_id, key.opened_at, key.interval_secs
                    );
                    let on_complete = {
                        let status = Arc::clone(&status);
                        move || {
                            let status = Arc::clone(&status);
                            tokio::spawn(async move {
                                status.invalidate().await;
                            });
                        }
                    };
                    match ProgressTimer::start(
                        key.interval_secs,
                        key.opened_at,
                        Arc::clone(&clock),
                        &cfg,
                        on_complete,
                    ) {
                        Some(timer) => {
                            let rx = timer.subscribe();
                            progress_tx.send_replace(Some(*rx.borrow()));
                            active = Some((key, timer, rx));
                        }
                        None => {
                            progress_tx.send_replace(None);
                        }
                    }
                }
                None => {
                    progress_tx.send_replace(None);
                }
            }
        }

        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            update = next_progress(&mut active) => {
                if let Some(progress) = update {
                    progress_tx.send_replace(Some(progress));
                }
            }
        }
    }
}

/// Wait for the running timer's next tick; pending forever when no tab is
/// active so the select only wakes on status changes.
async fn next_progress(
    active: &mut Option<(ActiveKey, ProgressTimer, watch::Receiver<Progress>)>,
) -> Option<Progress> {
    match active {
        Some((_, _, rx)) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

async fn desired_key(
    snapshot: Option<&DeviceStatus>,
    playlists: &PlaylistCache,
) -> Option<ActiveKey> {
    let status = snapshot?;
    let playlist_id = status.current_playlist.as_deref()?;
    let tab_id = status.current_tab.as_deref()?;
    let opened_at = status.current_tab_opened_at?;

    // The interval lives in reference data; fetch the list if this
    // playlist is not known yet (e.g. first status arrived first).
    let interval_secs = match playlists.interval_for(playlist_id) {
        Some(interval) => interval,
        None => {
            playlists.refresh().await;
            playlists.interval_for(playlist_id)?
        }
    };

    if interval_secs <= 0 {
        return None;
    }

    Some(ActiveKey {
        playlist_id: playlist_id.to_string(),
        tab_id: tab_id.to_string(),
        opened_at,
        interval_secs,
    })
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kiosk_proto::api::{preview_live_path, preview_path};
use kiosk_proto::config::PreviewConfig;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

/// Image source the caller should render for a tab.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewSource {
    /// Active tab: the live endpoint always serves current content, so no
    /// cache-busting token is needed.
    Live(String),
    /// Non-active tab: cache-busted still image.
    Still(String),
}

impl PreviewSource {
    pub fn path(&self) -> &str {
        match self {
            PreviewSource::Live(p) | PreviewSource::Still(p) => p,
        }
    }
}

/// Per-tab retry/back-off for thumbnail loads.
///
/// Cache-busting tokens come from one monotonically increasing counter.
/// A slow refresher re-mints the shared base token on a fixed cadence so
/// non-active thumbnails stay reasonably current.  On a reported load
/// failure the tab gets an immediate fresh token ("quick retry") until
/// its budget is spent, then a single cooldown timer holds the token
/// still and resets the counter when it expires — bounded retries, but
/// never a permanent give-up.
///
/// Every minted token bumps the version channel exactly once, so each
/// state change causes exactly one re-fetch on the rendering side.
pub struct PreviewController {
    cfg: PreviewConfig,
    inner: Arc<Mutex<PreviewState>>,
    version_tx: watch::Sender<u64>,
    refresher: AbortHandle,
}

struct PreviewState {
    next_token: u64,
    base_token: u64,
    tabs: HashMap<String, TabRetry>,
}

/// Retry state for one tab.  Created on first failure, dropped via
/// [`PreviewController::release`] when the owning view goes away.
#[derive(Default)]
struct TabRetry {
    consecutive_failures: u32,
    /// Token pinned for this tab.  While set it overrides the base token,
    /// which keeps the URL stable during cooldown even as the slow
    /// refresher advances the base.
    token: Option<u64>,
    cooldown: Option<AbortHandle>,
}

impl PreviewState {
    fn mint(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

impl PreviewController {
    /// Must be called from within a tokio runtime (spawns the refresher).
    pub fn new(cfg: PreviewConfig) -> Self {
        let inner = Arc::new(Mutex::new(PreviewState {
            next_token: 1,
            base_token: 1,
            tabs: HashMap::new(),
        }));
        let (version_tx, _) = watch::channel(0u64);

        let refresher = {
            let inner = Arc::clone(&inner);
            let version_tx = version_tx.clone();
            let interval = cfg.refresh_interval();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let mut minted = false;
                    if let Ok(mut state) = inner.lock() {
                        state.base_token = state.mint();
                        // Tabs in cooldown keep their pinned token; everyone
                        // else follows the new base.
                        for tab in state.tabs.values_mut() {
                            if tab.cooldown.is_none() {
                                tab.token = None;
                            }
                        }
                        minted = true;
                    }
                    if minted {
                        version_tx.send_modify(|v| *v += 1);
                    }
                }
            })
            .abort_handle()
        };

        Self {
            cfg,
            inner,
            version_tx,
            refresher,
        }
    }

    /// Version channel: bumped once per minted token.  Re-read
    /// [`preview_source`](Self::preview_source) on each change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Image source for `tab_id`.  `active` is whether the device
    /// currently displays this tab.
    pub fn preview_source(&self, tab_id: &str, active: bool) -> PreviewSource {
        if active {
            return PreviewSource::Live(preview_live_path(tab_id));
        }
        let token = match self.inner.lock() {
            Ok(state) => state
                .tabs
                .get(tab_id)
                .and_then(|t| t.token)
                .unwrap_or(state.base_token),
            Err(_) => 0,
        };
        PreviewSource::Still(preview_path(tab_id, token))
    }

    /// Record a failed image load for `tab_id`.
    ///
    /// The counter read and increment happen under one lock, so rapid
    /// repeated failures cannot double-count or race a quick retry
    /// against cooldown entry.
    pub fn report_failure(&self, tab_id: &str) {
        let mut minted = false;
        if let Ok(mut state) = self.inner.lock() {
            let failures = {
                let tab = state.tabs.entry(tab_id.to_string()).or_default();
                tab.consecutive_failures += 1;
                tab.consecutive_failures
            };

            if failures <= self.cfg.quick_retry_limit {
                let token = state.mint();
                if let Some(tab) = state.tabs.get_mut(tab_id) {
                    tab.token = Some(token);
                }
                minted = true;
                debug!("preview {} failed ({}), quick retry", tab_id, failures);
            } else if let Some(tab) = state.tabs.get_mut(tab_id) {
                // One cooldown timer per tab, never two.
                if tab.cooldown.is_none() {
                    debug!(
                        "preview {} failed ({}), backing off {}s",
                        tab_id,
                        failures,
                        self.cfg.cooldown_secs
                    );
                    tab.cooldown = Some(self.spawn_cooldown(tab_id.to_string()));
                }
            }
        }
        if minted {
            self.version_tx.send_modify(|v| *v += 1);
        }
    }

    /// Record a successful load: the resource is healthy again, so the
    /// failure streak ends and any pending cooldown is cancelled.
    pub fn report_success(&self, tab_id: &str) {
        if let Ok(mut state) = self.inner.lock() {
            if let Some(tab) = state.tabs.get_mut(tab_id) {
                tab.consecutive_failures = 0;
                if let Some(cooldown) = tab.cooldown.take() {
                    cooldown.abort();
                }
            }
        }
    }

    /// Drop per-tab state and cancel its timer (view unmounted or tab
    /// removed).
    pub fn release(&self, tab_id: &str) {
        if let Ok(mut state) = self.inner.lock() {
            if let Some(tab) = state.tabs.remove(tab_id) {
                if let Some(cooldown) = tab.cooldown {
                    cooldown.abort();
                }
            }
        }
    }

    fn spawn_cooldown(&self, tab_id: String) -> AbortHandle {
        let inner = Arc::clone(&self.inner);
        let version_tx = self.version_tx.clone();
        let cooldown = self.cfg.cooldown();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let mut minted = false;
            if let Ok(mut state) = inner.lock() {
                let token = state.mint();
                if let Some(tab) = state.tabs.get_mut(&tab_id) {
                    tab.consecutive_failures = 0;
                    tab.cooldown = None;
                    tab.token = Some(token);
                    minted = true;
                    debug!("preview {} cooldown expired, allowing one observation", tab_id);
                }
            }
            if minted {
                version_tx.send_modify(|v| *v += 1);
            }
        })
        .abort_handle()
    }
}

impl Drop for PreviewController {
    fn drop(&mut self) {
        self.refresher.abort();
        if let Ok(state) = self.inner.lock() {
            for tab in state.tabs.values() {
                if let Some(cooldown) = &tab.cooldown {
                    cooldown.abort();
                }
            }
        }
    }
}

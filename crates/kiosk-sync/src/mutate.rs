use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kiosk_proto::api::{ApiError, DeviceApi};
use kiosk_proto::protocol::StatusPatch;
use tracing::{debug, info};

use crate::playlists::PlaylistCache;
use crate::status::StatusCache;

/// Wraps the two activation operations with optimistic cache writes.
///
/// Each call writes a speculative patch into the status cache before the
/// network request is issued, then reconciles by forcing a re-poll once
/// the request settles — on success so the confirmed value lands as soon
/// as possible, on failure so the cache reverts to server truth.  The
/// mutation itself is never retried here; errors go back to the caller.
///
/// Overlapping activations are ordered by a generation counter: patches
/// are last-write-wins on the cache, and only the newest generation's
/// settlement triggers the reconciliation re-poll, so an earlier, slower
/// response cannot clobber a newer speculative state.
pub struct Activator {
    api: Arc<dyn DeviceApi>,
    status: Arc<StatusCache>,
    playlists: Arc<PlaylistCache>,
    generation: AtomicU64,
}

impl Activator {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        status: Arc<StatusCache>,
        playlists: Arc<PlaylistCache>,
    ) -> Self {
        Self {
            api,
            status,
            playlists,
            generation: AtomicU64::new(0),
        }
    }

    /// Make `playlist_id` the active playlist.  The speculative patch also
    /// clears `current_tab` — the previously shown tab belongs to another
    /// playlist and must not linger.
    pub async fn activate_playlist(&self, playlist_id: &str) -> Result<(), ApiError> {
        let generation = self.next_generation();
        info!("activating playlist {}", playlist_id);
        self.status.apply_patch(&StatusPatch::PlaylistActivated {
            playlist_id: playlist_id.to_string(),
        });

        let result = self.api.activate_playlist(playlist_id).await;
        self.reconcile(generation, true).await;
        result
    }

    /// Make `tab_id` of `playlist_id` the active tab.
    pub async fn activate_tab(&self, playlist_id: &str, tab_id: &str) -> Result<(), ApiError> {
        let generation = self.next_generation();
        info!("activating tab {} in playlist {}", tab_id, playlist_id);
        self.status.apply_patch(&StatusPatch::TabActivated {
            playlist_id: playlist_id.to_string(),
            tab_id: tab_id.to_string(),
        });

        let result = self.api.activate_tab(playlist_id, tab_id).await;
        self.reconcile(generation, false).await;
        result
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the speculative patch with server truth — unless a newer
    /// activation has started since, in which case that one reconciles.
    async fn reconcile(&self, generation: u64, refresh_playlists: bool) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("activation superseded, skipping reconciliation re-poll");
            return;
        }
        self.status.invalidate().await;
        if refresh_playlists {
            self.playlists.invalidate().await;
        }
    }
}

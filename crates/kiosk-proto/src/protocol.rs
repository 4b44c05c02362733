use serde::{Deserialize, Serialize};

/// Snapshot of the device's current state, as reported by `GET /status`.
///
/// Replaced wholesale on each successful poll.  May be transiently
/// overwritten by a speculative [`StatusPatch`] while an activation is in
/// flight; the next authoritative snapshot discards the patch entirely
/// (never merges with it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceStatus {
    /// Device unique identifier
    pub device_id: String,
    /// Device display name (immutable for the session)
    pub device_name: String,
    /// Currently active playlist ID (if any)
    #[serde(default)]
    pub current_playlist: Option<String>,
    /// Currently active tab ID (if any).  Only meaningful together with
    /// `current_playlist` — a playlist change invalidates the old tab.
    #[serde(default)]
    pub current_tab: Option<String>,
    /// Seconds since epoch when the active tab last changed
    #[serde(default)]
    pub current_tab_opened_at: Option<i64>,
    /// Uptime in seconds
    #[serde(default)]
    pub uptime_seconds: u64,
}

/// Information about a playlist
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlaylistInfo {
    /// Unique identifier for the playlist
    pub id: String,
    /// Display name of the playlist
    pub name: String,
    /// Number of tabs in the playlist
    #[serde(default)]
    pub tab_count: u64,
    /// Interval between tab switches in seconds
    pub interval_seconds: i64,
    /// Whether this playlist is currently active
    #[serde(default)]
    pub is_active: bool,
}

/// Information about a tab
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TabInfo {
    /// Unique identifier for the tab
    pub id: String,
    /// Display name of the tab
    pub name: String,
    /// URL the tab displays
    pub url: String,
    /// Order within the playlist (0-based index)
    #[serde(default)]
    pub order_index: u64,
    /// Whether this tab persists in browser memory
    #[serde(default)]
    pub persist: bool,
    /// Viewport width in pixels (if available)
    #[serde(default)]
    pub viewport_width: Option<i32>,
    /// Viewport height in pixels (if available)
    #[serde(default)]
    pub viewport_height: Option<i32>,
}

/// Speculative partial update applied to the cached [`DeviceStatus`] before
/// an activation call settles.  Always a strict subset of fields — only the
/// ones implied by the user's action.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPatch {
    /// A playlist was activated.  Clears `current_tab`: the previously
    /// displayed tab belongs to another playlist and no longer applies.
    PlaylistActivated { playlist_id: String },
    /// A specific tab was activated within a playlist.
    TabActivated { playlist_id: String, tab_id: String },
}

impl DeviceStatus {
    /// Apply a speculative patch in place.
    pub fn apply(&mut self, patch: &StatusPatch) {
        match patch {
            StatusPatch::PlaylistActivated { playlist_id } => {
                self.current_playlist = Some(playlist_id.clone());
                self.current_tab = None;
            }
            StatusPatch::TabActivated {
                playlist_id,
                tab_id,
            } => {
                self.current_playlist = Some(playlist_id.clone());
                self.current_tab = Some(tab_id.clone());
            }
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::protocol::{DeviceStatus, PlaylistInfo};

/// Errors from the device API boundary.
///
/// The sync layer swallows these for polls (keeping the last good
/// snapshot); activation calls surface them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("device returned {status} for {path}")]
    Status {
        status: reqwest::StatusCode,
        path: String,
    },
}

/// The device's local API surface, as consumed by the sync engine.
///
/// A trait so tests can script responses and latencies without a device.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn fetch_status(&self) -> Result<DeviceStatus, ApiError>;
    async fn fetch_playlists(&self) -> Result<Vec<PlaylistInfo>, ApiError>;
    async fn activate_playlist(&self, playlist_id: &str) -> Result<(), ApiError>;
    async fn activate_tab(&self, playlist_id: &str, tab_id: &str) -> Result<(), ApiError>;
}

/// Still-image preview path with a cache-busting token.
pub fn preview_path(tab_id: &str, token: u64) -> String {
    format!("/preview/{}?t={}", tab_id, token)
}

/// Always-current stream endpoint for the active tab.  No token — the
/// device serves current content on every request.
pub fn preview_live_path(tab_id: &str) -> String {
    format!("/preview_live/{}", tab_id)
}

/// HTTP client against a kiosk device.
pub struct HttpDeviceApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDeviceApi {
    /// `base_url` is the API root, e.g. `http://device.local:8080/api`.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kiosk-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a preview image of a non-active tab.
    pub fn preview_url(&self, tab_id: &str, token: u64) -> String {
        format!("{}{}", self.base_url, preview_path(tab_id, token))
    }

    /// Absolute URL for the live preview of the active tab.
    pub fn preview_live_url(&self, tab_id: &str) -> String {
        format!("{}{}", self.base_url, preview_live_path(tab_id))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        debug!("GET {}", path);
        let resp = self.client.get(self.url(path)).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status(),
                path: path.to_string(),
            });
        }
        Ok(resp.json().await?)
    }

    async fn post(&self, path: &str) -> Result<(), ApiError> {
        debug!("POST {}", path);
        let resp = self.client.post(self.url(path)).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status(),
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn fetch_status(&self) -> Result<DeviceStatus, ApiError> {
        self.get_json("/status").await
    }

    async fn fetch_playlists(&self) -> Result<Vec<PlaylistInfo>, ApiError> {
        self.get_json("/playlists").await
    }

    async fn activate_playlist(&self, playlist_id: &str) -> Result<(), ApiError> {
        self.post(&format!("/playlists/{}/activate", playlist_id))
            .await
    }

    async fn activate_tab(&self, playlist_id: &str, tab_id: &str) -> Result<(), ApiError> {
        self.post(&format!(
            "/playlists/{}/tabs/{}/activate",
            playlist_id, tab_id
        ))
        .await
    }
}

use std::sync::Arc;

use kiosk_proto::api::HttpDeviceApi;
use kiosk_proto::config::Config;
use kiosk_sync::{SyncEngine, SystemClock};
use tracing::{info, warn};

/// Headless runner: keeps the caches warm against a device and prints
/// status and countdown changes as they arrive.  Useful for watching a
/// panel without a frontend attached.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,kiosk_sync=debug,hyper=warn,hyper_util=warn,reqwest=warn",
                )
            }),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => {
            info!("config loaded from {:?}", Config::config_path());
            config
        }
        Err(e) => {
            warn!("config unavailable ({}), using defaults", e);
            Config::default()
        }
    };

    let api = Arc::new(HttpDeviceApi::new(
        &config.device.base_url,
        config.device.request_timeout(),
    )?);
    let engine = SyncEngine::new(api, Arc::new(SystemClock), config);

    let mut status_rx = engine.status();
    let mut progress_rx = engine.progress();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(status) = status_rx.borrow_and_update().clone() {
                    info!(
                        "device {} playlist {:?} tab {:?} up {}s",
                        status.device_name,
                        status.current_playlist,
                        status.current_tab,
                        status.uptime_seconds
                    );
                }
            }
            changed = progress_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(progress) = *progress_rx.borrow_and_update() {
                    info!(
                        "tab progress {:.0}%, {}s remaining",
                        progress.fraction * 100.0,
                        progress.seconds_remaining
                    );
                }
            }
        }
    }

    Ok(())
}

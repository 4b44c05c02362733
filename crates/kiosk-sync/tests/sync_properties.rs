//! End-to-end cache behavior against a scripted in-process device.
//!
//! All tests run under tokio's paused clock, so "slow" responses are
//! deterministic sleeps and no real time passes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiosk_proto::api::{ApiError, DeviceApi};
use kiosk_proto::config::{Config, SyncConfig};
use kiosk_proto::protocol::{DeviceStatus, PlaylistInfo};
use kiosk_sync::{ManualClock, SyncEngine};
use kiosk_sync::mutate::Activator;
use kiosk_sync::playlists::PlaylistCache;
use kiosk_sync::status::StatusCache;

/// Scripted device.  Status responses are captured when the request
/// arrives and delivered after a per-call delay, which is how a real
/// server behaves when a response is slow on the wire.
struct MockApi {
    status: Mutex<DeviceStatus>,
    playlists: Mutex<Vec<PlaylistInfo>>,
    status_delays: Mutex<VecDeque<Duration>>,
    activation_delays: Mutex<VecDeque<Duration>>,
    status_calls: AtomicUsize,
    playlist_calls: AtomicUsize,
    fail_status: AtomicBool,
    fail_activations: AtomicBool,
}

impl MockApi {
    fn new(status: DeviceStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            playlists: Mutex::new(Vec::new()),
            status_delays: Mutex::new(VecDeque::new()),
            activation_delays: Mutex::new(VecDeque::new()),
            status_calls: AtomicUsize::new(0),
            playlist_calls: AtomicUsize::new(0),
            fail_status: AtomicBool::new(false),
            fail_activations: AtomicBool::new(false),
        })
    }

    fn set_status(&self, status: DeviceStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn set_playlists(&self, playlists: Vec<PlaylistInfo>) {
        *self.playlists.lock().unwrap() = playlists;
    }

    fn push_status_delay(&self, delay: Duration) {
        self.status_delays.lock().unwrap().push_back(delay);
    }

    fn push_activation_delay(&self, delay: Duration) {
        self.activation_delays.lock().unwrap().push_back(delay);
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceApi for MockApi {
    async fn fetch_status(&self) -> Result<DeviceStatus, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.status.lock().unwrap().clone();
        let delay = self
            .status_delays
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                path: "/status".to_string(),
            });
        }
        Ok(snapshot)
    }

    async fn fetch_playlists(&self) -> Result<Vec<PlaylistInfo>, ApiError> {
        self.playlist_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.playlists.lock().unwrap().clone())
    }

    async fn activate_playlist(&self, playlist_id: &str) -> Result<(), ApiError> {
        let delay = self
            .activation_delays
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;
        if self.fail_activations.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                path: format!("/playlists/{}/activate", playlist_id),
            });
        }
        let mut status = self.status.lock().unwrap();
        status.current_playlist = Some(playlist_id.to_string());
        status.current_tab = None;
        Ok(())
    }

    async fn activate_tab(&self, playlist_id: &str, tab_id: &str) -> Result<(), ApiError> {
        let delay = self
            .activation_delays
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;
        if self.fail_activations.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                path: format!("/playlists/{}/tabs/{}/activate", playlist_id, tab_id),
            });
        }
        let mut status = self.status.lock().unwrap();
        status.current_playlist = Some(playlist_id.to_string());
        status.current_tab = Some(tab_id.to_string());
        Ok(())
    }
}

fn device_status(playlist: Option<&str>, tab: Option<&str>) -> DeviceStatus {
    DeviceStatus {
        device_id: "dev-1".to_string(),
        device_name: "lobby panel".to_string(),
        current_playlist: playlist.map(str::to_string),
        current_tab: tab.map(str::to_string),
        current_tab_opened_at: None,
        uptime_seconds: 120,
    }
}

fn playlist(id: &str, interval_seconds: i64) -> PlaylistInfo {
    PlaylistInfo {
        id: id.to_string(),
        name: id.to_uppercase(),
        tab_count: 2,
        interval_seconds,
        is_active: false,
    }
}

fn sync_cfg() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 2_000,
        min_staleness_ms: 500,
    }
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn caches(api: &Arc<MockApi>) -> (Arc<StatusCache>, Arc<PlaylistCache>) {
    let api: Arc<dyn DeviceApi> = Arc::clone(api) as _;
    (
        StatusCache::new(Arc::clone(&api), sync_cfg()),
        PlaylistCache::new(api, sync_cfg()),
    )
}

#[tokio::test(start_paused = true)]
async fn slow_response_cannot_overwrite_newer_snapshot() {
    let api = MockApi::new(device_status(Some("p-old"), Some("t-old")));
    let (status, _) = caches(&api);

    // First request leaves while the device still reports the old
    // playlist, but its response takes 5s on the wire.
    api.push_status_delay(Duration::from_secs(5));
    let slow = {
        let status = Arc::clone(&status);
        tokio::spawn(async move { status.invalidate().await })
    };
    settle().await;

    // Device state changes, and a second request completes immediately.
    api.set_status(device_status(Some("p-new"), Some("t-new")));
    status.invalidate().await;
    assert_eq!(
        status.snapshot().unwrap().current_playlist.as_deref(),
        Some("p-new")
    );

    // The slow response finally arrives and must be discarded.
    tokio::time::advance(Duration::from_secs(6)).await;
    slow.await.unwrap();
    assert_eq!(
        status.snapshot().unwrap().current_playlist.as_deref(),
        Some("p-new")
    );
}

#[tokio::test(start_paused = true)]
async fn refreshes_within_staleness_window_share_one_request() {
    let api = MockApi::new(device_status(Some("p1"), Some("t1")));
    let (status, _) = caches(&api);

    status.refresh().await;
    status.refresh().await;
    status.refresh().await;
    assert_eq!(api.status_calls(), 1);

    // Past the window a refresh fetches again.
    tokio::time::advance(Duration::from_millis(600)).await;
    status.refresh().await;
    assert_eq!(api.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn poll_failure_keeps_last_good_snapshot() {
    let api = MockApi::new(device_status(Some("p1"), Some("t1")));
    let (status, _) = caches(&api);

    status.invalidate().await;
    assert!(status.snapshot().is_some());

    api.fail_status.store(true, Ordering::SeqCst);
    status.invalidate().await;

    let snapshot = status.snapshot().unwrap();
    assert_eq!(snapshot.current_playlist.as_deref(), Some("p1"));
    assert_eq!(snapshot.current_tab.as_deref(), Some("t1"));
}

#[tokio::test(start_paused = true)]
async fn playlist_activation_speculatively_clears_current_tab() {
    let api = MockApi::new(device_status(Some("p1"), Some("t1")));
    let (status, playlists) = caches(&api);
    status.invalidate().await;

    // Keep the activation hanging so the in-flight state is observable.
    api.push_activation_delay(Duration::from_secs(3));
    let activator = Arc::new(Activator::new(
        Arc::clone(&api) as Arc<dyn DeviceApi>,
        Arc::clone(&status),
        Arc::clone(&playlists),
    ));
    let pending = {
        let activator = Arc::clone(&activator);
        tokio::spawn(async move { activator.activate_playlist("p2").await })
    };
    settle().await;

    // Mid-flight the cache already shows the new playlist with no tab.
    let speculative = status.snapshot().unwrap();
    assert_eq!(speculative.current_playlist.as_deref(), Some("p2"));
    assert_eq!(speculative.current_tab, None);

    tokio::time::advance(Duration::from_secs(4)).await;
    pending.await.unwrap().unwrap();

    // Settled: reconciliation re-polled and got server truth.
    let confirmed = status.snapshot().unwrap();
    assert_eq!(confirmed.current_playlist.as_deref(), Some("p2"));
}

#[tokio::test(start_paused = true)]
async fn failed_activation_reverts_to_server_truth() {
    let api = MockApi::new(device_status(Some("p1"), Some("t1")));
    let (status, playlists) = caches(&api);
    status.invalidate().await;

    api.fail_activations.store(true, Ordering::SeqCst);
    let activator = Activator::new(
        Arc::clone(&api) as Arc<dyn DeviceApi>,
        Arc::clone(&status),
        Arc::clone(&playlists),
    );

    let result = activator.activate_playlist("p2").await;
    assert!(result.is_err());

    let snapshot = status.snapshot().unwrap();
    assert_eq!(snapshot.current_playlist.as_deref(), Some("p1"));
    assert_eq!(snapshot.current_tab.as_deref(), Some("t1"));
}

#[tokio::test(start_paused = true)]
async fn rapid_activations_settle_on_the_last_one() {
    let api = MockApi::new(device_status(Some("p0"), None));
    let (status, playlists) = caches(&api);
    status.invalidate().await;

    let activator = Arc::new(Activator::new(
        Arc::clone(&api) as Arc<dyn DeviceApi>,
        Arc::clone(&status),
        Arc::clone(&playlists),
    ));

    // First activation responds slowly, second immediately.
    api.push_activation_delay(Duration::from_secs(3));
    let first = {
        let activator = Arc::clone(&activator);
        tokio::spawn(async move { activator.activate_playlist("p-a").await })
    };
    settle().await;
    activator.activate_playlist("p-b").await.unwrap();

    assert_eq!(
        status.snapshot().unwrap().current_playlist.as_deref(),
        Some("p-b")
    );

    // The first activation settles late; it was superseded and must not
    // drag the cache back to p-a.
    tokio::time::advance(Duration::from_secs(4)).await;
    first.await.unwrap().unwrap();
    assert_eq!(
        status.snapshot().unwrap().current_playlist.as_deref(),
        Some("p-b")
    );
}

#[tokio::test(start_paused = true)]
async fn engine_countdown_completion_forces_a_repoll() {
    let mut status = device_status(Some("p1"), Some("t1"));
    status.current_tab_opened_at = Some(1_000);
    let api = MockApi::new(status);
    api.set_playlists(vec![playlist("p1", 5)]);

    let clock = ManualClock::new(1_000);
    let mut config = Config::default();
    // Park the poller and the thumbnail refresher far away so only the
    // countdown drives traffic in this test.
    config.sync.poll_interval_ms = 3_600_000;
    config.preview.refresh_interval_secs = 3_600;

    let engine = SyncEngine::new(
        Arc::clone(&api) as Arc<dyn DeviceApi>,
        Arc::new(clock.clone()),
        config,
    );
    settle().await;
    assert_eq!(api.status_calls(), 1);

    let progress_rx = engine.progress();
    assert!(progress_rx.borrow().is_some());

    // Walk wall clock and timer clock together to the end of the interval.
    for _ in 0..5 {
        clock.advance(1);
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }
    let progress = progress_rx.borrow().unwrap();
    assert_eq!(progress.fraction, 1.0);
    assert_eq!(progress.seconds_remaining, 0);
    assert_eq!(api.status_calls(), 1);

    // Completion fires after the grace delay and re-polls the device.
    tokio::time::advance(Duration::from_millis(10)).await;
    settle().await;
    assert_eq!(api.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn engine_rearms_countdown_when_a_new_tab_opens() {
    let mut status = device_status(Some("p1"), Some("t1"));
    status.current_tab_opened_at = Some(1_000);
    let api = MockApi::new(status);
    api.set_playlists(vec![playlist("p1", 5)]);

    let clock = ManualClock::new(1_000);
    let mut config = Config::default();
    config.sync.poll_interval_ms = 3_600_000;
    config.preview.refresh_interval_secs = 3_600;

    let engine = SyncEngine::new(
        Arc::clone(&api) as Arc<dyn DeviceApi>,
        Arc::new(clock.clone()),
        config,
    );
    settle().await;
    assert_eq!(api.status_calls(), 1);
    let progress_rx = engine.progress();

    // Run the first countdown out.
    for _ in 0..5 {
        clock.advance(1);
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }
    assert_eq!(progress_rx.borrow().unwrap().fraction, 1.0);

    // The device moves on to the next tab; the completion re-poll picks
    // up the new start timestamp.
    let mut next = device_status(Some("p1"), Some("t2"));
    next.current_tab_opened_at = Some(1_005);
    api.set_status(next);

    tokio::time::advance(Duration::from_millis(10)).await;
    settle().await;
    assert_eq!(api.status_calls(), 2);

    // Fresh countdown from zero for the new tab.
    let restarted = progress_rx.borrow().unwrap();
    assert_eq!(restarted.fraction, 0.0);
    assert_eq!(restarted.seconds_remaining, 5);

    // And its completion signal fires again: a second forced re-poll.
    for _ in 0..5 {
        clock.advance(1);
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }
    assert_eq!(progress_rx.borrow().unwrap().fraction, 1.0);
    assert_eq!(api.status_calls(), 2);

    tokio::time::advance(Duration::from_millis(10)).await;
    settle().await;
    assert_eq!(api.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn engine_without_active_tab_reports_no_progress() {
    let api = MockApi::new(device_status(None, None));
    let clock = ManualClock::new(1_000);
    let mut config = Config::default();
    config.preview.refresh_interval_secs = 3_600;

    let engine = SyncEngine::new(
        Arc::clone(&api) as Arc<dyn DeviceApi>,
        Arc::new(clock),
        config,
    );
    settle().await;

    assert!(engine.snapshot().is_some());
    assert!(engine.progress().borrow().is_none());
}

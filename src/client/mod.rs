use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    platform::{AppProvider, GenericAppProvider},
    shutdown,
    utils::clock::{Clock, DefaultClock},
};

use config::Config;
use queue::RetryCache;
use sampler::SamplerModule;
use status::StatusModule;
use tracker::SessionTracker;
use uploader::{HttpSink, UploadModule};

pub mod args;
pub mod config;
pub mod queue;
pub mod sampler;
pub mod status;
pub mod tracker;
pub mod uploader;

/// Minimum time an application must stay focused before its session produces
/// an interval. Shorter switches are treated as focus flicker.
const MIN_SESSION_DURATION: chrono::Duration = chrono::Duration::seconds(1);

/// Represents the starting point for the client daemon.
pub async fn start_client(dir: PathBuf) -> Result<()> {
    let config = Config::load(&dir.join("config.json"))?;
    info!("Starting client for device {:?}", config.device_name);

    let provider = GenericAppProvider::new(config.monitor_mode)?;
    run_client(dir, config, provider).await
}

pub async fn run_client(
    dir: PathBuf,
    config: Config,
    provider: impl AppProvider + 'static,
) -> Result<()> {
    let clock = DefaultClock;
    let shutdown_token = CancellationToken::new();

    let tracker = Arc::new(SessionTracker::new(MIN_SESSION_DURATION));
    let cache = Arc::new(RetryCache::open(dir.join("cache.json")).await);

    let sampler = SamplerModule::new(
        tracker.clone(),
        Box::new(provider),
        Duration::from_secs(config.sample_interval_seconds),
        shutdown_token.clone(),
        Box::new(clock),
    );

    let uploader = UploadModule::new(
        tracker.clone(),
        cache.clone(),
        HttpSink::new(&config)?,
        Duration::from_secs(config.upload_interval_seconds),
        shutdown_token.clone(),
        Box::new(DefaultClock),
    );

    let status = StatusModule::new(
        tracker.clone(),
        &config,
        Duration::from_secs(config.status_interval_seconds),
        shutdown_token.clone(),
        Box::new(DefaultClock),
    )?;

    let (_, sampler_result, uploader_result, status_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        sampler.run(),
        uploader.run(),
        status.run(),
    );

    if let Err(e) = sampler_result {
        error!("Sampler module got an error {:?}", e);
    }
    if let Err(e) = uploader_result {
        error!("Upload module got an error {:?}", e);
    }
    if let Err(e) = status_result {
        error!("Status module got an error {:?}", e);
    }

    // Whatever was still open when the loops stopped goes to the cache so the
    // next start can deliver it.
    let leftovers = tracker.flush(DefaultClock.time());
    if !leftovers.is_empty() {
        cache.add(leftovers).await;
    }

    Ok(())
}

#[cfg(test)]
mod client_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        client::{
            config::{Config, MonitorMode},
            queue::RetryCache,
            sampler::SamplerModule,
            status::StatusModule,
            tracker::SessionTracker,
            uploader::{HttpSink, UploadModule},
        },
        platform::MockAppProvider,
        server::{
            reconcile::{ReconcilePolicy, Reconciler},
            routes::{build_router, AppState},
            store::UsageStore,
        },
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
    };

    fn test_config(addr: std::net::SocketAddr) -> Config {
        Config {
            device_name: "test-device".into(),
            api_base_url: format!("http://{addr}/api/v1"),
            api_key: "k1".into(),
            monitor_mode: MonitorMode::Topmost,
            sample_interval_seconds: 1,
            upload_interval_seconds: 2,
            status_interval_seconds: 1,
        }
    }

    /// Very simple smoke test running the real modules against a real server
    /// on an ephemeral port. It can be improved by warping time so that it
    /// takes 10 times less time, but for now we have what we have.
    #[tokio::test]
    async fn smoke_test_client_against_server() -> Result<()> {
        *TEST_LOGGING;

        let state = Arc::new(AppState {
            store: UsageStore::in_memory(),
            reconciler: Reconciler::new(ReconcilePolicy::default()),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = build_router(state.clone());
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let mut provider = MockAppProvider::new();
        provider
            .expect_current_app()
            .returning(|| Ok(Some("alpha".into())));

        let config = test_config(addr);
        let shutdown_token = CancellationToken::new();
        let tracker = Arc::new(SessionTracker::new(chrono::Duration::seconds(1)));
        let dir = tempdir()?;
        let cache = Arc::new(RetryCache::open(dir.path().join("cache.json")).await);

        let sampler = SamplerModule::new(
            tracker.clone(),
            Box::new(provider),
            Duration::from_secs(1),
            shutdown_token.clone(),
            Box::new(DefaultClock),
        );
        let uploader = UploadModule::new(
            tracker.clone(),
            cache.clone(),
            HttpSink::new(&config)?,
            Duration::from_secs(2),
            shutdown_token.clone(),
            Box::new(DefaultClock),
        );
        let status = StatusModule::new(
            tracker.clone(),
            &config,
            Duration::from_secs(1),
            shutdown_token.clone(),
            Box::new(DefaultClock),
        )?;

        let (_, sampler_result, uploader_result, status_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(5500)).await;
                shutdown_token.cancel()
            },
            sampler.run(),
            uploader.run(),
            status.run(),
        );
        sampler_result?;
        uploader_result?;
        status_result?;
        server.abort();

        // The contiguous alpha session merged into a single growing record.
        let rows = state.store.query_usage(Some("test-device"), None).await;
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| &*r.app_name == "alpha"));
        assert!(rows.iter().map(|r| r.duration_seconds).sum::<i64>() >= 2);

        // Nothing failed, so nothing should be waiting in the retry cache.
        assert!(cache.is_empty().await);

        // The status channel registered liveness after the device appeared.
        let device = state.store.get_device("test-device").await.unwrap();
        assert!(device.last_seen.is_some());
        assert_eq!(device.current_app, "alpha");
        Ok(())
    }
}

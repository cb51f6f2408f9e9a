use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    api::{UsageItem, UsageUpload},
    utils::clock::Clock,
};

use super::{config::Config, queue::RetryCache, tracker::SessionTracker};

/// Destination for usage batches. The http client sits behind this so tests
/// can fail deliveries deterministically.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn deliver(&self, batch: Vec<UsageItem>) -> Result<()>;
}

pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    device_name: String,
    api_key: String,
}

impl HttpSink {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            url: format!("{}/usage", config.api_base_url.trim_end_matches('/')),
            device_name: config.device_name.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl UsageSink for HttpSink {
    async fn deliver(&self, batch: Vec<UsageItem>) -> Result<()> {
        let body = UsageUpload {
            device_name: self.device_name.clone(),
            api_key: self.api_key.clone(),
            usages: batch,
        };
        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Upload rejected with status {}", response.status()));
        }
        Ok(())
    }
}

/// Periodic delivery driver. Each tick drains the retry cache when possible,
/// then flushes the tracker and attempts delivery of the fresh batch; a
/// failed batch goes to the cache instead of being dropped. The loop awaits
/// every delivery before sleeping again, so at most one upload is in flight.
pub struct UploadModule<S> {
    tracker: Arc<SessionTracker>,
    cache: Arc<RetryCache>,
    sink: S,
    upload_frequency: Duration,
    shutdown: CancellationToken,
    time_provider: Box<dyn Clock>,
}

impl<S: UsageSink> UploadModule<S> {
    pub fn new(
        tracker: Arc<SessionTracker>,
        cache: Arc<RetryCache>,
        sink: S,
        upload_frequency: Duration,
        shutdown: CancellationToken,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            cache,
            sink,
            upload_frequency,
            shutdown,
            time_provider,
        }
    }

    /// Executes the upload event loop.
    pub async fn run(self) -> Result<()> {
        // Records cached by a previous run get a chance before the first tick.
        self.drain_cache().await;

        let mut upload_point = self.time_provider.instant();
        loop {
            upload_point += self.upload_frequency;

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(upload_point) => ()
            }

            self.tick().await;
        }
    }

    async fn tick(&self) {
        self.drain_cache().await;

        let batch = self.tracker.flush(self.time_provider.time());
        if batch.is_empty() {
            return;
        }

        info!("Uploading {} usage records", batch.len());
        match self.sink.deliver(batch.clone()).await {
            Ok(()) => info!("Upload succeeded"),
            Err(e) => {
                warn!("Upload failed, caching {} records: {e:?}", batch.len());
                self.cache.add(batch).await;
            }
        }
    }

    /// Attempts to deliver the full cache contents; the cache is cleared only
    /// after the server accepted them.
    async fn drain_cache(&self) {
        if self.cache.is_empty().await {
            return;
        }
        let cached = self.cache.load_all().await;
        info!("Retrying {} cached usage records", cached.len());
        match self.sink.deliver(cached).await {
            Ok(()) => {
                self.cache.clear().await;
                info!("Cached records delivered, cache cleared");
            }
            Err(e) => {
                warn!("Cached records still undeliverable: {e:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        api::UsageItem,
        client::{queue::RetryCache, tracker::SessionTracker},
        utils::clock::DefaultClock,
    };

    use super::{UploadModule, UsageSink};

    /// Sink that records delivered batches and can be switched to fail.
    #[derive(Default)]
    struct TestSink {
        failing: AtomicBool,
        delivered: Mutex<Vec<Vec<UsageItem>>>,
    }

    #[async_trait]
    impl UsageSink for Arc<TestSink> {
        async fn deliver(&self, batch: Vec<UsageItem>) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("connection refused"));
            }
            self.delivered.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn module(
        tracker: Arc<SessionTracker>,
        cache: Arc<RetryCache>,
        sink: Arc<TestSink>,
    ) -> UploadModule<Arc<TestSink>> {
        UploadModule::new(
            tracker,
            cache,
            sink,
            std::time::Duration::from_secs(60),
            CancellationToken::new(),
            Box::new(DefaultClock),
        )
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 4, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn failed_delivery_lands_in_cache_and_is_retried() {
        let dir = tempdir().unwrap();
        let tracker = Arc::new(SessionTracker::new(Duration::seconds(1)));
        let cache = Arc::new(RetryCache::open(dir.path().join("cache.json")).await);
        let sink = Arc::new(TestSink::default());
        let module = module(tracker.clone(), cache.clone(), sink.clone());

        tracker.observe(t0(), Some("chrome".into()));
        tracker.observe(t0() + Duration::seconds(10), None);

        sink.failing.store(true, Ordering::SeqCst);
        module.tick().await;
        assert!(sink.delivered.lock().unwrap().is_empty());
        assert_eq!(cache.load_all().await.len(), 1);

        // Next tick: network back, cached batch goes through and is cleared.
        sink.failing.store(false, Ordering::SeqCst);
        module.tick().await;
        assert!(cache.is_empty().await);
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(&*delivered[0][0].app_name, "chrome");
    }

    #[tokio::test]
    async fn successful_tick_skips_cache() {
        let dir = tempdir().unwrap();
        let tracker = Arc::new(SessionTracker::new(Duration::seconds(1)));
        let cache = Arc::new(RetryCache::open(dir.path().join("cache.json")).await);
        let sink = Arc::new(TestSink::default());
        let module = module(tracker.clone(), cache.clone(), sink.clone());

        tracker.observe(t0(), Some("chrome".into()));
        tracker.observe(t0() + Duration::seconds(5), Some("code".into()));

        module.tick().await;
        assert!(cache.is_empty().await);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_cache_intact_and_ordered() {
        let dir = tempdir().unwrap();
        let tracker = Arc::new(SessionTracker::new(Duration::seconds(1)));
        let cache = Arc::new(RetryCache::open(dir.path().join("cache.json")).await);
        let sink = Arc::new(TestSink::default());
        let module = module(tracker.clone(), cache.clone(), sink.clone());
        sink.failing.store(true, Ordering::SeqCst);

        tracker.observe(t0(), Some("chrome".into()));
        tracker.observe(t0() + Duration::seconds(10), Some("code".into()));
        module.tick().await;

        tracker.observe(t0() + Duration::seconds(20), None);
        module.tick().await;

        let cached = cache.load_all().await;
        assert_eq!(cached.len(), 2);
        assert_eq!(&*cached[0].app_name, "chrome");
        assert_eq!(&*cached[1].app_name, "code");
    }
}

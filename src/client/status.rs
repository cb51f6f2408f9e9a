use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{api::StatusUpload, utils::clock::Clock};

use super::{config::Config, tracker::SessionTracker};

/// Liveness channel: periodically reports the currently focused app so the
/// server can mark the device online. Unlike usage uploads this is purely
/// fire-and-forget; a missed beat carries no data worth retrying.
pub struct StatusModule {
    tracker: Arc<SessionTracker>,
    client: reqwest::Client,
    url: String,
    api_key: String,
    status_frequency: Duration,
    shutdown: CancellationToken,
    time_provider: Box<dyn Clock>,
}

impl StatusModule {
    pub fn new(
        tracker: Arc<SessionTracker>,
        config: &Config,
        status_frequency: Duration,
        shutdown: CancellationToken,
        time_provider: Box<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            tracker,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            url: format!(
                "{}/devices/{}/status",
                config.api_base_url.trim_end_matches('/'),
                urlencoding(&config.device_name),
            ),
            api_key: config.api_key.clone(),
            status_frequency,
            shutdown,
            time_provider,
        })
    }

    pub async fn run(self) -> Result<()> {
        let mut beat_point = self.time_provider.instant();
        loop {
            beat_point += self.status_frequency;

            self.beat().await;

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(beat_point) => ()
            }
        }
    }

    async fn beat(&self) {
        let body = StatusUpload {
            api_key: self.api_key.clone(),
            current_app: self
                .tracker
                .current_app()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        };

        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Status upload succeeded: {:?}", body.current_app)
            }
            Ok(response) => {
                warn!("Status upload rejected with status {}", response.status())
            }
            Err(e) => {
                warn!("Status upload failed: {e:?}")
            }
        }
    }
}

/// Percent-encodes the path segment characters that matter for device names.
fn urlencoding(segment: &str) -> String {
    segment
        .chars()
        .flat_map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                vec![c.to_string()]
            } else {
                c.to_string()
                    .into_bytes()
                    .into_iter()
                    .map(|b| format!("%{b:02X}"))
                    .collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::urlencoding;

    #[test]
    fn device_names_are_path_safe() {
        assert_eq!(urlencoding("DESKTOP-001"), "DESKTOP-001");
        assert_eq!(urlencoding("my laptop"), "my%20laptop");
        assert_eq!(urlencoding("dev/ops"), "dev%2Fops");
    }
}

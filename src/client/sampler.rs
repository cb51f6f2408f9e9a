use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{platform::AppProvider, utils::clock::Clock};

use super::tracker::SessionTracker;

/// Polls the platform for the active application and feeds the observations
/// into the [SessionTracker]. Provider errors are logged and skipped; the
/// tracker simply receives no observation for that tick.
pub struct SamplerModule {
    tracker: Arc<SessionTracker>,
    provider: Box<dyn AppProvider>,
    sample_frequency: Duration,
    shutdown: CancellationToken,
    time_provider: Box<dyn Clock>,
}

impl SamplerModule {
    pub fn new(
        tracker: Arc<SessionTracker>,
        provider: Box<dyn AppProvider>,
        sample_frequency: Duration,
        shutdown: CancellationToken,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            provider,
            sample_frequency,
            shutdown,
            time_provider,
        }
    }

    /// Executes the sampling event loop.
    pub async fn run(mut self) -> Result<()> {
        let mut sample_point = self.time_provider.instant();
        loop {
            sample_point += self.sample_frequency;

            match self.provider.current_app() {
                Ok(current) => {
                    debug!("Observed active app {:?}", current);
                    self.tracker.observe(self.time_provider.time(), current);
                }
                Err(e) => {
                    error!("Encountered an error during sampling {:?}", e)
                }
            }

            tokio::select! {
                // Cancelation stops the event loop. The open session stays in
                // the tracker and gets flushed by the final drain.
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(sample_point) => ()
            }
        }
    }
}

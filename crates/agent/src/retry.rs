//! Rate-limit aware retry around provider calls.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use concierge_config::RetryConfig;
use concierge_core::error::ProviderError;
use tracing::warn;

use crate::emitter::StreamEmitter;
use crate::stream_event::{StatusPhase, StreamEvent};

/// Detail attached to the one status event a request gets when it starts backing off.
pub const RETRY_NOTICE: &str = "provider busy, retrying";

/// Retries provider calls that failed with a rate-limit class error.
///
/// Any other error is returned immediately. Backoff sleeps race the
/// request's cancellation token, so a disconnected client never waits
/// out a delay.
#[derive(Debug, Clone)]
pub struct RetryGovernor {
    max_retries: u32,
    delays: Vec<Duration>,
}

impl RetryGovernor {
    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self { max_retries, delays }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.delays_ms.iter().copied().map(Duration::from_millis).collect(),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (0-based). The last entry repeats.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let index = (retry as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or(Duration::ZERO)
    }

    /// Run `op`, retrying on rate limits up to `max_retries` times.
    ///
    /// `notified` is shared by every call of one request so the user sees
    /// at most one "retrying" status no matter how many calls back off.
    /// The notice is reported under `phase`, the stage the request is in.
    pub async fn call<T, F, Fut>(
        &self,
        emitter: &StreamEmitter,
        notified: &AtomicBool,
        phase: StatusPhase,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut retry = 0u32;

        loop {
            if emitter.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = emitter.cancelled() => return Err(ProviderError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limit() && retry < self.max_retries => e,
                Err(e) => return Err(e),
            };

            let delay = self.delay_for(retry);
            warn!(
                retry = retry + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Provider rate limited, backing off"
            );

            if !notified.swap(true, Ordering::SeqCst) {
                emitter
                    .emit(StreamEvent::status_with(phase, RETRY_NOTICE))
                    .await;
            }

            tokio::select! {
                biased;
                _ = emitter.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            retry += 1;
        }
    }
}

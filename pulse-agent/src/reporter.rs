//! Batching, rate-limited metric reporter.
//!
//! Consumes the collector channel, buffers envelopes into batches, and
//! pushes each batch through the configured transport under a token
//! bucket. A failed batch is dropped and logged; the pipeline keeps
//! going.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use pulse_core::{signature, MetricEnvelope, PulseError, Result};

use crate::transport::MetricTransport;

/// Envelopes per request.
pub const BATCH_SIZE: usize = 50;

/// Deadline covering the limiter wait and the send itself.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MetricReporter {
    transport: Box<dyn MetricTransport>,
    sign_key: Option<Vec<u8>>,
    limiter: DefaultDirectRateLimiter,
}

impl MetricReporter {
    /// `rate_limit` is the token refill rate and burst capacity per
    /// second.
    pub fn new(
        transport: Box<dyn MetricTransport>,
        sign_key: Option<Vec<u8>>,
        rate_limit: u32,
    ) -> Self {
        let rate = NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN);

        Self { transport, sign_key, limiter: RateLimiter::direct(Quota::per_second(rate)) }
    }

    /// Consume the metrics channel until it closes, then flush the
    /// residue.
    pub async fn run(&self, mut rx: mpsc::Receiver<MetricEnvelope>) {
        info!("Starting metrics consumer");

        let mut batch = Vec::with_capacity(BATCH_SIZE);

        while let Some(envelope) = rx.recv().await {
            debug!(id = %envelope.id, kind = %envelope.kind, "Processing metric");

            batch.push(envelope);

            if batch.len() >= BATCH_SIZE {
                self.send_batch(&mut batch).await;
            }
        }

        if !batch.is_empty() {
            self.send_batch(&mut batch).await;
        }

        info!("Stopping metrics consumer");
    }

    async fn send_batch(&self, batch: &mut Vec<MetricEnvelope>) {
        if let Err(error) = self.try_send(batch).await {
            error!(%error, dropped = batch.len(), "failed to report metrics batch");
        }

        batch.clear();
    }

    async fn try_send(&self, batch: &[MetricEnvelope]) -> Result<()> {
        tokio::time::timeout(SEND_TIMEOUT, self.limiter.until_ready())
            .await
            .map_err(|_| PulseError::Internal("rate limiter wait timed out".to_string()))?;

        let payload = serde_json::to_vec(batch)?;

        let hashsum = self.sign_key.as_deref().map(|key| signature::sign_hex(key, &payload));

        self.transport.send(hashsum.as_deref(), payload).await
    }
}

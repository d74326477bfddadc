//! gRPC transport for metric batches.
//!
//! The payload travels as raw JSON bytes inside the request; gzip is
//! negotiated at the gRPC encoding layer and the signature rides in the
//! `hashsum` metadata entry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request};
use tracing::{info, warn};

use pulse_api::pulse::v1::metric_service_client::MetricServiceClient;
use pulse_api::pulse::v1::{Payload, UpdateMetricsRequest};
use pulse_core::{PulseError, Result};

use super::{retry_wait, MetricTransport, SEND_ATTEMPTS};

pub struct GrpcTransport {
    client: MetricServiceClient<Channel>,
}

impl GrpcTransport {
    /// Build a lazily-connecting client against `addr`.
    pub fn connect(addr: &str) -> Result<Self> {
        let uri = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };

        let channel = Endpoint::from_shared(uri)
            .map_err(|e| PulseError::InvalidConfig {
                reason: format!("invalid gRPC address {addr}: {e}"),
            })?
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(5))
            .connect_lazy();

        let client = MetricServiceClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);

        Ok(Self { client })
    }
}

#[async_trait]
impl MetricTransport for GrpcTransport {
    async fn send(&self, hashsum: Option<&str>, payload: Vec<u8>) -> Result<()> {
        let mut last_error = None;

        for attempt in 0..SEND_ATTEMPTS {
            let mut request = Request::new(UpdateMetricsRequest {
                payload: Some(Payload { data: Some(payload.clone()) }),
            });

            if let Some(hashsum) = hashsum {
                let value = hashsum.parse().map_err(|_| {
                    PulseError::Internal("signature is not valid metadata".to_string())
                })?;
                request.metadata_mut().insert("hashsum", value);
            }

            let mut client = self.client.clone();
            let start = Instant::now();

            match client.update_metrics(request).await {
                Ok(response) => {
                    info!(
                        method = "UpdateMetrics",
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "outgoing grpc request"
                    );

                    let response = response.into_inner();

                    if let Some(msg) = response.error.and_then(|e| e.msg) {
                        return Err(PulseError::Internal(format!(
                            "logical error received: {msg}"
                        )));
                    }

                    return Ok(());
                }

                Err(status) if is_retryable(&status) => {
                    warn!(
                        code = %status.code(),
                        attempt = attempt + 1,
                        "metrics request failed, retrying"
                    );
                    if attempt + 1 < SEND_ATTEMPTS {
                        tokio::time::sleep(retry_wait(attempt)).await;
                    }
                    last_error = Some(status);
                }

                Err(status) => {
                    return Err(PulseError::Internal(format!(
                        "CODE: {}, MESSAGE: {}",
                        status.code(),
                        status.message()
                    )));
                }
            }
        }

        let reason = last_error.map(|s| s.to_string()).unwrap_or_default();
        Err(PulseError::Unavailable(format!("retry attempts exceeded: {reason}")))
    }
}

fn is_retryable(status: &tonic::Status) -> bool {
    matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded)
}

//! Metric delivery transports.

use std::time::Duration;

use async_trait::async_trait;

use pulse_core::Result;

mod grpc;
mod http;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

/// A sender for signed metric payloads.
///
/// `payload` is the raw JSON bytes of an envelope array; each transport
/// owns its compression and encryption. Transports retry transient
/// network failures internally; any error they return is final.
#[async_trait]
pub trait MetricTransport: Send + Sync {
    async fn send(&self, hashsum: Option<&str>, payload: Vec<u8>) -> Result<()>;
}

pub(crate) const SEND_ATTEMPTS: u32 = 3;
const RETRY_WAIT_INTERVAL_SECS: u64 = 2;

/// Linear backoff schedule: 1 s, 3 s, 5 s.
pub(crate) fn retry_wait(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt) * RETRY_WAIT_INTERVAL_SECS + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_schedule_is_linear() {
        assert_eq!(retry_wait(0), Duration::from_secs(1));
        assert_eq!(retry_wait(1), Duration::from_secs(3));
        assert_eq!(retry_wait(2), Duration::from_secs(5));
    }
}

//! HTTP transport for metric batches.
//!
//! Outbound order: the payload arrives already signed (the digest rides
//! in the `HashSHA256` header), gets gzip-compressed, and is optionally
//! sealed with the server's RSA public key.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use rsa::RsaPublicKey;
use tracing::{debug, warn};

use pulse_core::{codec, crypto, PulseError, Result};

use super::{retry_wait, MetricTransport, SEND_ATTEMPTS};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    public_key: Option<RsaPublicKey>,
    source_ip: String,
}

impl HttpTransport {
    pub fn new(server_addr: &str, public_key: Option<RsaPublicKey>) -> Result<Self> {
        let base = if server_addr.starts_with("http://") || server_addr.starts_with("https://") {
            server_addr.to_string()
        } else {
            format!("http://{server_addr}")
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PulseError::Internal(e.to_string()))?;

        let source_ip = local_ipv4()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());

        Ok(Self {
            client,
            endpoint: format!("{}/updates", base.trim_end_matches('/')),
            public_key,
            source_ip,
        })
    }
}

#[async_trait]
impl MetricTransport for HttpTransport {
    async fn send(&self, hashsum: Option<&str>, payload: Vec<u8>) -> Result<()> {
        let mut body = codec::compress_gzip(&payload)?;

        if let Some(key) = &self.public_key {
            body = crypto::encrypt_oaep(key, &body)?;
            debug!("payload encrypted");
        }

        let mut last_error = None;

        for attempt in 0..SEND_ATTEMPTS {
            let mut request = self
                .client
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .header("Content-Encoding", "gzip")
                .header("X-Real-IP", &self.source_ip)
                .body(body.clone());

            if let Some(hashsum) = hashsum {
                request = request.header("HashSHA256", hashsum);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(()),

                // A non-2xx response is a final answer, not a network fault.
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(PulseError::Internal(format!(
                        "failed to send data: {status} - {text}"
                    )));
                }

                Err(error) if is_retryable(&error) => {
                    warn!(%error, attempt = attempt + 1, "metrics request failed, retrying");
                    if attempt + 1 < SEND_ATTEMPTS {
                        tokio::time::sleep(retry_wait(attempt)).await;
                    }
                    last_error = Some(error);
                }

                Err(error) => return Err(PulseError::Internal(format!("request failed: {error}"))),
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(PulseError::Unavailable(format!("retry attempts exceeded: {reason}")))
    }
}

/// Connect-level faults (refused connections, DNS failures) and timeouts
/// are retryable.
fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

/// Best-effort local IPv4 for the `X-Real-IP` header. Connecting a UDP
/// socket performs no I/O; it only resolves the route's source address.
fn local_ipv4() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip()).filter(|ip| !ip.is_loopback())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalization() {
        let transport = HttpTransport::new("localhost:8080", None).unwrap();
        assert_eq!(transport.endpoint, "http://localhost:8080/updates");

        let transport = HttpTransport::new("http://metrics.example.com/", None).unwrap();
        assert_eq!(transport.endpoint, "http://metrics.example.com/updates");
    }
}

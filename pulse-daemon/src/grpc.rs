//! gRPC ingest service.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument};

use pulse_api::pulse::v1::metric_service_server::MetricService;
use pulse_api::pulse::v1::{Status as ProtoStatus, UpdateMetricsRequest, UpdateMetricsResponse};
use pulse_core::{metric, signature, MetricEnvelope, PulseError, Storage};

/// gRPC service implementation.
pub struct MetricServiceImpl {
    storage: Arc<dyn Storage>,
    sign_key: Option<Vec<u8>>,
}

impl MetricServiceImpl {
    pub fn new(storage: Arc<dyn Storage>, sign_key: Option<Vec<u8>>) -> Self {
        Self { storage, sign_key }
    }
}

#[tonic::async_trait]
impl MetricService for MetricServiceImpl {
    #[instrument(skip(self, request))]
    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> std::result::Result<Response<UpdateMetricsResponse>, Status> {
        info!(method = "UpdateMetrics", "incoming grpc request");

        let hashsum = request
            .metadata()
            .get("hashsum")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let data = request
            .into_inner()
            .payload
            .and_then(|payload| payload.data)
            .unwrap_or_default();

        if let Some(key) = &self.sign_key {
            let Some(hashsum) = hashsum else {
                return Err(Status::invalid_argument("missing payload signature"));
            };

            debug!(%hashsum, "verifying payload signature");

            if !signature::verify_hex(key, &data, &hashsum) {
                return Err(Status::invalid_argument("payload signature mismatch"));
            }
        }

        let envelopes: Vec<MetricEnvelope> = serde_json::from_slice(&data)
            .map_err(|e| Status::invalid_argument(format!("malformed payload: {e}")))?;

        for envelope in &envelopes {
            envelope
                .validate_update()
                .map_err(|e| Status::invalid_argument(e.to_string()))?;
        }

        if let Some(id) = metric::find_kind_conflict(&envelopes) {
            let error = PulseError::KindMismatch { id: id.to_string() };
            return Err(Status::invalid_argument(error.to_string()));
        }

        self.storage
            .set_batch(&envelopes)
            .await
            .map_err(|e| Status::internal(format!("failed to write metrics to storage: {e}")))?;

        Ok(Response::new(UpdateMetricsResponse {
            status: Some(ProtoStatus { msg: Some("OK".to_string()) }),
            error: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pulse_api::pulse::v1::Payload;
    use pulse_core::MemoryStorage;

    fn service(sign_key: Option<Vec<u8>>) -> (Arc<dyn Storage>, MetricServiceImpl) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        (storage.clone(), MetricServiceImpl::new(storage, sign_key))
    }

    fn update_request(data: &[u8]) -> Request<UpdateMetricsRequest> {
        Request::new(UpdateMetricsRequest {
            payload: Some(Payload { data: Some(data.to_vec()) }),
        })
    }

    #[tokio::test]
    async fn test_update_metrics_applies_batch() {
        let (storage, service) = service(None);

        let payload = br#"[{"id":"hits","type":"counter","delta":4}]"#;
        let response = service.update_metrics(update_request(payload)).await.unwrap();

        assert_eq!(response.into_inner().status.unwrap().msg.unwrap(), "OK");
        assert_eq!(storage.get_counter("hits").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_update_metrics_verifies_signature() {
        let (storage, service) = service(Some(b"k".to_vec()));

        let payload = br#"[{"id":"hits","type":"counter","delta":4}]"#;

        // Missing metadata entry.
        let status = service.update_metrics(update_request(payload)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        // Wrong digest.
        let mut request = update_request(payload);
        request
            .metadata_mut()
            .insert("hashsum", signature::sign_hex(b"other", payload).parse().unwrap());
        let status = service.update_metrics(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        // Correct digest.
        let mut request = update_request(payload);
        request
            .metadata_mut()
            .insert("hashsum", signature::sign_hex(b"k", payload).parse().unwrap());
        service.update_metrics(request).await.unwrap();
        assert_eq!(storage.get_counter("hits").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_update_metrics_rejects_same_id_under_both_kinds() {
        let (storage, service) = service(None);

        let payload = br#"[
            {"id":"x","type":"counter","delta":1},
            {"id":"x","type":"gauge","value":2.0}
        ]"#;
        let status = service.update_metrics(update_request(payload)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        assert!(storage.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_metrics_rejects_malformed_payload() {
        let (_, service) = service(None);

        let status = service.update_metrics(update_request(b"not json")).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let invalid = br#"[{"id":"","type":"counter","delta":1}]"#;
        let status = service.update_metrics(update_request(invalid)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}

//! HTTP ingest and query handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use tracing::error;

use pulse_core::{metric, MetricEnvelope, MetricKind, PulseError, Storage as _};

use super::AppState;

const TEXT_HTML: &str = "text/html";
const TEXT_PLAIN: &str = "text/plain";
const APPLICATION_JSON: &str = "application/json";

/// Map a core error onto the HTTP status surface. Kind mismatches on the
/// single-metric paths are treated as internal because the stored kind
/// table is trusted; the batch handler maps them to 400 before calling
/// this.
fn error_response(error: PulseError) -> Response {
    let status = match &error {
        PulseError::EmptyMetricName
        | PulseError::InvalidMetricKind(_)
        | PulseError::MissingDelta
        | PulseError::MissingValue
        | PulseError::InvalidMetricValue(_)
        | PulseError::EmptyPayload
        | PulseError::SignatureMismatch => StatusCode::BAD_REQUEST,
        PulseError::MetricNotFound { .. } => StatusCode::NOT_FOUND,
        PulseError::Forbidden => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    error!(%error, "request failed");

    (status, error.to_string()).into_response()
}

fn json_response(envelope: &MetricEnvelope) -> Response {
    match serde_json::to_vec(envelope) {
        Ok(body) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, APPLICATION_JSON)], body).into_response()
        }
        Err(error) => error_response(error.into()),
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    if body.is_empty() {
        return Err(error_response(PulseError::EmptyPayload));
    }

    serde_json::from_slice(body).map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("malformed payload: {e}")).into_response()
    })
}

/// `GET /ping` — probe storage liveness.
pub async fn ping(State(state): State<Arc<AppState>>) -> Response {
    if let Err(error) = state.storage.ping().await {
        return error_response(error);
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_HTML)], "OK").into_response()
}

/// `GET /` — every metric as sorted `"name value"` lines.
pub async fn get_all_metrics(State(state): State<Arc<AppState>>) -> Response {
    let metrics = match state.storage.get_all().await {
        Ok(metrics) => metrics,
        Err(error) => return error_response(error),
    };

    let mut lines: Vec<String> =
        metrics.values().map(|m| format!("{} {}", m.id, m.value)).collect();
    lines.sort();

    (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_HTML)], lines.join("\n")).into_response()
}

/// `GET /value/{type}/{name}` — plaintext current value.
pub async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let kind: MetricKind = match kind.parse() {
        Ok(kind) => kind,
        Err(error) => return error_response(error),
    };

    let value = match kind {
        MetricKind::Counter => state.storage.get_counter(&name).await.map(|v| v.to_string()),
        MetricKind::Gauge => state.storage.get_gauge(&name).await.map(|v| v.to_string()),
    };

    match value {
        Ok(value) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_PLAIN)], value).into_response()
        }
        Err(error) => error_response(error),
    }
}

/// `POST /update/{type}/{name}/{value}` — upsert via path params.
pub async fn update_metric(
    State(state): State<Arc<AppState>>,
    Path((kind, name, raw_value)): Path<(String, String, String)>,
) -> Response {
    let kind: MetricKind = match kind.parse() {
        Ok(kind) => kind,
        Err(error) => return error_response(error),
    };

    // A double slash in the path binds an empty name segment.
    if name.is_empty() {
        return error_response(PulseError::EmptyMetricName);
    }

    let written = match kind {
        MetricKind::Counter => match raw_value.parse::<i64>() {
            Ok(delta) => state.storage.set_counter(&name, delta).await,
            Err(_) => return error_response(PulseError::InvalidMetricValue(raw_value)),
        },
        MetricKind::Gauge => match raw_value.parse::<f64>() {
            Ok(value) => state.storage.set_gauge(&name, value).await,
            Err(_) => return error_response(PulseError::InvalidMetricValue(raw_value)),
        },
    };

    match written {
        Ok(()) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_PLAIN)], "OK").into_response(),
        Err(error) => error_response(error),
    }
}

/// `POST /value` — JSON envelope query, echoed back with the current value.
pub async fn get_metric_json(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let envelope: MetricEnvelope = match parse_json(&body) {
        Ok(envelope) => envelope,
        Err(response) => return response,
    };

    if let Err(error) = envelope.validate() {
        return error_response(error);
    }

    let result = match envelope.kind {
        MetricKind::Counter => state
            .storage
            .get_counter(&envelope.id)
            .await
            .map(|v| MetricEnvelope::counter(envelope.id.clone(), v)),
        MetricKind::Gauge => state
            .storage
            .get_gauge(&envelope.id)
            .await
            .map(|v| MetricEnvelope::gauge(envelope.id.clone(), v)),
    };

    match result {
        Ok(current) => json_response(&current),
        Err(error) => error_response(error),
    }
}

/// `POST /update` — JSON envelope upsert, echoed back with the
/// post-write value. Counters require a fresh read so the echo reflects
/// the post-increment total.
pub async fn update_metric_json(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let envelope: MetricEnvelope = match parse_json(&body) {
        Ok(envelope) => envelope,
        Err(response) => return response,
    };

    if let Err(error) = envelope.validate_update() {
        return error_response(error);
    }

    let result = match envelope.kind {
        MetricKind::Counter => {
            let delta = envelope.delta.unwrap_or_default();
            match state.storage.set_counter(&envelope.id, delta).await {
                Ok(()) => state
                    .storage
                    .get_counter(&envelope.id)
                    .await
                    .map(|v| MetricEnvelope::counter(envelope.id.clone(), v)),
                Err(error) => Err(error),
            }
        }
        MetricKind::Gauge => {
            let value = envelope.value.unwrap_or_default();
            state
                .storage
                .set_gauge(&envelope.id, value)
                .await
                .map(|()| MetricEnvelope::gauge(envelope.id.clone(), value))
        }
    };

    match result {
        Ok(written) => json_response(&written),
        Err(error) => error_response(error),
    }
}

/// `POST /updates` — batch upsert of a JSON envelope array.
pub async fn update_metrics_batch(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let envelopes: Vec<MetricEnvelope> = match parse_json(&body) {
        Ok(envelopes) => envelopes,
        Err(response) => return response,
    };

    for envelope in &envelopes {
        if let Err(error) = envelope.validate_update() {
            return error_response(error);
        }
    }

    // An id carried under both kinds makes the batch unappliable on any
    // backend.
    if let Some(id) = metric::find_kind_conflict(&envelopes) {
        let error = PulseError::KindMismatch { id: id.to_string() };
        return (StatusCode::BAD_REQUEST, error.to_string()).into_response();
    }

    match state.storage.set_batch(&envelopes).await {
        Ok(()) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_HTML)], "OK").into_response(),
        Err(error @ PulseError::KindMismatch { .. }) => {
            // On the batch path a kind conflict is the caller's fault.
            (StatusCode::BAD_REQUEST, error.to_string()).into_response()
        }
        Err(error) => error_response(error),
    }
}

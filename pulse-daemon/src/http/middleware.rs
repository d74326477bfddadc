//! Request middleware: CIDR admission, logging, decryption, request
//! decompression, and signature verification.
//!
//! The response side (gzip compression, panic recovery, trailing-slash
//! normalization) is handled by tower-http layers wired up in the router.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body::Body as HttpBody;
use tower_http::compression::predicate::Predicate;
use tracing::{error, info};

use pulse_core::{codec, crypto, signature, PulseError};

use super::AppState;

/// Admission check against the trusted subnet. The client address is
/// resolved from `X-Real-IP`, then the first `X-Forwarded-For` entry,
/// then the socket peer.
pub async fn admit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(subnet) = &state.trusted_subnet else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match client_ip(request.headers(), peer) {
        Some(ip) if subnet.contains(&ip) => next.run(request).await,
        Some(_) => {
            (StatusCode::FORBIDDEN, PulseError::Forbidden.to_string()).into_response()
        }
        None => {
            error!("failed to resolve client address");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
    {
        return Some(ip);
    }

    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
    {
        return Some(ip);
    }

    peer
}

/// One log line per request with method, path, status, response size,
/// and wall-clock duration.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let size = HttpBody::size_hint(response.body()).exact().unwrap_or(0);
    info!(
        %method,
        path,
        status = response.status().as_u16(),
        size,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request handled"
    );

    response
}

/// RSA-OAEP decryption of the request body when a private key is
/// configured.
pub async fn decrypt(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let Some(key) = &state.private_key else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();

    let sealed = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match crypto::decrypt_oaep(key, &sealed) {
        Ok(plain) => next.run(Request::from_parts(parts, Body::from(plain))).await,
        Err(error) => {
            error!(%error, "failed to decrypt request body");
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        }
    }
}

/// Transparent gzip request decompression.
pub async fn decompress_request(request: Request, next: Next) -> Response {
    let is_gzip = request
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);

    if !is_gzip {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();

    let compressed = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match codec::decompress_gzip(&compressed) {
        Ok(plain) => {
            parts.headers.remove(header::CONTENT_ENCODING);
            parts.headers.remove(header::CONTENT_LENGTH);
            next.run(Request::from_parts(parts, Body::from(plain))).await
        }
        Err(error) => {
            error!(%error, "failed to decompress request body");
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        }
    }
}

/// HMAC-SHA256 verification of the request body against the
/// `HashSHA256` header. With a key configured, a missing or wrong digest
/// rejects the request.
pub async fn verify_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = &state.sign_key else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();

    let payload = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let provided = parts.headers.get("hashsha256").and_then(|v| v.to_str().ok());

    match provided {
        Some(digest) if signature::verify_hex(key, &payload, digest) => {
            next.run(Request::from_parts(parts, Body::from(payload))).await
        }
        _ => {
            error!("payload signature mismatch");
            (StatusCode::BAD_REQUEST, PulseError::SignatureMismatch.to_string()).into_response()
        }
    }
}

/// Responses are gzip-compressed only for JSON, HTML, or untyped
/// content.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompressibleContentType;

impl Predicate for CompressibleContentType {
    fn should_compress<B>(&self, response: &http::Response<B>) -> bool
    where
        B: HttpBody,
    {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        content_type.is_empty()
            || content_type.starts_with("application/json")
            || content_type.starts_with("text/html")
    }
}

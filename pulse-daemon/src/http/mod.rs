//! HTTP ingest surface: router assembly and shared state.

use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use ipnet::IpNet;
use rsa::RsaPrivateKey;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;

use pulse_core::Storage;

pub mod handlers;
pub mod middleware;

/// State shared by every handler and middleware.
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub sign_key: Option<Vec<u8>>,
    pub private_key: Option<RsaPrivateKey>,
    pub trusted_subnet: Option<IpNet>,
}

/// Assemble the router.
///
/// Layer order (outermost first): admission, request logging, panic
/// recovery, response compression; the batch ingest route additionally
/// runs decrypt → decompress → signature verification ahead of its
/// handler.
pub fn build_router(state: Arc<AppState>) -> Router {
    let batch_api = Router::new()
        .route("/updates", post(handlers::update_metrics_batch))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::verify_signature))
        .layer(axum_middleware::from_fn(middleware::decompress_request))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::decrypt));

    let json_api = Router::new()
        .route("/value", post(handlers::get_metric_json))
        .route("/update", post(handlers::update_metric_json))
        .layer(axum_middleware::from_fn(middleware::decompress_request));

    let plain_api = Router::new()
        .route("/value/:kind/:name", get(handlers::get_metric))
        .route("/update/:kind/:name/:value", post(handlers::update_metric));

    Router::new()
        .route("/", get(handlers::get_all_metrics))
        .route("/ping", get(handlers::ping))
        .merge(plain_api)
        .merge(json_api)
        .merge(batch_api)
        .layer(
            CompressionLayer::new()
                .gzip(true)
                .compress_when(middleware::CompressibleContentType),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum_middleware::from_fn(middleware::log_requests))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::admit))
        .with_state(state)
}

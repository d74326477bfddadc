//! Server lifecycle supervisor.
//!
//! Wires storage, the snapshot writer, and the HTTP and gRPC listeners
//! together, then supervises them until a shutdown signal or the first
//! worker failure.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::Request;
use axum::ServiceExt;
use ipnet::IpNet;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tonic::codec::CompressionEncoding;
use tower::Layer;
use tower_http::normalize_path::NormalizePathLayer;
use tracing::{error, info, warn};

use pulse_api::pulse::v1::metric_service_server::MetricServiceServer;
use pulse_core::{crypto, new_storage, DataManager, Storage as _};

use crate::config::Config;
use crate::grpc::MetricServiceImpl;
use crate::http::{build_router, AppState};
use crate::shutdown;

/// Grace window for in-flight work after the shutdown signal.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

pub async fn run(config: Config) -> anyhow::Result<()> {
    let storage = new_storage(config.database_dsn.as_deref())
        .await
        .context("failed to initialize storage")?;

    let sign_key = config.sign_key.as_ref().map(|k| k.as_bytes().to_vec());

    let private_key = match &config.crypto_key {
        Some(path) => {
            info!("Loading crypto key {path}");
            Some(crypto::load_private_key(path)?)
        }
        None => None,
    };

    let trusted_subnet = config
        .trusted_subnet
        .as_ref()
        .map(|s| s.parse::<IpNet>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("failed to parse trusted subnet: {e}"))?;

    let state = Arc::new(AppState {
        storage: storage.clone(),
        sign_key: sign_key.clone(),
        private_key,
        trusted_subnet,
    });

    let datamanager = config.store_file.as_ref().filter(|f| !f.is_empty()).map(|file| {
        DataManager::new(storage.clone(), file.clone(), Duration::from_secs(config.store_interval))
    });

    if config.restore {
        if let Some(dm) = &datamanager {
            dm.restore().await.context("failed to restore metrics snapshot")?;
        }
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut workers: JoinSet<anyhow::Result<()>> = JoinSet::new();

    if let Some(dm) = datamanager {
        let rx = shutdown_tx.subscribe();
        workers.spawn(async move { dm.run(rx).await.map_err(Into::into) });
    }

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.server_addr))?;
    info!("HTTP server listening on {}", config.server_addr);

    let app = NormalizePathLayer::trim_trailing_slash().layer(build_router(state));
    let mut http_rx = shutdown_tx.subscribe();
    workers.spawn(async move {
        axum::serve(
            listener,
            ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
        )
        .with_graceful_shutdown(async move {
            let _ = http_rx.recv().await;
        })
        .await
        .map_err(Into::into)
    });

    let grpc_addr = tokio::net::lookup_host(config.grpc_server_addr.as_str())
        .await
        .with_context(|| format!("failed to resolve gRPC address {}", config.grpc_server_addr))?
        .next()
        .with_context(|| format!("no address found for {}", config.grpc_server_addr))?;
    info!("gRPC server listening on {grpc_addr}");

    let service = MetricServiceImpl::new(storage.clone(), sign_key);
    let mut grpc_rx = shutdown_tx.subscribe();
    let grpc_server = tonic::transport::Server::builder()
        .add_service(
            MetricServiceServer::new(service)
                .accept_compressed(CompressionEncoding::Gzip)
                .send_compressed(CompressionEncoding::Gzip),
        )
        .serve_with_shutdown(grpc_addr, async move {
            let _ = grpc_rx.recv().await;
        });
    workers.spawn(async move { grpc_server.await.map_err(Into::into) });

    // Supervise until a signal arrives or a worker fails.
    let mut quit = shutdown::shutdown_signal();

    tokio::select! {
        _ = quit.recv() => {
            info!("Gracefully shutting down server");
        }

        Some(result) = workers.join_next() => {
            let _ = shutdown_tx.send(());
            match result {
                Ok(Ok(())) => warn!("worker exited unexpectedly"),
                Ok(Err(error)) => {
                    storage.close().await;
                    return Err(error);
                }
                Err(error) => {
                    storage.close().await;
                    return Err(error.into());
                }
            }
        }
    }

    let _ = shutdown_tx.send(());

    let drain = async {
        while let Some(result) = workers.join_next().await {
            if let Ok(Err(error)) = result {
                error!(%error, "worker failed during shutdown");
            }
        }
    };

    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        warn!("shutdown deadline exceeded, aborting remaining workers");
        workers.abort_all();
    }

    storage.close().await;
    info!("Server stopped");

    Ok(())
}

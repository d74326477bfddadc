//! Agent supervisor: samplers, producer, and reporter wired over the
//! shared metrics channel.
//!
//! On shutdown the producer performs a final flush and drops its sender,
//! which closes the channel; the reporter drains whatever remains and
//! exits on its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

use pulse_core::crypto;

use crate::collector::MetricCollector;
use crate::config::Config;
use crate::reporter::MetricReporter;
use crate::transport::{GrpcTransport, HttpTransport, MetricTransport};

pub struct Agent {
    config: Config,
    collector: Arc<MetricCollector>,
    reporter: Arc<MetricReporter>,
}

impl Agent {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let public_key = config
            .crypto_key
            .as_ref()
            .map(|path| {
                info!("Loading crypto key {path}");
                crypto::load_public_key(path)
            })
            .transpose()?;

        let transport: Box<dyn MetricTransport> = if config.use_grpc {
            info!("Shipping metrics over gRPC to {}", config.grpc_server_addr);
            Box::new(GrpcTransport::connect(&config.grpc_server_addr)?)
        } else {
            Box::new(HttpTransport::new(&config.server_addr, public_key)?)
        };

        let collector = Arc::new(MetricCollector::new(
            Duration::from_secs(config.poll_interval),
            Duration::from_secs(config.report_interval),
        ));

        let sign_key = config.sign_key.as_ref().map(|k| k.as_bytes().to_vec());
        let reporter = Arc::new(MetricReporter::new(transport, sign_key, config.rate_limit));

        Ok(Self { config, collector, reporter })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting agent with server endpoint '{}'", self.config.server_addr);
        info!("Polling interval: {}s", self.config.poll_interval);
        info!("Reporting interval: {}s", self.config.report_interval);

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (tx, rx) = self.collector.channel();

        let mut workers = JoinSet::new();

        let collector = self.collector.clone();
        let shutdown = shutdown_tx.subscribe();
        workers.spawn(async move { collector.run_runtime_sampler(shutdown).await });

        let collector = self.collector.clone();
        let shutdown = shutdown_tx.subscribe();
        workers.spawn(async move { collector.run_host_sampler(shutdown).await });

        let collector = self.collector.clone();
        let shutdown = shutdown_tx.subscribe();
        workers.spawn(async move { collector.run_producer(tx, shutdown).await });

        let reporter = self.reporter.clone();
        workers.spawn(async move { reporter.run(rx).await });

        wait_for_signal().await;
        info!("Gracefully shutting down agent");

        let _ = shutdown_tx.send(());

        // Waiting for the workers drains the in-flight batches.
        while workers.join_next().await.is_some() {}

        Ok(())
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

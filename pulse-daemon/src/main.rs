use tracing::info;

mod config;
mod grpc;
mod http;
mod server;
mod shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::load()?;

    pulse_core::logging::init(&config.log_level);

    info!("Pulse server starting");

    server::run(config).await
}

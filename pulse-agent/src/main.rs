use anyhow::Result;

mod agent;
mod collector;
mod config;
mod reporter;
mod transport;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load()?;

    pulse_core::logging::init(&config.log_level);

    let agent = agent::Agent::new(config)?;

    agent.run().await
}

//! Agent configuration.
//!
//! Same layering as the server: environment variables over command-line
//! flags over the JSON config file over built-in defaults.

use clap::Parser;
use serde::Deserialize;

use pulse_core::{PulseError, Result};

#[derive(Parser, Debug, Default)]
#[command(name = "pulse-agent", about = "Pulse metrics agent", version)]
pub struct Flags {
    /// path to config file [env:CONFIG]
    #[arg(short = 'c', long = "config")]
    pub config_file: Option<String>,

    /// server endpoint address [env:ADDRESS]
    #[arg(short = 'a', long = "address")]
    pub server_addr: Option<String>,

    /// gRPC server endpoint address [env:GRPC_ADDRESS]
    #[arg(long = "grpc-address")]
    pub grpc_server_addr: Option<String>,

    /// log output level [env:LOG_LEVEL]
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// signing key [env:KEY]
    #[arg(short = 'k', long = "key")]
    pub sign_key: Option<String>,

    /// path to RSA public key file to encrypt messages to the server [env:CRYPTO_KEY]
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<String>,

    /// poll interval in seconds [env:POLL_INTERVAL]
    #[arg(short = 'p', long = "poll-interval")]
    pub poll_interval: Option<u64>,

    /// report interval in seconds [env:REPORT_INTERVAL]
    #[arg(short = 'r', long = "report-interval")]
    pub report_interval: Option<u64>,

    /// outgoing request rate limit, tokens per second [env:RATE_LIMIT]
    #[arg(short = 'l', long = "rate-limit")]
    pub rate_limit: Option<u32>,

    /// whether to ship metrics over gRPC instead of HTTP [env:USE_GRPC]
    #[arg(long = "grpc")]
    pub use_grpc: bool,
}

/// JSON config file shape; every field optional.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub grpc_address: Option<String>,
    pub log_level: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<String>,
    pub poll_interval: Option<u64>,
    pub report_interval: Option<u64>,
    pub rate_limit: Option<u32>,
    pub use_grpc: Option<bool>,
}

/// Fully resolved agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    pub grpc_server_addr: String,
    pub log_level: String,
    pub sign_key: Option<String>,
    pub crypto_key: Option<String>,
    pub poll_interval: u64,
    pub report_interval: u64,
    pub rate_limit: u32,
    pub use_grpc: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let flags = Flags::parse();
        let env = |name: &str| std::env::var(name).ok();

        let file = match env("CONFIG").or_else(|| flags.config_file.clone()) {
            Some(path) => read_config_file(&path)?,
            None => FileConfig::default(),
        };

        Ok(Self::resolve(flags, env, file))
    }

    pub fn resolve(flags: Flags, env: impl Fn(&str) -> Option<String>, file: FileConfig) -> Self {
        let pick = |env_name: &str, flag: Option<String>, file: Option<String>| {
            env(env_name).or(flag).or(file).filter(|v| !v.is_empty())
        };

        let pick_num = |env_name: &str, flag: Option<u64>, file: Option<u64>, default: u64| {
            env(env_name).and_then(|v| v.parse().ok()).or(flag).or(file).unwrap_or(default)
        };

        let rate_limit = env("RATE_LIMIT")
            .and_then(|v| v.parse().ok())
            .or(flags.rate_limit)
            .or(file.rate_limit)
            .unwrap_or(10);

        let use_grpc = match env("USE_GRPC") {
            Some(v) => v == "true" || v == "1",
            None => flags.use_grpc || file.use_grpc.unwrap_or(false),
        };

        Self {
            server_addr: pick("ADDRESS", flags.server_addr, file.address)
                .unwrap_or_else(|| "localhost:8080".to_string()),
            grpc_server_addr: pick("GRPC_ADDRESS", flags.grpc_server_addr, file.grpc_address)
                .unwrap_or_else(|| "localhost:50051".to_string()),
            log_level: pick("LOG_LEVEL", flags.log_level, file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            sign_key: pick("KEY", flags.sign_key, file.key),
            crypto_key: pick("CRYPTO_KEY", flags.crypto_key, file.crypto_key),
            poll_interval: pick_num("POLL_INTERVAL", flags.poll_interval, file.poll_interval, 2),
            report_interval: pick_num(
                "REPORT_INTERVAL",
                flags.report_interval,
                file.report_interval,
                10,
            ),
            rate_limit,
            use_grpc,
        }
    }
}

fn read_config_file(path: &str) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PulseError::Io { path: path.into(), source: e })?;

    serde_json::from_str(&content).map_err(|e| PulseError::InvalidConfig {
        reason: format!("failed to parse config file {path}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(Flags::default(), no_env, FileConfig::default());

        assert_eq!(config.server_addr, "localhost:8080");
        assert_eq!(config.poll_interval, 2);
        assert_eq!(config.report_interval, 10);
        assert_eq!(config.rate_limit, 10);
        assert!(!config.use_grpc);
        assert!(config.sign_key.is_none());
    }

    #[test]
    fn test_env_wins_over_flag_and_file() {
        let flags = Flags { poll_interval: Some(5), ..Flags::default() };
        let file = FileConfig { poll_interval: Some(7), ..FileConfig::default() };

        let env = |name: &str| (name == "POLL_INTERVAL").then(|| "3".to_string());
        assert_eq!(Config::resolve(flags, env, file).poll_interval, 3);
    }

    #[test]
    fn test_flag_wins_over_file() {
        let flags = Flags { report_interval: Some(4), ..Flags::default() };
        let file = FileConfig { report_interval: Some(30), ..FileConfig::default() };

        assert_eq!(Config::resolve(flags, no_env, file).report_interval, 4);
    }

    #[test]
    fn test_use_grpc_env_parsing() {
        let env = |name: &str| (name == "USE_GRPC").then(|| "1".to_string());
        assert!(Config::resolve(Flags::default(), env, FileConfig::default()).use_grpc);

        let file = FileConfig { use_grpc: Some(true), ..FileConfig::default() };
        assert!(Config::resolve(Flags::default(), no_env, file).use_grpc);
    }
}

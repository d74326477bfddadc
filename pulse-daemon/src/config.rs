//! Server configuration.
//!
//! Options come from four layers with precedence (highest first):
//! environment variables, command-line flags, the JSON config file, and
//! built-in defaults.

use clap::Parser;
use serde::Deserialize;

use pulse_core::{PulseError, Result};

/// Command-line flags. Every option can also be set via the environment
/// variable named in its help text.
#[derive(Parser, Debug, Default)]
#[command(name = "pulsed", about = "Pulse metrics server", version)]
pub struct Flags {
    /// path to config file [env:CONFIG]
    #[arg(short = 'c', long = "config")]
    pub config_file: Option<String>,

    /// server listening address [env:ADDRESS]
    #[arg(short = 'a', long = "address")]
    pub server_addr: Option<String>,

    /// gRPC server listening address [env:GRPC_ADDRESS]
    #[arg(short = 'g', long = "grpc-address")]
    pub grpc_server_addr: Option<String>,

    /// log output level [env:LOG_LEVEL]
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// database connection string [env:DATABASE_DSN]
    #[arg(short = 'd', long = "database-dsn")]
    pub database_dsn: Option<String>,

    /// signing key [env:KEY]
    #[arg(short = 'k', long = "key")]
    pub sign_key: Option<String>,

    /// path to RSA private key file to decrypt messages from the agent [env:CRYPTO_KEY]
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<String>,

    /// trusted subnet in CIDR form [env:TRUSTED_SUBNET]
    #[arg(short = 't', long = "trusted-subnet")]
    pub trusted_subnet: Option<String>,

    /// filepath to store metrics data to [env:FILE_STORAGE_PATH]
    #[arg(short = 'f', long = "store-file")]
    pub store_file: Option<String>,

    /// interval in seconds to store metrics data into file [env:STORE_INTERVAL]
    #[arg(short = 'i', long = "store-interval")]
    pub store_interval: Option<u64>,

    /// whether to restore metrics data from file on boot [env:RESTORE]
    #[arg(short = 'r', long = "restore")]
    pub restore: bool,
}

/// JSON config file shape; every field optional.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub grpc_address: Option<String>,
    pub log_level: Option<String>,
    pub database_dsn: Option<String>,
    pub sign_key: Option<String>,
    pub crypto_key: Option<String>,
    pub trusted_subnet: Option<String>,
    pub store_file: Option<String>,
    pub store_interval: Option<u64>,
    pub restore: Option<bool>,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    pub grpc_server_addr: String,
    pub log_level: String,
    pub database_dsn: Option<String>,
    pub sign_key: Option<String>,
    pub crypto_key: Option<String>,
    pub trusted_subnet: Option<String>,
    pub store_file: Option<String>,
    pub store_interval: u64,
    pub restore: bool,
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

    /// Merge the three explicit layers over the built-in defaults.
    pub fn resolve(flags: Flags, env: impl Fn(&str) -> Option<String>, file: FileConfig) -> Self {
        let pick = |env_name: &str, flag: Option<String>, file: Option<String>| {
            env(env_name).or(flag).or(file).filter(|v| !v.is_empty())
        };

        let store_interval = env("STORE_INTERVAL")
            .and_then(|v| v.parse().ok())
            .or(flags.store_interval)
            .or(file.store_interval)
            .unwrap_or(300);

        let restore = match env("RESTORE") {
            Some(v) => v == "true" || v == "1",
            None => flags.restore || file.restore.unwrap_or(false),
        };

        Self {
            server_addr: pick("ADDRESS", flags.server_addr, file.address)
                .unwrap_or_else(|| "localhost:8080".to_string()),
            grpc_server_addr: pick("GRPC_ADDRESS", flags.grpc_server_addr, file.grpc_address)
                .unwrap_or_else(|| "localhost:50051".to_string()),
            log_level: pick("LOG_LEVEL", flags.log_level, file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            database_dsn: pick("DATABASE_DSN", flags.database_dsn, file.database_dsn),
            sign_key: pick("KEY", flags.sign_key, file.sign_key),
            crypto_key: pick("CRYPTO_KEY", flags.crypto_key, file.crypto_key),
            trusted_subnet: pick("TRUSTED_SUBNET", flags.trusted_subnet, file.trusted_subnet),
            store_file: pick("FILE_STORAGE_PATH", flags.store_file, file.store_file)
                .or_else(|| Some("/tmp/metrics-db.json".to_string())),
            store_interval,
            restore,
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
        assert_eq!(config.grpc_server_addr, "localhost:50051");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.store_interval, 300);
        assert_eq!(config.store_file.as_deref(), Some("/tmp/metrics-db.json"));
        assert!(!config.restore);
        assert!(config.sign_key.is_none());
    }

    #[test]
    fn test_env_beats_flag_beats_file() {
        let flags = Flags { server_addr: Some("flag:1".to_string()), ..Flags::default() };
        let file = FileConfig { address: Some("file:1".to_string()), ..FileConfig::default() };

        let env = |name: &str| (name == "ADDRESS").then(|| "env:1".to_string());
        let config = Config::resolve(flags, env, file);
        assert_eq!(config.server_addr, "env:1");

        let flags = Flags { server_addr: Some("flag:1".to_string()), ..Flags::default() };
        let file = FileConfig { address: Some("file:1".to_string()), ..FileConfig::default() };
        let config = Config::resolve(flags, no_env, file);
        assert_eq!(config.server_addr, "flag:1");

        let file = FileConfig { address: Some("file:1".to_string()), ..FileConfig::default() };
        let config = Config::resolve(Flags::default(), no_env, file);
        assert_eq!(config.server_addr, "file:1");
    }

    #[test]
    fn test_restore_env_parsing() {
        let env = |name: &str| (name == "RESTORE").then(|| "true".to_string());
        assert!(Config::resolve(Flags::default(), env, FileConfig::default()).restore);

        let env = |name: &str| (name == "RESTORE").then(|| "false".to_string());
        let flags = Flags { restore: true, ..Flags::default() };
        // The environment wins even over an explicit flag.
        assert!(!Config::resolve(flags, env, FileConfig::default()).restore);
    }

    #[test]
    fn test_empty_values_fall_through() {
        let flags = Flags { sign_key: Some(String::new()), ..Flags::default() };
        let config = Config::resolve(flags, no_env, FileConfig::default());
        assert!(config.sign_key.is_none());
    }
}

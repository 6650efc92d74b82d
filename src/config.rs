//! Configuration for the hashoff server and client.
//!
//! The server takes command-line arguments and an optional TOML file;
//! CLI arguments take precedence over config file values. The client is
//! configured from the command line only.

use clap::Parser;
use serde::Deserialize;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::engine::EngineMode;
use crate::protocol::MAX_PAYLOAD_LEN;

/// Ports at or below this value are privileged and refused.
pub const MIN_SERVER_PORT: u16 = 1025;

/// Command-line arguments for the checksum server
#[derive(Parser, Debug)]
#[command(name = "hashoff-server")]
#[command(version)]
#[command(about = "Serve checksums for streamed file chunks", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on (must exceed 1024)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range((MIN_SERVER_PORT as i64)..))]
    pub port: Option<u16>,

    /// Salt mixed into every digest (empty means no salt)
    #[arg(short, long)]
    pub salt: Option<OsString>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Engine sharing policy (per-session or shared)
    #[arg(long)]
    pub engine_mode: Option<EngineMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: TomlServerSection,
    #[serde(default)]
    pub engine: TomlEngineSection,
    #[serde(default)]
    pub logging: TomlLoggingSection,
}

/// `[server]` section
#[derive(Debug, Deserialize)]
pub struct TomlServerSection {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    pub port: Option<u16>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for TomlServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            max_connections: default_max_connections(),
            backlog: default_backlog(),
        }
    }
}

/// `[engine]` section
#[derive(Debug, Deserialize, Default)]
pub struct TomlEngineSection {
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub mode: EngineMode,
}

/// `[logging]` section
#[derive(Debug, Deserialize)]
pub struct TomlLoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for TomlLoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_max_connections() -> usize {
    10_000
}

fn default_backlog() -> i32 {
    128
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub salt: Vec<u8>,
    pub engine_mode: EngineMode,
    pub max_connections: usize,
    pub backlog: i32,
}

impl ServerConfig {
    /// Parse the process arguments and resolve the configuration.
    /// Returns the configuration and the log level to use.
    pub fn load() -> Result<(Self, String), ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    /// Merge CLI args with the optional TOML file (CLI takes precedence).
    pub fn from_args(cli: ServerArgs) -> Result<(Self, String), ConfigError> {
        let toml_config = match cli.config {
            Some(ref path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::FileRead(path.clone(), e))?;
                toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.clone(), e))?
            }
            None => TomlConfig::default(),
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: ServerArgs, toml_config: TomlConfig) -> Result<(Self, String), ConfigError> {
        let port = cli
            .port
            .or(toml_config.server.port)
            .ok_or(ConfigError::MissingPort)?;
        if port < MIN_SERVER_PORT {
            return Err(ConfigError::InvalidPort(port));
        }

        let salt = match cli.salt {
            Some(salt) => salt.into_encoded_bytes(),
            None => toml_config
                .engine
                .salt
                .map(String::into_bytes)
                .unwrap_or_default(),
        };

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 || max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidMaxConnections(max_connections));
        }

        let config = ServerConfig {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            salt,
            engine_mode: cli.engine_mode.unwrap_or(toml_config.engine.mode),
            max_connections,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
        };
        let log_level = cli.log_level.unwrap_or(toml_config.logging.level);

        Ok((config, log_level))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Command-line arguments for the checksum client
#[derive(Parser, Debug, Clone)]
#[command(name = "hashoff-client")]
#[command(version)]
#[command(about = "Stream file chunks to a hashoff server and print their digests", long_about = None)]
pub struct ClientArgs {
    /// IP address the server is listening at
    #[arg(short, long)]
    pub addr: IpAddr,

    /// Port the server is listening on
    #[arg(short, long)]
    pub port: u16,

    /// Number of hash requests to send
    #[arg(short = 'n', long = "hashreq")]
    pub hash_requests: u32,

    /// Minimum payload size of each hash request
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub smin: u32,

    /// Maximum payload size of each hash request
    #[arg(long, value_parser = clap::value_parser!(u32).range(..=(MAX_PAYLOAD_LEN as i64)))]
    pub smax: u32,

    /// File supplying the payload bytes
    #[arg(short, long)]
    pub file: PathBuf,

    /// Seed for payload sizing (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl ClientArgs {
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("No port given (use --port or [server] port)")]
    MissingPort,

    #[error("Invalid port {0}: must exceed 1024")]
    InvalidPort(u16),

    #[error(
        "Invalid max connections {0}: must be between 1 and {max}",
        max = Semaphore::MAX_PERMITS
    )]
    InvalidMaxConnections(usize),
}

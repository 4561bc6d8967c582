//! Configuration management for the powchain node
//!
//! Settings come from the command line and an optional configuration file
//! (YAML, or JSON by extension). Values given on the command line win; the
//! file fills in everything the command line left at its default.

use crate::client::PeerClient;
use crate::node::NodeSettings;
use crate::types::{Difficulty, Strength};
use crate::worker::worker_count;
use crate::{Error, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    Plain,
    /// One JSON object per event
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Complete configuration for a node
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "powchain",
    version = env!("CARGO_PKG_VERSION"),
    about = "Minimal proof-of-work ledger node",
    long_about = "Mines blocks on a single chain, keeps the strongest chain it has seen and \
                  exchanges chains with a static list of peers over HTTP"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(default)]
    pub info: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(default)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE", env = "POWCHAIN_CONFIG")]
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Peer address as host:port, may be repeated
    #[arg(short = 'p', long = "peer", value_name = "HOST:PORT", default_value = "54.172.118.82:2001")]
    #[serde(default = "default_peers")]
    pub peers: Vec<String>,

    /// Minimum difficulty (leading zero bits) of locally mined blocks
    #[arg(short = 'd', long, default_value = "25")]
    #[serde(default = "default_min_block_difficulty")]
    pub min_block_difficulty: Difficulty,

    /// Minimum strength of the first chain adopted on a cold start
    #[arg(long)]
    #[serde(default)]
    pub min_chain_strength: Option<Strength>,

    /// Do not push chain updates to peers
    #[arg(long)]
    #[serde(default)]
    pub no_advertise: bool,

    /// Serve and gossip without mining
    #[arg(long)]
    #[serde(default)]
    pub no_mine: bool,

    /// Maximum number of mining workers, 0 uses every CPU
    #[arg(short = 'c', long, default_value = "0")]
    #[serde(default)]
    pub max_workers: usize,

    /// Interface the HTTP server binds to
    #[arg(long, default_value = "0.0.0.0")]
    #[serde(default = "default_interface")]
    pub interface: String,

    /// HTTP server port
    #[arg(long, default_value = "2001")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// File the chain is persisted to
    #[arg(long, value_name = "FILE", default_value = "chain.json")]
    #[serde(default = "default_chain_file")]
    pub chain_file: PathBuf,

    /// Keep the chain in memory only
    #[arg(long)]
    #[serde(default)]
    pub ephemeral: bool,

    /// Timeout for peer requests, e.g. "10s" or "500ms"
    #[arg(long, default_value = "10s")]
    #[serde(default = "default_http_timeout")]
    pub http_timeout: String,

    /// Log level, RUST_LOG overrides it
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Write logs to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Parse the process arguments, merge the configuration file and
    /// validate. Exits on `--help`, `--version` and argument errors.
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches).await
    }

    /// Same as [`Config::load`] from explicit arguments, reporting argument
    /// errors instead of exiting
    pub async fn load_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Self::command()
            .try_get_matches_from(args)
            .map_err(|e| Error::config(e.to_string()))?;
        Self::from_matches(&matches).await
    }

    async fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config =
            Self::from_arg_matches(matches).map_err(|e| Error::config(e.to_string()))?;

        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config.merge_with_file(file_config, matches);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Take every value the command line did not set explicitly from the file
    fn merge_with_file(&mut self, file: Self, matches: &ArgMatches) {
        let explicit = |id: &str| {
            matches!(
                matches.value_source(id),
                Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable)
            )
        };

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if !explicit(stringify!($field)) {
                        self.$field = file.$field;
                    }
                )*
            };
        }

        merge!(
            peers,
            min_block_difficulty,
            min_chain_strength,
            no_advertise,
            no_mine,
            max_workers,
            interface,
            port,
            chain_file,
            ephemeral,
            http_timeout,
            log_level,
            log_format,
            log_file,
        );
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for peer in &self.peers {
            PeerClient::peer_url(peer)
                .map_err(|e| Error::config(format!("Invalid peer {}: {}", peer, e)))?;
        }

        if self.min_block_difficulty > 256 {
            return Err(Error::config("Minimum block difficulty must be 0-256"));
        }

        if self.interface.parse::<IpAddr>().is_err() {
            return Err(Error::config(format!(
                "Invalid interface address: {}",
                self.interface
            )));
        }

        self.http_timeout_duration()?;

        Ok(())
    }

    /// Get HTTP server socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .interface
            .parse()
            .map_err(|e| Error::config(format!("Invalid interface: {}", e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Get HTTP timeout duration
    pub fn http_timeout_duration(&self) -> Result<Duration> {
        humantime::parse_duration(&self.http_timeout)
            .map_err(|e| Error::config(format!("Invalid HTTP timeout {:?}: {}", self.http_timeout, e)))
    }

    /// Whether chain updates are pushed to peers
    pub fn advertising(&self) -> bool {
        !self.no_advertise
    }

    /// Mining parameters for the node coordinator
    pub fn node_settings(&self) -> NodeSettings {
        NodeSettings {
            min_block_difficulty: self.min_block_difficulty,
            worker_count: worker_count(self.max_workers),
        }
    }
}

// Default value functions for serde
fn default_peers() -> Vec<String> { vec!["54.172.118.82:2001".to_string()] }
fn default_min_block_difficulty() -> Difficulty { 25 }
fn default_interface() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 2001 }
fn default_chain_file() -> PathBuf { PathBuf::from("chain.json") }
fn default_http_timeout() -> String { "10s".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }

use clap::Parser;
use envconfig::Envconfig;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::identity::KeyStrategy;

/// Process settings read from the environment (and `.env`).
#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL for the fixed-window counters; in-memory when unset
    #[envconfig(from = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Prefix of every Redis key written by this service
    #[envconfig(from = "REDIS_KEY_PREFIX", default = "floodgate")]
    pub redis_key_prefix: String,

    /// Default log level when RUST_LOG is unset
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// JSON file with limiter and resilience tunables
    #[envconfig(from = "POLICY_FILE")]
    pub policy_file: Option<PathBuf>,

    /// How callers are identified: `ip` or `api-key`
    #[envconfig(from = "IDENTITY_STRATEGY", default = "ip")]
    pub identity_strategy: KeyStrategy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Apply command line overrides on top of the environment.
    pub fn merge_cli(mut self, cli: Cli) -> Self {
        if let Some(bind) = cli.bind {
            self.bind_addr = bind;
        }
        if cli.redis_url.is_some() {
            self.redis_url = cli.redis_url;
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        if cli.policy.is_some() {
            self.policy_file = cli.policy;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: None,
            redis_key_prefix: "floodgate".to_string(),
            log_level: "info".to_string(),
            policy_file: None,
            identity_strategy: KeyStrategy::IpAddress,
        }
    }
}

/// Admission control and resilience demo service.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
pub struct Cli {
    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Redis URL for shared fixed-window counters (overrides REDIS_URL)
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Policy file (overrides POLICY_FILE)
    #[arg(long)]
    pub policy: Option<PathBuf>,
}

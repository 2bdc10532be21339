use std::fs::read_to_string;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// Bounds a socket's queue-pair size may float between, and the default it
/// starts at. Mirrors the original implementation's
/// `VSOCK_DEFAULT_QP_SIZE_{MIN,,MAX}`.
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct QueuePairSize {
    #[serde(default = "QueuePairSize::min")]
    pub min: u64,
    #[serde(default = "QueuePairSize::default_size")]
    pub default: u64,
    #[serde(default = "QueuePairSize::max")]
    pub max: u64,
}

impl QueuePairSize {
    fn min() -> u64 {
        vsock_core::core::QP_SIZE_MIN
    }

    fn default_size() -> u64 {
        vsock_core::core::QP_SIZE_DEFAULT
    }

    fn max() -> u64 {
        vsock_core::core::QP_SIZE_MAX
    }
}

impl Default for QueuePairSize {
    fn default() -> Self {
        Self { min: Self::min(), default: Self::default_size(), max: Self::max() }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    /// This host's own context id.
    #[serde(default = "Server::local_cid")]
    pub local_cid: u32,
    /// Maximum number of worker threads the dispatcher's deferred queue may
    /// use.
    #[serde(default = "Server::max_threads")]
    pub max_threads: usize,
    #[serde(default)]
    pub queue_pair_size: QueuePairSize,
    /// Context ids treated as privileged: allowed to bind reserved ports and
    /// to reach sockets that restrict untrusted peers.
    #[serde(default)]
    pub trusted_cids: Vec<u32>,
}

impl Server {
    fn local_cid() -> u32 {
        3
    }

    fn max_threads() -> usize {
        num_cpus::get()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { local_cid: Self::local_cid(), max_threads: Self::max_threads(), queue_pair_size: QueuePairSize::default(), trusted_cids: Vec::new() }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    /// Specify the configuration file path. Falls back to built-in defaults
    /// when omitted.
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    /// Load command line parameters; if a configuration file path was given,
    /// read the configuration from it, otherwise use the default
    /// configuration.
    pub fn load() -> Result<Self> {
        match Cli::parse().config {
            Some(path) => Ok(serde_json5::from_str(&read_to_string(path)?)?),
            None => Ok(Self::default()),
        }
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::logs::{ReverseLineReader, DEFAULT_CHUNK_SIZE, DEFAULT_LINE_COUNT, MAX_LINE_BYTES};

/// Service configuration (default.toml). Built once at startup and handed to
/// the collector and aggregator; never changed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogsConfig {
    /// Directory whose files are served; `~` is expanded
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Lines per file when a request doesn't say
    #[serde(default = "default_lines")]
    pub default_lines: usize,
    /// Bytes read per backward step
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Longer lines make the file report an error
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_log_dir() -> String {
    "/var/log".to_string()
}

fn default_lines() -> usize {
    DEFAULT_LINE_COUNT
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            default_lines: default_lines(),
            chunk_size: default_chunk_size(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Peer nodes, as `host:port` or base URL
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_ms: u64,
}

fn default_peer_timeout() -> u64 {
    10_000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            peer_timeout_ms: default_peer_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Upper bound on files read (or peers queried) at once per request
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Whole-request deadline
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_max_concurrency() -> usize {
    64
}

fn default_request_timeout() -> u64 {
    30_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Values taken from the environment or command line; `None` leaves the
/// file/default value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_dir: Option<String>,
    pub peers: Option<Vec<String>>,
    pub peer_timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
}

impl Settings {
    /// Parse settings from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content).context("Failed to parse config")?;
        Ok(settings)
    }

    /// Load settings from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    /// Resolve the full configuration: defaults -> config file -> env/CLI.
    /// An explicit `config_path` must exist; the global one is optional.
    pub fn resolve(config_path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut settings = match config_path {
            Some(path) => Settings::load(path)?,
            None => {
                let global_path = super::global_config_path()?;
                if global_path.exists() {
                    tracing::debug!(path = %global_path.display(), "Loading global config");
                    Settings::load(&global_path)?
                } else {
                    Settings::default()
                }
            }
        };

        settings.apply(overrides);
        settings.validate()?;
        Ok(settings)
    }

    /// Apply env/CLI values on top of this configuration
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(dir) = &overrides.log_dir {
            self.logs.dir = dir.clone();
        }
        if let Some(peers) = &overrides.peers {
            self.cluster.peers = peers.clone();
        }
        if let Some(ms) = overrides.peer_timeout_ms {
            self.cluster.peer_timeout_ms = ms;
        }
        if let Some(n) = overrides.max_concurrency {
            self.limits.max_concurrency = n;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.logs.dir.trim().is_empty() {
            bail!("logs.dir must not be empty");
        }
        if self.logs.chunk_size == 0 {
            bail!("logs.chunk_size must be greater than zero");
        }
        if self.logs.max_line_bytes == 0 {
            bail!("logs.max_line_bytes must be greater than zero");
        }
        if self.logs.default_lines == 0 {
            bail!("logs.default_lines must be greater than zero");
        }
        if self.limits.max_concurrency == 0 {
            bail!("limits.max_concurrency must be greater than zero");
        }
        Ok(())
    }

    /// Log directory with `~` expanded
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.logs.dir).as_ref())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.peer_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.request_timeout_ms)
    }

    pub fn line_reader(&self) -> ReverseLineReader {
        ReverseLineReader::new(self.logs.chunk_size).with_max_line(self.logs.max_line_bytes)
    }
}

/// Split a comma-separated peer list (the `PEERS` variable)
pub fn parse_peer_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

//! Configuration system for the natprobe CLI.

use natprobe_discovery::{DEFAULT_STUN_PORT, TransactionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// STUN header size; smaller receive buffers cannot hold any message
const MIN_RECV_BUFFER_SIZE: usize = 20;

/// Upper bound for any single timing value
const MAX_TIMING_MS: u64 = 60_000;

/// natprobe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// STUN servers and local socket
    #[serde(default)]
    pub targets: TargetsConfig,
    /// Transaction timing
    #[serde(default)]
    pub transaction: TransactionSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server and socket configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetsConfig {
    /// STUN servers as `host[:port]`
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    /// Local address each classification socket binds to
    ///
    /// The wildcard default rules out Open Internet and Symmetric UDP
    /// Firewall results; bind an interface address to detect those.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// Transaction timing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionSettings {
    /// Total budget per transaction in milliseconds
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
    /// Retransmission interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Receive buffer size in bytes
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_servers() -> Vec<String> {
    vec!["stun.stunprotocol.org:3478".to_string()]
}

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_budget_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_recv_buffer_size() -> usize {
    512
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            budget_ms: default_budget_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("natprobe/config.toml")
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    ///
    /// An explicitly given path that does not exist is an error; the default
    /// path is allowed to be missing.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed, or an
    /// explicit path is missing.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path)
                .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display())),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse bind address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.targets
            .bind_addr
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", self.targets.bind_addr))
    }

    /// Library transaction timing
    #[must_use]
    pub fn transaction_config(&self) -> TransactionConfig {
        TransactionConfig::default()
            .with_budget(Duration::from_millis(self.transaction.budget_ms))
            .with_poll_interval(Duration::from_millis(self.transaction.poll_interval_ms))
            .with_recv_buffer_size(self.transaction.recv_buffer_size)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_bind_addr()?;

        for server in &self.targets.servers {
            parse_server(server)?;
        }

        let timing = &self.transaction;
        if timing.budget_ms == 0 || timing.budget_ms > MAX_TIMING_MS {
            anyhow::bail!("Transaction budget must be between 1 and {MAX_TIMING_MS} ms");
        }
        if timing.poll_interval_ms == 0 || timing.poll_interval_ms > timing.budget_ms {
            anyhow::bail!("Poll interval must be between 1 ms and the transaction budget");
        }
        if timing.recv_buffer_size < MIN_RECV_BUFFER_SIZE || timing.recv_buffer_size > 65_535 {
            anyhow::bail!(
                "Receive buffer size must be between {MIN_RECV_BUFFER_SIZE} and 65535 bytes"
            );
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

/// Split a `host[:port]` server entry, defaulting the port to 3478
///
/// IPv6 literals need brackets when a port is given (`[2001:db8::1]:3478`);
/// a bare IPv6 literal takes the default port.
///
/// # Errors
///
/// Returns an error for an empty host, an invalid or zero port, or a host
/// containing path characters.
pub fn parse_server(entry: &str) -> anyhow::Result<(String, u16)> {
    let entry = entry.trim();

    let (host, port) = if let Some(rest) = entry.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| anyhow::anyhow!("Server '{entry}' has an unclosed '['"))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => anyhow::bail!("Server '{entry}' has junk after ']'"),
            },
        }
    } else if entry.matches(':').count() > 1 {
        (entry, None)
    } else {
        match entry.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (entry, None),
        }
    };

    if host.is_empty() {
        anyhow::bail!("Server '{entry}' has empty hostname");
    }
    if host.contains("..") || host.contains('/') || host.contains('\\') {
        anyhow::bail!("Server '{entry}' contains invalid characters");
    }

    let port = match port {
        None => DEFAULT_STUN_PORT,
        Some(port) => port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| anyhow::anyhow!("Server '{entry}' has invalid port: {port}"))?,
    };

    Ok((host.to_string(), port))
}

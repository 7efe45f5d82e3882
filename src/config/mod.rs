//! Configuration management module
//!
//! Handles loading, validation, and management of server configuration.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Listener configuration
    pub server: ServerConfig,

    /// Per-connection gateway configuration
    pub gateway: GatewayConfig,

    /// Signal relay policy
    pub relay: RelayConfig,

    /// Session store configuration
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to accept WebSocket connections on
    pub listen_addr: String,

    /// Seconds between status log lines, 0 disables them
    pub status_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Route prefix; the session id is the next path segment
    pub path_prefix: String,

    /// Frames buffered per connection before broadcasts to it start failing
    pub outbound_buffer: usize,

    /// Longest a single write to a client may take before the client is dropped
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Also deliver relayed signals back to the connection that sent them
    pub echo_to_sender: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// TOML file with `[[sessions]]` entries to preload
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Absolute or relative path to the rolling log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log: LogConfig::default(),
            server: ServerConfig::default(),
            gateway: GatewayConfig::default(),
            relay: RelayConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            status_interval_secs: 60,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/ws/session".to_string(),
            outbound_buffer: 256,
            send_timeout_ms: 5000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/classlive.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // CLASSLIVE_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("CLASSLIVE_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // CLASSLIVE_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("CLASSLIVE_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // CLASSLIVE_LISTEN_ADDR - listener address
        if let Ok(addr) = env::var("CLASSLIVE_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }

        // CLASSLIVE_SEND_TIMEOUT_MS - per-write timeout
        if let Ok(timeout) = env::var("CLASSLIVE_SEND_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.gateway.send_timeout_ms = value;
            }
        }

        // CLASSLIVE_OUTBOUND_BUFFER - per-connection queue depth
        if let Ok(buffer) = env::var("CLASSLIVE_OUTBOUND_BUFFER") {
            if let Ok(value) = buffer.parse::<usize>() {
                self.gateway.outbound_buffer = value;
            }
        }

        // CLASSLIVE_RELAY_ECHO - echo relayed signals to their sender
        if let Ok(echo) = env::var("CLASSLIVE_RELAY_ECHO") {
            self.relay.echo_to_sender = echo.parse().unwrap_or(self.relay.echo_to_sender);
        }

        // CLASSLIVE_SEED_FILE - sessions to preload
        if let Ok(seed) = env::var("CLASSLIVE_SEED_FILE") {
            if !seed.trim().is_empty() {
                self.store.seed_file = Some(seed);
            }
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid listen address: {}", self.server.listen_addr))?;

        if !self.gateway.path_prefix.starts_with('/') {
            anyhow::bail!("gateway.path_prefix must start with '/'");
        }

        if self.gateway.outbound_buffer == 0 {
            anyhow::bail!("gateway.outbound_buffer must be greater than 0");
        }

        if self.gateway.send_timeout_ms == 0 {
            anyhow::bail!("gateway.send_timeout_ms must be greater than 0");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        println!("{}", "Current configuration:".bold());
        println!("{}", content);
        Ok(())
    }

    /// Display configuration management help
    pub fn display_help() -> Result<()> {
        println!("Configuration management commands:");
        println!("  classlive config show    - Show current configuration");
        println!("  classlive config reset   - Write default configuration to the config file");
        Ok(())
    }

    /// Handle configuration command
    pub fn handle_command<P: AsRef<Path>>(
        action: &Option<crate::cli::ConfigAction>,
        path: P,
    ) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show) => {
                let config = Config::load_or_default(&path);
                config.display()?;
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let default_config = Config::default();
                default_config.save_to_file(&path)?;
                println!(
                    "{} {}",
                    "Default configuration written to".green(),
                    path.as_ref().display()
                );
            }
            None => {
                Config::display_help()?;
            }
        }
        Ok(())
    }
}

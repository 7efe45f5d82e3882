//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for ClassLive.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "classlive")]
#[command(about = "ClassLive real-time session hub")]
#[command(
    long_about = "Serves live classroom sessions over WebSocket: lifecycle broadcasts and WebRTC signal relay"
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the WebSocket session hub
    Serve {
        /// Listen address, overrides `server.listen_addr`
        #[arg(long)]
        listen: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Serve { listen: None }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the default configuration to the config file
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the actual command, using default if none provided
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Resolve the log level from the verbose flag, the CLI, then the config file
    pub fn effective_log_level(&self, configured: &str) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| configured.to_string())
        }
    }
}

use crate::application::config::DEFAULT_CONFIG_PATH;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a ban/unban notification to every enabled connector
    Notify {
        /// Banned or unbanned IP address
        #[arg(short, long)]
        ip: String,

        /// Name of the fail2ban jail
        #[arg(short, long)]
        jail: String,

        /// Action that triggered the notification (ban, unban)
        #[arg(short, long, default_value = "ban")]
        action: String,

        /// Number of failures that led to the ban
        #[arg(short, long, default_value_t = 0)]
        failures: u32,
    },

    /// Write a sample configuration, including discovered connectors
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// List executables in the connector directory
    Discover,

    /// Show the status of every configured connector
    Status,

    /// Run a single connector with sample data, even if disabled
    Test {
        /// Connector name
        name: String,
    },

    /// Look up one or more IP addresses
    Lookup {
        #[arg(required = true)]
        ips: Vec<String>,
    },

    /// List the available GeoIP services
    Services {
        /// Probe each service with a live request
        #[arg(long)]
        check: bool,
    },
}

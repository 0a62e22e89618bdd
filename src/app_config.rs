//! CLI argument parsing
//!
//! Command-line definitions for the `ble-central` binary.

use clap::{Parser, Subcommand};
use humantime_serde::re::humantime::parse_duration;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Command-line interface definition for ble-central
#[derive(Parser)]
#[command(name = "ble-central")]
#[command(about = "Scan for and connect to Bluetooth Low Energy peripherals")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to $BLE_CENTRAL_CONFIG, then ./ble-central.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use the built-in simulated adapter instead of the host radio
    #[arg(long)]
    pub simulate: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

/// Available commands for the ble-central CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Scan and print discovered peripherals
    Scan {
        /// Scan window, e.g. "5s"; "0s" scans until Ctrl-C
        #[arg(short, long, value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Only report peripherals advertising this service (repeatable)
        #[arg(short, long = "service")]
        services: Vec<Uuid>,
    },

    /// Scan for a peripheral, connect to it and report link changes
    Connect {
        id: String,

        /// How long to look for the peripheral before giving up
        #[arg(long, value_parser = parse_duration)]
        scan: Option<Duration>,
    },

    /// Print every coordinator event until Ctrl-C
    Watch,

    /// Write the effective configuration to a file
    WriteConfig { path: PathBuf },
}

impl Commands {
    /// Get the command name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Scan { .. } => "scan",
            Commands::Connect { .. } => "connect",
            Commands::Watch => "watch",
            Commands::WriteConfig { .. } => "write-config",
        }
    }
}

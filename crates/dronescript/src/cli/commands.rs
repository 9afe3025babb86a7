//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config::{ClimbMode, Config};

/// Fly command arguments.
#[derive(Debug, Args)]
pub struct FlyCommand {
    /// Drone address, overriding `connection.address`
    #[arg(short, long)]
    pub address: Option<String>,

    /// Climb strategy, overriding `flight.climb_mode`
    #[arg(short, long, value_enum)]
    pub mode: Option<ClimbMode>,

    /// Fly without the camera
    #[arg(long)]
    pub no_vision: bool,
}

impl FlyCommand {
    /// Apply the command-line overrides to a loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(address) = &self.address {
            config.connection.address.clone_from(address);
        }
        if let Some(mode) = self.mode {
            config.flight.climb_mode = mode;
        }
        if self.no_vision {
            config.vision.enabled = false;
        }
    }
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Detection log commands.
#[derive(Debug, Subcommand)]
pub enum DetectionsCommand {
    /// List the most recent detections
    List {
        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Export all detections as CSV
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

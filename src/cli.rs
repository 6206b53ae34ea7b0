/*
 * This file is part of Flexline.
 *
 * Copyright (C) 2025 Flexline contributors
 *
 * Flexline is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Flexline is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Flexline. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command Line Interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fl_core::{validate_date, validate_fault_type_filter, FaultQuery};

#[derive(Parser, Debug)]
#[command(name = "flexline")]
#[command(version)]
#[command(about = "Flexline - camera inspection for board and nail defects")]
#[command(long_about = "Flexline - camera inspection for board and nail defects

Board cameras capture on a hardware trigger, nail cameras capture on a timer.
Frames are run through per-class detection models; defects are logged to the
fault history and signalled on the serial relay.

EXAMPLES:
    flexline run --simulate --duration 10     Dry run against simulated cameras
    flexline devices                          List connected cameras
    flexline faults list --from 2025-01-01    Show fault history
    flexline faults export faults.csv --type Nail
    flexline relay pulse --duration 0.5       Test the reject relay
    flexline settings init                    Write a default settings file

ENVIRONMENT VARIABLES:
    RUST_LOG=debug         Override the configured log filter

FILES:
    ~/.config/flexline/settings.json      Application settings")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file (defaults to ~/.config/flexline/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "fl_core=trace"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start every assigned camera and inspect until interrupted
    Run(RunArgs),

    /// List the cameras the backend can see
    Devices {
        /// Use the simulated line instead of real hardware
        #[arg(long)]
        simulate: bool,
    },

    #[command(subcommand, about = "Browse, export and prune the fault history")]
    Faults(FaultCommands),

    #[command(subcommand, about = "Exercise the reject relay")]
    Relay(RelayCommands),

    #[command(subcommand, about = "View and create the settings file")]
    Settings(SettingsCommands),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Use simulated cameras and models
    #[arg(long)]
    pub simulate: bool,

    /// JSON file with the boxes the simulated models report
    #[arg(long, requires = "simulate")]
    pub detections: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,
}

// ============================================================================
// Fault Commands
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct FaultFilterArgs {
    /// First day to include (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,

    /// Last day to include (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<String>,

    /// "Nail", "Board Alignment" or "All"
    #[arg(long = "type", default_value = "All")]
    pub fault_type: String,
}

impl Default for FaultFilterArgs {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            fault_type: "All".to_string(),
        }
    }
}

impl FaultFilterArgs {
    pub fn to_query(&self) -> fl_core::Result<FaultQuery> {
        Ok(FaultQuery {
            start_date: self.from.as_deref().map(|d| validate_date("from", d)).transpose()?,
            end_date: self.to.as_deref().map(|d| validate_date("to", d)).transpose()?,
            fault_type: validate_fault_type_filter(&self.fault_type)?,
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum FaultCommands {
    /// List fault records, newest first
    List(FaultFilterArgs),
    /// Count fault records by type
    Stats(FaultFilterArgs),
    /// Write fault records to a CSV file
    Export {
        /// Output CSV path
        path: PathBuf,
        #[command(flatten)]
        filter: FaultFilterArgs,
    },
    /// Delete records matching timestamp, type and image index
    Delete {
        #[arg(long)]
        timestamp: String,
        #[arg(long = "type")]
        fault_type: String,
        #[arg(long)]
        image: u32,
    },
    /// Delete every fault record
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

// ============================================================================
// Relay and Settings Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum RelayCommands {
    /// Energize the relay for a short pulse
    Pulse {
        /// Pulse length in seconds (defaults to relay.trigger_duration_s)
        #[arg(long)]
        duration: Option<f64>,
        /// Serial port (defaults to relay.port)
        #[arg(long)]
        port: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Show all current settings as JSON
    Show,
    /// Print the settings file path
    Path,
    /// Report configuration problems
    Validate,
    /// Write default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

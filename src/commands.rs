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

//! Command execution

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use fl_core::sim::{DetectionFixture, SimBackend};
use fl_core::{
    validate_pulse_duration, AcquisitionManager, Actuator, DetectorClass, FaultRecord, FaultStatistics, FaultStore,
    FaultType, FlexlineError, InspectionSettings, RelayController, SlotId, StationCounters,
};
use tracing::{info, warn};

use crate::cli::{Commands, FaultCommands, RelayCommands, RunArgs, SettingsCommands};
use crate::runtime;

/// Settings plus the file they came from
pub struct CommandContext {
    pub settings: InspectionSettings,
    pub settings_path: PathBuf,
}

impl CommandContext {
    /// Load from `config`, or from the default location
    pub fn load(config: Option<&Path>) -> anyhow::Result<Self> {
        let settings_path = match config {
            Some(path) => path.to_path_buf(),
            None => fl_core::get_settings_path().context("Failed to locate settings file")?,
        };
        let settings = fl_core::load_settings_from(&settings_path)
            .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
        Ok(Self { settings, settings_path })
    }
}

pub fn execute_command(ctx: CommandContext, cmd: &Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Run(args) => cmd_run(ctx.settings, args),
        Commands::Devices { simulate } => cmd_devices(&ctx.settings, *simulate),
        Commands::Faults(sub) => cmd_faults(&ctx.settings, sub),
        Commands::Relay(sub) => cmd_relay(&ctx.settings, sub),
        Commands::Settings(sub) => cmd_settings(&ctx, sub),
    }
}

fn no_hardware_backend() -> anyhow::Error {
    FlexlineError::NotSupported("no camera SDK backend is compiled into this build; use --simulate".into()).into()
}

// ============================================================================
// Run Command
// ============================================================================

fn cmd_run(settings: InspectionSettings, args: &RunArgs) -> anyhow::Result<()> {
    if !args.simulate {
        let problems = settings.validate();
        if !problems.is_empty() {
            for problem in &problems {
                eprintln!("  - {}", problem);
            }
            bail!("Configuration has {} problem(s)", problems.len());
        }
        return Err(no_hardware_backend());
    }

    let fixture = match &args.detections {
        Some(path) => DetectionFixture::load(path)
            .with_context(|| format!("Failed to load detections from {}", path.display()))?,
        None => DetectionFixture::aligned_board(),
    };
    let duration = args
        .duration
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("Invalid --duration")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    let counters = rt.block_on(async {
        let mut line = runtime::simulated_line(settings, &fixture)?;
        info!("Simulated line ready with {} cameras", line.cameras.len());
        let counters = runtime::drive(&mut line.station, &mut line.events, runtime::shutdown_signal(duration)).await;
        Ok::<_, FlexlineError>(counters)
    })?;

    print!("{}", format_counters(&counters));
    Ok(())
}

pub fn format_counters(counters: &StationCounters) -> String {
    format!(
        "Frames: {} ({} dropped)\nDetections: {} ({} failed batches)\nDefects: {} nail, {} board\n",
        counters.frames,
        counters.dropped_frames,
        counters.detections,
        counters.failed_batches,
        counters.nail_defects,
        counters.board_defects
    )
}

// ============================================================================
// Devices Command
// ============================================================================

fn assigned_slot(settings: &InspectionSettings, serial: &str) -> Option<SlotId> {
    DetectorClass::ALL.into_iter().find_map(|class| {
        settings
            .assignments
            .for_class(class)
            .iter()
            .position(|s| s.as_deref() == Some(serial))
            .map(|index| SlotId::new(class, index))
    })
}

fn cmd_devices(settings: &InspectionSettings, simulate: bool) -> anyhow::Result<()> {
    if !simulate {
        return Err(no_hardware_backend());
    }
    let (backend, _cameras) = SimBackend::line_setup(settings.camera.nail_camera_resolution);
    let mut manager = AcquisitionManager::new(Box::new(backend));
    let count = manager.initialize()?;

    println!("Cameras ({}):", count);
    for info in manager.list_all() {
        match assigned_slot(settings, &info.serial_number) {
            Some(slot) => println!("  {}  -> {}", info, slot),
            None => println!("  {}", info),
        }
    }
    manager.release_all();
    Ok(())
}

// ============================================================================
// Fault Commands
// ============================================================================

pub fn format_fault_table(records: &[FaultRecord]) -> String {
    if records.is_empty() {
        return "No faults recorded\n".to_string();
    }
    let mut out = format!(
        "{:<19}  {:<15}  {:>5}  {:>9}  {}\n",
        "Timestamp", "Type", "Image", "Meas (mm)", "Details"
    );
    for r in records {
        let measurement = r.measurement_mm.map_or_else(|| "-".to_string(), |m| format!("{:.1}", m));
        out.push_str(&format!(
            "{:<19}  {:<15}  {:>5}  {:>9}  {}\n",
            r.timestamp, r.fault_type, r.image_index, measurement, r.details
        ));
    }
    out
}

pub fn format_statistics(stats: &FaultStatistics) -> String {
    format!(
        "Total: {}\n{}: {}\n{}: {}\n",
        stats.total,
        FaultType::Nail,
        stats.nail(),
        FaultType::BoardAlignment,
        stats.board()
    )
}

fn cmd_faults(settings: &InspectionSettings, cmd: &FaultCommands) -> anyhow::Result<()> {
    let path = &settings.storage.database_path;
    let store = FaultStore::open(path).with_context(|| format!("Failed to open fault database {}", path.display()))?;

    match cmd {
        FaultCommands::List(filter) => {
            let records = store.query(&filter.to_query()?)?;
            print!("{}", format_fault_table(&records));
        }
        FaultCommands::Stats(filter) => {
            let records = store.query(&filter.to_query()?)?;
            print!("{}", format_statistics(&FaultStore::statistics(&records)));
        }
        FaultCommands::Export { path, filter } => {
            let records = store.query(&filter.to_query()?)?;
            FaultStore::export_csv(path, &records)?;
            println!("Exported {} records to {}", records.len(), path.display());
        }
        FaultCommands::Delete {
            timestamp,
            fault_type,
            image,
        } => {
            let fault_type: FaultType = fault_type.parse()?;
            match store.delete(timestamp, fault_type, *image)? {
                0 => println!("No matching fault record"),
                1 => println!("Deleted 1 record"),
                n => {
                    warn!(timestamp = %timestamp, "Composite key matched {} records", n);
                    println!("Deleted {} records", n);
                }
            }
        }
        FaultCommands::Clear { force } => {
            if !force {
                eprintln!("This will delete the entire fault history. Use --force to confirm.");
                return Ok(());
            }
            let removed = store.clear_all()?;
            println!("Cleared {} fault records", removed);
        }
    }
    Ok(())
}

// ============================================================================
// Relay Command
// ============================================================================

fn cmd_relay(settings: &InspectionSettings, cmd: &RelayCommands) -> anyhow::Result<()> {
    match cmd {
        RelayCommands::Pulse { duration, port } => {
            let seconds = duration.unwrap_or(settings.relay.trigger_duration_s);
            let pulse = validate_pulse_duration(seconds)?;
            let port = port.as_deref().unwrap_or(&settings.relay.port);

            let mut relay = RelayController::new(port, settings.relay.baudrate);
            if !relay.connect(port, settings.relay.baudrate) {
                bail!("Could not open relay port {}", port);
            }
            let delivered = relay.pulse(pulse);
            relay.disconnect();
            if !delivered {
                bail!("Relay pulse failed");
            }
            println!("Pulsed relay on {} for {:.2}s", port, pulse.as_secs_f64());
        }
    }
    Ok(())
}

// ============================================================================
// Settings Commands
// ============================================================================

fn cmd_settings(ctx: &CommandContext, cmd: &SettingsCommands) -> anyhow::Result<()> {
    match cmd {
        SettingsCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
        }
        SettingsCommands::Path => {
            println!("{}", ctx.settings_path.display());
        }
        SettingsCommands::Validate => {
            let problems = ctx.settings.validate();
            if problems.is_empty() {
                println!("Settings OK");
            } else {
                for problem in &problems {
                    println!("  - {}", problem);
                }
                bail!("{} problem(s) found", problems.len());
            }
        }
        SettingsCommands::Init { force } => {
            if ctx.settings_path.exists() && !force {
                eprintln!(
                    "{} already exists. Use --force to overwrite it with defaults.",
                    ctx.settings_path.display()
                );
                return Ok(());
            }
            fl_core::save_settings_to(&InspectionSettings::default(), &ctx.settings_path)?;
            println!("Wrote default settings to {}", ctx.settings_path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(fault_type: FaultType, measurement_mm: Option<f64>) -> FaultRecord {
        FaultRecord {
            id: Some(1),
            timestamp: "2025-03-07 14:05:09".into(),
            fault_type,
            image_index: 2,
            details: "Detected 1 nails".into(),
            measurement_mm,
        }
    }

    #[test]
    fn test_fault_table_rows() {
        let table = format_fault_table(&[record(FaultType::Nail, None), record(FaultType::BoardAlignment, Some(31.24))]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Timestamp"));
        assert!(lines[1].contains("Nail") && lines[1].contains(" - "));
        assert!(lines[2].contains("Board Alignment") && lines[2].contains("31.2"));
    }

    #[test]
    fn test_fault_table_empty() {
        assert_eq!(format_fault_table(&[]), "No faults recorded\n");
    }

    #[test]
    fn test_statistics_text() {
        let mut by_type = BTreeMap::new();
        by_type.insert("Nail".to_string(), 3);
        let stats = FaultStatistics { total: 3, by_type };
        assert_eq!(format_statistics(&stats), "Total: 3\nNail: 3\nBoard Alignment: 0\n");
    }

    #[test]
    fn test_assigned_slot_lookup() {
        let mut settings = InspectionSettings::default();
        settings.assignments.nail[1] = Some("N-7".into());
        assert_eq!(assigned_slot(&settings, "N-7"), Some(SlotId::new(DetectorClass::Nail, 1)));
        assert_eq!(assigned_slot(&settings, "B-1"), None);
    }

    #[test]
    fn test_settings_init_writes_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        let ctx = CommandContext::load(Some(&path)).unwrap();
        cmd_settings(&ctx, &SettingsCommands::Init { force: false }).unwrap();
        assert!(path.exists());
        assert_eq!(fl_core::load_settings_from(&path).unwrap(), InspectionSettings::default());
    }

    #[test]
    fn test_run_requires_simulation_backend() {
        let mut settings = InspectionSettings::default();
        settings.detection.nail_model_path = Some(PathBuf::from("/nonexistent/nail.pt"));
        let err = cmd_run(settings, &RunArgs::default()).unwrap_err();
        assert!(err.to_string().contains("problem"));
    }
}

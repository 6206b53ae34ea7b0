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

//! Aggregation runtime
//!
//! One current-thread loop owns the [`Station`] and multiplexes worker and
//! dispatch events, timed-camera deadlines, periodic cleanup and shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fl_core::camera::CameraDevice;
use fl_core::sim::{DetectionFixture, RecordingLink, ScriptedModel, SimBackend, SimCamera};
use fl_core::{
    AcquisitionManager, DetectorClass, FaultStore, InspectionSettings, ModelRegistry, RelayController, Station,
    StationCounters, StationEvent, StationUpdate,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A station wired to simulated cameras, models and relay
pub struct SimulatedLine {
    pub station: Station,
    pub events: UnboundedReceiver<StationEvent>,
    pub relay_link: RecordingLink,
    pub cameras: Vec<SimCamera>,
}

/// Bind unassigned settings to the simulated serials: board cameras first, then nails
fn assign_simulated(settings: &mut InspectionSettings, cameras: &[SimCamera]) {
    let serials = |tag: &str| -> Vec<String> {
        cameras
            .iter()
            .map(|c| c.info().serial_number.clone())
            .filter(|s| s.contains(tag))
            .collect()
    };
    for (slot, serial) in settings.assignments.board.iter_mut().zip(serials("BOARD")) {
        *slot = Some(serial);
    }
    for (slot, serial) in settings.assignments.nail.iter_mut().zip(serials("NAIL")) {
        *slot = Some(serial);
    }
}

/// Simulated line with the standard two-board, two-nail camera set
pub fn simulated_line(settings: InspectionSettings, fixture: &DetectionFixture) -> fl_core::Result<SimulatedLine> {
    let (backend, cameras) = SimBackend::line_setup(settings.camera.nail_camera_resolution);
    simulated_line_with(settings, backend, cameras, fixture)
}

pub fn simulated_line_with(
    mut settings: InspectionSettings,
    backend: SimBackend,
    cameras: Vec<SimCamera>,
    fixture: &DetectionFixture,
) -> fl_core::Result<SimulatedLine> {
    if settings.assignments.assigned_count() == 0 {
        assign_simulated(&mut settings, &cameras);
        info!("Assigned simulated cameras to all slots");
    }

    let mut manager = AcquisitionManager::new(Box::new(backend));
    manager.initialize()?;

    let mut models = ModelRegistry::new();
    for class in DetectorClass::ALL {
        models.insert(class, Arc::new(ScriptedModel::from_fixture(class, fixture)));
    }

    let store = FaultStore::open(&settings.storage.database_path)?;

    let relay_link = RecordingLink::new();
    let mut relay = RelayController::new(settings.relay.port.clone(), settings.relay.baudrate);
    relay.attach(Box::new(relay_link.clone()));

    let (station, events) = Station::new(settings, manager, models, store, Box::new(relay));
    Ok(SimulatedLine {
        station,
        events,
        relay_link,
        cameras,
    })
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => time::sleep_until(time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

fn report_update(update: &StationUpdate) {
    match update {
        StationUpdate::Defect { slot, record } => {
            println!("[{}] {} on {}: {}", record.timestamp, record.fault_type, slot, record.details);
        }
        StationUpdate::RunComplete(summary) => {
            println!(
                "Run complete: {} detections, {:.2}s wall clock, {:.2}s average inference",
                summary.detections,
                summary.wall_time.as_secs_f64(),
                summary.average_inference.as_secs_f64()
            );
        }
        StationUpdate::Error { slot, message } => {
            debug!(slot = ?slot, "Station error: {}", message);
        }
        StationUpdate::FrameShown { .. } | StationUpdate::Annotated { .. } => {}
    }
}

/// Resolve on ctrl-c, or once `duration` has passed
pub async fn shutdown_signal(duration: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match duration {
        Some(limit) => tokio::select! {
            _ = ctrl_c => info!("Received ctrl-c"),
            _ = time::sleep(limit) => info!("Run duration of {:.1}s elapsed", limit.as_secs_f64()),
        },
        None => {
            ctrl_c.await;
            info!("Received ctrl-c");
        }
    }
}

/// Start every assigned slot and run the station until `shutdown` resolves
///
/// The station is shut down (workers stopped, devices released, relay
/// disconnected) before this returns.
pub async fn drive<F>(station: &mut Station, events: &mut UnboundedReceiver<StationEvent>, shutdown: F) -> StationCounters
where
    F: Future<Output = ()>,
{
    let every = station.settings().maintenance.cleanup_interval();
    let mut cleanup = time::interval_at(time::Instant::now() + every, every);
    cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut updates = station.subscribe();
    tokio::pin!(shutdown);

    if station.start_all() == 0 {
        warn!("No camera slots started; check the slot assignments against `flexline devices`");
    }

    loop {
        let next_timed = station.next_deadline();
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(event) = events.recv() => station.handle_event(event),
            Some(update) = updates.recv() => report_update(&update),
            _ = sleep_until(next_timed) => station.poll_timed(std::time::Instant::now()),
            _ = cleanup.tick() => {
                station.sweep();
            }
        }
    }

    station.shutdown();
    while let Ok(update) = updates.try_recv() {
        report_update(&update);
    }
    station.counters().clone()
}

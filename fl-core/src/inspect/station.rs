//! Inspection station: the aggregation side of the pipeline
//!
//! The station owns every slot, the device pool, the fault store and the relay.
//! Workers and dispatch tasks only talk to it through [`StationEvent`]s, which
//! the runtime feeds into [`Station::handle_event`] on a single thread.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::camera::{strategy_for, AcquisitionManager, CaptureStrategy, EventSink, StationEvent, WorkerState};
use crate::constants::{camera, relay};
use crate::data::{
    validate_pulse_duration, validate_slot_index, DetectionBatch, DetectionOutcome, DetectorClass, FaultRecord,
    FaultType, Frame, SlotId,
};
use crate::detection::{Dispatcher, ModelRegistry};
use crate::inspect::classifier::{classify_nail, measure_board, MeasurementSpec};
use crate::inspect::overlay::Overlay;
use crate::inspect::run::{RunStats, TimingSummary};
use crate::relay::Actuator;
use crate::settings::InspectionSettings;
use crate::store::FaultStore;
use fl_error::{FlexlineError, Result};

/// A capture position and everything the station knows about it
pub struct CameraSlot {
    pub id: SlotId,
    /// Serial of the claimed device while a worker runs
    pub serial: Option<String>,
    pub raw_frame: Option<Frame>,
    pub last_result: Option<DetectionOutcome>,
    pub overlay: Option<Overlay>,
    worker: Option<Box<dyn CaptureStrategy>>,
}

impl CameraSlot {
    fn new(id: SlotId) -> Self {
        Self {
            id,
            serial: None,
            raw_frame: None,
            last_result: None,
            overlay: None,
            worker: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.as_ref().map_or(WorkerState::Idle, |w| w.state())
    }

    fn clear_images(&mut self) {
        self.raw_frame = None;
        self.last_result = None;
        self.overlay = None;
    }
}

/// Notifications for a display or any other observer
#[derive(Debug, Clone)]
pub enum StationUpdate {
    FrameShown { slot: SlotId },
    Annotated { slot: SlotId, overlay: Overlay },
    Defect { slot: SlotId, record: FaultRecord },
    Error { slot: Option<SlotId>, message: String },
    RunComplete(TimingSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StationCounters {
    pub frames: usize,
    pub dropped_frames: usize,
    pub dispatched: usize,
    pub detections: usize,
    pub failed_batches: usize,
    pub nail_defects: usize,
    pub board_defects: usize,
}

/// What a sweep cleaned up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pruned_tasks: usize,
    pub collected_workers: usize,
    pub cleared_slots: usize,
}

pub struct Station {
    settings: InspectionSettings,
    manager: AcquisitionManager,
    models: ModelRegistry,
    store: FaultStore,
    actuator: Box<dyn Actuator>,
    board: Vec<CameraSlot>,
    nail: Vec<CameraSlot>,
    sink: EventSink,
    dispatcher: Dispatcher,
    run: Option<RunStats>,
    counters: StationCounters,
    updates: Option<mpsc::UnboundedSender<StationUpdate>>,
}

impl Station {
    /// Build a station and the receiver its events arrive on
    pub fn new(
        settings: InspectionSettings,
        manager: AcquisitionManager,
        models: ModelRegistry,
        store: FaultStore,
        actuator: Box<dyn Actuator>,
    ) -> (Self, mpsc::UnboundedReceiver<StationEvent>) {
        let (sink, events) = EventSink::channel();
        let slots = |class: DetectorClass| -> Vec<CameraSlot> {
            (0..camera::SLOTS_PER_CLASS).map(|i| CameraSlot::new(SlotId::new(class, i))).collect()
        };

        let station = Self {
            settings,
            manager,
            models,
            store,
            actuator,
            board: slots(DetectorClass::Board),
            nail: slots(DetectorClass::Nail),
            dispatcher: Dispatcher::new(sink.clone()),
            sink,
            run: None,
            counters: StationCounters::default(),
            updates: None,
        };
        (station, events)
    }

    /// Receive [`StationUpdate`]s; replaces any earlier subscriber
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StationUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(tx);
        rx
    }

    pub fn settings(&self) -> &InspectionSettings {
        &self.settings
    }

    pub fn manager(&self) -> &AcquisitionManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut AcquisitionManager {
        &mut self.manager
    }

    pub fn store(&self) -> &FaultStore {
        &self.store
    }

    pub fn counters(&self) -> &StationCounters {
        &self.counters
    }

    pub fn run_stats(&self) -> Option<&RunStats> {
        self.run.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Panics on an index outside the slot range; callers validate first
    pub fn slot(&self, id: SlotId) -> &CameraSlot {
        match id.class {
            DetectorClass::Board => &self.board[id.index],
            DetectorClass::Nail => &self.nail[id.index],
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut CameraSlot {
        match id.class {
            DetectorClass::Board => &mut self.board[id.index],
            DetectorClass::Nail => &mut self.nail[id.index],
        }
    }

    fn slots_mut(&mut self) -> impl Iterator<Item = &mut CameraSlot> {
        self.board.iter_mut().chain(self.nail.iter_mut())
    }

    fn slot_ids() -> impl Iterator<Item = SlotId> {
        DetectorClass::ALL
            .into_iter()
            .flat_map(|class| (0..camera::SLOTS_PER_CLASS).map(move |i| SlotId::new(class, i)))
    }

    pub fn active_slots(&self) -> Vec<SlotId> {
        Self::slot_ids().filter(|id| self.slot(*id).is_active()).collect()
    }

    fn notify(&self, update: StationUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }

    fn report_error(&self, slot: Option<SlotId>, message: String) {
        self.notify(StationUpdate::Error { slot, message });
    }

    // ------------------------------------------------------------------------
    // Slot lifecycle
    // ------------------------------------------------------------------------

    /// Claim `serial` for `id` and start the class's capture strategy on it
    pub fn start_slot(&mut self, id: SlotId, serial: &str) -> Result<()> {
        validate_slot_index(id.index)?;
        if self.slot(id).is_active() {
            return Err(FlexlineError::SlotBusy(id.to_string()));
        }

        let mut device = self.manager.claim(serial).map_err(|e| {
            self.report_error(Some(id), e.to_string());
            e
        })?;

        let resolution = (id.class == DetectorClass::Nail).then_some(self.settings.camera.nail_camera_resolution);
        if let Err(e) = AcquisitionManager::configure_for_class(device.as_mut(), id.class, resolution) {
            error!(slot = %id, "Failed to configure camera: {}", e);
            self.manager.release(device);
            self.report_error(Some(id), e.to_string());
            return Err(e);
        }

        let mut worker = strategy_for(id, device, &self.settings.camera, self.sink.clone());
        if let Err(e) = worker.start() {
            let message = format!("Failed to start camera: {}", e);
            error!(slot = %id, "{}", message);
            match worker.stop() {
                Some(device) => self.manager.release(device),
                None => self.manager.forget(serial),
            }
            self.report_error(Some(id), message);
            return Err(e);
        }

        info!(slot = %id, serial, "Camera slot started");
        let slot = self.slot_mut(id);
        slot.worker = Some(worker);
        slot.serial = Some(serial.to_string());
        Ok(())
    }

    /// Stop the slot's worker, return its device and clear its frame
    ///
    /// Returns false if nothing was running.
    pub fn stop_slot(&mut self, id: SlotId) -> bool {
        if validate_slot_index(id.index).is_err() {
            return false;
        }
        let slot = self.slot_mut(id);
        let Some(mut worker) = slot.worker.take() else {
            return false;
        };
        let serial = slot.serial.take();
        slot.raw_frame = None;

        match (worker.stop(), serial) {
            (Some(device), _) => self.manager.release(device),
            (None, Some(serial)) => self.manager.forget(&serial),
            (None, None) => {}
        }
        info!(slot = %id, "Camera slot stopped");
        true
    }

    /// Start every assigned slot and begin a new timed run
    pub fn start_all(&mut self) -> usize {
        info!("Starting all detections...");
        let assignments = self.settings.assignments.clone();
        let mut started = 0;

        for class in DetectorClass::ALL {
            for (index, serial) in assignments.for_class(class).iter().enumerate() {
                let Some(serial) = serial else {
                    continue;
                };
                let id = SlotId::new(class, index);
                if self.slot(id).is_active() {
                    started += 1;
                    continue;
                }
                match self.start_slot(id, serial) {
                    Ok(()) => started += 1,
                    Err(e) => warn!(slot = %id, serial = %serial, "Slot not started: {}", e),
                }
            }
        }

        self.run = Some(RunStats::start(started));
        info!("{} camera slot(s) running", started);
        started
    }

    pub fn stop_all(&mut self) {
        for id in Self::slot_ids() {
            self.stop_slot(id);
        }
    }

    // ------------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: StationEvent) {
        match event {
            StationEvent::FrameReady { slot, frame } => self.on_frame(slot, frame),
            StationEvent::CameraError { slot, message, fatal } => self.on_camera_error(slot, message, fatal),
            StationEvent::DetectionComplete(batch) => self.on_detection_complete(batch),
        }
    }

    fn on_frame(&mut self, id: SlotId, frame: Frame) {
        if validate_slot_index(id.index).is_err() || !self.slot(id).is_active() {
            debug!(slot = %id, "Dropping frame from inactive slot");
            self.counters.dropped_frames += 1;
            return;
        }

        let frame = if id.class == DetectorClass::Nail {
            let target = self.settings.camera.nail_camera_resolution;
            match frame.resized(target) {
                Ok(resized) => resized,
                Err(e) => {
                    warn!(slot = %id, "Could not resize nail frame: {}", e);
                    frame
                }
            }
        } else {
            frame
        };

        self.slot_mut(id).raw_frame = Some(frame.clone());
        self.counters.frames += 1;
        self.notify(StationUpdate::FrameShown { slot: id });

        let Some(model) = self.models.get(id.class) else {
            warn!(slot = %id, "No {} model loaded, skipping detection", id.class);
            return;
        };

        let confidence = self.settings.confidence_for(id.class);
        match self.dispatcher.dispatch(model, vec![frame], id.class, vec![id.index], confidence) {
            Ok(()) => self.counters.dispatched += 1,
            Err(e) => {
                error!(slot = %id, "{}", e);
                self.on_detection_complete(DetectionBatch::failed(id.class, vec![id.index]));
            }
        }
    }

    fn on_camera_error(&mut self, id: SlotId, message: String, fatal: bool) {
        error!(slot = %id, "Camera error: {}", message);
        self.report_error(Some(id), message.clone());

        if fatal || message.contains("Failed to start") {
            warn!(slot = %id, "Stopping camera after critical error");
            self.stop_slot(id);
        }
    }

    fn on_detection_complete(&mut self, batch: DetectionBatch) {
        let class = batch.detector_class;
        if batch.outcomes.is_empty() || batch.is_failed() {
            let message = format!("Batch detection failed for {} detector", class);
            error!("{}", message);
            self.counters.failed_batches += 1;
            self.report_error(None, message);
            return;
        }

        info!(
            "Received {} detection results for images {:?} in {:.2} seconds",
            class,
            batch.slot_indices,
            batch.elapsed.as_secs_f64()
        );

        let count = batch.slot_indices.len();
        let elapsed = batch.elapsed;
        for (outcome, index) in batch.outcomes.into_iter().zip(batch.slot_indices) {
            let Some(outcome) = outcome else {
                warn!("No results for {} detection on image {}", class, index);
                continue;
            };
            if validate_slot_index(index).is_err() {
                warn!("Detection result for unknown {} slot {}", class, index);
                continue;
            }
            self.counters.detections += 1;
            let id = SlotId::new(class, index);
            match class {
                DetectorClass::Nail => self.apply_nail(id, outcome),
                DetectorClass::Board => self.apply_board(id, outcome),
            }
        }

        if let Some(run) = self.run.as_mut() {
            if let Some(summary) = run.record(count, elapsed) {
                summary.log();
                self.notify(StationUpdate::RunComplete(summary));
            }
        }
    }

    fn overlay_for(&self, id: SlotId) -> Overlay {
        match &self.slot(id).raw_frame {
            Some(frame) => Overlay::for_frame(frame),
            None => {
                let (w, h) = self.settings.camera.nail_camera_resolution;
                Overlay::new(w, h)
            }
        }
    }

    fn apply_nail(&mut self, id: SlotId, outcome: DetectionOutcome) {
        let verdict = classify_nail(&outcome);
        let mut overlay = self.overlay_for(id);

        if verdict.is_defect {
            warn!("DEFECT: Nail detected in image {}", id.image_number());
            self.counters.nail_defects += 1;
            self.record_fault(id, FaultType::Nail, format!("Detected {} nails", verdict.count), None);
            self.pulse_actuator();
            overlay.mark_defect();
        }
        overlay.add_boxes(&outcome.boxes);
        self.publish(id, outcome, overlay);
    }

    fn apply_board(&mut self, id: SlotId, outcome: DetectionOutcome) {
        let spec = MeasurementSpec::from(&self.settings.measurement);
        let mut overlay = self.overlay_for(id);
        let measurement = measure_board(&outcome.boxes, &spec);

        if let Some(m) = measurement.as_ref().filter(|m| m.is_defect) {
            let details = m.details(&spec);
            warn!("DEFECT: {}", details);
            self.counters.board_defects += 1;
            self.record_fault(id, FaultType::BoardAlignment, details, Some(m.measurement_mm));
            self.pulse_actuator();
            overlay.mark_defect();
        }

        overlay.add_boxes(&outcome.boxes);
        if let Some(m) = &measurement {
            overlay.add_measurement(m, &spec);
        }
        self.publish(id, outcome, overlay);
    }

    fn publish(&mut self, id: SlotId, outcome: DetectionOutcome, overlay: Overlay) {
        let slot = self.slot_mut(id);
        slot.last_result = Some(outcome);
        slot.overlay = Some(overlay.clone());
        self.notify(StationUpdate::Annotated { slot: id, overlay });
    }

    fn record_fault(&mut self, id: SlotId, fault_type: FaultType, details: String, measurement_mm: Option<f64>) {
        match self.store.log_fault(fault_type, id.image_number(), details, measurement_mm) {
            Ok(record) => self.notify(StationUpdate::Defect { slot: id, record }),
            Err(e) => {
                error!(slot = %id, "Failed to log fault: {}", e);
                self.report_error(Some(id), e.to_string());
            }
        }
    }

    fn pulse_actuator(&mut self) {
        let duration = validate_pulse_duration(self.settings.relay.trigger_duration_s).unwrap_or_else(|e| {
            warn!("{}; using default pulse", e);
            Duration::from_secs_f64(relay::DEFAULT_PULSE_SECONDS)
        });
        if !self.actuator.pulse(duration) {
            warn!("Relay pulse was not delivered");
        }
    }

    // ------------------------------------------------------------------------
    // Timers and housekeeping
    // ------------------------------------------------------------------------

    /// Earliest timed-worker deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.board
            .iter()
            .chain(self.nail.iter())
            .filter_map(|s| s.worker.as_ref().and_then(|w| w.next_deadline()))
            .min()
    }

    /// Let cooperative workers run whatever is due
    pub fn poll_timed(&mut self, now: Instant) {
        for slot in self.slots_mut() {
            if let Some(worker) = slot.worker.as_mut() {
                worker.poll(now);
            }
        }
    }

    /// Prune finished dispatch tasks, collect dead workers, clear stale frames
    pub fn sweep(&mut self) -> SweepReport {
        let mut report = SweepReport {
            pruned_tasks: self.dispatcher.prune_finished(),
            ..SweepReport::default()
        };

        let finished: Vec<SlotId> = Self::slot_ids()
            .filter(|id| self.slot(*id).worker.as_ref().is_some_and(|w| w.is_finished()))
            .collect();
        for id in finished {
            if self.stop_slot(id) {
                report.collected_workers += 1;
            }
        }

        for slot in self.slots_mut() {
            if slot.worker.is_none() && (slot.raw_frame.is_some() || slot.overlay.is_some() || slot.last_result.is_some()) {
                slot.clear_images();
                report.cleared_slots += 1;
            }
        }

        debug!(?report, "Periodic cleanup");
        report
    }

    /// Stop everything and let go of all hardware
    pub fn shutdown(&mut self) {
        info!("Starting application cleanup");
        self.stop_all();
        self.manager.release_all();
        for slot in self.slots_mut() {
            slot.clear_images();
        }
        self.actuator.disconnect();
        info!("Application cleanup completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::GrabResult;
    use crate::data::{BoundingBox, PixelFormat};
    use crate::relay::MockActuator;
    use crate::sim::{SimBackend, SimCamera};
    use std::sync::Arc;

    fn settings() -> InspectionSettings {
        let mut s = InspectionSettings::default();
        s.camera.board_camera_timeout_ms = 10;
        s.camera.nail_camera_resolution = (8, 8);
        s.measurement.target_measurement_mm = 20.0;
        s.relay.trigger_duration_s = 0.0;
        s
    }

    fn station_with(cameras: &[SimCamera], actuator: MockActuator, settings: InspectionSettings) -> Station {
        let mut manager = AcquisitionManager::new(Box::new(SimBackend::new(cameras.to_vec())));
        manager.initialize().unwrap();
        let store = FaultStore::open_in_memory().unwrap();
        let (station, _events) = Station::new(settings, manager, ModelRegistry::new(), store, Box::new(actuator));
        station
    }

    fn batch(class: DetectorClass, index: usize, boxes: Vec<BoundingBox>) -> StationEvent {
        StationEvent::DetectionComplete(DetectionBatch {
            outcomes: vec![Some(DetectionOutcome {
                boxes,
                detector_class: class,
                elapsed: Duration::from_millis(40),
            })],
            detector_class: class,
            slot_indices: vec![index],
            elapsed: Duration::from_millis(40),
        })
    }

    fn edge(x1: i32, x2: i32) -> BoundingBox {
        BoundingBox::new(x1, 0, x2, 100, 0.9, "edge")
    }

    #[test]
    fn test_nail_without_boxes_is_clean() {
        let mut actuator = MockActuator::new();
        actuator.expect_pulse().times(0);
        let mut station = station_with(&[], actuator, settings());

        station.handle_event(batch(DetectorClass::Nail, 0, vec![]));
        assert!(station.store().all().unwrap().is_empty());
        assert_eq!(station.counters().nail_defects, 0);
        assert!(station.slot(SlotId::new(DetectorClass::Nail, 0)).last_result.is_some());
    }

    #[test]
    fn test_nail_defect_records_and_pulses_once() {
        let mut actuator = MockActuator::new();
        actuator.expect_pulse().times(1).return_const(true);
        let mut station = station_with(&[], actuator, settings());

        let boxes = vec![
            BoundingBox::new(1, 1, 3, 3, 0.7, "nail"),
            BoundingBox::new(4, 4, 6, 6, 0.8, "nail"),
        ];
        station.handle_event(batch(DetectorClass::Nail, 1, boxes));

        let records = station.store().all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fault_type, FaultType::Nail);
        assert_eq!(records[0].image_index, 2);
        assert_eq!(records[0].details, "Detected 2 nails");
        assert!(station.slot(SlotId::new(DetectorClass::Nail, 1)).overlay.as_ref().unwrap().is_defect());
    }

    #[test]
    fn test_board_within_tolerance_is_clean() {
        let mut actuator = MockActuator::new();
        actuator.expect_pulse().times(0);
        let mut station = station_with(&[], actuator, settings());

        station.handle_event(batch(DetectorClass::Board, 0, vec![edge(10, 50), edge(200, 260)]));
        assert!(station.store().all().unwrap().is_empty());
        let overlay = station.slot(SlotId::new(DetectorClass::Board, 0)).overlay.clone().unwrap();
        assert!(!overlay.is_defect());
        assert!(overlay.texts().contains(&"Target: 20mm ±5mm"));
    }

    #[test]
    fn test_board_out_of_tolerance_records_measurement() {
        let mut actuator = MockActuator::new();
        actuator.expect_pulse().times(1).return_const(true);
        let mut s = settings();
        s.measurement.target_measurement_mm = 10.0;
        let mut station = station_with(&[], actuator, s);

        station.handle_event(batch(DetectorClass::Board, 1, vec![edge(200, 260), edge(10, 50)]));
        let records = station.store().all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fault_type, FaultType::BoardAlignment);
        assert_eq!(records[0].image_index, 2);
        assert!((records[0].measurement_mm.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_board_single_box_no_geometry() {
        let mut actuator = MockActuator::new();
        actuator.expect_pulse().times(0);
        let mut station = station_with(&[], actuator, settings());

        station.handle_event(batch(DetectorClass::Board, 0, vec![edge(10, 50)]));
        assert!(station.store().all().unwrap().is_empty());
        let overlay = station.slot(SlotId::new(DetectorClass::Board, 0)).overlay.clone().unwrap();
        assert_eq!(overlay.texts(), vec!["edge 0.90"]);
    }

    #[test]
    fn test_failed_batch_leaves_counters() {
        let actuator = MockActuator::new();
        let mut station = station_with(&[], actuator, settings());
        station.run = Some(RunStats::start(1));

        station.handle_event(StationEvent::DetectionComplete(DetectionBatch::failed(DetectorClass::Board, vec![0])));
        assert_eq!(station.counters().failed_batches, 1);
        assert_eq!(station.counters().detections, 0);
        assert_eq!(station.run_stats().unwrap().completed(), 0);
    }

    #[test]
    fn test_run_summary_published_once() {
        let mut actuator = MockActuator::new();
        actuator.expect_pulse().times(0);
        let mut station = station_with(&[], actuator, settings());
        let mut updates = station.subscribe();
        station.run = Some(RunStats::start(2));

        station.handle_event(batch(DetectorClass::Nail, 0, vec![]));
        station.handle_event(batch(DetectorClass::Nail, 1, vec![]));
        station.handle_event(batch(DetectorClass::Nail, 0, vec![]));

        let mut summaries = 0;
        while let Ok(update) = updates.try_recv() {
            if let StationUpdate::RunComplete(summary) = update {
                assert_eq!(summary.detections, 2);
                summaries += 1;
            }
        }
        assert_eq!(summaries, 1);
    }

    #[test]
    fn test_second_slot_cannot_claim_same_device() {
        let cam = SimCamera::new("N-1");
        let mut station = station_with(&[cam.clone()], MockActuator::new(), settings());
        let first = SlotId::new(DetectorClass::Nail, 0);
        let second = SlotId::new(DetectorClass::Nail, 1);

        station.start_slot(first, "N-1").unwrap();
        let err = station.start_slot(second, "N-1").unwrap_err();
        assert!(matches!(err, FlexlineError::DeviceInUse(_)));
        assert!(station.slot(first).is_active());
        assert!(!station.slot(second).is_active());
        assert!(cam.stats().grabbing);
        station.stop_all();
    }

    #[test]
    fn test_nail_frame_resized_and_dropped_after_stop() {
        let cam = SimCamera::new("N-1");
        let mut station = station_with(&[cam], MockActuator::new(), settings());
        let id = SlotId::new(DetectorClass::Nail, 0);
        station.start_slot(id, "N-1").unwrap();

        station.handle_event(StationEvent::FrameReady {
            slot: id,
            frame: Frame::filled(32, 16, PixelFormat::BayerRG8, 5),
        });
        assert_eq!(station.slot(id).raw_frame.as_ref().unwrap().dimensions(), (8, 8));
        assert_eq!(station.counters().frames, 1);

        station.stop_slot(id);
        assert!(station.slot(id).raw_frame.is_none());
        station.handle_event(StationEvent::FrameReady {
            slot: id,
            frame: Frame::filled(8, 8, PixelFormat::BayerRG8, 5),
        });
        assert!(station.slot(id).raw_frame.is_none());
        assert_eq!(station.counters().dropped_frames, 1);
    }

    #[test]
    fn test_fatal_error_returns_device_to_pool() {
        let cam = SimCamera::new("B-1");
        let mut station = station_with(&[cam.clone()], MockActuator::new(), settings());
        let id = SlotId::new(DetectorClass::Board, 0);
        station.start_slot(id, "B-1").unwrap();
        assert!(station.manager().is_in_use("B-1"));

        station.handle_event(StationEvent::CameraError {
            slot: id,
            message: "Failed to restart camera: gone".into(),
            fatal: true,
        });
        assert!(!station.slot(id).is_active());
        assert!(!station.manager().is_in_use("B-1"));
        assert!(!cam.stats().open);
    }

    #[test]
    fn test_grab_error_keeps_slot_running() {
        let cam = SimCamera::new("N-1");
        let mut station = station_with(&[cam], MockActuator::new(), settings());
        let id = SlotId::new(DetectorClass::Nail, 0);
        station.start_slot(id, "N-1").unwrap();

        station.handle_event(StationEvent::CameraError {
            slot: id,
            message: "Grab failed: incomplete".into(),
            fatal: false,
        });
        assert!(station.slot(id).is_active());
        station.stop_all();
    }

    #[test]
    fn test_start_all_uses_assignments() {
        let cams = [SimCamera::new("B-0"), SimCamera::new("N-1"), SimCamera::new("spare")];
        let mut s = settings();
        s.assignments.board[0] = Some("B-0".into());
        s.assignments.nail[1] = Some("N-1".into());
        s.assignments.nail[0] = Some("missing".into());
        let mut station = station_with(&cams, MockActuator::new(), s);

        assert_eq!(station.start_all(), 2);
        assert_eq!(station.run_stats().unwrap().expected(), 2);
        assert_eq!(
            station.active_slots(),
            vec![SlotId::new(DetectorClass::Board, 0), SlotId::new(DetectorClass::Nail, 1)]
        );
        assert_eq!(station.manager().list_available().len(), 1);

        station.stop_all();
        assert!(station.active_slots().is_empty());
        assert_eq!(station.manager().list_available().len(), 3);
    }

    #[test]
    fn test_start_failure_reports_and_releases() {
        let cam = SimCamera::new("B-0");
        cam.reject_parameter(crate::constants::camera::PARAM_TRIGGER_MODE);
        let mut station = station_with(&[cam], MockActuator::new(), settings());
        let mut updates = station.subscribe();

        let id = SlotId::new(DetectorClass::Board, 0);
        assert!(station.start_slot(id, "B-0").is_err());
        assert!(!station.manager().is_in_use("B-0"));
        match updates.try_recv() {
            Ok(StationUpdate::Error { message, .. }) => assert!(message.starts_with("Failed to start camera")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timed_slot_polls_and_sweep_clears() {
        let cam = SimCamera::new("N-0");
        cam.push(GrabResult::Succeeded(Frame::filled(8, 8, PixelFormat::BayerRG8, 1)));
        let mut station = station_with(&[cam], MockActuator::new(), settings());
        let id = SlotId::new(DetectorClass::Nail, 0);
        station.start_slot(id, "N-0").unwrap();

        let due = station.next_deadline().unwrap();
        station.poll_timed(due);
        assert!(station.next_deadline().unwrap() > due);

        // Stale state on an idle slot is cleared by the sweep
        let idle = SlotId::new(DetectorClass::Board, 1);
        station.slot_mut(idle).raw_frame = Some(Frame::filled(2, 2, PixelFormat::Mono8, 0));
        let report = station.sweep();
        assert_eq!(report.cleared_slots, 1);
        assert!(station.slot(idle).raw_frame.is_none());
        station.stop_all();
    }

    #[test]
    fn test_frame_without_model_is_kept_not_dispatched() {
        let cam = SimCamera::new("B-0");
        let mut station = station_with(&[cam], MockActuator::new(), settings());
        let id = SlotId::new(DetectorClass::Board, 0);
        station.start_slot(id, "B-0").unwrap();

        station.handle_event(StationEvent::FrameReady {
            slot: id,
            frame: Frame::filled(16, 16, PixelFormat::BayerRG8, 3),
        });
        assert!(station.slot(id).raw_frame.is_some());
        assert_eq!(station.counters().dispatched, 0);
        station.stop_all();
    }

    #[tokio::test]
    async fn test_frame_dispatches_to_model() {
        let cam = SimCamera::new("N-0");
        let mut manager = AcquisitionManager::new(Box::new(SimBackend::new(vec![cam])));
        manager.initialize().unwrap();
        let mut models = ModelRegistry::new();
        let model = Arc::new(crate::sim::ScriptedModel::with_boxes(
            "nail",
            vec![BoundingBox::new(1, 1, 2, 2, 0.9, "nail")],
        ));
        models.insert(DetectorClass::Nail, model.clone());

        let mut actuator = MockActuator::new();
        actuator.expect_pulse().times(1).return_const(true);
        actuator.expect_disconnect().return_const(());
        let (mut station, mut events) = Station::new(
            settings(),
            manager,
            models,
            FaultStore::open_in_memory().unwrap(),
            Box::new(actuator),
        );

        let id = SlotId::new(DetectorClass::Nail, 0);
        station.start_slot(id, "N-0").unwrap();
        station.handle_event(StationEvent::FrameReady {
            slot: id,
            frame: Frame::filled(8, 8, PixelFormat::BayerRG8, 1),
        });
        assert_eq!(station.counters().dispatched, 1);

        let event = events.recv().await.unwrap();
        assert!(matches!(event, StationEvent::DetectionComplete(_)));
        station.handle_event(event);

        assert_eq!(model.last_confidence(), Some(0.25));
        assert_eq!(station.store().all().unwrap().len(), 1);
        station.shutdown();
    }
}

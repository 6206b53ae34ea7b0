//! Flexline Core Library
//!
//! Camera inspection pipeline for a production line: board cameras fire on a
//! hardware trigger, nail cameras free-run on a timer, frames go to per-class
//! detection models, and defects are logged to a fault store and signalled on
//! a serial relay.
//!
//! # Module Structure
//!
//! - `camera/` - SDK boundary, device pool, retry state machine, capture strategies
//! - `detection/` - model boundary, registry and asynchronous dispatch
//! - `inspect/` - defect rules, overlays, run timing and the [`Station`]
//! - `data/` - frames, boxes, fault records and validation
//! - `store` - SQLite fault history with CSV export
//! - `relay` - serial relay actuator
//! - `sim` - simulated cameras and models for tests and dry runs
//!
//! # Example
//!
//! ```no_run
//! use fl_core::{AcquisitionManager, FaultStore, ModelRegistry, RelayController, Station};
//! use fl_core::sim::SimBackend;
//!
//! let settings = fl_core::load_settings().unwrap();
//! let (backend, _cameras) = SimBackend::line_setup(settings.camera.nail_camera_resolution);
//! let mut manager = AcquisitionManager::new(Box::new(backend));
//! manager.initialize().unwrap();
//!
//! let store = FaultStore::open(&settings.storage.database_path).unwrap();
//! let relay = RelayController::new(&settings.relay.port, settings.relay.baudrate);
//! let (mut station, _events) = Station::new(settings, manager, ModelRegistry::new(), store, Box::new(relay));
//! station.start_all();
//! ```

// Grouped modules
pub mod camera;
pub mod data;
pub mod detection;
pub mod inspect;

// Standalone modules
pub mod constants;
pub mod relay;
pub mod settings;
pub mod sim;
pub mod store;

// Re-export primary types from data/
pub use data::{
    BoundingBox, DetectionBatch, DetectionOutcome, DetectorClass, FaultQuery, FaultRecord,
    FaultStatistics, FaultType, Frame, PixelFormat, SlotId,
};

// Re-export validation functions from data/
pub use data::{
    validate_confidence, validate_date, validate_fault_type_filter, validate_pulse_duration,
    validate_slot_index,
};

// Re-export error types
pub use fl_error::{FlexlineError, Result};

// Re-export camera types
pub use camera::{
    strategy_for, AcquisitionManager, CameraBackend, CameraDevice, CaptureStrategy, DeviceHandle,
    DeviceInfo, EventSink, GrabResult, GrabStrategy, RetryPolicy, StationEvent, TimedWorker,
    TriggeredWorker, WorkerState,
};

// Re-export detection types
pub use detection::{DetectionModel, Dispatcher, ExecutionDevice, ModelLoader, ModelRegistry};

// Re-export inspection types
pub use inspect::{
    classify_nail, measure_board, BoardMeasurement, MeasurementSpec, Overlay, RunStats, Station,
    StationCounters, StationUpdate, TimingSummary,
};

// Re-export persistence and actuation
pub use relay::{Actuator, RelayController, SerialLink};
pub use store::FaultStore;

// Re-export settings functions
pub use settings::{
    get_settings_path, load_settings, load_settings_from, save_settings, save_settings_to,
    DevicePreference, InspectionSettings, SlotAssignments,
};

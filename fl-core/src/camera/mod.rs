//! Camera acquisition: SDK boundary, device pool, capture strategies
//!
//! - `device` - traits a camera SDK binding implements
//! - `manager` - enumeration, baseline configuration, one-slot-per-device claims
//! - `retry` - worker states and the grab retry budget
//! - `strategy` - capture strategy trait and the station event channel
//! - `triggered` / `timed` - the two capture regimes

mod device;
mod manager;
mod retry;
mod strategy;
mod timed;
mod triggered;

pub use device::{
    CameraBackend, CameraDevice, DeviceHandle, DeviceInfo, GrabResult, GrabStrategy, ParameterValue,
};
pub use manager::AcquisitionManager;
pub use retry::{LoopAction, RetryPolicy, RetryState, WorkerState};
pub use strategy::{strategy_for, CaptureStrategy, EventSink, StationEvent};
pub use timed::{configure_timed, TimedWorker};
pub use triggered::{configure_triggered, StepOutcome, TriggerLoop, TriggeredWorker};

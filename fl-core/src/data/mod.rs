//! Data types and validation modules
//!
//! Contains the frame, detection and fault structures shared by every component.

mod types;
mod validation;

pub use types::{
    BoundingBox, DetectionBatch, DetectionOutcome, DetectorClass, FaultQuery, FaultRecord,
    FaultStatistics, FaultType, Frame, PixelFormat, SlotId,
};
pub use validation::{
    validate_confidence, validate_date, validate_fault_type_filter, validate_pulse_duration,
    validate_slot_index,
};

//! Inspection: defect rules, annotations, run timing and the station that ties them together

mod classifier;
mod overlay;
mod run;
mod station;

pub use classifier::{classify_nail, measure_board, BoardMeasurement, MeasurementSpec, NailVerdict};
pub use overlay::{draw_line, draw_rect, Overlay, OverlayItem};
pub use run::{RunStats, TimingSummary};
pub use station::{CameraSlot, Station, StationCounters, StationUpdate, SweepReport};

//! Defect rules
//!
//! Nails: any detected box is a defect. Boards: the two outermost boxes (by
//! left edge) are the reference edges; the average of the left-edge and
//! right-edge offsets, in millimetres, must sit within tolerance of the target.

use crate::constants::detection;
use crate::data::{BoundingBox, DetectionOutcome};
use crate::settings::MeasurementSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NailVerdict {
    pub count: usize,
    pub is_defect: bool,
}

pub fn classify_nail(outcome: &DetectionOutcome) -> NailVerdict {
    let count = outcome.boxes.len();
    NailVerdict {
        count,
        is_defect: count > 0,
    }
}

/// Calibration and tolerance for board measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementSpec {
    pub pixels_to_mm: f64,
    pub target_mm: f64,
    pub threshold_mm: f64,
}

impl From<&MeasurementSettings> for MeasurementSpec {
    fn from(s: &MeasurementSettings) -> Self {
        Self {
            pixels_to_mm: s.pixels_to_mm,
            target_mm: s.target_measurement_mm,
            threshold_mm: s.measurement_threshold_mm,
        }
    }
}

impl MeasurementSpec {
    /// Caption drawn under a measured board, e.g. "Target: 20mm ±5mm"
    pub fn caption(&self) -> String {
        format!("Target: {}mm ±{}mm", self.target_mm, self.threshold_mm)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardMeasurement {
    /// Leftmost box by `x1`
    pub first: BoundingBox,
    /// Rightmost box by `x1`
    pub last: BoundingBox,
    pub right_px: i32,
    pub left_px: i32,
    pub right_mm: f64,
    pub left_mm: f64,
    /// Mean of `right_mm` and `left_mm`
    pub measurement_mm: f64,
    pub deviation_mm: f64,
    pub is_defect: bool,
}

impl BoardMeasurement {
    /// Row the reference lines are drawn on
    pub fn y_level(&self) -> i32 {
        self.first.y2.min(self.last.y2)
    }

    pub fn details(&self, spec: &MeasurementSpec) -> String {
        format!(
            "Measurement {:.1}mm outside tolerance of {}mm ±{}mm",
            self.measurement_mm, spec.target_mm, spec.threshold_mm
        )
    }
}

/// Measure a board, or `None` when fewer than two boxes were found
pub fn measure_board(boxes: &[BoundingBox], spec: &MeasurementSpec) -> Option<BoardMeasurement> {
    if boxes.len() < detection::MIN_BOARD_BOXES {
        return None;
    }

    // Stable: boxes sharing an x1 keep detector order
    let mut sorted: Vec<&BoundingBox> = boxes.iter().collect();
    sorted.sort_by_key(|b| b.x1);
    let first = sorted[0];
    let last = sorted[sorted.len() - 1];

    let right_px = last.x2 - first.x2;
    let left_px = last.x1 - first.x1;
    let right_mm = right_px as f64 * spec.pixels_to_mm;
    let left_mm = left_px as f64 * spec.pixels_to_mm;
    let measurement_mm = (right_mm + left_mm) / 2.0;
    let deviation_mm = (measurement_mm - spec.target_mm).abs();

    Some(BoardMeasurement {
        first: first.clone(),
        last: last.clone(),
        right_px,
        left_px,
        right_mm,
        left_mm,
        measurement_mm,
        deviation_mm,
        is_defect: deviation_mm > spec.threshold_mm,
    })
}

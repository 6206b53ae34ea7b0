//! Core data types for Flexline
//!
//! Frames, detection results, fault records and the identifiers that tie them to slots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use image::{imageops, GrayImage, ImageBuffer, Rgb, RgbImage};

use crate::constants::storage;
use fl_error::{FlexlineError, Result};

/// Which detector, and which defect rule, a camera feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorClass {
    /// Presence check on a self-timed camera
    Nail,
    /// Geometric alignment check on a hardware-triggered camera
    Board,
}

impl DetectorClass {
    pub const ALL: [DetectorClass; 2] = [DetectorClass::Board, DetectorClass::Nail];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nail => "nail",
            Self::Board => "board",
        }
    }
}

impl fmt::Display for DetectorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capture position: class plus index within that class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId {
    pub class: DetectorClass,
    pub index: usize,
}

impl SlotId {
    pub fn new(class: DetectorClass, index: usize) -> Self {
        Self { class, index }
    }

    /// One-based number used in fault records and operator messages
    pub fn image_number(&self) -> u32 {
        self.index as u32 + 1
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.class, self.index)
    }
}

/// Sensor pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGGB mosaic straight off the sensor
    BayerRG8,
    Mono8,
    Rgb8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            Self::BayerRG8 | Self::Mono8 => 1,
            Self::Rgb8 => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BayerRG8 => "BayerRG8",
            Self::Mono8 => "Mono8",
            Self::Rgb8 => "RGB8",
        }
    }
}

impl FromStr for PixelFormat {
    type Err = FlexlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BayerRG8" => Ok(Self::BayerRG8),
            "Mono8" => Ok(Self::Mono8),
            "RGB8" | "RGB8Packed" => Ok(Self::Rgb8),
            other => Err(FlexlineError::NotSupported(format!("pixel format {}", other))),
        }
    }
}

/// A decoded camera image owned outright by whoever holds it
///
/// Cloning copies the pixel buffer, so a frame handed to another thread never
/// aliases the buffer a worker keeps writing into.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(FlexlineError::GrabFailure(format!(
                "buffer holds {} bytes, {}x{} {} needs {}",
                data.len(),
                width,
                height,
                format.as_str(),
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Uniform frame filled with one value, mostly for simulation and tests
    pub fn filled(width: u32, height: u32, format: PixelFormat, value: u8) -> Self {
        let len = width as usize * height as usize * format.channels();
        Self {
            width,
            height,
            format,
            data: vec![value; len],
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bilinear resize to `(width, height)`; returns a clone if already that size
    pub fn resized(&self, (width, height): (u32, u32)) -> Result<Frame> {
        if self.dimensions() == (width, height) {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(FlexlineError::InvalidConfig {
                field: "nail_camera_resolution".into(),
                reason: format!("{}x{} is not a valid size", width, height),
            });
        }

        let data = match self.format.channels() {
            1 => {
                let src = GrayImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or_else(|| FlexlineError::GrabFailure("malformed frame buffer".into()))?;
                imageops::resize(&src, width, height, imageops::FilterType::Triangle).into_raw()
            }
            _ => {
                let src = RgbImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or_else(|| FlexlineError::GrabFailure("malformed frame buffer".into()))?;
                imageops::resize(&src, width, height, imageops::FilterType::Triangle).into_raw()
            }
        };

        Ok(Frame {
            width,
            height,
            format: self.format,
            data,
            timestamp_ms: self.timestamp_ms,
        })
    }

    /// Convert to an RGB image for display or annotation
    ///
    /// Bayer frames get a nearest-neighbour demosaic over each 2x2 RGGB cell.
    pub fn to_rgb_image(&self) -> RgbImage {
        match self.format {
            PixelFormat::Rgb8 => {
                RgbImage::from_raw(self.width, self.height, self.data.clone())
                    .unwrap_or_else(|| RgbImage::new(self.width, self.height))
            }
            PixelFormat::Mono8 => ImageBuffer::from_fn(self.width, self.height, |x, y| {
                let v = self.data[(y * self.width + x) as usize];
                Rgb([v, v, v])
            }),
            PixelFormat::BayerRG8 => {
                let w = self.width;
                let h = self.height;
                let at = |x: u32, y: u32| self.data[(y.min(h - 1) * w + x.min(w - 1)) as usize];
                ImageBuffer::from_fn(w, h, |x, y| {
                    let cx = x & !1;
                    let cy = y & !1;
                    let r = at(cx, cy);
                    let g1 = at(cx + 1, cy) as u16;
                    let g2 = at(cx, cy + 1) as u16;
                    let b = at(cx + 1, cy + 1);
                    Rgb([r, ((g1 + g2) / 2) as u8, b])
                })
            }
        }
    }
}

/// One detected object in pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    /// Score in [0, 1]
    pub confidence: f32,
    pub class_name: String,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32, class_name: impl Into<String>) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_name: class_name.into(),
        }
    }

    /// Label drawn next to the box, e.g. "nail 0.87"
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.class_name, self.confidence)
    }
}

/// Detector output for a single image
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub boxes: Vec<BoundingBox>,
    pub detector_class: DetectorClass,
    pub elapsed: Duration,
}

/// Result of one dispatch, paired index-for-index with `slot_indices`
///
/// `None` entries mark images the detector could not process.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBatch {
    pub outcomes: Vec<Option<DetectionOutcome>>,
    pub detector_class: DetectorClass,
    pub slot_indices: Vec<usize>,
    pub elapsed: Duration,
}

impl DetectionBatch {
    /// Batch with no usable outcome for any slot
    pub fn failed(detector_class: DetectorClass, slot_indices: Vec<usize>) -> Self {
        Self {
            outcomes: vec![None; slot_indices.len()],
            detector_class,
            slot_indices,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcomes.iter().all(Option::is_none)
    }
}

/// Category stored in the `fault_type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultType {
    #[serde(rename = "Nail")]
    Nail,
    #[serde(rename = "Board Alignment")]
    BoardAlignment,
}

impl FaultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nail => storage::FAULT_NAIL,
            Self::BoardAlignment => storage::FAULT_BOARD_ALIGNMENT,
        }
    }

    pub fn for_class(class: DetectorClass) -> Self {
        match class {
            DetectorClass::Nail => Self::Nail,
            DetectorClass::Board => Self::BoardAlignment,
        }
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultType {
    type Err = FlexlineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(storage::FAULT_NAIL) {
            Ok(Self::Nail)
        } else if s.eq_ignore_ascii_case(storage::FAULT_BOARD_ALIGNMENT) {
            Ok(Self::BoardAlignment)
        } else {
            Err(FlexlineError::InvalidConfig {
                field: "fault_type".into(),
                reason: format!("unknown fault type '{}'", s),
            })
        }
    }
}

/// One persisted defect event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Assigned by the store; `None` before insertion
    pub id: Option<i64>,
    /// Local time formatted as `%Y-%m-%d %H:%M:%S`
    pub timestamp: String,
    pub fault_type: FaultType,
    /// One-based slot number
    pub image_index: u32,
    pub details: String,
    pub measurement_mm: Option<f64>,
}

impl FaultRecord {
    /// New record stamped with the current local time
    pub fn now(fault_type: FaultType, image_index: u32, details: impl Into<String>, measurement_mm: Option<f64>) -> Self {
        Self {
            id: None,
            timestamp: chrono::Local::now().format(storage::TIMESTAMP_FORMAT).to_string(),
            fault_type,
            image_index,
            details: details.into(),
            measurement_mm,
        }
    }
}

/// Filters for a fault history query; whole days, inclusive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultQuery {
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    /// `None` means every type
    pub fault_type: Option<FaultType>,
}

/// Counts over a set of fault records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FaultStatistics {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
}

impl FaultStatistics {
    pub fn from_records(records: &[FaultRecord]) -> Self {
        let mut by_type = BTreeMap::new();
        for record in records {
            *by_type.entry(record.fault_type.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            total: records.len(),
            by_type,
        }
    }

    pub fn count(&self, fault_type: FaultType) -> usize {
        self.by_type.get(fault_type.as_str()).copied().unwrap_or(0)
    }

    pub fn nail(&self) -> usize {
        self.count(FaultType::Nail)
    }

    pub fn board(&self) -> usize {
        self.count(FaultType::BoardAlignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clone_does_not_alias() {
        let original = Frame::filled(4, 4, PixelFormat::Mono8, 7);
        let mut copy = original.clone();
        copy.data[0] = 200;
        assert_eq!(original.data[0], 7);
        assert_ne!(original.data.as_ptr(), copy.data.as_ptr());
    }

    #[test]
    fn test_frame_rejects_short_buffer() {
        assert!(Frame::new(4, 4, PixelFormat::Rgb8, vec![0; 16]).is_err());
        assert!(Frame::new(4, 4, PixelFormat::Rgb8, vec![0; 48]).is_ok());
    }

    #[test]
    fn test_resize_changes_dimensions() {
        let frame = Frame::filled(1920, 1200, PixelFormat::BayerRG8, 128);
        let small = frame.resized((960, 960)).unwrap();
        assert_eq!(small.dimensions(), (960, 960));
        assert_eq!(small.data.len(), 960 * 960);
        assert_eq!(small.data[0], 128);
        assert_eq!(small.timestamp_ms, frame.timestamp_ms);
    }

    #[test]
    fn test_resize_same_size_is_copy() {
        let frame = Frame::filled(8, 8, PixelFormat::Rgb8, 3);
        assert_eq!(frame.resized((8, 8)).unwrap(), frame);
    }

    #[test]
    fn test_bayer_demosaic() {
        // RGGB cell: R=200, G=100/100, B=50
        let frame = Frame::new(2, 2, PixelFormat::BayerRG8, vec![200, 100, 100, 50]).unwrap();
        let rgb = frame.to_rgb_image();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([200, 100, 50]));
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([200, 100, 50]));
    }

    #[test]
    fn test_fault_type_strings() {
        assert_eq!(FaultType::BoardAlignment.to_string(), "Board Alignment");
        assert_eq!("Nail".parse::<FaultType>().unwrap(), FaultType::Nail);
        assert_eq!("board alignment".parse::<FaultType>().unwrap(), FaultType::BoardAlignment);
        assert!("All".parse::<FaultType>().is_err());
    }

    #[test]
    fn test_statistics_counts() {
        let records = vec![
            FaultRecord::now(FaultType::Nail, 1, "Detected 2 nails", None),
            FaultRecord::now(FaultType::Nail, 2, "Detected 1 nails", None),
            FaultRecord::now(FaultType::BoardAlignment, 1, "off", Some(12.5)),
        ];
        let stats = FaultStatistics::from_records(&records);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.nail(), 2);
        assert_eq!(stats.board(), 1);
    }

    #[test]
    fn test_failed_batch() {
        let batch = DetectionBatch::failed(DetectorClass::Board, vec![0, 1]);
        assert_eq!(batch.outcomes.len(), 2);
        assert!(batch.is_failed());
        assert_eq!(batch.elapsed, Duration::ZERO);
    }

    #[test]
    fn test_slot_image_number() {
        assert_eq!(SlotId::new(DetectorClass::Nail, 1).image_number(), 2);
        assert_eq!(SlotId::new(DetectorClass::Board, 0).to_string(), "board[0]");
    }
}

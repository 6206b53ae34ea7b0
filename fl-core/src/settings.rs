//! Inspection Settings
//!
//! Persistent settings stored as JSON in ~/.config/flexline/settings.json.
//! Every field has a serde default so partial or older files keep loading.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{camera, detection, logging, maintenance, measurement, paths, relay, storage};
use crate::data::DetectorClass;
use fl_error::{FlexlineError, Result};

/// Top-level settings document
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InspectionSettings {
    #[serde(default)]
    pub measurement: MeasurementSettings,

    #[serde(default)]
    pub detection: DetectionSettings,

    #[serde(default)]
    pub camera: CameraSettings,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub maintenance: MaintenanceSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Device serial numbers bound to each slot
    #[serde(default)]
    pub assignments: SlotAssignments,
}

/// Board geometry calibration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementSettings {
    /// Millimetres per pixel
    #[serde(default = "default_pixels_to_mm")]
    pub pixels_to_mm: f64,

    #[serde(default = "default_target_mm")]
    pub target_measurement_mm: f64,

    /// Allowed deviation from the target before a board is flagged
    #[serde(default = "default_threshold_mm")]
    pub measurement_threshold_mm: f64,
}

/// Where inference should run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use an accelerator when the model reports one, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Cuda,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionSettings {
    #[serde(default)]
    pub nail_model_path: Option<PathBuf>,

    #[serde(default)]
    pub board_model_path: Option<PathBuf>,

    #[serde(default = "default_nail_confidence")]
    pub nail_confidence: f32,

    #[serde(default = "default_board_confidence")]
    pub board_confidence: f32,

    #[serde(default)]
    pub device: DevicePreference,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraSettings {
    /// Grab timeout used by both capture strategies
    #[serde(default = "default_grab_timeout")]
    pub board_camera_timeout_ms: u64,

    /// Timed capture period for nail cameras
    #[serde(default = "default_capture_interval")]
    pub nail_camera_interval_ms: u64,

    /// Nail frames are normalised to this (width, height)
    #[serde(default = "default_nail_resolution")]
    pub nail_camera_resolution: (u32, u32),

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_restart_settle")]
    pub restart_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySettings {
    #[serde(default = "default_relay_port")]
    pub port: String,

    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    /// Pulse length in seconds
    #[serde(default = "default_trigger_duration")]
    pub trigger_duration_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceSettings {
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// Filter directive, e.g. "info" or "fl_core=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// Serial numbers assigned to slots; `None` leaves a slot idle
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SlotAssignments {
    #[serde(default)]
    pub board: [Option<String>; camera::SLOTS_PER_CLASS],

    #[serde(default)]
    pub nail: [Option<String>; camera::SLOTS_PER_CLASS],
}

impl SlotAssignments {
    pub fn for_class(&self, class: DetectorClass) -> &[Option<String>; camera::SLOTS_PER_CLASS] {
        match class {
            DetectorClass::Board => &self.board,
            DetectorClass::Nail => &self.nail,
        }
    }

    /// Number of slots with a device assigned
    pub fn assigned_count(&self) -> usize {
        self.board.iter().chain(self.nail.iter()).filter(|s| s.is_some()).count()
    }
}

// Default value functions
fn default_pixels_to_mm() -> f64 { measurement::DEFAULT_PIXELS_TO_MM }
fn default_target_mm() -> f64 { measurement::DEFAULT_TARGET_MM }
fn default_threshold_mm() -> f64 { measurement::DEFAULT_THRESHOLD_MM }
fn default_nail_confidence() -> f32 { detection::DEFAULT_NAIL_CONFIDENCE }
fn default_board_confidence() -> f32 { detection::DEFAULT_BOARD_CONFIDENCE }
fn default_grab_timeout() -> u64 { camera::DEFAULT_GRAB_TIMEOUT_MS }
fn default_capture_interval() -> u64 { camera::DEFAULT_CAPTURE_INTERVAL_MS }
fn default_nail_resolution() -> (u32, u32) { camera::DEFAULT_NAIL_RESOLUTION }
fn default_max_retries() -> u32 { camera::DEFAULT_MAX_RETRIES }
fn default_retry_delay() -> u64 { camera::DEFAULT_RETRY_DELAY_MS }
fn default_restart_settle() -> u64 { camera::DEFAULT_RESTART_SETTLE_MS }
fn default_relay_port() -> String { relay::DEFAULT_PORT.to_string() }
fn default_baudrate() -> u32 { relay::DEFAULT_BAUDRATE }
fn default_trigger_duration() -> f64 { relay::DEFAULT_PULSE_SECONDS }
fn default_database_path() -> PathBuf { PathBuf::from(storage::DEFAULT_DATABASE_PATH) }
fn default_cleanup_interval() -> u64 { maintenance::DEFAULT_CLEANUP_INTERVAL_MS }
fn default_log_level() -> String { logging::DEFAULT_LOG_LEVEL.to_string() }
fn default_log_dir() -> PathBuf { PathBuf::from(logging::DEFAULT_LOG_DIR) }

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            pixels_to_mm: default_pixels_to_mm(),
            target_measurement_mm: default_target_mm(),
            measurement_threshold_mm: default_threshold_mm(),
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            nail_model_path: None,
            board_model_path: None,
            nail_confidence: default_nail_confidence(),
            board_confidence: default_board_confidence(),
            device: DevicePreference::Auto,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            board_camera_timeout_ms: default_grab_timeout(),
            nail_camera_interval_ms: default_capture_interval(),
            nail_camera_resolution: default_nail_resolution(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            restart_settle_ms: default_restart_settle(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            baudrate: default_baudrate(),
            trigger_duration_s: default_trigger_duration(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { database_path: default_database_path() }
    }
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self { cleanup_interval_ms: default_cleanup_interval() }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
        }
    }
}

impl CameraSettings {
    pub fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.board_camera_timeout_ms)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.nail_camera_interval_ms)
    }
}

impl MaintenanceSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl InspectionSettings {
    /// Confidence threshold applied to a detector class
    pub fn confidence_for(&self, class: DetectorClass) -> f32 {
        match class {
            DetectorClass::Nail => self.detection.nail_confidence,
            DetectorClass::Board => self.detection.board_confidence,
        }
    }

    pub fn model_path_for(&self, class: DetectorClass) -> Option<&Path> {
        match class {
            DetectorClass::Nail => self.detection.nail_model_path.as_deref(),
            DetectorClass::Board => self.detection.board_model_path.as_deref(),
        }
    }

    /// Collect every problem with the current values
    ///
    /// An empty list means the settings are usable for a production run.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (label, path) in [
            ("Nail", &self.detection.nail_model_path),
            ("Board", &self.detection.board_model_path),
        ] {
            match path {
                None => errors.push(format!("{} model path not set", label)),
                Some(p) if !p.exists() => {
                    errors.push(format!("{} model file not found: {}", label, p.display()))
                }
                Some(_) => {}
            }
        }

        if self.measurement.pixels_to_mm <= 0.0 {
            errors.push("Pixels to mm ratio must be positive".to_string());
        }

        if self.measurement.measurement_threshold_mm <= 0.0 {
            errors.push("Measurement threshold must be positive".to_string());
        }

        for (label, conf) in [
            ("Nail", self.detection.nail_confidence),
            ("Board", self.detection.board_confidence),
        ] {
            if !(0.0..=1.0).contains(&conf) {
                errors.push(format!("{} confidence must be between 0 and 1", label));
            }
        }

        if self.camera.nail_camera_interval_ms == 0 {
            errors.push("Nail camera interval must be greater than zero".to_string());
        }

        errors
    }
}

/// Get the default settings file path, creating the config directory if needed
pub fn get_settings_path() -> Result<PathBuf> {
    let dir = paths::user_config_dir()
        .ok_or_else(|| FlexlineError::config("Could not determine config directory"))?;

    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| {
            FlexlineError::config(format!("Failed to create config directory: {}", e))
        })?;
    }

    Ok(dir.join(paths::SETTINGS_FILE))
}

/// Load settings from an explicit path, returning defaults if the file is absent
pub fn load_settings_from(path: &Path) -> Result<InspectionSettings> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No settings file, using defaults");
        return Ok(InspectionSettings::default());
    }

    let content = fs::read_to_string(path).map_err(|source| FlexlineError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let settings: InspectionSettings = serde_json::from_str(&content)?;
    Ok(settings)
}

/// Load settings from the default location
pub fn load_settings() -> Result<InspectionSettings> {
    load_settings_from(&get_settings_path()?)
}

/// Save settings to an explicit path
///
/// Writes to a sibling temp file and renames it over the target.
pub fn save_settings_to(settings: &InspectionSettings, path: &Path) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|source| FlexlineError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let json = serde_json::to_string_pretty(settings)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path).map_err(|source| FlexlineError::FileWrite {
        path: temp_path.clone(),
        source,
    })?;
    file.write_all(json.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|source| FlexlineError::FileWrite {
            path: temp_path.clone(),
            source,
        })?;

    fs::rename(&temp_path, path).map_err(|source| FlexlineError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), "Settings saved");
    Ok(())
}

/// Save settings to the default location
pub fn save_settings(settings: &InspectionSettings) -> Result<()> {
    save_settings_to(settings, &get_settings_path()?)
}

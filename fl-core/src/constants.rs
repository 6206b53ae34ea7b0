//! Constants and configuration values for Flexline
//!
//! Centralizes camera parameter names, relay command frames, storage formats and
//! the defaults used when a settings file is missing or incomplete.

use std::time::Duration;

/// Configuration paths
pub mod paths {
    /// Directory name under the user's config dir
    pub const CONFIG_DIR_NAME: &str = "flexline";

    /// Settings file name
    pub const SETTINGS_FILE: &str = "settings.json";

    /// User configuration directory
    ///
    /// Honours `XDG_CONFIG_HOME` first, then `HOME/.config`, then the platform default.
    pub fn user_config_dir() -> Option<std::path::PathBuf> {
        let base = if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            Some(std::path::PathBuf::from(xdg))
        } else if let Ok(home) = std::env::var("HOME") {
            Some(std::path::PathBuf::from(home).join(".config"))
        } else {
            dirs::config_dir()
        };

        base.map(|p| p.join(CONFIG_DIR_NAME))
    }
}

/// Camera SDK parameter names and values (GenICam naming)
pub mod camera {
    use super::Duration;

    pub const PARAM_PIXEL_FORMAT: &str = "PixelFormat";
    pub const PARAM_WIDTH: &str = "Width";
    pub const PARAM_HEIGHT: &str = "Height";
    pub const PARAM_TRIGGER_MODE: &str = "TriggerMode";
    pub const PARAM_TRIGGER_SOURCE: &str = "TriggerSource";
    pub const PARAM_TRIGGER_SELECTOR: &str = "TriggerSelector";
    pub const PARAM_TRIGGER_ACTIVATION: &str = "TriggerActivation";
    pub const PARAM_ACQUISITION_MODE: &str = "AcquisitionMode";

    /// Baseline pixel format applied to every enumerated device
    pub const BASELINE_PIXEL_FORMAT: &str = "BayerRG8";

    pub const TRIGGER_ON: &str = "On";
    pub const TRIGGER_OFF: &str = "Off";
    pub const TRIGGER_LINE: &str = "Line1";
    pub const TRIGGER_FRAME_START: &str = "FrameStart";
    pub const TRIGGER_RISING_EDGE: &str = "RisingEdge";
    pub const ACQUISITION_CONTINUOUS: &str = "Continuous";

    /// Slots available per detector class
    pub const SLOTS_PER_CLASS: usize = 2;

    /// Grab timeout for triggered and timed retrieval
    pub const DEFAULT_GRAB_TIMEOUT_MS: u64 = 5000;

    /// Timed capture interval
    pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 800;

    /// Nail camera resolution (width, height)
    pub const DEFAULT_NAIL_RESOLUTION: (u32, u32) = (960, 960);

    /// Consecutive grab failures tolerated before a restart
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

    /// Pause between close and reopen during a restart
    pub const DEFAULT_RESTART_SETTLE_MS: u64 = 1000;

    /// Pause after a trigger timeout or loop error to avoid spinning
    pub const IDLE_BACKOFF: Duration = Duration::from_millis(100);
}

/// Detection defaults
pub mod detection {
    pub const DEFAULT_NAIL_CONFIDENCE: f32 = 0.25;
    pub const DEFAULT_BOARD_CONFIDENCE: f32 = 0.5;

    /// Board measurement needs two reference boxes
    pub const MIN_BOARD_BOXES: usize = 2;
}

/// Measurement defaults
pub mod measurement {
    pub const DEFAULT_PIXELS_TO_MM: f64 = 0.1;
    pub const DEFAULT_TARGET_MM: f64 = 0.0;
    pub const DEFAULT_THRESHOLD_MM: f64 = 5.0;
}

/// Relay command frames and serial defaults
pub mod relay {
    /// Turn relay ON: $A0 $01 $01 $A2
    pub const ON_FRAME: [u8; 4] = [0xA0, 0x01, 0x01, 0xA2];

    /// Turn relay OFF: $A0 $01 $00 $A1
    pub const OFF_FRAME: [u8; 4] = [0xA0, 0x01, 0x00, 0xA1];

    #[cfg(windows)]
    pub const DEFAULT_PORT: &str = "COM4";

    #[cfg(not(windows))]
    pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

    pub const DEFAULT_BAUDRATE: u32 = 9600;

    pub const DEFAULT_PULSE_SECONDS: f64 = 0.5;

    /// Serial write timeout
    pub const WRITE_TIMEOUT_MS: u64 = 1000;
}

/// Fault storage
pub mod storage {
    pub const DEFAULT_DATABASE_PATH: &str = "faults.db";

    /// Timestamp format stored in the `timestamp` column
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    /// Date format accepted by query filters
    pub const DATE_FORMAT: &str = "%Y-%m-%d";

    pub const CSV_HEADER: [&str; 5] = ["Timestamp", "Type", "Image", "Details", "Measurement"];

    /// Fault type labels
    pub const FAULT_NAIL: &str = "Nail";
    pub const FAULT_BOARD_ALIGNMENT: &str = "Board Alignment";

    /// Query filter value meaning "no type filter"
    pub const FAULT_TYPE_ALL: &str = "All";
}

/// Housekeeping
pub mod maintenance {
    /// Periodic sweep interval
    pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 300_000;
}

/// Logging defaults
pub mod logging {
    pub const DEFAULT_LOG_LEVEL: &str = "info";
    pub const DEFAULT_LOG_DIR: &str = "logs";
    pub const LOG_FILE_PREFIX: &str = "camera_operations";
}

/// Overlay drawing
pub mod overlay {
    pub const DEFECT_BORDER_THICKNESS: u32 = 5;
    pub const BOX_THICKNESS: u32 = 2;
    pub const LINE_THICKNESS: u32 = 2;
    pub const DEFECT_LABEL: &str = "DEFECT";
    pub const DEFECT_LABEL_POS: (i32, i32) = (10, 30);
    /// Label offsets above boxes and reference lines
    pub const BOX_LABEL_OFFSET: i32 = 5;
    pub const LINE_LABEL_OFFSET: i32 = 10;
    /// Caption distance from the bottom edge
    pub const CAPTION_MARGIN: i32 = 10;
}

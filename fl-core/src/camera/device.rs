//! Camera SDK boundary
//!
//! Everything the acquisition path needs from a vendor SDK, expressed as two traits:
//! [`CameraBackend`] enumerates devices and [`CameraDevice`] drives one of them.
//! Parameter names follow GenICam (`PixelFormat`, `TriggerMode`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::data::Frame;
use fl_error::Result;

/// Identity reported by a device during enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model_name: String,
    pub serial_number: String,
    pub vendor_name: String,
    pub device_id: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.model_name, self.serial_number)
    }
}

/// Value written to or read from a named node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Enum(String),
    Int(i64),
}

impl ParameterValue {
    pub fn enumeration(value: &str) -> Self {
        Self::Enum(value.to_string())
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enum(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{}", i),
        }
    }
}

/// Buffering strategy passed to `start_grabbing`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStrategy {
    /// Keep only the newest unconsumed frame
    LatestImageOnly,
    OneByOne,
}

/// Outcome of one `retrieve` call
///
/// The SDK result buffer is released once this value is produced; a
/// `Succeeded` frame is an owned copy.
#[derive(Debug, Clone, PartialEq)]
pub enum GrabResult {
    Succeeded(Frame),
    TimedOut,
    Failed(String),
}

/// One physical camera
///
/// Implementations are moved between threads but only ever used from one at a time.
pub trait CameraDevice: Send {
    fn info(&self) -> &DeviceInfo;

    fn open(&mut self) -> Result<()>;

    /// Close the device; closing a closed device is a no-op
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn set_parameter(&mut self, name: &str, value: ParameterValue) -> Result<()>;

    fn get_parameter(&self, name: &str) -> Result<ParameterValue>;

    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<()>;

    /// Stop grabbing; a no-op when not grabbing
    fn stop_grabbing(&mut self);

    fn is_grabbing(&self) -> bool;

    /// Wait up to `timeout` for the next frame
    fn retrieve(&mut self, timeout: Duration) -> GrabResult;
}

/// Owned, type-erased device handle as held by the pool and the workers
pub type DeviceHandle = Box<dyn CameraDevice>;

/// Device discovery
pub trait CameraBackend: Send {
    /// Unopened handles for every device currently attached
    fn enumerate(&mut self) -> Result<Vec<DeviceHandle>>;
}

/// Apply a list of parameters in order, stopping at the first rejection
pub(crate) fn apply_parameters(device: &mut dyn CameraDevice, params: &[(&str, ParameterValue)]) -> Result<()> {
    for (name, value) in params {
        device.set_parameter(name, value.clone())?;
    }
    Ok(())
}

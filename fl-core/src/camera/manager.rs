//! Acquisition manager: device pool and slot exclusivity
//!
//! Devices are enumerated, opened and given the baseline pixel format once; the
//! ones that accept it join the pool. A slot claims a device by serial number and
//! holds the only handle until it releases it again.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use crate::camera::device::{CameraBackend, CameraDevice, DeviceHandle, DeviceInfo, ParameterValue};
use crate::constants::camera;
use crate::data::DetectorClass;
use fl_error::{FlexlineError, Result};

struct PooledDevice {
    info: DeviceInfo,
    /// `None` while a slot holds the device
    handle: Option<DeviceHandle>,
}

pub struct AcquisitionManager {
    backend: Box<dyn CameraBackend>,
    pool: Vec<PooledDevice>,
    in_use: HashSet<String>,
}

impl AcquisitionManager {
    pub fn new(backend: Box<dyn CameraBackend>) -> Self {
        Self {
            backend,
            pool: Vec::new(),
            in_use: HashSet::new(),
        }
    }

    /// Enumerate devices and add newly seen ones to the pool
    ///
    /// A device that fails to open or configure is logged and skipped.
    /// Returns how many devices were added.
    pub fn initialize(&mut self) -> Result<usize> {
        let found = self.backend.enumerate()?;
        info!("Found {} camera(s)", found.len());

        let mut added = 0;
        for mut device in found {
            let info = device.info().clone();
            if self.pool.iter().any(|p| p.info.serial_number == info.serial_number) {
                debug!(serial = %info.serial_number, "Camera already pooled");
                continue;
            }

            let prepared = device.open().and_then(|_| {
                device.set_parameter(
                    camera::PARAM_PIXEL_FORMAT,
                    ParameterValue::enumeration(camera::BASELINE_PIXEL_FORMAT),
                )
            });

            match prepared {
                Ok(()) => {
                    info!(model = %info.model_name, serial = %info.serial_number, "Camera initialized");
                    self.pool.push(PooledDevice {
                        info,
                        handle: Some(device),
                    });
                    added += 1;
                }
                Err(e) => {
                    error!(serial = %info.serial_number, "Failed to initialize camera: {}", e);
                    device.close();
                }
            }
        }
        Ok(added)
    }

    /// Pooled devices not currently claimed
    pub fn list_available(&self) -> Vec<DeviceInfo> {
        self.pool
            .iter()
            .filter(|p| !self.in_use.contains(&p.info.serial_number))
            .map(|p| p.info.clone())
            .collect()
    }

    /// Every pooled device, claimed or not
    pub fn list_all(&self) -> Vec<DeviceInfo> {
        self.pool.iter().map(|p| p.info.clone()).collect()
    }

    pub fn is_in_use(&self, serial: &str) -> bool {
        self.in_use.contains(serial)
    }

    /// Take exclusive ownership of a pooled device
    pub fn claim(&mut self, serial: &str) -> Result<DeviceHandle> {
        if self.in_use.contains(serial) {
            warn!(serial, "Camera is already in use by another slot");
            return Err(FlexlineError::DeviceInUse(serial.to_string()));
        }

        let entry = self
            .pool
            .iter_mut()
            .find(|p| p.info.serial_number == serial)
            .ok_or_else(|| FlexlineError::DeviceNotFound(serial.to_string()))?;

        let handle = entry
            .handle
            .take()
            .ok_or_else(|| FlexlineError::DeviceInUse(serial.to_string()))?;

        self.in_use.insert(serial.to_string());
        debug!(serial, "Camera claimed");
        Ok(handle)
    }

    /// Give a claimed device back to the pool
    pub fn release(&mut self, handle: DeviceHandle) {
        let serial = handle.info().serial_number.clone();
        self.in_use.remove(&serial);

        match self.pool.iter_mut().find(|p| p.info.serial_number == serial) {
            Some(entry) => entry.handle = Some(handle),
            None => {
                // Pool was cleared while the device was out
                let mut handle = handle;
                handle.close();
            }
        }
        debug!(serial = %serial, "Camera released");
    }

    /// Drop the claim on a device whose handle was lost
    pub fn forget(&mut self, serial: &str) {
        if self.in_use.remove(serial) {
            warn!(serial, "Camera handle lost, removing from pool");
            self.pool.retain(|p| p.info.serial_number != serial);
        }
    }

    /// Close and drop every pooled device; safe to call more than once
    pub fn release_all(&mut self) {
        if self.pool.is_empty() && self.in_use.is_empty() {
            return;
        }
        for entry in self.pool.iter_mut() {
            if let Some(handle) = entry.handle.as_mut() {
                handle.stop_grabbing();
                handle.close();
            }
        }
        info!("Released {} camera(s)", self.pool.len());
        self.pool.clear();
        self.in_use.clear();
    }

    /// Apply per-class settings to a claimed device
    ///
    /// Nail cameras also get the requested resolution; a rejected width or height
    /// is only a warning because frames are resized afterwards anyway.
    pub fn configure_for_class(
        device: &mut dyn CameraDevice,
        class: DetectorClass,
        resolution: Option<(u32, u32)>,
    ) -> Result<()> {
        device.set_parameter(
            camera::PARAM_PIXEL_FORMAT,
            ParameterValue::enumeration(camera::BASELINE_PIXEL_FORMAT),
        )?;

        if class == DetectorClass::Nail {
            if let Some((width, height)) = resolution {
                let sized = device
                    .set_parameter(camera::PARAM_WIDTH, ParameterValue::Int(width as i64))
                    .and_then(|_| device.set_parameter(camera::PARAM_HEIGHT, ParameterValue::Int(height as i64)));
                if let Err(e) = sized {
                    warn!(serial = %device.info().serial_number, "Could not set resolution {}x{}: {}", width, height, e);
                }
            }
        }

        debug!(serial = %device.info().serial_number, class = %class, "Camera configured for class");
        Ok(())
    }
}

impl Drop for AcquisitionManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

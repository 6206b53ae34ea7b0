//! Self-timed capture
//!
//! No thread of its own: the aggregation loop asks for [`next_deadline`] and calls
//! [`poll`] when it passes. Each tick grabs one frame; failures are reported and
//! the next tick simply tries again.
//!
//! [`next_deadline`]: CaptureStrategy::next_deadline
//! [`poll`]: CaptureStrategy::poll

use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::camera::device::{apply_parameters, CameraDevice, DeviceHandle, GrabResult, GrabStrategy, ParameterValue};
use crate::camera::retry::WorkerState;
use crate::camera::strategy::{CaptureStrategy, EventSink};
use crate::constants::camera;
use crate::data::{Frame, SlotId};
use fl_error::{FlexlineError, Result};

/// Free-running acquisition: trigger off, continuous mode
pub fn configure_timed(device: &mut dyn CameraDevice) -> Result<()> {
    apply_parameters(
        device,
        &[
            (camera::PARAM_TRIGGER_MODE, ParameterValue::enumeration(camera::TRIGGER_OFF)),
            (camera::PARAM_ACQUISITION_MODE, ParameterValue::enumeration(camera::ACQUISITION_CONTINUOUS)),
        ],
    )
}

pub struct TimedWorker {
    slot: SlotId,
    interval: Duration,
    timeout: Duration,
    sink: EventSink,
    device: Option<DeviceHandle>,
    state: WorkerState,
    next_tick: Option<Instant>,
    last_frame: Option<Frame>,
}

impl TimedWorker {
    pub fn new(slot: SlotId, device: DeviceHandle, interval: Duration, timeout: Duration, sink: EventSink) -> Self {
        Self {
            slot,
            interval: interval.max(Duration::from_millis(1)),
            timeout,
            sink,
            device: Some(device),
            state: WorkerState::Idle,
            next_tick: None,
            last_frame: None,
        }
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    /// Grab and emit a single frame
    pub fn tick(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if !device.is_open() {
            return;
        }

        match device.retrieve(self.timeout) {
            GrabResult::Succeeded(frame) => {
                debug!(slot = %self.slot, width = frame.width, height = frame.height, "Captured frame");
                let copy = frame.clone();
                self.last_frame = Some(frame);
                self.sink.frame_ready(self.slot, copy);
            }
            GrabResult::TimedOut => {
                let timeout_ms = self.timeout.as_millis() as u64;
                let message = format!("Error grabbing frame: {}", FlexlineError::GrabTimeout { timeout_ms });
                error!(slot = %self.slot, "{}", message);
                self.sink.camera_error(self.slot, message, false);
            }
            GrabResult::Failed(reason) => {
                let message = FlexlineError::GrabFailure(reason).to_string();
                error!(slot = %self.slot, "{}", message);
                self.sink.camera_error(self.slot, message, false);
            }
        }
    }
}

impl CaptureStrategy for TimedWorker {
    fn slot(&self) -> SlotId {
        self.slot
    }

    fn start(&mut self) -> Result<()> {
        if self.next_tick.is_some() {
            return Err(FlexlineError::SlotBusy(self.slot.to_string()));
        }
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| FlexlineError::DeviceNotFound(self.slot.to_string()))?;

        info!(slot = %self.slot, "Starting timed camera");
        self.state = WorkerState::Opening;
        let result = (|| {
            if !device.is_open() {
                device.open()?;
            }
            self.state = WorkerState::Configuring;
            configure_timed(device.as_mut())?;
            device.start_grabbing(GrabStrategy::LatestImageOnly)
        })();

        if let Err(e) = result {
            device.stop_grabbing();
            device.close();
            self.state = WorkerState::Stopped;
            return Err(e);
        }

        self.state = WorkerState::Grabbing;
        self.next_tick = Some(Instant::now() + self.interval);
        info!(slot = %self.slot, interval_ms = self.interval.as_millis() as u64, "Camera timer started");
        Ok(())
    }

    fn stop(&mut self) -> Option<DeviceHandle> {
        self.next_tick = None;
        self.last_frame = None;
        let mut device = self.device.take()?;
        info!(slot = %self.slot, "Stopping timed camera");
        device.stop_grabbing();
        device.close();
        self.state = WorkerState::Stopped;
        Some(device)
    }

    fn state(&self) -> WorkerState {
        self.state
    }

    fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    fn poll(&mut self, now: Instant) {
        let Some(due) = self.next_tick else {
            return;
        };
        if now < due {
            return;
        }

        self.tick();

        // Missed ticks are skipped rather than replayed
        let mut next = due + self.interval;
        if next <= now {
            next = now + self.interval;
        }
        if self.next_tick.is_some() {
            self.next_tick = Some(next);
        }
    }
}

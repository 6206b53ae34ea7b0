//! Hardware-triggered capture
//!
//! The worker moves its device into a dedicated thread that blocks on the
//! trigger line. The thread hands the device back when it exits, so stopping
//! the worker always returns ownership to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::camera::device::{apply_parameters, CameraDevice, DeviceHandle, GrabStrategy, ParameterValue};
use crate::camera::retry::{LoopAction, RetryPolicy, RetryState, WorkerState};
use crate::camera::strategy::{sleep_while_running, CaptureStrategy, EventSink};
use crate::constants::camera;
use crate::data::{Frame, SlotId};
use fl_error::{FlexlineError, Result};

/// Put a device into external-trigger mode and start latest-image-only grabbing
pub fn configure_triggered(device: &mut dyn CameraDevice) -> Result<()> {
    let serial = device.info().serial_number.clone();
    apply_parameters(
        device,
        &[
            (camera::PARAM_TRIGGER_MODE, ParameterValue::enumeration(camera::TRIGGER_ON)),
            (camera::PARAM_TRIGGER_SOURCE, ParameterValue::enumeration(camera::TRIGGER_LINE)),
            (camera::PARAM_TRIGGER_SELECTOR, ParameterValue::enumeration(camera::TRIGGER_FRAME_START)),
            (camera::PARAM_TRIGGER_ACTIVATION, ParameterValue::enumeration(camera::TRIGGER_RISING_EDGE)),
            (camera::PARAM_ACQUISITION_MODE, ParameterValue::enumeration(camera::ACQUISITION_CONTINUOUS)),
        ],
    )
    .map_err(|e| match e {
        e @ FlexlineError::Configuration { .. } => e,
        other => FlexlineError::configuration(serial, "trigger", other),
    })?;
    debug!(serial = %device.info().serial_number, "Configured for hardware trigger");
    Ok(())
}

/// Whether the loop should keep going after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Stop,
}

/// Body of the trigger thread: one grab per `step`
///
/// Public so the recovery sequence can be driven step by step without a thread.
pub struct TriggerLoop {
    slot: SlotId,
    device: DeviceHandle,
    timeout: Duration,
    retry: RetryState,
    state: Arc<Mutex<WorkerState>>,
    running: Arc<AtomicBool>,
    sink: EventSink,
    last_frame: Option<Frame>,
}

impl TriggerLoop {
    pub fn new(
        slot: SlotId,
        device: DeviceHandle,
        timeout: Duration,
        policy: RetryPolicy,
        sink: EventSink,
    ) -> Self {
        Self {
            slot,
            device,
            timeout,
            retry: RetryState::new(policy),
            state: Arc::new(Mutex::new(WorkerState::Grabbing)),
            running: Arc::new(AtomicBool::new(true)),
            sink,
            last_frame: None,
        }
    }

    fn with_shared(mut self, state: Arc<Mutex<WorkerState>>, running: Arc<AtomicBool>) -> Self {
        self.state = state;
        self.running = running;
        self
    }

    pub fn retry(&self) -> &RetryState {
        &self.retry
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }

    /// Wait for one trigger and act on the result
    pub fn step(&mut self) -> StepOutcome {
        if !self.device.is_grabbing() {
            self.set_state(WorkerState::Retrying);
            return self.fail("Camera is not grabbing".to_string());
        }

        self.set_state(WorkerState::WaitingForTrigger);
        let result = self.device.retrieve(self.timeout);

        match self.retry.handle(result) {
            LoopAction::Emit(frame) => {
                debug!(slot = %self.slot, width = frame.width, height = frame.height, "Captured frame");
                self.set_state(WorkerState::Grabbing);
                let copy = frame.clone();
                self.last_frame = Some(frame);
                self.sink.frame_ready(self.slot, copy);
                StepOutcome::Continue
            }
            LoopAction::Idle(pause) => {
                debug!(slot = %self.slot, "Grab timed out - waiting for trigger");
                sleep_while_running(&self.running, pause);
                StepOutcome::Continue
            }
            LoopAction::Retry { error, delay } => {
                error!(slot = %self.slot, "{}", error);
                self.sink.camera_error(self.slot, error, false);
                self.set_state(WorkerState::Retrying);
                sleep_while_running(&self.running, delay);
                StepOutcome::Continue
            }
            LoopAction::Restart { error } => {
                error!(slot = %self.slot, "{}", error);
                self.sink.camera_error(self.slot, error, false);
                self.restart()
            }
        }
    }

    // Failure detected outside `retrieve`; counts against the same budget
    fn fail(&mut self, message: String) -> StepOutcome {
        let message = format!("Error in camera loop: {}", message);
        error!(slot = %self.slot, "{}", message);
        self.sink.camera_error(self.slot, message, false);
        if self.retry.on_failure() {
            self.restart()
        } else {
            sleep_while_running(&self.running, self.retry.policy().retry_delay);
            StepOutcome::Continue
        }
    }

    fn restart(&mut self) -> StepOutcome {
        let budget = FlexlineError::RetryBudgetExceeded {
            max_retries: self.retry.policy().max_retries,
        };
        warn!(slot = %self.slot, "{}", budget);
        self.sink.camera_error(self.slot, budget.to_string(), false);
        self.set_state(WorkerState::Restarting);

        self.device.stop_grabbing();
        self.device.close();
        sleep_while_running(&self.running, self.retry.policy().restart_settle);

        let reopened = self
            .device
            .open()
            .and_then(|_| configure_triggered(self.device.as_mut()))
            .and_then(|_| self.device.start_grabbing(GrabStrategy::LatestImageOnly));

        match reopened {
            Ok(()) => {
                self.retry.on_restarted();
                self.set_state(WorkerState::Grabbing);
                info!(slot = %self.slot, "Camera restarted successfully");
                StepOutcome::Continue
            }
            Err(e) => {
                let err = FlexlineError::RestartFailure(e.to_string());
                error!(slot = %self.slot, "{}", err);
                self.sink.camera_error(self.slot, err.to_string(), true);
                self.running.store(false, Ordering::Release);
                self.set_state(WorkerState::Stopped);
                StepOutcome::Stop
            }
        }
    }

    /// Run until the running flag clears or recovery gives up
    pub fn run(mut self) -> DeviceHandle {
        while self.running.load(Ordering::Acquire) {
            if self.step() == StepOutcome::Stop {
                break;
            }
        }
        self.last_frame = None;
        self.device
    }

    pub fn into_device(self) -> DeviceHandle {
        self.device
    }
}

/// Hardware-triggered capture strategy
pub struct TriggeredWorker {
    slot: SlotId,
    timeout: Duration,
    policy: RetryPolicy,
    sink: EventSink,
    device: Option<DeviceHandle>,
    thread: Option<JoinHandle<DeviceHandle>>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<WorkerState>>,
}

impl TriggeredWorker {
    pub fn new(
        slot: SlotId,
        device: DeviceHandle,
        timeout: Duration,
        policy: RetryPolicy,
        sink: EventSink,
    ) -> Self {
        Self {
            slot,
            timeout,
            policy,
            sink,
            device: Some(device),
            thread: None,
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(WorkerState::Idle)),
        }
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }

    fn prepare(&mut self, device: &mut dyn CameraDevice) -> Result<()> {
        self.set_state(WorkerState::Opening);
        if !device.is_open() {
            device.open()?;
        }
        info!(slot = %self.slot, serial = %device.info().serial_number, "Camera opened");

        self.set_state(WorkerState::Configuring);
        configure_triggered(device)?;
        device.start_grabbing(GrabStrategy::LatestImageOnly)?;
        Ok(())
    }
}

impl CaptureStrategy for TriggeredWorker {
    fn slot(&self) -> SlotId {
        self.slot
    }

    fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(FlexlineError::SlotBusy(self.slot.to_string()));
        }
        let mut device = self
            .device
            .take()
            .ok_or_else(|| FlexlineError::DeviceNotFound(self.slot.to_string()))?;

        info!(slot = %self.slot, "Starting hardware triggered camera");
        if let Err(e) = self.prepare(device.as_mut()) {
            device.stop_grabbing();
            device.close();
            self.device = Some(device);
            self.set_state(WorkerState::Stopped);
            return Err(e);
        }

        self.running.store(true, Ordering::Release);
        self.set_state(WorkerState::Grabbing);

        let trigger_loop = TriggerLoop::new(self.slot, device, self.timeout, self.policy, self.sink.clone())
            .with_shared(self.state.clone(), self.running.clone());

        // If the spawn fails the closure (and the device in it) is dropped
        let handle = thread::Builder::new()
            .name(format!("camera-{}", self.slot))
            .spawn(move || trigger_loop.run())
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                self.set_state(WorkerState::Stopped);
                FlexlineError::generic(format!("Failed to spawn camera thread: {}", e))
            })?;

        self.thread = Some(handle);
        info!(slot = %self.slot, "Camera started grabbing");
        Ok(())
    }

    fn stop(&mut self) -> Option<DeviceHandle> {
        self.running.store(false, Ordering::Release);

        if let Some(handle) = self.thread.take() {
            info!(slot = %self.slot, "Stopping hardware triggered camera");
            match handle.join() {
                Ok(device) => self.device = Some(device),
                Err(_) => error!(slot = %self.slot, "Camera thread panicked, device lost"),
            }
        }

        let mut device = self.device.take()?;
        device.stop_grabbing();
        device.close();
        self.set_state(WorkerState::Stopped);
        Some(device)
    }

    fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(self.state() == WorkerState::Stopped, |t| t.is_finished())
    }
}

impl Drop for TriggeredWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop();
        }
    }
}

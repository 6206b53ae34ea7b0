//! Capture strategy interface and the station event channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use crate::camera::device::DeviceHandle;
use crate::camera::retry::{RetryPolicy, WorkerState};
use crate::camera::{TimedWorker, TriggeredWorker};
use crate::data::{DetectionBatch, DetectorClass, Frame, SlotId};
use crate::settings::CameraSettings;
use fl_error::Result;

/// Everything that flows back to the aggregation loop
#[derive(Debug, Clone)]
pub enum StationEvent {
    FrameReady { slot: SlotId, frame: Frame },
    CameraError { slot: SlotId, message: String, fatal: bool },
    DetectionComplete(DetectionBatch),
}

/// Sending half of the station channel, cloned into workers and dispatch tasks
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StationEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<StationEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: StationEvent) {
        if self.tx.send(event).is_err() {
            debug!("Station channel closed, dropping event");
        }
    }

    pub fn frame_ready(&self, slot: SlotId, frame: Frame) {
        self.send(StationEvent::FrameReady { slot, frame });
    }

    pub fn camera_error(&self, slot: SlotId, message: impl Into<String>, fatal: bool) {
        self.send(StationEvent::CameraError {
            slot,
            message: message.into(),
            fatal,
        });
    }

    pub fn detection_complete(&self, batch: DetectionBatch) {
        self.send(StationEvent::DetectionComplete(batch));
    }
}

/// A capture regime bound to one slot and one device
///
/// `stop` is idempotent and hands the device back exactly once.
pub trait CaptureStrategy: Send {
    fn slot(&self) -> SlotId;

    /// Open, configure and begin grabbing
    fn start(&mut self) -> Result<()>;

    /// Stop grabbing, close the device and return it
    fn stop(&mut self) -> Option<DeviceHandle>;

    fn state(&self) -> WorkerState;

    fn is_running(&self) -> bool;

    /// Worker ended on its own (e.g. restart failure) and only needs collecting
    fn is_finished(&self) -> bool {
        self.state() == WorkerState::Stopped
    }

    /// Next time `poll` has work to do, for cooperative strategies
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    /// Run any work due at `now`
    fn poll(&mut self, _now: Instant) {}
}

/// Build the strategy a detector class uses: boards are hardware-triggered, nails timed
pub fn strategy_for(
    slot: SlotId,
    device: DeviceHandle,
    settings: &CameraSettings,
    sink: EventSink,
) -> Box<dyn CaptureStrategy> {
    match slot.class {
        DetectorClass::Board => Box::new(TriggeredWorker::new(
            slot,
            device,
            settings.grab_timeout(),
            RetryPolicy::from_settings(settings),
            sink,
        )),
        DetectorClass::Nail => Box::new(TimedWorker::new(
            slot,
            device,
            settings.capture_interval(),
            settings.grab_timeout(),
            sink,
        )),
    }
}

/// Sleep for `total` in short steps, returning early once `running` clears
pub(crate) fn sleep_while_running(running: &AtomicBool, total: Duration) {
    const STEP: Duration = Duration::from_millis(10);
    let deadline = Instant::now() + total;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(STEP.min(deadline - now));
    }
}

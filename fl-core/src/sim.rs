//! Simulated hardware
//!
//! Deterministic stand-ins for the camera SDK, the detection model and the relay
//! serial line. They back `flexline run --simulate` and the test suites.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::camera::{CameraBackend, CameraDevice, DeviceHandle, DeviceInfo, GrabResult, GrabStrategy, ParameterValue};
use crate::data::{BoundingBox, DetectorClass, Frame, PixelFormat};
use crate::detection::{DetectionModel, ExecutionDevice};
use crate::relay::SerialLink;
use fl_error::{FlexlineError, Result};

/// Frames produced when the script runs dry
#[derive(Debug, Clone, Copy)]
pub struct AutoFrames {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Time between frames; `None` means a frame is always ready
    pub period: Option<Duration>,
}

/// Counters and flags observable from tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub open: bool,
    pub grabbing: bool,
    pub open_count: usize,
    pub close_count: usize,
    pub start_grab_count: usize,
    pub retrieve_count: usize,
}

#[derive(Default)]
struct SimState {
    stats: SimStats,
    params: HashMap<String, ParameterValue>,
    script: VecDeque<GrabResult>,
    rejected: HashSet<String>,
    failing_opens: usize,
    auto: Option<AutoFrames>,
    frame_counter: u8,
}

/// Scriptable camera; clones share state, so tests keep a clone to inspect
#[derive(Clone)]
pub struct SimCamera {
    info: DeviceInfo,
    state: Arc<Mutex<SimState>>,
}

impl SimCamera {
    pub fn new(serial: &str) -> Self {
        Self {
            info: DeviceInfo {
                model_name: "SimCam acA1920".to_string(),
                serial_number: serial.to_string(),
                vendor_name: "Flexline Sim".to_string(),
                device_id: format!("sim://{}", serial),
            },
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Produce frames forever once the script is exhausted
    pub fn with_auto_frames(self, auto: AutoFrames) -> Self {
        self.state.lock().auto = Some(auto);
        self
    }

    /// Queue the result of a future `retrieve`
    pub fn push(&self, result: GrabResult) {
        self.state.lock().script.push_back(result);
    }

    /// Make the next `n` calls to `open` fail
    pub fn fail_next_opens(&self, n: usize) {
        self.state.lock().failing_opens = n;
    }

    /// Make every write of `name` fail
    pub fn reject_parameter(&self, name: &str) {
        self.state.lock().rejected.insert(name.to_string());
    }

    pub fn parameter(&self, name: &str) -> Option<ParameterValue> {
        self.state.lock().params.get(name).cloned()
    }

    pub fn stats(&self) -> SimStats {
        self.state.lock().stats.clone()
    }
}

impl CameraDevice for SimCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(FlexlineError::connection(&self.info.serial_number, "device not reachable"));
        }
        state.stats.open = true;
        state.stats.open_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.stats.open {
            state.stats.open = false;
            state.stats.grabbing = false;
            state.stats.close_count += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().stats.open
    }

    fn set_parameter(&mut self, name: &str, value: ParameterValue) -> Result<()> {
        let mut state = self.state.lock();
        if !state.stats.open {
            return Err(FlexlineError::configuration(&self.info.serial_number, name, "device not open"));
        }
        if state.rejected.contains(name) {
            return Err(FlexlineError::configuration(&self.info.serial_number, name, "node not writable"));
        }
        state.params.insert(name.to_string(), value);
        Ok(())
    }

    fn get_parameter(&self, name: &str) -> Result<ParameterValue> {
        self.state
            .lock()
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| FlexlineError::configuration(&self.info.serial_number, name, "node not set"))
    }

    fn start_grabbing(&mut self, _strategy: GrabStrategy) -> Result<()> {
        let mut state = self.state.lock();
        if !state.stats.open {
            return Err(FlexlineError::configuration(&self.info.serial_number, "StartGrabbing", "device not open"));
        }
        state.stats.grabbing = true;
        state.stats.start_grab_count += 1;
        Ok(())
    }

    fn stop_grabbing(&mut self) {
        self.state.lock().stats.grabbing = false;
    }

    fn is_grabbing(&self) -> bool {
        self.state.lock().stats.grabbing
    }

    fn retrieve(&mut self, timeout: Duration) -> GrabResult {
        let (scripted, auto) = {
            let mut state = self.state.lock();
            state.stats.retrieve_count += 1;
            if !state.stats.grabbing {
                return GrabResult::Failed("Camera is not grabbing".to_string());
            }
            (state.script.pop_front(), state.auto)
        };

        if let Some(result) = scripted {
            return result;
        }

        // Lock is not held while sleeping so tests can inspect mid-wait
        match auto {
            Some(auto) => {
                if let Some(period) = auto.period {
                    if period > timeout {
                        thread::sleep(timeout);
                        return GrabResult::TimedOut;
                    }
                    thread::sleep(period);
                }
                let value = {
                    let mut state = self.state.lock();
                    state.frame_counter = state.frame_counter.wrapping_add(1);
                    state.frame_counter
                };
                GrabResult::Succeeded(Frame::filled(auto.width, auto.height, auto.format, value))
            }
            None => {
                thread::sleep(timeout);
                GrabResult::TimedOut
            }
        }
    }
}

/// Backend that "discovers" a fixed set of simulated cameras
pub struct SimBackend {
    cameras: Vec<SimCamera>,
}

impl SimBackend {
    pub fn new(cameras: Vec<SimCamera>) -> Self {
        Self { cameras }
    }

    /// Two triggered board cameras and two free-running nail cameras
    pub fn line_setup(nail_resolution: (u32, u32)) -> (Self, Vec<SimCamera>) {
        let board = AutoFrames {
            width: 1280,
            height: 960,
            format: PixelFormat::BayerRG8,
            period: Some(Duration::from_millis(1500)),
        };
        let nail = AutoFrames {
            width: nail_resolution.0 * 2,
            height: nail_resolution.1 * 2,
            format: PixelFormat::BayerRG8,
            period: None,
        };
        let cameras = vec![
            SimCamera::new("SIM-BOARD-0").with_auto_frames(board),
            SimCamera::new("SIM-BOARD-1").with_auto_frames(board),
            SimCamera::new("SIM-NAIL-0").with_auto_frames(nail),
            SimCamera::new("SIM-NAIL-1").with_auto_frames(nail),
        ];
        (Self::new(cameras.clone()), cameras)
    }
}

impl CameraBackend for SimBackend {
    fn enumerate(&mut self) -> Result<Vec<DeviceHandle>> {
        Ok(self
            .cameras
            .iter()
            .cloned()
            .map(|c| Box::new(c) as DeviceHandle)
            .collect())
    }
}

#[derive(Debug, Clone)]
enum Behaviour {
    Boxes(Vec<BoundingBox>),
    Fail(String),
    Panic,
}

/// Model that returns the same boxes for every image
pub struct ScriptedModel {
    name: String,
    behaviour: Behaviour,
    calls: AtomicUsize,
    last_confidence: Mutex<Option<f32>>,
}

impl ScriptedModel {
    fn with_behaviour(name: &str, behaviour: Behaviour) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
            calls: AtomicUsize::new(0),
            last_confidence: Mutex::new(None),
        }
    }

    /// Finds nothing
    pub fn empty(name: &str) -> Self {
        Self::with_behaviour(name, Behaviour::Boxes(Vec::new()))
    }

    pub fn with_boxes(name: &str, boxes: Vec<BoundingBox>) -> Self {
        Self::with_behaviour(name, Behaviour::Boxes(boxes))
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self::with_behaviour(name, Behaviour::Fail(message.to_string()))
    }

    pub fn panicking(name: &str) -> Self {
        Self::with_behaviour(name, Behaviour::Panic)
    }

    pub fn from_fixture(class: DetectorClass, fixture: &DetectionFixture) -> Self {
        let boxes = match class {
            DetectorClass::Nail => fixture.nail.clone(),
            DetectorClass::Board => fixture.board.clone(),
        };
        Self::with_boxes(&format!("sim-{}", class), boxes)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_confidence(&self) -> Option<f32> {
        *self.last_confidence.lock()
    }
}

impl DetectionModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> ExecutionDevice {
        ExecutionDevice::Cpu
    }

    fn predict(&self, images: &[Frame], confidence: f32, _device: ExecutionDevice) -> anyhow::Result<Vec<Vec<BoundingBox>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_confidence.lock() = Some(confidence);

        match &self.behaviour {
            Behaviour::Boxes(boxes) => {
                let kept: Vec<BoundingBox> = boxes.iter().filter(|b| b.confidence >= confidence).cloned().collect();
                Ok(vec![kept; images.len()])
            }
            Behaviour::Fail(message) => Err(anyhow::anyhow!(message.clone())),
            Behaviour::Panic => panic!("scripted model panic"),
        }
    }
}

/// Boxes the simulated detectors report, loaded from JSON
///
/// ```json
/// { "nail": [], "board": [{"x1": 10, "y1": 0, "x2": 50, "y2": 100, "confidence": 0.9, "class_name": "edge"}] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionFixture {
    #[serde(default)]
    pub nail: Vec<BoundingBox>,
    #[serde(default)]
    pub board: Vec<BoundingBox>,
}

impl DetectionFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| FlexlineError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Two aligned board edges 20 mm apart at 0.1 mm/px, no nails
    pub fn aligned_board() -> Self {
        Self {
            nail: Vec::new(),
            board: vec![
                BoundingBox::new(10, 0, 50, 100, 0.9, "edge"),
                BoundingBox::new(200, 0, 260, 100, 0.9, "edge"),
            ],
        }
    }
}

/// Serial link that records every frame written
#[derive(Clone, Default)]
pub struct RecordingLink {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }
}

impl SerialLink for RecordingLink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_clones_share_state() {
        let cam = SimCamera::new("s1");
        let mut handle: DeviceHandle = Box::new(cam.clone());
        handle.open().unwrap();
        assert!(cam.stats().open);
        handle.close();
        assert_eq!(cam.stats().close_count, 1);
    }

    #[test]
    fn test_script_then_auto() {
        let cam = SimCamera::new("s1").with_auto_frames(AutoFrames {
            width: 4,
            height: 2,
            format: PixelFormat::Mono8,
            period: None,
        });
        cam.push(GrabResult::TimedOut);
        let mut handle: DeviceHandle = Box::new(cam.clone());
        handle.open().unwrap();
        handle.start_grabbing(GrabStrategy::LatestImageOnly).unwrap();

        assert_eq!(handle.retrieve(Duration::from_millis(1)), GrabResult::TimedOut);
        match handle.retrieve(Duration::from_millis(1)) {
            GrabResult::Succeeded(frame) => assert_eq!(frame.dimensions(), (4, 2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_slow_trigger_times_out() {
        let cam = SimCamera::new("s1").with_auto_frames(AutoFrames {
            width: 2,
            height: 2,
            format: PixelFormat::Mono8,
            period: Some(Duration::from_secs(10)),
        });
        let mut handle: DeviceHandle = Box::new(cam);
        handle.open().unwrap();
        handle.start_grabbing(GrabStrategy::LatestImageOnly).unwrap();
        assert_eq!(handle.retrieve(Duration::from_millis(2)), GrabResult::TimedOut);
    }

    #[test]
    fn test_retrieve_requires_grabbing() {
        let mut handle: DeviceHandle = Box::new(SimCamera::new("s1"));
        handle.open().unwrap();
        assert!(matches!(handle.retrieve(Duration::ZERO), GrabResult::Failed(_)));
    }

    #[test]
    fn test_fixture_load() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string(&DetectionFixture::aligned_board()).unwrap()).unwrap();
        let fixture = DetectionFixture::load(file.path()).unwrap();
        assert_eq!(fixture.board.len(), 2);
        assert!(fixture.nail.is_empty());
    }

    #[test]
    fn test_model_filters_by_confidence() {
        let model = ScriptedModel::with_boxes(
            "nail",
            vec![BoundingBox::new(0, 0, 1, 1, 0.2, "nail"), BoundingBox::new(0, 0, 1, 1, 0.8, "nail")],
        );
        let frames = vec![Frame::filled(2, 2, PixelFormat::Mono8, 0)];
        let out = model.predict(&frames, 0.25, ExecutionDevice::Cpu).unwrap();
        assert_eq!(out[0].len(), 1);
    }
}

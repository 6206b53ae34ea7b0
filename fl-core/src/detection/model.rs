//! Detection model boundary and per-class registry

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::data::{BoundingBox, DetectorClass, Frame};
use crate::settings::{DevicePreference, InspectionSettings};
use fl_error::{FlexlineError, Result};

/// Where a model's weights live and inference runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionDevice {
    Cpu,
    Cuda(usize),
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(i) => write!(f, "cuda:{}", i),
        }
    }
}

/// An object detector
///
/// Shared between the aggregation thread and dispatch tasks, so calls may overlap.
pub trait DetectionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Device the model was bound to when loaded
    fn device(&self) -> ExecutionDevice;

    /// One box list per input image, in input order
    fn predict(
        &self,
        images: &[Frame],
        confidence: f32,
        device: ExecutionDevice,
    ) -> anyhow::Result<Vec<Vec<BoundingBox>>>;
}

/// Loads weights from disk into a [`DetectionModel`]
pub trait ModelLoader {
    fn load(
        &self,
        class: DetectorClass,
        path: &Path,
        device: DevicePreference,
    ) -> Result<Arc<dyn DetectionModel>>;
}

/// Loaded models keyed by detector class
#[derive(Default, Clone)]
pub struct ModelRegistry {
    models: HashMap<DetectorClass, Arc<dyn DetectionModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class: DetectorClass, model: Arc<dyn DetectionModel>) {
        info!(class = %class, model = model.name(), device = %model.device(), "Model registered");
        self.models.insert(class, model);
    }

    pub fn get(&self, class: DetectorClass) -> Option<Arc<dyn DetectionModel>> {
        self.models.get(&class).cloned()
    }

    /// Like [`get`](Self::get) but an error when the class has no model
    pub fn require(&self, class: DetectorClass) -> Result<Arc<dyn DetectionModel>> {
        self.get(class)
            .ok_or_else(|| FlexlineError::ModelNotLoaded(class.to_string()))
    }

    pub fn is_loaded(&self, class: DetectorClass) -> bool {
        self.models.contains_key(&class)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Load every configured model; classes that fail are left empty and reported
    pub fn load_from_settings(&mut self, loader: &dyn ModelLoader, settings: &InspectionSettings) -> Vec<FlexlineError> {
        let mut failures = Vec::new();
        for class in DetectorClass::ALL {
            let Some(path) = settings.model_path_for(class) else {
                warn!(class = %class, "No model path configured");
                failures.push(FlexlineError::ModelNotLoaded(class.to_string()));
                continue;
            };
            match loader.load(class, path, settings.detection.device) {
                Ok(model) => self.insert(class, model),
                Err(e) => {
                    warn!(class = %class, path = %path.display(), "Failed to load model: {}", e);
                    failures.push(e);
                }
            }
        }
        failures
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<_> = self.models.keys().collect();
        classes.sort();
        f.debug_struct("ModelRegistry").field("classes", &classes).finish()
    }
}

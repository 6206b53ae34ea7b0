//! Asynchronous detection dispatch
//!
//! Each capture event becomes one blocking task on the tokio pool. The task runs
//! the model and sends a [`DetectionBatch`] back through the station's event sink,
//! so results always land on the aggregation thread paired with their slot indices.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::camera::EventSink;
use crate::data::{DetectionBatch, DetectionOutcome, DetectorClass, Frame};
use crate::detection::model::DetectionModel;
use fl_error::{FlexlineError, Result};

/// Run one inference batch on the calling thread
///
/// Never fails: a model error, a panic or a short result list all turn into a
/// batch with one `None` per image and zero elapsed time.
pub fn run_batch(
    model: &dyn DetectionModel,
    images: &[Frame],
    detector_class: DetectorClass,
    slot_indices: Vec<usize>,
    confidence: f32,
) -> DetectionBatch {
    let started = Instant::now();
    let device = model.device();

    let result = catch_unwind(AssertUnwindSafe(|| model.predict(images, confidence, device)));

    let boxes = match result {
        Ok(Ok(boxes)) if boxes.len() == images.len() => boxes,
        Ok(Ok(boxes)) => {
            warn!(
                class = %detector_class,
                expected = images.len(),
                got = boxes.len(),
                "Model returned wrong number of results"
            );
            return DetectionBatch::failed(detector_class, slot_indices);
        }
        Ok(Err(e)) => {
            error!(class = %detector_class, "Error in detection: {:#}", e);
            return DetectionBatch::failed(detector_class, slot_indices);
        }
        Err(_) => {
            error!(class = %detector_class, "Detection model panicked");
            return DetectionBatch::failed(detector_class, slot_indices);
        }
    };

    let elapsed = started.elapsed();
    debug!(
        class = %detector_class,
        device = %device,
        images = images.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Batch inference finished"
    );

    DetectionBatch {
        outcomes: boxes
            .into_iter()
            .map(|boxes| {
                Some(DetectionOutcome {
                    boxes,
                    detector_class,
                    elapsed,
                })
            })
            .collect(),
        detector_class,
        slot_indices,
        elapsed,
    }
}

/// Spawns detection tasks and tracks them until the next sweep
pub struct Dispatcher {
    sink: EventSink,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            tasks: Vec::new(),
        }
    }

    /// Start a detection task; the result arrives later as `DetectionComplete`
    ///
    /// Fails only when called outside a tokio runtime.
    pub fn dispatch(
        &mut self,
        model: Arc<dyn DetectionModel>,
        images: Vec<Frame>,
        detector_class: DetectorClass,
        slot_indices: Vec<usize>,
        confidence: f32,
    ) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|e| FlexlineError::DispatchFailure(format!("no async runtime: {}", e)))?;

        let sink = self.sink.clone();
        let task = handle.spawn_blocking(move || {
            let batch = run_batch(model.as_ref(), &images, detector_class, slot_indices, confidence);
            sink.detection_complete(batch);
        });
        self.tasks.push(task);
        Ok(())
    }

    /// Tasks spawned and not yet finished
    pub fn in_flight(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Drop handles of finished tasks, returning how many were removed
    pub fn prune_finished(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.is_finished());
        before - self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::StationEvent;
    use crate::data::{BoundingBox, PixelFormat};
    use crate::sim::ScriptedModel;

    fn frames(n: usize) -> Vec<Frame> {
        (0..n).map(|_| Frame::filled(8, 8, PixelFormat::Mono8, 0)).collect()
    }

    #[test]
    fn test_run_batch_pairs_outcomes() {
        let model = ScriptedModel::with_boxes("board", vec![BoundingBox::new(1, 2, 3, 4, 0.9, "edge")]);
        let batch = run_batch(&model, &frames(2), DetectorClass::Board, vec![0, 1], 0.5);
        assert_eq!(batch.slot_indices, vec![0, 1]);
        assert_eq!(batch.outcomes.len(), 2);
        assert!(batch.outcomes.iter().all(|o| o.as_ref().map(|o| o.boxes.len()) == Some(1)));
    }

    #[test]
    fn test_run_batch_model_error_gives_absent() {
        let model = ScriptedModel::failing("board", "CUDA out of memory");
        let batch = run_batch(&model, &frames(1), DetectorClass::Board, vec![1], 0.5);
        assert_eq!(batch.outcomes, vec![None]);
        assert_eq!(batch.elapsed, std::time::Duration::ZERO);
    }

    #[test]
    fn test_run_batch_panic_gives_absent() {
        let model = ScriptedModel::panicking("nail");
        let batch = run_batch(&model, &frames(1), DetectorClass::Nail, vec![0], 0.25);
        assert!(batch.is_failed());
    }

    #[test]
    fn test_run_batch_passes_confidence() {
        let model = ScriptedModel::empty("nail");
        run_batch(&model, &frames(1), DetectorClass::Nail, vec![0], 0.25);
        assert_eq!(model.last_confidence(), Some(0.25));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_delivers_through_sink() {
        let (sink, mut rx) = EventSink::channel();
        let mut dispatcher = Dispatcher::new(sink);
        let model = Arc::new(ScriptedModel::with_boxes("nail", vec![BoundingBox::new(0, 0, 5, 5, 0.8, "nail")]));

        dispatcher
            .dispatch(model, frames(1), DetectorClass::Nail, vec![1], 0.25)
            .unwrap();

        match rx.recv().await {
            Some(StationEvent::DetectionComplete(batch)) => {
                assert_eq!(batch.detector_class, DetectorClass::Nail);
                assert_eq!(batch.slot_indices, vec![1]);
                assert_eq!(batch.outcomes[0].as_ref().unwrap().boxes.len(), 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Task may still be winding down after sending
        for _ in 0..100 {
            if dispatcher.in_flight() == 0 {
                break;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(dispatcher.prune_finished(), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_dispatch_outside_runtime_fails() {
        let (sink, _rx) = EventSink::channel();
        let mut dispatcher = Dispatcher::new(sink);
        let err = dispatcher
            .dispatch(Arc::new(ScriptedModel::empty("nail")), frames(1), DetectorClass::Nail, vec![0], 0.25)
            .unwrap_err();
        assert!(matches!(err, FlexlineError::DispatchFailure(_)));
    }
}

//! Detection: model boundary, registry and asynchronous dispatch

mod dispatcher;
mod model;

pub use dispatcher::{run_batch, Dispatcher};
pub use model::{DetectionModel, ExecutionDevice, ModelLoader, ModelRegistry};

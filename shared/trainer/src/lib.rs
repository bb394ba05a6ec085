mod checkpoint;
mod controller;
mod error;
mod runtime;

pub use checkpoint::{checkpoint_name, find_latest_checkpoint, parse_checkpoint_iteration};
pub use controller::{
    BlockStream, ControllerConfig, IterationController, Phase, Resume, RunReport,
    ValStreamFactory,
};
pub use error::TrainerError;
pub use runtime::{DummyRuntime, TrainingRuntime, TrainingState};

//! Run-time half of the crate: the executor and the events it emits

pub mod event;
pub mod executor;

pub use event::PipelineEvent;
pub use executor::{PipelineExecutor, StepFailure, DEFAULT_STEP_TIMEOUT};

//! formpipe - pipeline orchestration for conversational form-filling
//!
//! A pipeline is an ordered sequence of model-invocation steps that turn a
//! chat conversation into structured form fields plus a streamed reply.
//! Callers pick a pipeline from the [`registry`], supply a [`ModelInvoker`]
//! and the conversation so far, and consume the run as an ordered stream of
//! [`PipelineEvent`]s.

pub mod core;
pub mod execution;
pub mod invoker;
pub mod protocol;
pub mod registry;

// Re-export commonly used types
pub use core::{
    ChatMessage, ConversationContext, FieldMap, FormSpec, ModelClass, Pipeline, PipelineStep,
    ResolvedPipeline, StepType,
};
pub use execution::{PipelineEvent, PipelineExecutor, DEFAULT_STEP_TIMEOUT};
pub use invoker::{FragmentReceiver, InvokerError, ModelInvoker};
pub use protocol::ResponseParser;
pub use registry::PipelineRegistry;

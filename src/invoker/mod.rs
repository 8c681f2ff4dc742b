//! Model invoker seam
//!
//! The executor never talks to a model backend directly; it goes through
//! [`ModelInvoker`]. Retry/backoff and concrete model selection live behind
//! this trait, invisible to the orchestration core. Streaming operations
//! hand back an mpsc receiver of fragments so the executor can forward text
//! as it arrives and drop the receiver to abandon an in-flight call.

use crate::core::{FieldMap, FormSpec, GenerationContext};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error types for invoker operations
#[derive(Debug, Clone, Error)]
pub enum InvokerError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One streamed piece of model output; an `Err` ends the step
pub type Fragment = Result<String, InvokerError>;

/// Receiving end of a model output stream
pub type FragmentReceiver = mpsc::Receiver<Fragment>;

/// The external collaborator that talks to the language-model backend
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Extract field values from the conversation. `filled` is the map of
    /// fields already satisfied this run; the invoker prompts only for the
    /// rest.
    async fn extract(
        &self,
        form: &FormSpec,
        conversation_text: &str,
        filled: &FieldMap,
    ) -> Result<FieldMap, InvokerError>;

    /// Stream a user-facing reply
    async fn reply_stream(&self, ctx: &GenerationContext)
        -> Result<FragmentReceiver, InvokerError>;

    /// Stream a combined extract-and-reply response in the raw table marker
    /// protocol, to be demultiplexed by the response parser
    async fn combined_stream(
        &self,
        ctx: &GenerationContext,
    ) -> Result<FragmentReceiver, InvokerError>;
}

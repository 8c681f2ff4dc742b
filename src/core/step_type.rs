//! Step and model classification

use serde::{Deserialize, Serialize};

/// What a pipeline step does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Extract fields from the conversation, no user-visible output
    Extract,
    /// Stream a reply to the user, no extraction
    Reply,
    /// Single model call doing both, multiplexed via the table marker protocol
    ExtractAndReply,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Extract => "extract",
            StepType::Reply => "reply",
            StepType::ExtractAndReply => "extract_and_reply",
        }
    }
}

/// Which class of model the invoker should pick for a step. Concrete model
/// selection is the invoker's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    /// Cheap and quick, typically for extraction
    Fast,
    /// The standard conversational model
    Default,
    /// Image-capable model
    Vision,
}

impl Default for ModelClass {
    fn default() -> Self {
        ModelClass::Default
    }
}

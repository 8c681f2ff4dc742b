//! Conversation state and per-run results

use crate::core::form::FieldMap;
use crate::core::step_type::ModelClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One message in the chat history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user", "assistant" or "system"
    pub role: String,

    /// Message text
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Summary of an earlier, already-completed form stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    /// Which form the summary belongs to
    pub form_id: String,

    /// Free-text summary of that stage
    pub summary: String,

    /// Key fields carried over from that stage
    #[serde(default)]
    pub extracted_fields: FieldMap,
}

/// Everything the caller knows about the conversation when a run starts.
/// Immutable for the duration of the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Chat history, oldest first
    pub messages: Vec<ChatMessage>,

    /// Optional user-profile key/value pairs (grade, background, ...)
    #[serde(default)]
    pub user_profile: BTreeMap<String, String>,

    /// Summaries of earlier stages, for multi-stage forms
    #[serde(default)]
    pub previous_summaries: Vec<StageSummary>,

    /// Image attached to the current turn, for vision steps
    #[serde(default)]
    pub image_url: Option<String>,
}

impl ConversationContext {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_profile(mut self, profile: BTreeMap<String, String>) -> Self {
        self.user_profile = profile;
        self
    }

    pub fn with_summaries(mut self, summaries: Vec<StageSummary>) -> Self {
        self.previous_summaries = summaries;
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Render the history as plain text for extraction prompts
    pub fn conversation_text(&self) -> String {
        let mut text = String::new();
        for message in &self.messages {
            text.push('\n');
            text.push_str(&message.role);
            text.push_str(": ");
            text.push_str(&message.content);
        }
        text
    }
}

/// What one step produced. Owned exclusively by the executor for the
/// lifetime of a single run and discarded when the run ends.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub step_id: String,

    /// Fields this step got accepted into the running map
    pub extracted_fields: FieldMap,

    /// Reply text this step streamed, if any
    pub reply: String,

    pub elapsed_ms: u64,
}

impl StepResult {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            ..Default::default()
        }
    }
}

/// Context handed to the invoker for reply-producing steps, assembled from
/// the conversation plus the results of the steps named in `context_from`.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// Model class the step asked for
    pub model: ModelClass,

    /// Step-level prompt override, if the definition carries one
    pub prompt_override: Option<String>,

    /// The conversation as supplied by the caller
    pub conversation: ConversationContext,

    /// Cumulative field map at the time the step starts
    pub current_fields: FieldMap,

    /// Field names accepted earlier in this run
    pub newly_extracted: Vec<String>,

    /// Results of the upstream steps that actually produced one; a failed
    /// dependency is simply absent
    pub upstream: Vec<StepResult>,
}

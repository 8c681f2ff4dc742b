//! Events emitted while a pipeline run progresses
//!
//! The core guarantees content and ordering only; putting events on a
//! concrete streaming channel (SSE, websocket, ...) is a transport adapter's
//! job, which is why the enum serializes with a `type` tag.

use crate::core::{FieldMap, StepType};
use serde::Serialize;

/// One event in a pipeline run's ordered event sequence.
///
/// Guarantees: `step_start`/`step_done` pairs bracket all of a step's
/// `extraction`/`content` events, steps never interleave, and every run ends
/// with exactly one `pipeline_done`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StepStart {
        step_id: String,
        step_name: String,
        step_type: StepType,
    },
    Extraction {
        step_id: String,
        /// Cumulative map: baseline plus everything accepted so far this run
        extracted_fields: FieldMap,
        /// Field names newly accepted by this extraction
        newly_extracted: Vec<String>,
        is_complete: bool,
        needs_confirmation: bool,
    },
    Content {
        step_id: String,
        content: String,
    },
    StepDone {
        step_id: String,
        elapsed_ms: u64,
    },
    PipelineDone {
        extracted_fields: FieldMap,
        /// Every field name accepted during the run, in acceptance order
        newly_extracted: Vec<String>,
        reply: String,
        is_complete: bool,
        needs_confirmation: bool,
    },
}

impl PipelineEvent {
    /// The step this event belongs to; `None` for `pipeline_done`
    pub fn step_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::StepStart { step_id, .. }
            | PipelineEvent::Extraction { step_id, .. }
            | PipelineEvent::Content { step_id, .. }
            | PipelineEvent::StepDone { step_id, .. } => Some(step_id),
            PipelineEvent::PipelineDone { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::PipelineDone { .. })
    }
}

//! Pipeline definition model
//!
//! A pipeline is a linear, ordered sequence of model-invocation steps plus a
//! declaration of which steps' results compose the final field table and
//! reply text. Definitions are immutable after loading; validation happens
//! once, at load time, and produces a [`ResolvedPipeline`] in which every
//! step-id reference has been turned into a position index.

use crate::core::step_type::{ModelClass, StepType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed pipeline definition. Fatal for that pipeline id; callers fall
/// back to a default pipeline.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("pipeline '{pipeline}' declares step id '{step}' more than once")]
    DuplicateStepId { pipeline: String, step: String },

    #[error("step '{step}' pulls context from '{reference}', which is not declared at or before it")]
    DanglingContext { step: String, reference: String },

    #[error("pipeline output {output} references unknown step '{reference}'")]
    DanglingOutput {
        output: &'static str,
        reference: String,
    },

    #[error("invalid pipeline definition: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// One execution unit in a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// What the step does: extract fields, generate a reply, or both
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Which model class the invoker should use for this step
    #[serde(default)]
    pub model: ModelClass,

    /// Optional custom prompt replacing the invoker's default for this step type
    #[serde(default, alias = "prompt_template")]
    pub prompt_override: Option<String>,

    /// Ids of earlier steps whose results feed this step's context
    #[serde(default)]
    pub context_from: Vec<String>,
}

impl PipelineStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type,
            model: ModelClass::default(),
            prompt_override: None,
            context_from: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: ModelClass) -> Self {
        self.model = model;
        self
    }

    pub fn with_context_from(mut self, ids: Vec<String>) -> Self {
        self.context_from = ids;
        self
    }

    pub fn with_prompt_override(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_override = Some(prompt.into());
        self
    }
}

/// Declares which steps' results compose the final output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Steps whose accepted fields fold into the final table, in order
    #[serde(default)]
    pub table_from: Vec<String>,

    /// Steps whose reply text composes the final reply, in order
    #[serde(default)]
    pub reply_from: Vec<String>,
}

/// A pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline identifier
    pub id: String,

    /// Pipeline name
    pub name: String,

    /// Description of what the pipeline is for
    #[serde(default)]
    pub description: String,

    /// Ordered list of steps; execution follows declaration order exactly
    pub steps: Vec<PipelineStep>,

    /// Output composition
    #[serde(default)]
    pub output: PipelineOutput,
}

impl Pipeline {
    /// Parse a pipeline definition from YAML and validate it
    pub fn from_yaml(yaml: &str) -> Result<ResolvedPipeline, DefinitionError> {
        let pipeline: Pipeline = serde_yaml::from_str(yaml)?;
        pipeline.resolve()
    }

    /// Position of a step id in declaration order
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Validate the definition and resolve every step-id reference to a
    /// position index. The model is linear: `context_from` may only name
    /// steps declared at or before the referencing step, so no cycles are
    /// possible.
    pub fn resolve(&self) -> Result<ResolvedPipeline, DefinitionError> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(DefinitionError::DuplicateStepId {
                    pipeline: self.id.clone(),
                    step: step.id.clone(),
                });
            }
        }

        let mut context_slots = Vec::with_capacity(self.steps.len());
        for (idx, step) in self.steps.iter().enumerate() {
            let mut slots = Vec::with_capacity(step.context_from.len());
            for reference in &step.context_from {
                match self.position(reference) {
                    Some(pos) if pos <= idx => slots.push(pos),
                    _ => {
                        return Err(DefinitionError::DanglingContext {
                            step: step.id.clone(),
                            reference: reference.clone(),
                        })
                    }
                }
            }
            context_slots.push(slots);
        }

        let table_slots = self.resolve_output(&self.output.table_from, "table_from")?;
        let reply_slots = self.resolve_output(&self.output.reply_from, "reply_from")?;

        Ok(ResolvedPipeline {
            pipeline: self.clone(),
            context_slots,
            table_slots,
            reply_slots,
        })
    }

    fn resolve_output(
        &self,
        references: &[String],
        output: &'static str,
    ) -> Result<Vec<usize>, DefinitionError> {
        references
            .iter()
            .map(|reference| {
                self.position(reference)
                    .ok_or_else(|| DefinitionError::DanglingOutput {
                        output,
                        reference: reference.clone(),
                    })
            })
            .collect()
    }
}

/// A validated pipeline with all step-id references resolved to positions.
///
/// Per-run step results live in a slot array indexed by step position, so
/// `context_from` and output resolution are direct index lookups.
#[derive(Debug, Clone)]
pub struct ResolvedPipeline {
    pipeline: Pipeline,
    context_slots: Vec<Vec<usize>>,
    table_slots: Vec<usize>,
    reply_slots: Vec<usize>,
}

impl ResolvedPipeline {
    pub fn definition(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn id(&self) -> &str {
        &self.pipeline.id
    }

    pub fn step_count(&self) -> usize {
        self.pipeline.steps.len()
    }

    pub fn step(&self, idx: usize) -> &PipelineStep {
        &self.pipeline.steps[idx]
    }

    /// Positions of the steps feeding step `idx`'s context
    pub fn context_slots(&self, idx: usize) -> &[usize] {
        &self.context_slots[idx]
    }

    /// Positions of the steps composing the final field table, in order
    pub fn table_slots(&self) -> &[usize] {
        &self.table_slots
    }

    /// Positions of the steps composing the final reply, in order
    pub fn reply_slots(&self) -> &[usize] {
        &self.reply_slots
    }
}

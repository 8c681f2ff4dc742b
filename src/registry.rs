//! Pipeline registry and built-in presets
//!
//! Three presets ship with the crate and are always available:
//!
//! - `single_agent` - one combined extract-and-reply step; cheapest, one
//!   model call per turn
//! - `dual_agent` - a fast extraction step followed by a reply step that
//!   sees the extraction's result
//! - `triple_agent` - a fast first-pass extraction, a thorough second-pass
//!   extraction, then a reply step that sees both
//!
//! Presets are reserved: they cannot be replaced or removed. Additional
//! pipelines register by id, either built in code or loaded from YAML.

use crate::core::{DefinitionError, ModelClass, Pipeline, PipelineOutput, PipelineStep, ResolvedPipeline, StepType};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub const SINGLE_AGENT: &str = "single_agent";
pub const DUAL_AGENT: &str = "dual_agent";
pub const TRIPLE_AGENT: &str = "triple_agent";

/// Default pipeline used when a caller names an unknown id
pub const DEFAULT_PIPELINE: &str = SINGLE_AGENT;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("pipeline id '{0}' is a built-in preset and cannot be replaced")]
    ReservedId(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("failed to read pipeline file: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds every pipeline available for execution, keyed by id
pub struct PipelineRegistry {
    pipelines: HashMap<String, ResolvedPipeline>,
}

impl PipelineRegistry {
    /// Registry pre-populated with the built-in presets
    pub fn new() -> Self {
        let mut pipelines = HashMap::new();
        for preset in [single_agent(), dual_agent(), triple_agent()] {
            // Presets are static and validated by tests; a panic here would
            // mean the crate itself is broken.
            let resolved = preset
                .resolve()
                .unwrap_or_else(|err| panic!("built-in pipeline is invalid: {err}"));
            pipelines.insert(preset.id.clone(), resolved);
        }
        Self { pipelines }
    }

    /// Look up a pipeline by id
    pub fn get(&self, id: &str) -> Option<&ResolvedPipeline> {
        self.pipelines.get(id)
    }

    /// Look up a pipeline by id, falling back to the default preset
    pub fn get_or_default(&self, id: &str) -> &ResolvedPipeline {
        self.pipelines
            .get(id)
            .unwrap_or_else(|| &self.pipelines[DEFAULT_PIPELINE])
    }

    /// Registered pipeline ids, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.pipelines.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Validate and register a pipeline. Preset ids are reserved.
    pub fn register(&mut self, pipeline: Pipeline) -> Result<(), RegistryError> {
        if is_preset(&pipeline.id) {
            return Err(RegistryError::ReservedId(pipeline.id));
        }
        let resolved = pipeline.resolve()?;
        info!(pipeline = %pipeline.id, steps = pipeline.steps.len(), "registered pipeline");
        self.pipelines.insert(pipeline.id, resolved);
        Ok(())
    }

    /// Load a pipeline definition from a YAML file and register it
    pub fn register_file(&mut self, path: impl AsRef<Path>) -> Result<(), RegistryError> {
        let yaml = std::fs::read_to_string(path)?;
        let resolved = Pipeline::from_yaml(&yaml)?;
        let id = resolved.id().to_string();
        if is_preset(&id) {
            return Err(RegistryError::ReservedId(id));
        }
        info!(pipeline = %id, "registered pipeline from file");
        self.pipelines.insert(id, resolved);
        Ok(())
    }

    /// Remove a registered pipeline. Presets cannot be removed.
    pub fn remove(&mut self, id: &str) -> Result<Option<ResolvedPipeline>, RegistryError> {
        if is_preset(id) {
            return Err(RegistryError::ReservedId(id.to_string()));
        }
        Ok(self.pipelines.remove(id))
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_preset(id: &str) -> bool {
    matches!(id, SINGLE_AGENT | DUAL_AGENT | TRIPLE_AGENT)
}

fn single_agent() -> Pipeline {
    Pipeline {
        id: SINGLE_AGENT.to_string(),
        name: "Single agent".to_string(),
        description: "One combined call extracts fields and replies in the same response"
            .to_string(),
        steps: vec![PipelineStep::new(
            "main",
            "Extract and reply",
            StepType::ExtractAndReply,
        )],
        output: PipelineOutput {
            table_from: vec!["main".to_string()],
            reply_from: vec!["main".to_string()],
        },
    }
}

fn dual_agent() -> Pipeline {
    Pipeline {
        id: DUAL_AGENT.to_string(),
        name: "Dual agent".to_string(),
        description: "Fast extraction first, then a reply informed by what was extracted"
            .to_string(),
        steps: vec![
            PipelineStep::new("extract", "Field extraction", StepType::Extract)
                .with_model(ModelClass::Fast),
            PipelineStep::new("reply", "Reply generation", StepType::Reply)
                .with_context_from(vec!["extract".to_string()]),
        ],
        output: PipelineOutput {
            table_from: vec!["extract".to_string()],
            reply_from: vec!["reply".to_string()],
        },
    }
}

fn triple_agent() -> Pipeline {
    Pipeline {
        id: TRIPLE_AGENT.to_string(),
        name: "Triple agent".to_string(),
        description: "Two-pass extraction (fast then thorough) followed by a reply that sees both"
            .to_string(),
        steps: vec![
            PipelineStep::new("quick_extract", "Quick extraction", StepType::Extract)
                .with_model(ModelClass::Fast),
            PipelineStep::new("deep_extract", "Deep extraction", StepType::Extract)
                .with_context_from(vec!["quick_extract".to_string()]),
            PipelineStep::new("reply", "Reply generation", StepType::Reply).with_context_from(
                vec!["quick_extract".to_string(), "deep_extract".to_string()],
            ),
        ],
        output: PipelineOutput {
            table_from: vec!["quick_extract".to_string(), "deep_extract".to_string()],
            reply_from: vec!["reply".to_string()],
        },
    }
}

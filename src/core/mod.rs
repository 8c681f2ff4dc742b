//! Core domain models
//!
//! This module defines the fundamental data structures that represent
//! pipelines, forms, conversation state, and the field-merge rules.

pub mod context;
pub mod form;
pub mod merge;
pub mod pipeline;
pub mod step_type;

pub use context::*;
pub use form::*;
pub use pipeline::*;
pub use step_type::*;

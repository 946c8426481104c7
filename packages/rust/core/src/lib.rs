//! Core orchestration for Geist reports.
//!
//! This crate ties the capability client and the source analyzer into the
//! two end-to-end report flows (topic and codebase): agents, validated task
//! pipelines, report synthesis and artifact writing.

pub mod agents;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod synthesizer;
pub mod task;
pub mod writer;

pub use agents::AgentRegistry;
pub use orchestrator::{CodebaseOptions, Orchestrator};
pub use pipeline::{Pipeline, PipelineShape, RunState};
pub use progress::{ProgressReporter, SilentProgress};
pub use synthesizer::{CODEBASE_SECTIONS, TOPIC_SECTIONS, synthesize_codebase, synthesize_topic};
pub use task::TaskSpec;
pub use writer::ArtifactWriter;

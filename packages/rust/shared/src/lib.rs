//! Shared types, error model, and configuration for Geist.
//!
//! This crate is the foundation depended on by all other Geist crates.
//! It provides:
//! - [`GeistError`] and [`CapabilityError`], the unified error taxonomy
//! - Domain types ([`Agent`], [`Context`], [`ReportDocument`], [`OutputLocator`])
//! - Configuration ([`AppConfig`], [`ModelConfig`], config loading)

pub mod config;
pub mod context;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AgentOverride, AnalysisConfig, AppConfig, ModelBinding, ModelConfig, Provider, ReportsConfig,
    SCAN_EXTS_FAST, SCAN_EXTS_FULL, SKIP_DIRS, UNVEIL_ENV_PREFIX, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_api_key,
};
pub use context::{Context, ContextValue};
pub use error::{CapabilityError, CapabilityErrorKind, GeistError, Result};
pub use types::{
    Agent, Capability, OutputLocator, ReportCategory, ReportDocument, ReportSection, RunId,
    sanitize_stem,
};

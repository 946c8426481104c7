//! Source analyzer: turns a file tree into a [`DependencyGraph`].
//!
//! Stages run in a fixed order so repeated runs over an unchanged tree
//! yield identical graphs:
//! 1. Walk: enumerate matching files in lexicographic order
//! 2. Extract: per-language import/export matching ([`ImportExtractor`])
//! 3. Summarize: one capability call per file ([`FileSummarizer`])
//! 4. Link: resolve references, cluster components, tally externals
//!
//! A file that cannot be read, extracted or summarized still becomes a
//! node; the failure is recorded as a warning on the graph.

pub mod diagram;
pub mod extract;
pub mod graph;
pub mod resolve;
pub mod summarize;
pub mod walk;

use std::path::Path;
use std::time::Instant;

use tracing::{info, instrument, warn};

use geist_shared::{AnalysisConfig, GeistError, Result};

pub use diagram::{friendly_labels, mermaid};
pub use extract::{Extraction, ImportExtractor, Language, PatternExtractor};
pub use graph::{
    AnalysisWarning, Degree, DependencyGraph, Edge, ExternalDependency, FileAnalysis, GraphMetrics,
    Node, OTHER_COMPONENT, ROOT_COMPONENT, assign_components,
};
pub use resolve::{PathIndex, Resolution};
pub use summarize::{CapabilitySummarizer, FileSummarizer, FileSummary, parse_summary};
pub use walk::{SourceFile, Walk, WalkOptions, walk_files};

/// Settings for one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerOptions {
    pub walk: WalkOptions,
    /// Groups with fewer files merge into the `(other)` component.
    pub min_cluster_size: usize,
}

impl AnalyzerOptions {
    /// Options from the `[analysis]` config; `full` selects the broad extension profile.
    pub fn from_config(config: &AnalysisConfig, full: bool) -> Self {
        let extensions = if full {
            &config.full_profile_extensions
        } else {
            &config.include_extensions
        };
        Self {
            walk: WalkOptions {
                extensions: extensions.clone(),
                exclude_dirs: config.exclude_dirs.clone(),
                include_prefixes: Vec::new(),
                exclude_prefixes: Vec::new(),
                max_files: config.max_files,
            },
            min_cluster_size: config.min_cluster_size.max(1),
        }
    }
}

/// Progress callbacks for a long analysis.
pub trait AnalysisProgress: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, name: &str);
    /// Called after each file is analyzed.
    fn file_analyzed(&self, current: usize, total: usize, rel_path: &str);
}

/// No-op analysis progress.
pub struct SilentAnalysisProgress;

impl AnalysisProgress for SilentAnalysisProgress {
    fn phase(&self, _name: &str) {}
    fn file_analyzed(&self, _current: usize, _total: usize, _rel_path: &str) {}
}

/// Analyze the tree under `root`.
///
/// Errors only when the tree itself cannot be enumerated; per-file
/// failures degrade to warnings.
#[instrument(skip_all, fields(root = %root.display()))]
pub async fn analyze(
    root: &Path,
    options: &AnalyzerOptions,
    extractor: &dyn ImportExtractor,
    summarizer: &dyn FileSummarizer,
    progress: &dyn AnalysisProgress,
) -> Result<DependencyGraph> {
    let start = Instant::now();

    progress.phase("Scanning files");
    let Walk { files, skipped } = walk_files(root, &options.walk)?;
    info!(files = files.len(), skipped = skipped.len(), "source files selected");

    progress.phase("Summarizing files");
    let total = files.len();
    let mut analyses = Vec::with_capacity(total);
    for (i, file) in files.iter().enumerate() {
        analyses.push(analyze_file(file, extractor, summarizer).await);
        progress.file_analyzed(i + 1, total, &file.rel_path);
    }

    progress.phase("Linking files");
    let graph = DependencyGraph::build(analyses, options.min_cluster_size).with_warnings(skipped);

    info!(
        nodes = graph.nodes().len(),
        edges = graph.edge_count(),
        components = graph.component_count(),
        externals = graph.externals().len(),
        warnings = graph.warnings().len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "dependency graph built"
    );

    Ok(graph)
}

async fn analyze_file(
    file: &SourceFile,
    extractor: &dyn ImportExtractor,
    summarizer: &dyn FileSummarizer,
) -> FileAnalysis {
    let mut analysis = FileAnalysis::new(file.rel_path.clone());

    let bytes = match std::fs::read(&file.abs_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = GeistError::io(&file.abs_path, e);
            warn!(file = %file.rel_path, error = %err, "failed to read file");
            analysis.warnings.push(err.to_string());
            return analysis;
        }
    };
    let source = String::from_utf8_lossy(&bytes);

    let extraction = match extractor.extract(&file.rel_path, &source) {
        Ok(extraction) => extraction,
        Err(err) => {
            warn!(file = %file.rel_path, error = %err, "extraction failed");
            analysis.warnings.push(err.to_string());
            return analysis;
        }
    };
    analysis.imports = extraction.imports;

    let mut exports = extraction.exports;
    exports.truncate(summarize::MAX_API_ITEMS);

    match summarizer.summarize(&file.rel_path, &source).await {
        Ok(summary) => {
            analysis.role = summary.role;
            analysis.api = if summary.api.is_empty() { exports } else { summary.api };
            analysis.summary = summary.summary;
        }
        Err(err) => {
            warn!(file = %file.rel_path, error = %err, "summary unavailable");
            analysis.warnings.push(err.to_string());
            analysis.api = exports;
        }
    }

    analysis
}

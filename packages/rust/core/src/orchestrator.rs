//! Run API: wires analyzer, pipelines and synthesizer into the two report flows.
//!
//! An [`Orchestrator`] is built once at startup. Both pipeline shapes are
//! validated in [`Orchestrator::new`], so a malformed task chain fails before
//! any run starts. Runs share nothing mutable and may proceed concurrently.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, Local};
use tracing::{info, instrument};

use geist_analyzer::{
    AnalyzerOptions, CapabilitySummarizer, DependencyGraph, ImportExtractor, PatternExtractor,
    analyze,
};
use geist_capability::CapabilityClient;
use geist_shared::{
    AnalysisConfig, AppConfig, Capability, Context, GeistError, ReportDocument, Result, RunId,
};

use crate::agents::{ARCHITECT, AgentRegistry, FILE_ANALYST, LINKER, REPORTING_ANALYST, RESEARCHER};
use crate::pipeline::{Pipeline, PipelineShape, RunState};
use crate::progress::{AnalysisBridge, ProgressReporter};
use crate::synthesizer::{codebase_keys, synthesize_codebase, synthesize_topic, topic_keys};
use crate::task::TaskSpec;

/// Most `- path: role` lines handed to the architect.
const MAX_ROLE_LINES: usize = 20;

/// Most edges listed in the linker's prompt.
const MAX_EDGE_LINES: usize = 200;

/// Most file names shown per component in the linker's prompt.
const MAX_COMPONENT_FILES: usize = 8;

// ---------------------------------------------------------------------------
// Task templates
// ---------------------------------------------------------------------------

const RESEARCH_INSTRUCTION: &str = "Conduct a thorough research about {topic}. \
Make sure you find any interesting and relevant information given the current year is {current_year}.\n\n\
Expected output: a list with 10 bullet points of the most relevant information about {topic}.";

const REPORT_INSTRUCTION: &str = "Review the research findings below and expand each point into a full \
section of a report about {topic}. Make sure the report is detailed and contains any and all relevant \
information.\n\nResearch findings:\n{findings}\n\n\
Expected output: a fully fledged report with the main topics, each with a full section of information, \
formatted as Markdown without code fences.";

const LINK_INSTRUCTION: &str = "Repository: {root_name}\n\n\
Components and their files:\n{component_summary}\n\n\
Internal dependency edges (importer -> imported):\n{edge_list}\n\n\
Explain in a few short paragraphs how these components collaborate: which ones are foundations, \
which ones orchestrate others, and where the main data flows run. Mention components by name.";

const OVERVIEW_INSTRUCTION: &str = "Write the architectural overview for \"{title}\".\n\n\
File roles:\n{file_roles}\n\n\
Component collaboration:\n{collaboration}\n\n\
Graph: {edge_count} internal edges across {component_count} components. Metrics: {metrics}\n\n\
Describe the purpose of the codebase, its main building blocks and how a request or job moves \
through them. Use Markdown paragraphs and bullet points, no top-level heading.";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-run settings for a codebase report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodebaseOptions {
    pub analyzer: AnalyzerOptions,
    /// Report title; `Unveil: <root name>` when unset.
    pub title: Option<String>,
}

impl CodebaseOptions {
    pub fn from_config(config: &AnalysisConfig, full: bool) -> Self {
        Self {
            analyzer: AnalyzerOptions::from_config(config, full),
            title: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Entry point for topic and codebase report runs.
pub struct Orchestrator {
    topic: Pipeline,
    codebase: Pipeline,
    registry: AgentRegistry,
    client: CapabilityClient,
    codebase_client: CapabilityClient,
    extractor: Arc<dyn ImportExtractor>,
    chunk_chars: usize,
    chunks_per_file: usize,
}

impl Orchestrator {
    /// Build and validate both pipeline shapes.
    pub fn new(config: &AppConfig, client: CapabilityClient, registry: AgentRegistry) -> Result<Self> {
        let topic = topic_pipeline(&registry)?;
        let codebase = codebase_pipeline(&registry)?;
        info!(
            topic_tasks = topic.tasks().len(),
            codebase_tasks = codebase.tasks().len(),
            "pipelines validated"
        );

        Ok(Self {
            topic,
            codebase,
            registry,
            codebase_client: client.clone(),
            client,
            extractor: Arc::new(PatternExtractor),
            chunk_chars: config.analysis.chunk_chars,
            chunks_per_file: config.analysis.chunks_per_file,
        })
    }

    /// Use a separate client for codebase runs (file summaries and tasks).
    pub fn with_codebase_client(mut self, client: CapabilityClient) -> Self {
        self.codebase_client = client;
        self
    }

    /// Replace the import/export extractor used by codebase runs.
    pub fn with_extractor(mut self, extractor: Arc<dyn ImportExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn topic_pipeline(&self) -> &Pipeline {
        &self.topic
    }

    pub fn codebase_pipeline(&self) -> &Pipeline {
        &self.codebase
    }

    /// Research `topic` and write it up as a report.
    #[instrument(skip_all, fields(run_id = %RunId::new(), shape = "topic"))]
    pub async fn run_topic_pipeline(
        &self,
        topic: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<ReportDocument> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(GeistError::validation("topic must not be empty"));
        }
        let start = Instant::now();

        let seed = Context::new()
            .with(topic_keys::TOPIC, topic)?
            .with(topic_keys::CURRENT_YEAR, Local::now().year().to_string())?;
        let context = self.topic.run(&self.client, seed, progress).await?;

        progress.state(&RunState::Synthesizing);
        let document = synthesize_topic(&context, Local::now())?;
        progress.state(&RunState::Done);
        progress.done(&document);

        info!(
            topic,
            sections = document.sections.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "topic report synthesized"
        );
        Ok(document)
    }

    /// Analyze the tree under `root` and describe its architecture.
    #[instrument(skip_all, fields(run_id = %RunId::new(), shape = "codebase", root = %root.display()))]
    pub async fn run_codebase_pipeline(
        &self,
        root: &Path,
        options: &CodebaseOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<ReportDocument> {
        let start = Instant::now();
        let root = std::fs::canonicalize(root).map_err(|e| {
            GeistError::analysis(root.display().to_string(), format!("cannot open tree root: {e}"))
        })?;
        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "root".to_string());

        let summarizer = CapabilitySummarizer::new(
            self.codebase_client.clone(),
            self.registry.get(FILE_ANALYST)?,
            self.chunk_chars,
            self.chunks_per_file,
        )?;
        let graph = analyze(
            &root,
            &options.analyzer,
            self.extractor.as_ref(),
            &summarizer,
            &AnalysisBridge(progress),
        )
        .await?;
        if graph.nodes().is_empty() {
            return Err(GeistError::analysis(
                root.display().to_string(),
                "no matching source files found",
            ));
        }

        let title = options
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unveil: {root_name}"));
        let seed = codebase_seed(&graph, &root_name, &title)?;

        progress.phase("Linking components");
        let context = self.codebase.run(&self.codebase_client, seed, progress).await?;

        progress.state(&RunState::Synthesizing);
        let document = synthesize_codebase(&context, &graph, Local::now())?;
        progress.state(&RunState::Done);
        progress.done(&document);

        info!(
            root = %root_name,
            nodes = graph.nodes().len(),
            edges = graph.edge_count(),
            warnings = graph.warnings().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "codebase report synthesized"
        );
        Ok(document)
    }
}

// ---------------------------------------------------------------------------
// Pipeline definitions
// ---------------------------------------------------------------------------

fn topic_pipeline(registry: &AgentRegistry) -> Result<Pipeline> {
    use topic_keys::*;

    let research = TaskSpec::new(
        "research",
        registry.get(RESEARCHER)?,
        Capability::Research,
        RESEARCH_INSTRUCTION,
    )
    .reads([TOPIC, CURRENT_YEAR])
    .writes(FINDINGS);
    let report = TaskSpec::new(
        "report",
        registry.get(REPORTING_ANALYST)?,
        Capability::Write,
        REPORT_INSTRUCTION,
    )
    .reads([TOPIC, FINDINGS])
    .after(["research"])
    .writes(REPORT);

    Pipeline::new(PipelineShape::Topic, [TOPIC, CURRENT_YEAR], vec![research, report])
}

fn codebase_pipeline(registry: &AgentRegistry) -> Result<Pipeline> {
    use codebase_keys::*;

    let link = TaskSpec::new(
        "link",
        registry.get(LINKER)?,
        Capability::Analyze,
        LINK_INSTRUCTION,
    )
    .reads([COMPONENT_SUMMARY, EDGE_LIST, ROOT_NAME])
    .writes(COLLABORATION);
    let overview = TaskSpec::new(
        "overview",
        registry.get(ARCHITECT)?,
        Capability::Write,
        OVERVIEW_INSTRUCTION,
    )
    .reads([TITLE, FILE_ROLES, COLLABORATION, EDGE_COUNT, COMPONENT_COUNT, METRICS])
    .after(["link"])
    .writes(OVERVIEW);

    Pipeline::new(
        PipelineShape::Codebase,
        [
            TITLE,
            ROOT_NAME,
            FILE_ROLES,
            COMPONENT_SUMMARY,
            EDGE_LIST,
            EDGE_COUNT,
            COMPONENT_COUNT,
            METRICS,
        ],
        vec![link, overview],
    )
}

/// Seed context for the codebase pipeline, derived from the graph.
fn codebase_seed(graph: &DependencyGraph, root_name: &str, title: &str) -> Result<Context> {
    let file_roles = graph
        .nodes()
        .iter()
        .take(MAX_ROLE_LINES)
        .map(|n| {
            let role = if n.role_summary.is_empty() {
                "(no summary)"
            } else {
                n.role_summary.as_str()
            };
            format!("- {}: {role}", n.file_path)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let component_summary = graph
        .components()
        .iter()
        .map(|(name, files)| {
            let shown: Vec<&str> = files.iter().take(MAX_COMPONENT_FILES).copied().collect();
            let more = files.len().saturating_sub(shown.len());
            let suffix = if more > 0 { format!(", +{more} more") } else { String::new() };
            format!("- {name} ({} files): {}{suffix}", files.len(), shown.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut edge_lines: Vec<String> = graph
        .edges()
        .iter()
        .take(MAX_EDGE_LINES)
        .map(|e| format!("{} -> {}", e.from, e.to))
        .collect();
    if graph.edge_count() > MAX_EDGE_LINES {
        edge_lines.push(format!("... ({} more)", graph.edge_count() - MAX_EDGE_LINES));
    }
    let edge_list = if edge_lines.is_empty() {
        "(none)".to_string()
    } else {
        edge_lines.join("\n")
    };

    let metrics = serde_json::to_value(graph.metrics())
        .map_err(|e| GeistError::analysis(root_name, format!("cannot encode graph metrics: {e}")))?;

    Context::new()
        .with(codebase_keys::TITLE, title)?
        .with(codebase_keys::ROOT_NAME, root_name)?
        .with(codebase_keys::FILE_ROLES, file_roles)?
        .with(codebase_keys::COMPONENT_SUMMARY, component_summary)?
        .with(codebase_keys::EDGE_LIST, edge_list)?
        .with(codebase_keys::EDGE_COUNT, graph.edge_count().to_string())?
        .with(codebase_keys::COMPONENT_COUNT, graph.component_count().to_string())?
        .with(codebase_keys::METRICS, metrics)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use geist_analyzer::FileAnalysis;
    use geist_capability::{CompletionRequest, ModelBackend, RetryPolicy};
    use geist_shared::{CapabilityError, ReportCategory};

    use super::*;
    use crate::progress::SilentProgress;
    use crate::synthesizer::{CODEBASE_SECTIONS, TOPIC_SECTIONS};
    use crate::writer::ArtifactWriter;

    /// Answers file-summary prompts with JSON and everything else with fixed text.
    struct Stub {
        text: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelBackend for Stub {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> std::result::Result<String, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.prompt.contains("Return pure JSON") {
                return Ok(r#"{"role": "Helper module", "api": ["run()"], "summary": ["Does work"]}"#.into());
            }
            Ok(self.text.to_string())
        }
    }

    fn orchestrator(text: &'static str) -> (Orchestrator, Arc<Stub>) {
        let stub = Arc::new(Stub {
            text,
            calls: AtomicUsize::new(0),
        });
        let client = CapabilityClient::new(stub.clone(), RetryPolicy::immediate(1), Duration::from_secs(5));
        let orch = Orchestrator::new(&AppConfig::default(), client, AgentRegistry::builtin()).unwrap();
        (orch, stub)
    }

    #[derive(Default)]
    struct RecordingProgress {
        states: Mutex<Vec<String>>,
        done: AtomicUsize,
    }

    impl ProgressReporter for RecordingProgress {
        fn state(&self, state: &RunState) {
            self.states.lock().unwrap().push(state.to_string());
        }
        fn phase(&self, _name: &str) {}
        fn file_analyzed(&self, _current: usize, _total: usize, _rel_path: &str) {}
        fn done(&self, _document: &ReportDocument) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn temp_tree(files: &[(&str, &str)]) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!("geist-orch-{}", uuid::Uuid::now_v7()));
        for (rel, content) in files {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        root
    }

    #[test]
    fn both_pipelines_validate() {
        let (orch, stub) = orchestrator("x");
        let ids: Vec<&str> = orch.topic_pipeline().tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["research", "report"]);
        let ids: Vec<&str> = orch.codebase_pipeline().tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["link", "overview"]);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn topic_body_is_identical_across_runs() {
        let (orch, _) = orchestrator("Deterministic text.");
        let a = orch.run_topic_pipeline("Haunted houses", &SilentProgress).await.unwrap();
        let b = orch.run_topic_pipeline("Haunted houses", &SilentProgress).await.unwrap();
        assert_eq!(a.body(), b.body());
        assert_eq!(a.title, b.title);
    }

    #[tokio::test]
    async fn quantum_mechanics_report_end_to_end() {
        let (orch, stub) = orchestrator("<section text>");
        let progress = RecordingProgress::default();
        let doc = orch
            .run_topic_pipeline("Quantum Mechanics Report", &progress)
            .await
            .unwrap();

        assert_eq!(doc.title, "Quantum Mechanics Report");
        assert_eq!(doc.category, ReportCategory::Topic);
        let headings: Vec<&str> = doc.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, TOPIC_SECTIONS);
        assert!(doc.sections.iter().all(|s| s.body == "<section text>"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *progress.states.lock().unwrap(),
            ["PENDING", "RUNNING(research)", "RUNNING(report)", "SYNTHESIZING", "DONE"]
        );
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);

        let root = std::env::temp_dir().join(format!("geist-orch-out-{}", uuid::Uuid::now_v7()));
        let path = ArtifactWriter::new(&root).write(&doc, &doc.locator()).unwrap();
        assert_eq!(path.parent().unwrap().file_name().unwrap(), "scrying_reports");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let expected = format!(
            "Quantum_Mechanics_Report_{}.md",
            doc.generated_at.format("%m-%d-%Y_%H-%M")
        );
        assert_eq!(name, expected);
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn empty_topic_is_rejected_without_calls() {
        let (orch, stub) = orchestrator("x");
        let err = orch.run_topic_pipeline("   ", &SilentProgress).await.unwrap_err();
        assert_eq!(err.stage(), "validation");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn codebase_run_over_small_tree() {
        let root = temp_tree(&[
            ("app/main.py", "import util\n\ndef main():\n    util.run()\n"),
            ("app/util.py", "import os\n\ndef run():\n    pass\n"),
            ("README.txt", "not scanned"),
        ]);
        let (orch, stub) = orchestrator("Narrative.");
        let options = CodebaseOptions::from_config(&AnalysisConfig::default(), false);
        let doc = orch
            .run_codebase_pipeline(&root, &options, &SilentProgress)
            .await
            .unwrap();

        let root_name = root.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(doc.title, format!("Unveil: {root_name}"));
        assert_eq!(doc.subject, root_name);
        assert_eq!(doc.category, ReportCategory::Codebase);
        let headings: Vec<&str> = doc.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, CODEBASE_SECTIONS);
        assert!(doc.sections[3].body.contains("### `app/main.py`"));
        assert!(doc.sections[3].body.contains("**Role:** Helper module"));
        // two file summaries, then link and overview
        assert_eq!(stub.calls.load(Ordering::SeqCst), 4);
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn codebase_title_override() {
        let root = temp_tree(&[("lib.rs", "pub fn f() {}\n")]);
        let (orch, _) = orchestrator("Narrative.");
        let mut options = CodebaseOptions::from_config(&AnalysisConfig::default(), false);
        options.title = Some("Architecture notes".into());
        let doc = orch
            .run_codebase_pipeline(&root, &options, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(doc.title, "Architecture notes");
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn missing_root_is_an_analysis_error() {
        let (orch, stub) = orchestrator("x");
        let options = CodebaseOptions::from_config(&AnalysisConfig::default(), false);
        let missing = std::env::temp_dir().join(format!("geist-missing-{}", uuid::Uuid::now_v7()));
        let err = orch
            .run_codebase_pipeline(&missing, &options, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "analysis");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn seed_lists_edges_and_metrics() {
        let main = FileAnalysis {
            imports: vec!["./util.py".into()],
            role: "Entry".into(),
            ..FileAnalysis::new("app/main.py")
        };
        let graph = DependencyGraph::build(vec![main, FileAnalysis::new("app/util.py")], 2);
        let seed = codebase_seed(&graph, "demo", "Unveil: demo").unwrap();

        assert_eq!(seed.require_text(codebase_keys::EDGE_LIST).unwrap(), "app/main.py -> app/util.py");
        assert_eq!(seed.require_text(codebase_keys::EDGE_COUNT).unwrap(), "1");
        assert_eq!(
            seed.require_text(codebase_keys::FILE_ROLES).unwrap(),
            "- app/main.py: Entry\n- app/util.py: (no summary)"
        );
        assert!(
            seed.require_text(codebase_keys::COMPONENT_SUMMARY)
                .unwrap()
                .starts_with("- app (2 files): app/main.py, app/util.py")
        );
        assert!(seed.get(codebase_keys::METRICS).unwrap().as_text().is_none());

        let (orch, _) = orchestrator("x");
        orch.codebase_pipeline().check_seed(&seed).unwrap();
    }
}

//! Report synthesis: terminal context (+ graph) → [`ReportDocument`].
//!
//! Pure functions; the only input that varies between identical runs is
//! the `generated_at` timestamp passed in by the caller.

use chrono::{DateTime, Local};

use geist_analyzer::{DependencyGraph, mermaid};
use geist_shared::{Context, ReportCategory, ReportDocument, ReportSection, Result};

/// Context keys written by the topic pipeline.
pub mod topic_keys {
    pub const TOPIC: &str = "topic";
    pub const CURRENT_YEAR: &str = "current_year";
    pub const FINDINGS: &str = "findings";
    pub const REPORT: &str = "report";
}

/// Context keys written by the codebase pipeline.
pub mod codebase_keys {
    pub const TITLE: &str = "title";
    pub const ROOT_NAME: &str = "root_name";
    pub const FILE_ROLES: &str = "file_roles";
    pub const COMPONENT_SUMMARY: &str = "component_summary";
    pub const EDGE_LIST: &str = "edge_list";
    pub const EDGE_COUNT: &str = "edge_count";
    pub const COMPONENT_COUNT: &str = "component_count";
    pub const METRICS: &str = "metrics";
    pub const COLLABORATION: &str = "collaboration";
    pub const OVERVIEW: &str = "overview";
}

/// Topic report sections, in order.
pub const TOPIC_SECTIONS: [&str; 2] = ["Research Findings", "Report"];

/// Codebase report sections, in order.
pub const CODEBASE_SECTIONS: [&str; 5] = [
    "Overview",
    "Components",
    "Dependency Diagram",
    "Per-File Notes",
    "External Dependencies",
];

/// Longest overview narrative kept, in characters.
const MAX_OVERVIEW_CHARS: usize = 5_000;

/// Most external dependencies listed.
const MAX_EXTERNALS: usize = 50;

/// Assemble a topic report from a finished topic run.
pub fn synthesize_topic(context: &Context, generated_at: DateTime<Local>) -> Result<ReportDocument> {
    let topic = context.require_text(topic_keys::TOPIC)?.trim().to_string();
    let findings = context.require_text(topic_keys::FINDINGS)?;
    let report = context.require_text(topic_keys::REPORT)?;

    Ok(ReportDocument {
        title: topic.clone(),
        generated_at,
        sections: vec![
            ReportSection::new(TOPIC_SECTIONS[0], findings.trim()),
            ReportSection::new(TOPIC_SECTIONS[1], report.trim()),
        ],
        category: ReportCategory::Topic,
        subject: topic,
    })
}

/// Assemble a codebase report from a finished codebase run and its graph.
pub fn synthesize_codebase(
    context: &Context,
    graph: &DependencyGraph,
    generated_at: DateTime<Local>,
) -> Result<ReportDocument> {
    let title = context.require_text(codebase_keys::TITLE)?.trim().to_string();
    let root_name = context.require_text(codebase_keys::ROOT_NAME)?.to_string();
    let overview = context.require_text(codebase_keys::OVERVIEW)?;
    let collaboration = context.require_text(codebase_keys::COLLABORATION)?;

    Ok(ReportDocument {
        title,
        generated_at,
        sections: vec![
            ReportSection::new(CODEBASE_SECTIONS[0], overview_section(&root_name, overview, graph)),
            ReportSection::new(CODEBASE_SECTIONS[1], components_section(collaboration, graph)),
            ReportSection::new(CODEBASE_SECTIONS[2], diagram_section(graph)),
            ReportSection::new(CODEBASE_SECTIONS[3], per_file_section(graph)),
            ReportSection::new(CODEBASE_SECTIONS[4], externals_section(graph)),
        ],
        category: ReportCategory::Codebase,
        subject: root_name,
    })
}

fn overview_section(root_name: &str, narrative: &str, graph: &DependencyGraph) -> String {
    let metrics = graph.metrics();
    let mut out = format!(
        "_Root_: `{root_name}`  \n_Files summarized_: **{}**\n\n",
        metrics.node_count
    );
    out.push_str(&format!(
        "- Internal edges: {}\n- Components: {}\n- Isolated files: {}\n",
        metrics.edge_count, metrics.component_count, metrics.isolated_count
    ));
    if let Some(d) = &metrics.max_fan_in {
        out.push_str(&format!("- Most depended-on: `{}` ({} incoming)\n", d.file, d.count));
    }
    if let Some(d) = &metrics.max_fan_out {
        out.push_str(&format!("- Most dependent: `{}` ({} outgoing)\n", d.file, d.count));
    }
    out.push('\n');
    out.push_str(&truncate_narrative(narrative.trim()));
    out
}

fn truncate_narrative(text: &str) -> String {
    if text.chars().count() <= MAX_OVERVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_OVERVIEW_CHARS).collect();
    format!("{cut}\n\n*(truncated)*")
}

fn components_section(collaboration: &str, graph: &DependencyGraph) -> String {
    let mut out = String::new();
    let collaboration = collaboration.trim();
    if !collaboration.is_empty() {
        out.push_str(collaboration);
        out.push_str("\n\n");
    }
    for (component, files) in graph.components() {
        out.push_str(&format!("### {component}\n\n"));
        for file in files {
            out.push_str(&format!("- `{file}`\n"));
        }
        out.push('\n');
    }
    out
}

fn diagram_section(graph: &DependencyGraph) -> String {
    let mut out = String::new();
    if graph.edges().is_empty() {
        out.push_str(
            "_No internal edges inferred (imports not resolved). \
             If this seems wrong, point the analysis at the repository root._\n\n",
        );
    }
    out.push_str(&mermaid(graph));
    out
}

fn per_file_section(graph: &DependencyGraph) -> String {
    let mut out = String::new();
    for node in graph.nodes() {
        out.push_str(&format!("### `{}`\n\n", node.file_path));
        if !node.role_summary.is_empty() {
            out.push_str(&format!("**Role:** {}\n\n", node.role_summary));
        }
        if !node.declared_api.is_empty() {
            out.push_str(&format!("**API:** {}\n\n", node.declared_api.join(", ")));
        }
        if !node.summary.is_empty() {
            out.push_str("**Summary:**\n");
            for line in &node.summary {
                out.push_str(&format!("- {line}\n"));
            }
            out.push('\n');
        }
        let warnings: Vec<_> = graph.warnings_for(&node.file_path).collect();
        if !warnings.is_empty() {
            out.push_str("**Warnings:**\n");
            for warning in warnings {
                out.push_str(&format!("- {}\n", warning.message));
            }
            out.push('\n');
        }
    }
    let skipped: Vec<_> = graph.tree_warnings().collect();
    if !skipped.is_empty() {
        out.push_str("### Skipped paths\n\n");
        for warning in skipped {
            out.push_str(&format!("- {}\n", warning.message));
        }
        out.push('\n');
    }
    out
}

fn externals_section(graph: &DependencyGraph) -> String {
    if graph.externals().is_empty() {
        return "_None detected._".to_string();
    }
    graph
        .externals()
        .iter()
        .take(MAX_EXTERNALS)
        .map(|e| format!("- `{}` ×{}", e.reference, e.count))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use geist_analyzer::{AnalysisWarning, FileAnalysis};

    use super::*;

    fn topic_context() -> Context {
        Context::new()
            .with(topic_keys::TOPIC, "Astral parasites")
            .unwrap()
            .with(topic_keys::CURRENT_YEAR, "2025")
            .unwrap()
            .with(topic_keys::FINDINGS, "- one\n- two\n")
            .unwrap()
            .with(topic_keys::REPORT, "Long form.")
            .unwrap()
    }

    fn graph() -> DependencyGraph {
        let mut broken = FileAnalysis::new("app/broken.py");
        broken.warnings.push("analysis error in app/broken.py: bad".into());
        let main = FileAnalysis {
            imports: vec!["./util.py".into(), "requests".into(), "os".into()],
            role: "Entry point".into(),
            api: vec!["main()".into()],
            summary: vec!["Starts things".into()],
            ..FileAnalysis::new("app/main.py")
        };
        let util = FileAnalysis {
            imports: vec!["os".into()],
            ..FileAnalysis::new("app/util.py")
        };
        DependencyGraph::build(vec![broken, main, util], 2)
    }

    fn codebase_context(overview: &str) -> Context {
        Context::new()
            .with(codebase_keys::TITLE, "Unveil: demo")
            .unwrap()
            .with(codebase_keys::ROOT_NAME, "demo")
            .unwrap()
            .with(codebase_keys::COLLABORATION, "They talk.")
            .unwrap()
            .with(codebase_keys::OVERVIEW, overview)
            .unwrap()
    }

    #[test]
    fn topic_sections_in_template_order() {
        let doc = synthesize_topic(&topic_context(), Local::now()).unwrap();
        assert_eq!(doc.title, "Astral parasites");
        let headings: Vec<&str> = doc.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, TOPIC_SECTIONS);
        assert_eq!(doc.sections[0].body, "- one\n- two");
        assert_eq!(doc.category, ReportCategory::Topic);
    }

    #[test]
    fn synthesis_is_pure() {
        let at = Local::now();
        let a = synthesize_codebase(&codebase_context("Overview."), &graph(), at).unwrap();
        let b = synthesize_codebase(&codebase_context("Overview."), &graph(), at).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn codebase_sections_and_content() {
        let doc = synthesize_codebase(&codebase_context("Overview."), &graph(), Local::now()).unwrap();
        let headings: Vec<&str> = doc.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, CODEBASE_SECTIONS);
        assert_eq!(doc.subject, "demo");

        let overview = &doc.sections[0].body;
        assert!(overview.contains("_Files summarized_: **3**"));
        assert!(overview.ends_with("Overview."));

        let components = &doc.sections[1].body;
        assert!(components.starts_with("They talk."));
        assert!(components.contains("### app\n\n- `app/broken.py`\n- `app/main.py`\n- `app/util.py`"));

        assert!(doc.sections[2].body.contains("n_app_main_py --> n_app_util_py"));

        let notes = &doc.sections[3].body;
        assert!(notes.contains("**Role:** Entry point"));
        assert!(notes.contains("**API:** main()"));
        assert!(notes.contains("**Warnings:**\n- analysis error in app/broken.py: bad"));

        assert_eq!(doc.sections[4].body, "- `os` ×2\n- `requests` ×1");
    }

    #[test]
    fn skipped_paths_are_listed_after_file_notes() {
        let graph = graph().with_warnings([AnalysisWarning {
            file: "app/locked".into(),
            message: "skipped unreadable path app/locked: Permission denied".into(),
        }]);
        let doc = synthesize_codebase(&codebase_context("x"), &graph, Local::now()).unwrap();
        let notes = &doc.sections[3].body;
        assert!(notes.ends_with("### Skipped paths\n\n- skipped unreadable path app/locked: Permission denied\n\n"));
        assert!(!notes.contains("### `app/locked`"));
    }

    #[test]
    fn long_overview_is_truncated() {
        let long = "a".repeat(MAX_OVERVIEW_CHARS + 10);
        let doc = synthesize_codebase(&codebase_context(&long), &graph(), Local::now()).unwrap();
        assert!(doc.sections[0].body.ends_with("*(truncated)*"));
    }

    #[test]
    fn empty_graph_notes_missing_edges_and_externals() {
        let graph = DependencyGraph::build(vec![FileAnalysis::new("solo.py")], 1);
        let doc = synthesize_codebase(&codebase_context("x"), &graph, Local::now()).unwrap();
        assert!(doc.sections[2].body.starts_with("_No internal edges inferred"));
        assert_eq!(doc.sections[4].body, "_None detected._");
    }

    #[test]
    fn missing_output_is_an_error() {
        let ctx = Context::new().with(topic_keys::TOPIC, "x").unwrap();
        assert!(synthesize_topic(&ctx, Local::now()).is_err());
    }
}

//! Dependency graph, component clustering and metrics.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::resolve::{PathIndex, Resolution};

/// Component label for files directly under the tree root.
pub const ROOT_COMPONENT: &str = "(root)";

/// Component that absorbs groups smaller than the minimum cluster size.
pub const OTHER_COMPONENT: &str = "(other)";

/// Everything learned about one file before linking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAnalysis {
    pub rel_path: String,
    /// Raw reference tokens from extraction.
    pub imports: Vec<String>,
    pub role: String,
    pub api: Vec<String>,
    pub summary: Vec<String>,
    /// Non-fatal problems hit while analyzing this file.
    pub warnings: Vec<String>,
}

impl FileAnalysis {
    pub fn new(rel_path: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            ..Self::default()
        }
    }
}

/// One file in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub file_path: String,
    pub role_summary: String,
    pub declared_api: Vec<String>,
    /// Short bullet points describing the file.
    pub summary: Vec<String>,
    pub component: String,
}

/// `from` references `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// An unresolved reference and how many files made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalDependency {
    pub reference: String,
    pub count: usize,
}

/// A per-file problem that did not stop the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisWarning {
    pub file: String,
    pub message: String,
}

/// Output of the source analyzer. Nodes are sorted by path and edges are
/// unique, never self-referencing, and only connect existing nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    externals: Vec<ExternalDependency>,
    warnings: Vec<AnalysisWarning>,
}

impl DependencyGraph {
    /// Link analyzed files into a graph.
    pub fn build(files: Vec<FileAnalysis>, min_cluster_size: usize) -> Self {
        let mut files = files;
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        files.dedup_by(|a, b| a.rel_path == b.rel_path);

        let index = PathIndex::new(files.iter().map(|f| f.rel_path.clone()));
        let mut edges = BTreeSet::new();
        let mut external_counts: BTreeMap<String, usize> = BTreeMap::new();

        for file in &files {
            for token in &file.imports {
                match index.resolve(token, &file.rel_path) {
                    Resolution::Internal(target) if target != file.rel_path => {
                        edges.insert(Edge {
                            from: file.rel_path.clone(),
                            to: target,
                        });
                    }
                    Resolution::Internal(_) | Resolution::Ignored => {}
                    Resolution::External => *external_counts.entry(token.clone()).or_default() += 1,
                }
            }
        }

        let components = assign_components(files.iter().map(|f| f.rel_path.as_str()), min_cluster_size);

        let mut warnings = Vec::new();
        let nodes = files
            .into_iter()
            .map(|file| {
                warnings.extend(file.warnings.into_iter().map(|message| AnalysisWarning {
                    file: file.rel_path.clone(),
                    message,
                }));
                let component = components
                    .get(&file.rel_path)
                    .cloned()
                    .unwrap_or_else(|| OTHER_COMPONENT.to_string());
                Node {
                    file_path: file.rel_path,
                    role_summary: file.role,
                    declared_api: file.api,
                    summary: file.summary,
                    component,
                }
            })
            .collect();

        let mut externals: Vec<ExternalDependency> = external_counts
            .into_iter()
            .map(|(reference, count)| ExternalDependency { reference, count })
            .collect();
        externals.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reference.cmp(&b.reference)));

        Self {
            nodes,
            edges: edges.into_iter().collect(),
            externals,
            warnings,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Sorted by descending count, ties alphabetical.
    pub fn externals(&self) -> &[ExternalDependency] {
        &self.externals
    }

    pub fn warnings(&self) -> &[AnalysisWarning] {
        &self.warnings
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.file_path.as_str().cmp(path))
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Append warnings not tied to an analyzed file, such as paths the walk skipped.
    pub fn with_warnings(mut self, extra: impl IntoIterator<Item = AnalysisWarning>) -> Self {
        self.warnings.extend(extra);
        self
    }

    /// Warnings whose path is not a node.
    pub fn tree_warnings(&self) -> impl Iterator<Item = &AnalysisWarning> {
        self.warnings.iter().filter(move |w| self.node(&w.file).is_none())
    }

    pub fn warnings_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a AnalysisWarning> + 'a {
        self.warnings.iter().filter(move |w| w.file == path)
    }

    /// Component label → member paths, both sorted.
    pub fn components(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut out: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for node in &self.nodes {
            out.entry(node.component.as_str())
                .or_default()
                .push(node.file_path.as_str());
        }
        out
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn component_count(&self) -> usize {
        self.components().len()
    }

    pub fn metrics(&self) -> GraphMetrics {
        let mut fan_in: BTreeMap<&str, usize> = BTreeMap::new();
        let mut fan_out: BTreeMap<&str, usize> = BTreeMap::new();
        for edge in &self.edges {
            *fan_out.entry(edge.from.as_str()).or_default() += 1;
            *fan_in.entry(edge.to.as_str()).or_default() += 1;
        }
        let isolated_count = self
            .nodes
            .iter()
            .filter(|n| {
                let path = n.file_path.as_str();
                !fan_in.contains_key(path) && !fan_out.contains_key(path)
            })
            .count();

        GraphMetrics {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            component_count: self.component_count(),
            isolated_count,
            max_fan_in: highest(&fan_in),
            max_fan_out: highest(&fan_out),
        }
    }
}

/// A file and its edge count in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degree {
    pub file: String,
    pub count: usize,
}

/// Derived graph statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub component_count: usize,
    /// Files with no edges in either direction.
    pub isolated_count: usize,
    pub max_fan_in: Option<Degree>,
    pub max_fan_out: Option<Degree>,
}

/// Highest count; the map's path order makes the first maximum win ties.
fn highest(degrees: &BTreeMap<&str, usize>) -> Option<Degree> {
    let mut best: Option<Degree> = None;
    for (file, &count) in degrees {
        if best.as_ref().is_none_or(|b| count > b.count) {
            best = Some(Degree {
                file: (*file).to_string(),
                count,
            });
        }
    }
    best
}

/// Group paths by their first segment; undersized groups merge into `(other)`.
///
/// Root-level files and merged groups get labels no kept directory uses, so
/// two distinct segments never share a component.
pub fn assign_components<'a>(
    paths: impl IntoIterator<Item = &'a str>,
    min_cluster_size: usize,
) -> BTreeMap<String, String> {
    // `None` keys files directly under the root.
    let mut groups: BTreeMap<Option<&str>, Vec<&str>> = BTreeMap::new();
    for path in paths {
        let head = path.split_once('/').map(|(head, _)| head);
        groups.entry(head).or_default().push(path);
    }

    let kept: BTreeSet<&str> = groups
        .iter()
        .filter(|(_, members)| members.len() >= min_cluster_size)
        .filter_map(|(head, _)| *head)
        .collect();
    let root_label = unused_label(ROOT_COMPONENT, &kept);
    let other_label = unused_label(OTHER_COMPONENT, &kept);

    let mut out = BTreeMap::new();
    for (head, members) in groups {
        let label = if members.len() < min_cluster_size {
            other_label.as_str()
        } else {
            head.unwrap_or(root_label.as_str())
        };
        for path in members {
            out.insert(path.to_string(), label.to_string());
        }
    }
    out
}

/// `base`, or `base~N` for the first N that no directory in `taken` uses.
fn unused_label(base: &str, taken: &BTreeSet<&str>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}~{n}"))
        .find(|label| !taken.contains(label.as_str()))
        .unwrap_or_else(|| base.to_string())
}

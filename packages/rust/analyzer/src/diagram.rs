//! Mermaid rendering of a dependency graph.

use std::collections::{BTreeMap, HashSet};

use crate::graph::DependencyGraph;

/// Fenced Mermaid `graph TD` block: node declarations, then edges.
pub fn mermaid(graph: &DependencyGraph) -> String {
    let paths: Vec<&str> = graph.nodes().iter().map(|n| n.file_path.as_str()).collect();
    let labels = friendly_labels(&paths);
    let ids = node_ids(&paths);

    let mut lines = vec!["```mermaid".to_string(), "graph TD".to_string()];
    for path in &paths {
        lines.push(format!("  {}[\"{}\"]", ids[path], labels[path].replace('"', "'")));
    }
    for edge in graph.edges() {
        lines.push(format!("  {} --> {}", ids[edge.from.as_str()], ids[edge.to.as_str()]));
    }
    lines.push("```".to_string());
    lines.join("\n")
}

/// Shortest path suffix that is unique among `paths`.
///
/// Starts from the file name and adds parent segments only where labels collide.
pub fn friendly_labels<'a>(paths: &[&'a str]) -> BTreeMap<&'a str, String> {
    let segments: BTreeMap<&str, Vec<&str>> =
        paths.iter().map(|p| (*p, p.split('/').collect())).collect();
    let mut depth: BTreeMap<&str, usize> = paths.iter().map(|p| (*p, 1)).collect();

    loop {
        let labels: BTreeMap<&str, String> = segments
            .iter()
            .map(|(path, parts)| {
                let d = depth[path].min(parts.len());
                (*path, parts[parts.len() - d..].join("/"))
            })
            .collect();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for label in labels.values() {
            *counts.entry(label.as_str()).or_default() += 1;
        }

        let mut progressed = false;
        for (path, label) in &labels {
            if counts[label.as_str()] > 1 && depth[path] < segments[path].len() {
                if let Some(d) = depth.get_mut(path) {
                    *d += 1;
                    progressed = true;
                }
            }
        }
        if !progressed {
            return labels;
        }
    }
}

/// Mermaid-safe identifiers derived from the path, unique per graph.
fn node_ids<'a>(paths: &[&'a str]) -> BTreeMap<&'a str, String> {
    let mut taken = HashSet::new();
    let mut out = BTreeMap::new();
    for path in paths {
        let base: String = path
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let mut id = format!("n_{base}");
        let mut n = 2;
        while !taken.insert(id.clone()) {
            id = format!("n_{base}_{n}");
            n += 1;
        }
        out.insert(*path, id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FileAnalysis;

    fn graph(files: &[(&str, &[&str])]) -> DependencyGraph {
        DependencyGraph::build(
            files
                .iter()
                .map(|(path, imports)| FileAnalysis {
                    imports: imports.iter().map(|s| s.to_string()).collect(),
                    ..FileAnalysis::new(*path)
                })
                .collect(),
            1,
        )
    }

    #[test]
    fn labels_escalate_only_on_collision() {
        let labels = friendly_labels(&["src/a/mod.rs", "src/b/mod.rs", "src/lib.rs", "x/a/mod.rs"]);
        assert_eq!(labels["src/lib.rs"], "lib.rs");
        assert_eq!(labels["src/b/mod.rs"], "b/mod.rs");
        assert_eq!(labels["src/a/mod.rs"], "src/a/mod.rs");
        assert_eq!(labels["x/a/mod.rs"], "x/a/mod.rs");
    }

    #[test]
    fn declarations_precede_edges() {
        let g = graph(&[("app/main.py", &["./util.py"]), ("app/util.py", &[]), ("solo.py", &[])]);
        let text = mermaid(&g);
        assert!(text.starts_with("```mermaid\ngraph TD\n"));
        assert!(text.ends_with("```"));
        assert!(text.contains("  n_solo_py[\"solo.py\"]"));
        let last_decl = text.rfind("[\"").unwrap();
        let first_edge = text.find("-->").unwrap();
        assert!(last_decl < first_edge);
        assert!(text.contains("  n_app_main_py --> n_app_util_py"));
    }

    #[test]
    fn ids_stay_unique() {
        let ids = node_ids(&["a-b.py", "a_b.py"]);
        assert_ne!(ids["a-b.py"], ids["a_b.py"]);
    }

    #[test]
    fn rendering_is_deterministic() {
        let files: &[(&str, &[&str])] = &[("b.py", &["a"]), ("a.py", &["b"])];
        assert_eq!(mermaid(&graph(files)), mermaid(&graph(files)));
    }
}

//! Resolution of raw reference tokens to tree-relative paths.
//!
//! Works entirely against the in-memory set of enumerated paths, so the
//! result depends only on the file list and never on the disk.

use std::collections::BTreeSet;

/// Suffixes tried when a reference omits the file extension.
const CANDIDATE_SUFFIXES: &[&str] = &[
    ".py", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".css", ".scss", ".html", ".htm", ".vue",
    ".go", ".rb", ".php", ".java", ".kt", ".kts", ".c", ".h", ".hpp", ".hh", ".cc", ".cpp", ".cs",
    ".rs",
];

/// Files that stand in for their directory.
const DIRECTORY_INDEXES: &[&str] = &[
    "index.ts", "index.tsx", "index.js", "index.jsx", "index.mjs", "index.cjs", "__init__.py",
    "mod.rs",
];

/// Source roots searched for dotted module names.
const MODULE_ROOTS: &[&str] = &["src/main/java", "src/main/kotlin", "src", ""];

/// Suffixes appended to a dotted module path.
const MODULE_SUFFIXES: &[&str] = &[".py", ".java", ".kt", ".kts", ".cs", "/__init__.py"];

/// Prefixes of references that point at nothing on disk.
const IGNORED_PREFIXES: &[&str] = &["#", "data:", "mailto:", "tel:", "javascript:"];

/// Prefixes of references that are always outside the tree.
const REMOTE_PREFIXES: &[&str] = &["http://", "https://", "//"];

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A file in the tree.
    Internal(String),
    /// Unresolved or remote; tallied as an external dependency.
    External,
    /// Anchors and non-file schemes; neither an edge nor a dependency.
    Ignored,
}

/// The set of tree paths references are resolved against.
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    files: BTreeSet<String>,
    dirs: BTreeSet<String>,
}

impl PathIndex {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let files: BTreeSet<String> = paths.into_iter().map(Into::into).collect();
        let mut dirs = BTreeSet::new();
        for file in &files {
            let mut dir = parent_dir(file);
            while !dir.is_empty() && dirs.insert(dir.to_string()) {
                dir = parent_dir(dir);
            }
        }
        Self { files, dirs }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    /// Resolve `token` as referenced from the file at `source`.
    pub fn resolve(&self, token: &str, source: &str) -> Resolution {
        let token = token.trim();
        if token.is_empty() {
            return Resolution::Ignored;
        }
        let lower = token.to_lowercase();
        if IGNORED_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return Resolution::Ignored;
        }
        if REMOTE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return Resolution::External;
        }

        let normalized = token.replace('\\', "/");
        let t = normalized.trim_end_matches(':');
        let source_dir = parent_dir(source);

        self.resolve_steps(t, source_dir)
            .map_or(Resolution::External, Resolution::Internal)
    }

    fn resolve_steps(&self, t: &str, source_dir: &str) -> Option<String> {
        if let Some(hit) = self.resolve_relative_module(t, source_dir) {
            return Some(hit);
        }

        if t.starts_with("./") || t.starts_with("../") {
            if let Some(hit) = join(source_dir, t).and_then(|c| self.resolve_candidate(&c)) {
                return Some(hit);
            }
        }

        if let Some(rooted) = t.strip_prefix('/') {
            if let Some(hit) = join("", rooted).and_then(|c| self.resolve_candidate(&c)) {
                return Some(hit);
            }
        }

        // Path-like or bare names: relative to the referencing file, then the root.
        if t.contains('/') || !t.contains('.') {
            for base in [source_dir, ""] {
                if let Some(hit) = join(base, t).and_then(|c| self.resolve_candidate(&c)) {
                    return Some(hit);
                }
            }
        }

        if t.contains('.') && !t.contains('/') {
            let module: Vec<&str> = t.split('.').filter(|s| !s.is_empty()).collect();
            if !module.is_empty() {
                let module = module.join("/");
                for base in MODULE_ROOTS {
                    for suffix in MODULE_SUFFIXES {
                        let guess = join_segments(base, &format!("{module}{suffix}"));
                        if self.files.contains(&guess) {
                            return Some(guess);
                        }
                    }
                }
            }
        }

        // Last-segment rescue: `pkg/sub.mod` → any file whose stem is `mod`.
        let tail = t.rsplit('/').next().unwrap_or(t);
        let last = tail.rsplit('.').next().unwrap_or(tail);
        if !last.is_empty() {
            if let Some(hit) = self.files.iter().find(|f| stem(f) == last) {
                return Some(hit.clone());
            }
        }

        let name = tail;
        if !name.is_empty() {
            if let Some(hit) = self.files.iter().find(|f| file_name(f) == name) {
                return Some(hit.clone());
            }
            let name_stem = stem_of(name);
            if let Some(hit) = self.files.iter().find(|f| stem(f) == name_stem) {
                return Some(hit.clone());
            }
        }

        None
    }

    /// Leading-dot modules (`.models`, `..pkg.util`) relative to the package
    /// of the referencing file.
    fn resolve_relative_module(&self, t: &str, source_dir: &str) -> Option<String> {
        if !t.starts_with('.') || t.contains('/') {
            return None;
        }
        let rest = t.trim_start_matches('.');
        let depth = t.len() - rest.len();
        let mut base = source_dir;
        for _ in 1..depth {
            if base.is_empty() {
                return None;
            }
            base = parent_dir(base);
        }
        let module: Vec<&str> = rest.split('.').filter(|s| !s.is_empty()).collect();
        let candidate = if module.is_empty() {
            base.to_string()
        } else {
            join_segments(base, &module.join("/"))
        };
        self.resolve_candidate(&candidate)
    }

    /// The candidate itself, with a source suffix, or as a directory index.
    fn resolve_candidate(&self, candidate: &str) -> Option<String> {
        if candidate.is_empty() {
            return None;
        }
        if self.files.contains(candidate) {
            return Some(candidate.to_string());
        }
        for suffix in CANDIDATE_SUFFIXES {
            let guess = with_suffix(candidate, suffix);
            if self.files.contains(&guess) {
                return Some(guess);
            }
        }
        if self.dirs.contains(candidate) {
            for index in DIRECTORY_INDEXES {
                let guess = format!("{candidate}/{index}");
                if self.files.contains(&guess) {
                    return Some(guess);
                }
            }
        }
        None
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn stem_of(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn stem(path: &str) -> &str {
    stem_of(file_name(path))
}

/// Replace the extension of the last segment, or append one.
fn with_suffix(path: &str, suffix: &str) -> String {
    let name = file_name(path);
    let stem = stem_of(name);
    if stem.len() == name.len() {
        format!("{path}{suffix}")
    } else {
        format!("{}{suffix}", &path[..path.len() - (name.len() - stem.len())])
    }
}

/// Lexically join `rel` onto `base`; `None` when `..` climbs above the root.
fn join(base: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn join_segments(base: &str, rel: &str) -> String {
    if base.is_empty() {
        rel.to_string()
    } else {
        format!("{base}/{rel}")
    }
}

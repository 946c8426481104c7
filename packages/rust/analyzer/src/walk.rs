//! Deterministic enumeration of the files to analyze.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use geist_shared::{GeistError, Result};

use crate::graph::AnalysisWarning;

/// Which files the walk yields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// Lowercase extensions with the dot (`.rs`), or exact file names (`Dockerfile`).
    pub extensions: Vec<String>,
    /// Directory names never descended into.
    pub exclude_dirs: Vec<String>,
    /// Keep only paths under one of these tree-relative prefixes (empty keeps all).
    pub include_prefixes: Vec<String>,
    /// Drop paths under any of these tree-relative prefixes.
    pub exclude_prefixes: Vec<String>,
    /// Cap applied after sorting; 0 means no cap.
    pub max_files: usize,
}

/// A file selected for analysis.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceFile {
    /// Tree-relative path with `/` separators.
    pub rel_path: String,
    pub abs_path: PathBuf,
}

/// Result of a walk: the selected files plus entries that could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Walk {
    pub files: Vec<SourceFile>,
    pub skipped: Vec<AnalysisWarning>,
}

/// Enumerate matching files under `root`, sorted by relative path.
pub fn walk_files(root: &Path, options: &WalkOptions) -> Result<Walk> {
    if !root.is_dir() {
        return Err(GeistError::analysis(
            root.display().to_string(),
            "root is not a directory",
        ));
    }

    let include_prefixes = normalize_prefixes(&options.include_prefixes);
    let exclude_prefixes = normalize_prefixes(&options.exclude_prefixes);

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry, &options.exclude_dirs));

    let mut files = Vec::new();
    let mut skipped = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                skipped.push(skipped_entry(root, &e));
                continue;
            }
        };
        if !entry.file_type().is_file() || !matches_extension(entry.path(), &options.extensions) {
            continue;
        }
        let Some(rel_path) = relative_posix(root, entry.path()) else {
            continue;
        };
        if !include_prefixes.is_empty() && !include_prefixes.iter().any(|p| under_prefix(&rel_path, p)) {
            continue;
        }
        if exclude_prefixes.iter().any(|p| under_prefix(&rel_path, p)) {
            continue;
        }
        files.push(SourceFile {
            rel_path,
            abs_path: entry.into_path(),
        });
    }

    files.sort();
    if options.max_files > 0 && files.len() > options.max_files {
        debug!(found = files.len(), max = options.max_files, "truncating file list");
        files.truncate(options.max_files);
    }
    Ok(Walk { files, skipped })
}

fn skipped_entry(root: &Path, error: &walkdir::Error) -> AnalysisWarning {
    let file = error
        .path()
        .map(|p| relative_posix(root, p).unwrap_or_else(|| p.display().to_string()))
        .unwrap_or_else(|| ".".to_string());
    let reason = error
        .io_error()
        .map(|e| e.to_string())
        .unwrap_or_else(|| error.to_string());
    AnalysisWarning {
        message: format!("skipped unreadable path {file}: {reason}"),
        file,
    }
}

fn is_skipped_dir(entry: &DirEntry, exclude_dirs: &[String]) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name.ends_with(".egg-info") || exclude_dirs.iter().any(|d| *d == name)
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
    extensions
        .iter()
        .any(|wanted| *wanted == name || ext.as_deref() == Some(wanted.to_lowercase().as_str()))
}

fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn normalize_prefixes(prefixes: &[String]) -> Vec<String> {
    prefixes
        .iter()
        .map(|p| {
            p.replace('\\', "/")
                .trim_start_matches("./")
                .trim_matches('/')
                .to_string()
        })
        .filter(|p| !p.is_empty())
        .collect()
}

fn under_prefix(rel_path: &str, prefix: &str) -> bool {
    rel_path == prefix
        || rel_path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

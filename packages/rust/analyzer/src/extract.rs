//! Per-language import and export extraction.
//!
//! [`PatternExtractor`] is a best-effort line matcher, not a parser. The
//! [`ImportExtractor`] trait is the seam where a stricter per-language
//! parser can be substituted without touching resolution or clustering.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use geist_shared::Result;

/// What a single file declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Raw reference tokens, normalized and de-duplicated in source order.
    pub imports: Vec<String>,
    /// Public symbol names the file declares.
    pub exports: Vec<String>,
}

/// Extracts references and declared symbols from one source file.
pub trait ImportExtractor: Send + Sync {
    fn extract(&self, rel_path: &str, source: &str) -> Result<Extraction>;
}

/// Source language, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    CFamily,
    Java,
    Kotlin,
    CSharp,
    Go,
    Php,
    Ruby,
    Css,
    Html,
    Rust,
    Other,
}

impl Language {
    pub fn from_path(rel_path: &str) -> Self {
        let ext = Path::new(rel_path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "py" => Self::Python,
            "js" | "mjs" | "cjs" | "ts" | "tsx" | "jsx" | "vue" => Self::JavaScript,
            "c" | "h" | "hpp" | "hh" | "cc" | "cpp" => Self::CFamily,
            "java" => Self::Java,
            "kt" | "kts" => Self::Kotlin,
            "cs" => Self::CSharp,
            "go" => Self::Go,
            "php" => Self::Php,
            "rb" => Self::Ruby,
            "css" | "scss" | "sass" => Self::Css,
            "html" | "htm" => Self::Html,
            "rs" => Self::Rust,
            _ => Self::Other,
        }
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
}

// ---------------------------------------------------------------------------
// Import patterns
// ---------------------------------------------------------------------------

static PY_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*(?:from\s+([A-Za-z0-9_.]+)\s+import|import\s+([A-Za-z0-9_.]+))")
});
static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    re(concat!(
        r#"(?m)^\s*import\s+.*?from\s+['"]([^'"]+)['"]"#,
        r#"|^\s*import\s+['"]([^'"]+)['"]"#,
        r#"|^\s*export\s+.*?from\s+['"]([^'"]+)['"]"#,
        r#"|require\(\s*['"]([^'"]+)['"]\s*\)"#,
        r#"|import\(\s*['"]([^'"]+)['"]\s*\)"#,
    ))
});
static C_INCLUDE: LazyLock<Regex> = LazyLock::new(|| re(r#"(?m)^\s*#\s*include\s*[<"]([^>"]+)[>"]"#));
static JAVA_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^\s*import\s+(?:static\s+)?([A-Za-z_][\w.]*)\s*;"));
static KOTLIN_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^\s*import\s+([A-Za-z_][\w.]*)(?:\s+as\s+\w+)?"));
static CSHARP_USING: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*using\s+(?:static\s+)?(?:\w+\s*=\s*)?([A-Za-z_][\w.]*)\s*;")
});
static GO_SINGLE: LazyLock<Regex> = LazyLock::new(|| re(r#"(?m)^\s*import\s+(?:[\w.]+\s+)?"([^"]+)""#));
static GO_BLOCK: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^\s*import\s*\(([^)]*)\)"));
static GO_BLOCK_LINE: LazyLock<Regex> = LazyLock::new(|| re(r#"(?m)^\s*(?:[\w.]+\s+)?"([^"]+)""#));
static PHP_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?i)(?:require|include)(?:_once)?\s*\(?\s*['"]([^'"]+)['"]\s*\)?"#)
});
static RUBY_REQUIRE: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?m)^\s*require(?:_relative)?\s*\(?\s*['"]([^'"]+)['"]"#));
static CSS_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?i)@(?:import|use|forward)\s+(?:url\()?\s*["']?([^"');\s]+)"#));
static HTML_SRC_HREF: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?i)\b(?:src|href)\s*=\s*["']([^"']+)["']"#));
static RUST_MOD: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_]\w*)\s*;"));
static RUST_USE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?:::)?([A-Za-z_]\w*)")
});
static RUST_EXTERN_CRATE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^\s*extern\s+crate\s+([A-Za-z_]\w*)"));

// ---------------------------------------------------------------------------
// Export patterns
// ---------------------------------------------------------------------------

static PY_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^(?:async\s+def|def|class)\s+([A-Za-z_]\w*)"));
static JS_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    re(concat!(
        r"(?m)^\s*export\s+(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?",
        r"(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
    ))
});
static RUST_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    re(concat!(
        r"(?m)^\s*pub\s+(?:async\s+)?(?:unsafe\s+)?(?:const\s+fn\s+|",
        r"(?:fn|struct|enum|trait|type|const|static|mod|union)\s+)([A-Za-z_]\w*)",
    ))
});
static GO_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Z]\w*)"));
static JVM_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    re(concat!(
        r"(?m)^\s*public\s+(?:(?:static|final|abstract|sealed|partial)\s+)*",
        r"(?:class|interface|enum|record|struct)\s+([A-Za-z_]\w*)",
    ))
});
static KOTLIN_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    re(concat!(
        r"(?m)^(?:public\s+)?(?:(?:data|sealed|open|abstract|enum)\s+)*",
        r"(?:class|interface|object)\s+([A-Za-z_]\w*)",
    ))
});

/// Rust path roots that never leave the crate.
const RUST_INTERNAL_ROOTS: &[&str] = &["crate", "self", "super", "Self"];

/// Regex-based extractor covering the common languages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl ImportExtractor for PatternExtractor {
    fn extract(&self, rel_path: &str, source: &str) -> Result<Extraction> {
        let language = Language::from_path(rel_path);
        Ok(Extraction {
            imports: normalize_tokens(import_tokens(language, source)),
            exports: dedupe(export_names(language, source)),
        })
    }
}

/// First non-empty capture group of every match.
fn captures(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .find(|s| !s.is_empty())
                .map(str::to_string)
        })
        .collect()
}

fn import_tokens(language: Language, source: &str) -> Vec<String> {
    match language {
        Language::Python => captures(&PY_IMPORT, source),
        Language::JavaScript => captures(&JS_IMPORT, source),
        Language::CFamily => captures(&C_INCLUDE, source),
        Language::Java => captures(&JAVA_IMPORT, source),
        Language::Kotlin => captures(&KOTLIN_IMPORT, source),
        Language::CSharp => captures(&CSHARP_USING, source),
        Language::Go => {
            let mut tokens = captures(&GO_SINGLE, source);
            for block in GO_BLOCK.captures_iter(source) {
                if let Some(body) = block.get(1) {
                    tokens.extend(captures(&GO_BLOCK_LINE, body.as_str()));
                }
            }
            tokens
        }
        Language::Php => captures(&PHP_REQUIRE, source),
        Language::Ruby => captures(&RUBY_REQUIRE, source),
        Language::Css => captures(&CSS_IMPORT, source),
        Language::Html => captures(&HTML_SRC_HREF, source),
        Language::Rust => {
            // `mod x;` is a sibling file; `use` roots other than the crate itself are crates.
            let mut tokens: Vec<String> = captures(&RUST_MOD, source)
                .into_iter()
                .map(|name| format!("./{name}"))
                .collect();
            tokens.extend(
                captures(&RUST_USE, source)
                    .into_iter()
                    .chain(captures(&RUST_EXTERN_CRATE, source))
                    .filter(|root| !RUST_INTERNAL_ROOTS.contains(&root.as_str())),
            );
            tokens
        }
        Language::Other => Vec::new(),
    }
}

fn export_names(language: Language, source: &str) -> Vec<String> {
    match language {
        Language::Python => captures(&PY_EXPORT, source),
        Language::JavaScript => captures(&JS_EXPORT, source),
        Language::Rust => captures(&RUST_EXPORT, source),
        Language::Go => captures(&GO_EXPORT, source),
        Language::Java | Language::CSharp => captures(&JVM_EXPORT, source),
        Language::Kotlin => captures(&KOTLIN_EXPORT, source),
        _ => Vec::new(),
    }
}

/// Backslashes become slashes; blank and dot-only tokens are dropped; first occurrence wins.
fn normalize_tokens(tokens: Vec<String>) -> Vec<String> {
    let cleaned = tokens
        .into_iter()
        .map(|t| t.replace('\\', "/").trim().to_string())
        .filter(|t| !t.is_empty() && !t.chars().all(|c| c == '.'))
        .collect();
    dedupe(cleaned)
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

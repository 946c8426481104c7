//! Core domain types: agents, report documents, output locations.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a sanitized file stem.
const MAX_STEM_LEN: usize = 64;

/// Stem used when sanitization leaves nothing behind.
const FALLBACK_STEM: &str = "untitled";

/// Timestamp layout embedded in artifact file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%m-%d-%Y_%H-%M";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// What an agent is permitted to do with the model capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Research,
    Write,
    Analyze,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Research => f.write_str("RESEARCH"),
            Self::Write => f.write_str("WRITE"),
            Self::Analyze => f.write_str("ANALYZE"),
        }
    }
}

/// A role-specialized executor: plain configuration, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    role: String,
    goal: String,
    constraints: Vec<String>,
    capabilities: BTreeSet<Capability>,
}

impl Agent {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        constraints: Vec<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            constraints,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Behavioral directives, sent to the model as system instructions.
    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    pub fn permits(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Frame an instruction with this agent's role and goal.
    pub fn frame(&self, instruction: &str) -> String {
        format!(
            "You are the {}. Your goal: {}\n\n{}",
            self.role, self.goal, instruction
        )
    }
}

// ---------------------------------------------------------------------------
// ReportDocument
// ---------------------------------------------------------------------------

/// Which pipeline produced a report; decides the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    Topic,
    Codebase,
}

impl ReportCategory {
    /// Directory name under the reports root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Topic => "scrying_reports",
            Self::Codebase => "unveil_reports",
        }
    }
}

/// One H2 section of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub body: String,
}

impl ReportSection {
    pub fn new(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
        }
    }
}

/// The synthesized report. Built once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub title: String,
    pub generated_at: DateTime<Local>,
    pub sections: Vec<ReportSection>,
    /// Pipeline shape that produced this report.
    pub category: ReportCategory,
    /// Topic string or tree root name; the file stem is derived from it.
    pub subject: String,
}

impl ReportDocument {
    /// Where this document should be written.
    pub fn locator(&self) -> OutputLocator {
        OutputLocator::new(self.category, &self.subject, self.generated_at.naive_local())
    }

    /// Section text without the title line or timestamp.
    pub fn body(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str("## ");
            out.push_str(&section.heading);
            out.push_str("\n\n");
            let body = section.body.trim_end();
            if !body.is_empty() {
                out.push_str(body);
                out.push_str("\n\n");
            }
        }
        out
    }

    /// Full Markdown rendering: H1 title, generation stamp, H2 sections.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# {}\n\n_Generated: {}_\n\n",
            self.title,
            self.generated_at.format("%Y-%m-%d %H:%M")
        );
        out.push_str(&self.body());
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        out.push('\n');
        out
    }
}

// ---------------------------------------------------------------------------
// OutputLocator
// ---------------------------------------------------------------------------

/// Category directory plus `<stem>_<MM-DD-YYYY_HH-MM>.md` file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocator {
    pub category: ReportCategory,
    pub file_stem: String,
    /// Minute-precision timestamp.
    pub timestamp: NaiveDateTime,
}

impl OutputLocator {
    /// Build a locator, sanitizing `subject` and truncating `at` to the minute.
    pub fn new(category: ReportCategory, subject: &str, at: NaiveDateTime) -> Self {
        Self {
            category,
            file_stem: sanitize_stem(subject),
            timestamp: truncate_to_minute(at),
        }
    }

    /// Same locator, stamped with a different time.
    pub fn at(&self, at: NaiveDateTime) -> Self {
        Self {
            category: self.category,
            file_stem: self.file_stem.clone(),
            timestamp: truncate_to_minute(at),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.md",
            self.file_stem,
            self.timestamp.format(FILE_TIMESTAMP_FORMAT)
        )
    }

    /// Path relative to the reports root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.category.dir_name()).join(self.file_name())
    }
}

fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DISALLOWED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());

/// Whitespace runs become `_`; anything outside `[A-Za-z0-9_-]` is dropped.
pub fn sanitize_stem(subject: &str) -> String {
    let underscored = WHITESPACE_RE.replace_all(subject.trim(), "_");
    let cleaned = DISALLOWED_RE.replace_all(&underscored, "");
    let stem: String = cleaned.trim_matches('_').chars().take(MAX_STEM_LEN).collect();
    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem
    }
}

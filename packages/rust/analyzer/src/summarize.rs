//! Per-file role and API summaries produced through the capability client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use geist_capability::CapabilityClient;
use geist_shared::{Agent, Capability, GeistError, Result};

/// Most API entries kept per file.
pub const MAX_API_ITEMS: usize = 12;

/// Most summary bullets kept per file.
pub const MAX_SUMMARY_ITEMS: usize = 8;

/// Longest summary bullet, in characters, before truncation.
pub const MAX_SUMMARY_CHARS: usize = 300;

/// What the file analyst says about one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSummary {
    pub role: String,
    pub api: Vec<String>,
    pub summary: Vec<String>,
}

/// Produces a [`FileSummary`] for one file.
#[async_trait]
pub trait FileSummarizer: Send + Sync {
    async fn summarize(&self, rel_path: &str, source: &str) -> Result<FileSummary>;
}

/// Summarizer making one capability call per file.
pub struct CapabilitySummarizer {
    client: CapabilityClient,
    agent: Arc<Agent>,
    chunk_chars: usize,
    chunks_per_file: usize,
}

impl CapabilitySummarizer {
    /// Fails when `agent` is not permitted to analyze.
    pub fn new(
        client: CapabilityClient,
        agent: Arc<Agent>,
        chunk_chars: usize,
        chunks_per_file: usize,
    ) -> Result<Self> {
        if !agent.permits(Capability::Analyze) {
            return Err(GeistError::validation(format!(
                "agent `{}` lacks the {} capability needed for file summaries",
                agent.role(),
                Capability::Analyze
            )));
        }
        Ok(Self {
            client,
            agent,
            chunk_chars: chunk_chars.max(1),
            chunks_per_file: chunks_per_file.max(1),
        })
    }

    fn prompt(&self, rel_path: &str, source: &str) -> String {
        let chunks = chunk_text(source, self.chunk_chars);
        let shown: Vec<&str> = chunks.iter().take(self.chunks_per_file).map(String::as_str).collect();
        format!(
            "You are analyzing a single code file. Return pure JSON with exactly these keys:\n\
             \x20 role: short purpose of the file,\n\
             \x20 api: array of public functions/classes it exposes,\n\
             \x20 summary: 3-6 bullet points explaining what it does and how it interacts.\n\n\
             File: {rel_path}\n\
             Context (first {} chunk(s)):\n{}",
            shown.len(),
            shown.join("\n---\n")
        )
    }
}

#[async_trait]
impl FileSummarizer for CapabilitySummarizer {
    async fn summarize(&self, rel_path: &str, source: &str) -> Result<FileSummary> {
        let prompt = self.agent.frame(&self.prompt(rel_path, source));
        let answer = self.client.complete(&prompt, self.agent.constraints()).await?;
        parse_summary(&answer).ok_or_else(|| {
            debug!(rel_path, answer_chars = answer.len(), "unparseable file summary");
            GeistError::analysis(rel_path, "file analyst returned no parseable JSON summary")
        })
    }
}

/// Split into pieces of at most `max_chars` characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
}

/// Parse a model answer, accepting plain JSON or a fenced block.
pub fn parse_summary(answer: &str) -> Option<FileSummary> {
    let value = parse_json_object(answer)?;
    let role = match value.get("role") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Some(FileSummary {
        role,
        api: value.get("api").map(format_api).unwrap_or_default(),
        summary: value.get("summary").map(format_summary).unwrap_or_default(),
    })
}

fn parse_json_object(answer: &str) -> Option<serde_json::Map<String, Value>> {
    let text = answer.trim();
    let body = fenced_block(text).unwrap_or(text);
    let parsed = serde_json::from_str::<Value>(body).ok().or_else(|| {
        // Prose around the object: fall back to the outermost braces.
        let start = body.find('{')?;
        let end = body.rfind('}')?;
        (start < end)
            .then(|| serde_json::from_str::<Value>(&body[start..=end]).ok())
            .flatten()
    })?;
    match parsed {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Contents of the first ``` fence, minus its info line.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let end = rest.find("```")?;
    let block = &rest[..end];
    let body = block.split_once('\n').map_or(block, |(_, body)| body);
    Some(body.trim())
}

/// Render API entries as `name(p1, p2)` strings.
pub fn format_api(value: &Value) -> Vec<String> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(obj) => {
                let name = ["name", "function", "id"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .filter(|n| !n.is_empty());
                match name {
                    Some(name) => {
                        let params = obj.get("params").or_else(|| obj.get("parameters"));
                        let names = params.map(param_names).unwrap_or_default();
                        if names.is_empty() {
                            Some(name.to_string())
                        } else {
                            Some(format!("{name}({})", names.join(", ")))
                        }
                    }
                    None => Some(item.to_string()),
                }
            }
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|s| !s.is_empty())
        .take(MAX_API_ITEMS)
        .collect()
}

fn param_names(params: &Value) -> Vec<String> {
    match params {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => items
            .iter()
            .map(|p| match p {
                Value::String(s) => s.clone(),
                Value::Object(obj) => obj
                    .get("name")
                    .map(|n| n.as_str().map_or_else(|| n.to_string(), str::to_string))
                    .unwrap_or_else(|| p.to_string()),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Coerce a summary into at most eight trimmed bullets.
pub fn format_summary(value: &Value) -> Vec<String> {
    let items: Vec<String> = match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                Value::Object(obj) => ["text", "description", "summary"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .map_or_else(|| item.to_string(), str::to_string),
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    };

    items
        .into_iter()
        .take(MAX_SUMMARY_ITEMS)
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if s.chars().count() > MAX_SUMMARY_CHARS {
                let cut: String = s.chars().take(MAX_SUMMARY_CHARS).collect();
                Some(format!("{}…", cut.trim_end()))
            } else {
                Some(s.to_string())
            }
        })
        .collect()
}

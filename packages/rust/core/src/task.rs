//! Task definitions and instruction templating.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use geist_shared::{Agent, Capability, Context, GeistError, Result};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// One pipeline step: an agent, an instruction template, and the context
/// keys it reads and writes.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: String,
    pub agent: Arc<Agent>,
    /// Capability this task exercises; the agent must permit it.
    pub capability: Capability,
    /// Instruction with `{key}` placeholders.
    pub instruction: String,
    pub input_keys: BTreeSet<String>,
    pub output_key: String,
    pub depends_on: Vec<String>,
}

impl TaskSpec {
    /// A task writing its answer under its own id until [`TaskSpec::writes`] says otherwise.
    pub fn new(
        id: impl Into<String>,
        agent: Arc<Agent>,
        capability: Capability,
        instruction: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            output_key: id.clone(),
            id,
            agent,
            capability,
            instruction: instruction.into(),
            input_keys: BTreeSet::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn reads<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn writes(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn after<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Placeholder names in the instruction, in first-use order.
    pub fn placeholders(&self) -> Vec<&str> {
        placeholders(&self.instruction)
    }

    /// Substitute every placeholder from `context`.
    pub fn render(&self, context: &Context) -> Result<String> {
        render(&self.instruction, context)
    }
}

/// Placeholder names in `template`, de-duplicated in first-use order.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Replace `{key}` with the context value; records render as compact JSON.
pub fn render(template: &str, context: &Context) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = context.get(name.as_str()).ok_or_else(|| {
            GeistError::validation(format!("context has no value for `{{{}}}`", name.as_str()))
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&value.to_string());
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Arc<Agent> {
        Arc::new(Agent::new("Writer", "Write", vec![], [Capability::Write]))
    }

    #[test]
    fn placeholders_in_order_without_duplicates() {
        assert_eq!(
            placeholders("About {topic} in {current_year}; again {topic}. Not {this one} or {}"),
            vec!["topic", "current_year"]
        );
    }

    #[test]
    fn rendering_substitutes_text_and_records() {
        let ctx = Context::new()
            .with("topic", "ghosts")
            .unwrap()
            .with("metrics", serde_json::json!({"nodes": 3}))
            .unwrap();
        let task = TaskSpec::new("t", agent(), Capability::Write, "On {topic}: {metrics}.");
        assert_eq!(task.render(&ctx).unwrap(), "On ghosts: {\"nodes\":3}.");
    }

    #[test]
    fn rendering_missing_key_is_validation_error() {
        let err = render("{absent}", &Context::new()).unwrap_err();
        assert_eq!(err.stage(), "validation");
    }

    #[test]
    fn builder_defaults_output_to_id() {
        let task = TaskSpec::new("research", agent(), Capability::Write, "x");
        assert_eq!(task.output_key, "research");
        let task = task.writes("findings").reads(["topic"]).after(["prep"]);
        assert_eq!(task.output_key, "findings");
        assert!(task.input_keys.contains("topic"));
        assert_eq!(task.depends_on, vec!["prep"]);
    }
}

//! Append-only run context threaded through a pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GeistError, Result};

/// A value produced by a task or seeded before a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// Opaque text, typically a model answer.
    Text(String),
    /// Structured record (graph metrics, tallies, ...).
    Record(serde_json::Value),
}

impl ContextValue {
    /// Borrow the text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Record(_) => None,
        }
    }
}

impl std::fmt::Display for ContextValue {
    /// Text renders verbatim; records render as compact JSON.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Record(v) => write!(f, "{v}"),
        }
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Record(v)
    }
}

/// Mapping from context key to value.
///
/// A context is only ever extended: [`Context::with`] consumes the
/// accumulator and returns a new one, and refuses to overwrite a key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    entries: BTreeMap<String, ContextValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the context with one key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Result<Self> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(GeistError::validation(format!(
                "context key `{key}` is already set"
            )));
        }
        self.entries.insert(key, value.into());
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    /// Text of a key, or a validation error naming the missing key.
    pub fn require_text(&self, key: &str) -> Result<&str> {
        match self.entries.get(key) {
            Some(ContextValue::Text(s)) => Ok(s),
            Some(ContextValue::Record(_)) => Err(GeistError::validation(format!(
                "context key `{key}` holds a record, expected text"
            ))),
            None => Err(GeistError::validation(format!(
                "context key `{key}` is missing"
            ))),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_extends_and_keeps_earlier_keys() {
        let ctx = Context::new()
            .with("topic", "Ghosts")
            .and_then(|c| c.with("findings", "- boo"))
            .unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.require_text("topic").unwrap(), "Ghosts");
        assert_eq!(ctx.require_text("findings").unwrap(), "- boo");
    }

    #[test]
    fn with_refuses_to_overwrite() {
        let ctx = Context::new().with("topic", "a").unwrap();
        let err = ctx.with("topic", "b").unwrap_err();
        assert!(err.to_string().contains("already set"));
    }

    #[test]
    fn record_values_render_as_json() {
        let ctx = Context::new()
            .with("metrics", serde_json::json!({"edges": 3}))
            .unwrap();
        assert_eq!(ctx.get("metrics").unwrap().to_string(), r#"{"edges":3}"#);
        assert!(ctx.require_text("metrics").is_err());
        assert!(ctx.require_text("absent").is_err());
    }
}

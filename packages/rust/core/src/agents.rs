//! Agent registry: the built-in role bundles and their config overrides.
//!
//! Agents are built once at startup and shared read-only (`Arc<Agent>`)
//! by every task and run that references them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use geist_shared::{Agent, AgentOverride, Capability, GeistError, Result};

/// Registry key of the topic researcher.
pub const RESEARCHER: &str = "researcher";
/// Registry key of the topic report writer.
pub const REPORTING_ANALYST: &str = "reporting_analyst";
/// Registry key of the per-file summarizer.
pub const FILE_ANALYST: &str = "file_analyst";
/// Registry key of the cross-component linker.
pub const LINKER: &str = "linker";
/// Registry key of the repository overview writer.
pub const ARCHITECT: &str = "architect";

/// Named, immutable agents.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<Agent>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AgentRegistry {
    /// The five built-in agents.
    pub fn builtin() -> Self {
        let agents = [
            (
                RESEARCHER,
                Agent::new(
                    "Senior Data Researcher",
                    "Uncover cutting-edge developments and the most relevant facts about the topic",
                    vec![
                        "Report facts, not opinions.".into(),
                        "Prefer recent, verifiable information and say when something is uncertain.".into(),
                        "Answer in concise Markdown bullet points.".into(),
                    ],
                    [Capability::Research],
                ),
            ),
            (
                REPORTING_ANALYST,
                Agent::new(
                    "Reporting Analyst",
                    "Create detailed reports based on research findings",
                    vec![
                        "Write in clear, well-structured Markdown without a top-level title.".into(),
                        "Only use information present in the provided findings.".into(),
                    ],
                    [Capability::Write],
                ),
            ),
            (
                FILE_ANALYST,
                Agent::new(
                    "File Analyst",
                    "Explain what a single source file does and what it exposes",
                    vec![
                        "Return only valid JSON.".into(),
                        "Do not invent functions that are not in the file.".into(),
                    ],
                    [Capability::Analyze],
                ),
            ),
            (
                LINKER,
                Agent::new(
                    "Dependency Linker",
                    "Explain how the parts of a codebase depend on and collaborate with each other",
                    vec![
                        "Ground every claim in the listed components and edges.".into(),
                        "Avoid speculation.".into(),
                    ],
                    [Capability::Analyze],
                ),
            ),
            (
                ARCHITECT,
                Agent::new(
                    "Software Architect",
                    "Write a concise, engineer-friendly overview of a repository",
                    vec![
                        "Use short paragraphs or bullets.".into(),
                        "Avoid speculation.".into(),
                    ],
                    [Capability::Write, Capability::Analyze],
                ),
            ),
        ];

        Self {
            agents: agents
                .into_iter()
                .map(|(key, agent)| (key.to_string(), Arc::new(agent)))
                .collect(),
        }
    }

    /// Built-in agents with `[agents.<key>]` overrides applied.
    ///
    /// Overrides may change role, goal and constraints, never capabilities.
    pub fn from_overrides(overrides: &BTreeMap<String, AgentOverride>) -> Result<Self> {
        let mut registry = Self::builtin();
        for (key, patch) in overrides {
            let base = registry.agents.get(key).ok_or_else(|| {
                GeistError::config(format!(
                    "unknown agent `{key}` in [agents]; known agents: {}",
                    registry.keys().collect::<Vec<_>>().join(", ")
                ))
            })?;
            let agent = Agent::new(
                patch.role.clone().unwrap_or_else(|| base.role().to_string()),
                patch.goal.clone().unwrap_or_else(|| base.goal().to_string()),
                patch
                    .constraints
                    .clone()
                    .unwrap_or_else(|| base.constraints().to_vec()),
                base.capabilities().iter().copied(),
            );
            debug!(key, role = agent.role(), "agent override applied");
            registry.agents.insert(key.clone(), Arc::new(agent));
        }
        Ok(registry)
    }

    /// Look up an agent by registry key.
    pub fn get(&self, key: &str) -> Result<Arc<Agent>> {
        self.agents
            .get(key)
            .cloned()
            .ok_or_else(|| GeistError::validation(format!("no agent registered as `{key}`")))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }
}

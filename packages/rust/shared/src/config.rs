//! Application configuration for Geist.
//!
//! User config lives at `~/.geist/geist.toml`.
//! CLI flags override environment overlays, which override config file
//! values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GeistError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "geist.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".geist";

/// Environment variable overriding the reports root.
pub const REPORTS_ROOT_ENV: &str = "GEIST_REPORTS_ROOT";

/// Env-var prefix whose `_MODEL`/`_API_BASE` overlay the codebase pipeline's model.
pub const UNVEIL_ENV_PREFIX: &str = "UNVEIL";

// ---------------------------------------------------------------------------
// Config structs (matching geist.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model capability settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Source analysis settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Report output settings.
    #[serde(default)]
    pub reports: ReportsConfig,

    /// Per-role agent overrides, keyed by registry key (e.g. `researcher`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agents: BTreeMap<String, AgentOverride>,
}

/// `[model]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `<provider>/<model>`, e.g. `ollama/qwen2.5:7b-instruct`.
    #[serde(default = "default_binding")]
    pub binding: String,

    /// Base URL of the inference endpoint.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Timeout for a single capability call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per capability call, including the first.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Base delay of the exponential backoff.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single backoff delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Sampling temperature, left to the provider when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            binding: default_binding(),
            api_base: default_api_base(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            temperature: None,
        }
    }
}

fn default_binding() -> String {
    "ollama/qwen2.5:7b-instruct".into()
}
fn default_api_base() -> String {
    "http://localhost:11434".into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    8_000
}

/// Inference provider, the part of the binding before the first `/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Ollama native chat API.
    Ollama,
    /// Anthropic messages API.
    Anthropic,
    /// Any OpenAI-compatible chat-completions endpoint.
    OpenAiCompatible,
}

/// A parsed `<provider>/<model>` binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBinding {
    pub provider: Provider,
    pub model: String,
}

impl ModelConfig {
    /// Parse the `binding` string.
    ///
    /// A binding without a provider prefix is sent to an OpenAI-compatible endpoint.
    pub fn parsed_binding(&self) -> Result<ModelBinding> {
        let binding = self.binding.trim();
        if binding.is_empty() {
            return Err(GeistError::config("model binding is empty"));
        }

        let (provider, model) = match binding.split_once('/') {
            Some(("ollama", model)) => (Provider::Ollama, model),
            Some(("anthropic", model)) => (Provider::Anthropic, model),
            Some((_, model)) if binding.starts_with("openai/") => {
                (Provider::OpenAiCompatible, model)
            }
            _ => (Provider::OpenAiCompatible, binding),
        };

        if model.is_empty() {
            return Err(GeistError::config(format!(
                "model binding `{binding}` names no model"
            )));
        }

        Ok(ModelBinding {
            provider,
            model: model.to_string(),
        })
    }

    /// Parsed endpoint base URL.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(self.api_base.trim_end_matches('/')).map_err(|e| {
            GeistError::config(format!("invalid api_base `{}`: {e}", self.api_base))
        })
    }

    /// Resolve the API key from the configured env var, if any.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
    }

    /// Copy of this config with `<PREFIX>_MODEL` / `<PREFIX>_API_BASE` applied.
    pub fn with_env_prefix(&self, prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut out = self.clone();
        if let Some(binding) = lookup(&format!("{prefix}_MODEL")).filter(|v| !v.is_empty()) {
            out.binding = binding;
        }
        if let Some(base) = lookup(&format!("{prefix}_API_BASE")).filter(|v| !v.is_empty()) {
            out.api_base = base;
        }
        out
    }
}

/// Built-in extension profile scanned by default.
pub const SCAN_EXTS_FAST: &[&str] = &[
    ".py", ".js", ".mjs", ".cjs", ".ts", ".tsx", ".jsx", ".rs", ".java", ".kt", ".kts", ".c",
    ".h", ".hpp", ".hh", ".cc", ".cpp", ".cs", ".go", ".rb", ".php", ".sql", ".vue", ".html",
    ".htm", ".css", ".scss", ".sass",
];

/// Broader profile selected with `--full`.
pub const SCAN_EXTS_FULL: &[&str] = &[
    ".py", ".ipynb", ".js", ".mjs", ".cjs", ".ts", ".tsx", ".jsx", ".rs", ".css", ".scss",
    ".sass", ".html", ".htm", ".json", ".md", ".toml", ".yaml", ".yml", ".ini", ".cfg", ".conf",
    ".sh", ".bash", ".zsh", ".java", ".kt", ".kts", ".c", ".h", ".hpp", ".hh", ".cc", ".cpp",
    ".cs", ".sql", ".go", ".rb", ".php", ".vue", ".tf", ".tfvars", ".txt", "Dockerfile",
    "dockerfile",
];

/// Directory names skipped anywhere in the tree.
pub const SKIP_DIRS: &[&str] = &[
    ".git", ".svn", ".hg", "__pycache__", ".mypy_cache", ".pytest_cache", ".ruff_cache",
    ".venv", "venv", "env", "node_modules", "dist", "build", "target", "out", ".next", ".nuxt",
    ".idea", ".vscode", ".egg-info",
];

/// `[analysis]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Extensions (with dot) or exact file names to scan.
    #[serde(default = "default_include_extensions")]
    pub include_extensions: Vec<String>,

    /// Extension set used when the full profile is requested.
    #[serde(default = "default_full_extensions")]
    pub full_profile_extensions: Vec<String>,

    /// Directory names never descended into.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// Components smaller than this merge into `(other)`.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Cap on files analyzed, applied after sorting.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Characters per chunk sent to the file analyst.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Leading chunks of each file included in its prompt.
    #[serde(default = "default_chunks_per_file")]
    pub chunks_per_file: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            include_extensions: default_include_extensions(),
            full_profile_extensions: default_full_extensions(),
            exclude_dirs: default_exclude_dirs(),
            min_cluster_size: default_min_cluster_size(),
            max_files: default_max_files(),
            chunk_chars: default_chunk_chars(),
            chunks_per_file: default_chunks_per_file(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
fn default_include_extensions() -> Vec<String> {
    to_strings(SCAN_EXTS_FAST)
}
fn default_full_extensions() -> Vec<String> {
    to_strings(SCAN_EXTS_FULL)
}
fn default_exclude_dirs() -> Vec<String> {
    to_strings(SKIP_DIRS)
}
fn default_min_cluster_size() -> usize {
    2
}
fn default_max_files() -> usize {
    400
}
fn default_chunk_chars() -> usize {
    6_000
}
fn default_chunks_per_file() -> usize {
    2
}

/// `[reports]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Root directory for report categories; `~/.geist` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

/// `[agents.<key>]` override of a built-in agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
}

impl AppConfig {
    /// Apply `MODEL`, `API_BASE` and `GEIST_REPORTS_ROOT` overlays.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(binding) = lookup("MODEL").filter(|v| !v.is_empty()) {
            self.model.binding = binding;
        }
        if let Some(base) = lookup("API_BASE").filter(|v| !v.is_empty()) {
            self.model.api_base = base;
        }
        if let Some(root) = lookup(REPORTS_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.reports.root = Some(root);
        }
    }

    /// Check values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<()> {
        self.model.parsed_binding()?;
        self.model.base_url()?;
        if self.model.max_retry_attempts == 0 {
            return Err(GeistError::config("model.max_retry_attempts must be at least 1"));
        }
        if self.analysis.min_cluster_size == 0 {
            return Err(GeistError::config("analysis.min_cluster_size must be at least 1"));
        }
        if self.analysis.chunk_chars == 0 {
            return Err(GeistError::config("analysis.chunk_chars must be positive"));
        }
        Ok(())
    }

    /// Resolved reports root directory.
    pub fn reports_root(&self) -> Result<PathBuf> {
        match self.reports.root.as_deref() {
            Some(root) => expand_home(root),
            None => config_dir(),
        }
    }
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| GeistError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None if path == "~" => {
            dirs::home_dir().ok_or_else(|| GeistError::config("could not determine home directory"))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.geist/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| GeistError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.geist/geist.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk and apply environment overlays.
/// Returns defaults (plus overlays) if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| GeistError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| GeistError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
///
/// An existing file is never overwritten. Returns the path and whether it was created.
pub fn init_config() -> Result<(PathBuf, bool)> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GeistError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        tracing::info!(?path, "config file already exists, leaving it untouched");
        return Ok((path, false));
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| GeistError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| GeistError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok((path, true))
}

/// Check that a key is available when the provider needs one.
pub fn validate_api_key(model: &ModelConfig) -> Result<()> {
    let binding = model.parsed_binding()?;
    if binding.provider == Provider::Ollama {
        return Ok(());
    }
    match (&model.api_key_env, model.api_key()) {
        (Some(_), Some(_)) => Ok(()),
        (Some(var), None) => Err(GeistError::config(format!(
            "API key not found. Set the {var} environment variable."
        ))),
        (None, _) if binding.provider == Provider::Anthropic => Err(GeistError::config(
            "anthropic bindings need model.api_key_env to name the key variable",
        )),
        (None, _) => Ok(()),
    }
}

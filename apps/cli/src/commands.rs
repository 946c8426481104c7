//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use geist_capability::{CapabilityClient, probe};
use geist_core::{
    AgentRegistry, ArtifactWriter, CodebaseOptions, Orchestrator, ProgressReporter, RunState,
};
use geist_shared::{
    AppConfig, GeistError, ReportDocument, UNVEIL_ENV_PREFIX, config_file_path, init_config,
    load_config, validate_api_key,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Poltergeist: research topics and unveil codebases.
#[derive(Parser)]
#[command(
    name = "poltergeist",
    version,
    about = "Generate narrative Markdown reports about a topic or a source tree.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research a topic and write a report.
    Scry {
        /// Topic to research.
        #[arg(short, long, default_value = "The Meaning of Life")]
        topic: String,
    },

    /// Map a source tree and explain its architecture.
    Unveil {
        /// Root of the tree to analyze.
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Only analyze paths under this prefix (repeatable).
        #[arg(long)]
        include: Vec<String>,

        /// Skip paths under this prefix (repeatable).
        #[arg(long)]
        exclude: Vec<String>,

        /// Comma-separated extensions to scan (e.g. `.py,.rs`).
        #[arg(long)]
        exts: Option<String>,

        /// Maximum number of files to analyze.
        #[arg(long)]
        max_files: Option<usize>,

        /// Use the broad extension profile.
        #[arg(long)]
        full: bool,

        /// Report title (defaults to `Unveil: <root name>`).
        #[arg(long)]
        title: Option<String>,

        /// Components smaller than this merge into `(other)`.
        #[arg(long)]
        min_cluster_size: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check configuration, model endpoint, and reports directory.
    Doctor {
        /// Print the results as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "geist=warn,poltergeist=info",
        1 => "geist=info,poltergeist=debug",
        2 => "geist=debug,poltergeist=debug",
        _ => "geist=trace,poltergeist=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Scry { topic } => cmd_scry(&topic).await,
        Command::Unveil {
            path,
            include,
            exclude,
            exts,
            max_files,
            full,
            title,
            min_cluster_size,
        } => {
            let args = UnveilArgs {
                include,
                exclude,
                exts,
                max_files,
                full,
                title,
                min_cluster_size,
            };
            cmd_unveil(&path, args).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
        Command::Doctor { json } => cmd_doctor(json).await,
    }
}

// ---------------------------------------------------------------------------
// Report commands
// ---------------------------------------------------------------------------

async fn cmd_scry(topic: &str) -> Result<()> {
    let config = load_config().map_err(stage_failure)?;
    validate_api_key(&config.model).map_err(stage_failure)?;

    let client = CapabilityClient::from_config(&config.model).map_err(stage_failure)?;
    let orchestrator = build_orchestrator(&config, client)?;

    info!(topic, "scrying topic");
    let progress = CliProgress::new();
    let outcome = orchestrator.run_topic_pipeline(topic, &progress).await;
    progress.finish();
    let document = outcome.map_err(stage_failure)?;

    let path = write_report(&config, &document)?;
    println!("{}", path.display());
    Ok(())
}

/// Optional overrides for an `unveil` run.
struct UnveilArgs {
    include: Vec<String>,
    exclude: Vec<String>,
    exts: Option<String>,
    max_files: Option<usize>,
    full: bool,
    title: Option<String>,
    min_cluster_size: Option<usize>,
}

impl UnveilArgs {
    fn options(self, config: &AppConfig) -> CodebaseOptions {
        let mut options = CodebaseOptions::from_config(&config.analysis, self.full);
        let walk = &mut options.analyzer.walk;
        if let Some(exts) = self.exts.as_deref() {
            let parsed = parse_exts(exts);
            if !parsed.is_empty() {
                walk.extensions = parsed;
            }
        }
        walk.include_prefixes = self.include;
        walk.exclude_prefixes = self.exclude;
        if let Some(max) = self.max_files {
            walk.max_files = max;
        }
        if let Some(size) = self.min_cluster_size {
            options.analyzer.min_cluster_size = size.max(1);
        }
        options.title = self.title;
        options
    }
}

async fn cmd_unveil(path: &Path, args: UnveilArgs) -> Result<()> {
    let config = load_config().map_err(stage_failure)?;

    // UNVEIL_MODEL / UNVEIL_API_BASE take precedence for codebase runs.
    let model = config
        .model
        .with_env_prefix(UNVEIL_ENV_PREFIX, |key| std::env::var(key).ok());
    validate_api_key(&model).map_err(stage_failure)?;
    let client = CapabilityClient::from_config(&model).map_err(stage_failure)?;
    let orchestrator = build_orchestrator(&config, client)?;

    let options = args.options(&config);
    info!(path = %path.display(), binding = %model.binding, "unveiling source tree");

    let progress = CliProgress::new();
    let outcome = orchestrator
        .run_codebase_pipeline(path, &options, &progress)
        .await;
    progress.finish();
    let document = outcome.map_err(stage_failure)?;

    let path = write_report(&config, &document)?;
    println!("{}", path.display());
    Ok(())
}

fn build_orchestrator(config: &AppConfig, client: CapabilityClient) -> Result<Orchestrator> {
    let registry = AgentRegistry::from_overrides(&config.agents).map_err(stage_failure)?;
    Orchestrator::new(config, client, registry).map_err(stage_failure)
}

/// Write the report, retrying once a minute later on a name collision.
fn write_report(config: &AppConfig, document: &ReportDocument) -> Result<PathBuf> {
    let writer = ArtifactWriter::new(config.reports_root().map_err(stage_failure)?);
    let locator = document.locator();
    match writer.write(document, &locator) {
        Err(GeistError::ArtifactCollision { path }) => {
            warn!(path = %path.display(), "report name taken, retrying with the next minute");
            let retry = locator.at(locator.timestamp + TimeDelta::minutes(1));
            writer.write(document, &retry).map_err(stage_failure)
        }
        other => other.map_err(stage_failure),
    }
}

/// Name the failing stage (and task) in the user-facing error.
fn stage_failure(err: GeistError) -> color_eyre::eyre::Report {
    match err.failed_task() {
        Some(task) => eyre!("{} stage failed in task `{task}`: {err}", err.stage()),
        None => eyre!("{} stage failed: {err}", err.stage()),
    }
}

/// Split `--exts`, adding the leading dot where it is missing.
fn parse_exts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| {
            if e.starts_with('.') {
                e.to_string()
            } else {
                format!(".{e}")
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn state(&self, state: &RunState) {
        let message = match state {
            RunState::Pending => "Starting".to_string(),
            RunState::Running { task_id } => format!("Running task {task_id}"),
            RunState::Synthesizing => "Synthesizing report".to_string(),
            RunState::Done => "Done".to_string(),
            RunState::Failed { task_id } => format!("Task {task_id} failed"),
        };
        self.spinner.set_message(message);
    }

    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn file_analyzed(&self, current: usize, total: usize, rel_path: &str) {
        self.spinner
            .set_message(format!("Summarizing [{current}/{total}] {rel_path}"));
    }

    fn done(&self, document: &ReportDocument) {
        self.spinner.finish_and_clear();
        info!(title = %document.title, sections = document.sections.len(), "report ready");
    }
}

// ---------------------------------------------------------------------------
// Config and doctor
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let (path, created) = init_config()?;
    if created {
        println!("Config initialized at: {}", path.display());
    } else {
        println!("Config already exists at: {}", path.display());
    }
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

/// One line of `doctor` output.
struct Check {
    name: &'static str,
    ok: bool,
    detail: String,
}

impl Check {
    fn new(name: &'static str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok,
            detail: detail.into(),
        }
    }
}

async fn cmd_doctor(json: bool) -> Result<()> {
    let mut checks = Vec::new();
    let config_path = config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|e| e.to_string());

    match load_config() {
        Ok(config) => {
            checks.push(Check::new("config", true, config_path));
            doctor_model(&config, &mut checks).await;
            checks.push(doctor_reports_dir(&config));
        }
        Err(e) => checks.push(Check::new("config", false, format!("{config_path}: {e}"))),
    }

    let healthy = checks.iter().all(|c| c.ok);
    if json {
        let items: Vec<serde_json::Value> = checks
            .iter()
            .map(|c| serde_json::json!({"check": c.name, "ok": c.ok, "detail": c.detail}))
            .collect();
        let out = serde_json::json!({"healthy": healthy, "checks": items});
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        for c in &checks {
            let mark = if c.ok { "ok  " } else { "FAIL" };
            println!("  [{mark}] {:<10} {}", c.name, c.detail);
        }
        println!();
    }

    if healthy {
        Ok(())
    } else {
        Err(eyre!("doctor found problems"))
    }
}

async fn doctor_model(config: &AppConfig, checks: &mut Vec<Check>) {
    let model = &config.model;
    match validate_api_key(model) {
        Ok(()) => checks.push(Check::new("binding", true, model.binding.clone())),
        Err(e) => {
            checks.push(Check::new("binding", false, e.to_string()));
            return;
        }
    }

    match probe(model).await {
        Ok(report) if report.reachable => {
            let detail = match report.model_present {
                Some(false) => format!("{} (model not installed)", report.detail),
                _ => report.detail.clone(),
            };
            checks.push(Check::new(
                "endpoint",
                report.model_present != Some(false),
                format!("{}: {detail}", model.api_base),
            ));
        }
        Ok(report) => checks.push(Check::new(
            "endpoint",
            false,
            format!("{}: {}", model.api_base, report.detail),
        )),
        Err(e) => checks.push(Check::new("endpoint", false, e.to_string())),
    }
}

fn doctor_reports_dir(config: &AppConfig) -> Check {
    let root = match config.reports_root() {
        Ok(root) => root,
        Err(e) => return Check::new("reports", false, e.to_string()),
    };
    let marker = root.join(format!(".doctor-{}", std::process::id()));
    let result = std::fs::create_dir_all(&root)
        .and_then(|()| std::fs::write(&marker, b"ok"))
        .and_then(|()| std::fs::remove_file(&marker));
    match result {
        Ok(()) => Check::new("reports", true, format!("{} is writable", root.display())),
        Err(e) => Check::new("reports", false, format!("{}: {e}", root.display())),
    }
}

//! Task pipeline: a validated chain of tasks run as a fold over [`Context`].
//!
//! Every structural problem (unknown dependency, cycle, missing input key,
//! unpermitted capability) is rejected by [`Pipeline::new`], before any
//! capability call can happen.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use tracing::{info, instrument, warn};

use geist_capability::CapabilityClient;
use geist_shared::{Context, GeistError, ReportCategory, Result};

use crate::progress::ProgressReporter;
use crate::task::TaskSpec;

/// Which report a pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineShape {
    Topic,
    Codebase,
}

impl PipelineShape {
    pub fn category(&self) -> ReportCategory {
        match self {
            Self::Topic => ReportCategory::Topic,
            Self::Codebase => ReportCategory::Codebase,
        }
    }
}

impl std::fmt::Display for PipelineShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic => f.write_str("topic"),
            Self::Codebase => f.write_str("codebase"),
        }
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running { task_id: String },
    Synthesizing,
    Done,
    Failed { task_id: String },
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Running { task_id } => write!(f, "RUNNING({task_id})"),
            Self::Synthesizing => f.write_str("SYNTHESIZING"),
            Self::Done => f.write_str("DONE"),
            Self::Failed { task_id } => write!(f, "FAILED({task_id})"),
        }
    }
}

/// An ordered, validated task chain. Immutable and shareable across runs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    shape: PipelineShape,
    seed_keys: BTreeSet<String>,
    tasks: Vec<TaskSpec>,
}

impl Pipeline {
    /// Validate `tasks` against the keys a run will be seeded with.
    pub fn new<I, S>(shape: PipelineShape, seed_keys: I, tasks: Vec<TaskSpec>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let seed_keys: BTreeSet<String> = seed_keys.into_iter().map(Into::into).collect();
        if tasks.is_empty() {
            return Err(GeistError::validation(format!("{shape} pipeline has no tasks")));
        }

        let tasks = order_tasks(tasks)?;
        check_context_flow(&seed_keys, &tasks)?;

        Ok(Self {
            shape,
            seed_keys,
            tasks,
        })
    }

    pub fn shape(&self) -> PipelineShape {
        self.shape
    }

    /// Tasks in execution order.
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn seed_keys(&self) -> impl Iterator<Item = &str> {
        self.seed_keys.iter().map(String::as_str)
    }

    /// Check that `seed` provides every seed key and no task output.
    pub fn check_seed(&self, seed: &Context) -> Result<()> {
        let missing: Vec<&str> = self
            .seed_keys
            .iter()
            .filter(|k| !seed.contains(k))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(GeistError::validation(format!(
                "{} pipeline seed is missing: {}",
                self.shape,
                missing.join(", ")
            )));
        }
        if let Some(task) = self.tasks.iter().find(|t| seed.contains(&t.output_key)) {
            return Err(GeistError::validation(format!(
                "seed already contains `{}`, the output of task `{}`",
                task.output_key, task.id
            )));
        }
        Ok(())
    }

    /// Run every task in order, threading the context forward.
    ///
    /// Each step consumes the accumulated context and returns it extended by
    /// one key. On failure the error carries the failing task id and the
    /// context produced so far.
    #[instrument(skip_all, fields(shape = %self.shape, tasks = self.tasks.len()))]
    pub async fn run(
        &self,
        client: &CapabilityClient,
        seed: Context,
        progress: &dyn ProgressReporter,
    ) -> Result<Context> {
        progress.state(&RunState::Pending);
        self.check_seed(&seed)?;

        let mut context = seed;
        for task in &self.tasks {
            progress.state(&RunState::Running {
                task_id: task.id.clone(),
            });
            let started = Instant::now();

            let outcome = match task.render(&context) {
                Ok(instruction) => client
                    .complete(&task.agent.frame(&instruction), task.agent.constraints())
                    .await
                    .map_err(GeistError::from),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(text) => {
                    info!(
                        task = %task.id,
                        agent = task.agent.role(),
                        output_key = %task.output_key,
                        output_chars = text.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "task complete"
                    );
                    context = context.with(task.output_key.clone(), text)?;
                }
                Err(source) => {
                    warn!(task = %task.id, error = %source, "task failed");
                    progress.state(&RunState::Failed {
                        task_id: task.id.clone(),
                    });
                    return Err(GeistError::TaskFailed {
                        task_id: task.id.clone(),
                        source: Box::new(source),
                        partial: Box::new(context),
                    });
                }
            }
        }

        Ok(context)
    }
}

/// Topologically order tasks; the order must be total (a simple chain).
fn order_tasks(tasks: Vec<TaskSpec>) -> Result<Vec<TaskSpec>> {
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, task) in tasks.iter().enumerate() {
        if task.id.trim().is_empty() {
            return Err(GeistError::validation("task id must not be empty"));
        }
        if index.insert(task.id.as_str(), i).is_some() {
            return Err(GeistError::validation(format!("duplicate task id `{}`", task.id)));
        }
    }

    let mut pending: Vec<BTreeSet<usize>> = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let mut deps = BTreeSet::new();
        for dep in &task.depends_on {
            if *dep == task.id {
                return Err(GeistError::validation(format!("task `{}` depends on itself", task.id)));
            }
            let Some(&d) = index.get(dep.as_str()) else {
                return Err(GeistError::validation(format!(
                    "task `{}` depends on unknown task `{dep}`",
                    task.id
                )));
            };
            deps.insert(d);
        }
        pending.push(deps);
    }

    let mut order = Vec::with_capacity(tasks.len());
    let mut done = vec![false; tasks.len()];
    while order.len() < tasks.len() {
        let ready: Vec<usize> = (0..tasks.len())
            .filter(|&i| !done[i] && pending[i].iter().all(|&d| done[d]))
            .collect();
        match ready.as_slice() {
            [] => {
                let stuck: Vec<&str> = (0..tasks.len())
                    .filter(|&i| !done[i])
                    .map(|i| tasks[i].id.as_str())
                    .collect();
                return Err(GeistError::validation(format!(
                    "cyclic depends_on among tasks: {}",
                    stuck.join(", ")
                )));
            }
            [next] => {
                done[*next] = true;
                order.push(*next);
            }
            [a, b, ..] => {
                return Err(GeistError::validation(format!(
                    "tasks `{}` and `{}` are unordered; declare depends_on so the tasks form a chain",
                    tasks[*a].id, tasks[*b].id
                )));
            }
        }
    }

    let mut slots: Vec<Option<TaskSpec>> = tasks.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Walk the chain checking that every read key exists by then.
fn check_context_flow(seed_keys: &BTreeSet<String>, tasks: &[TaskSpec]) -> Result<()> {
    let mut available: BTreeSet<&str> = seed_keys.iter().map(String::as_str).collect();

    for task in tasks {
        if !task.agent.permits(task.capability) {
            return Err(GeistError::validation(format!(
                "task `{}` needs {} but agent `{}` is not permitted to use it",
                task.id,
                task.capability,
                task.agent.role()
            )));
        }
        if let Some(key) = task.input_keys.iter().find(|k| !available.contains(k.as_str())) {
            return Err(GeistError::validation(format!(
                "task `{}` reads `{key}`, which neither the seed nor an earlier task provides",
                task.id
            )));
        }
        if let Some(name) = task
            .placeholders()
            .into_iter()
            .find(|p| !task.input_keys.contains(*p))
        {
            return Err(GeistError::validation(format!(
                "instruction of task `{}` references `{{{name}}}`, which is not among its input keys",
                task.id
            )));
        }
        if !available.insert(task.output_key.as_str()) {
            return Err(GeistError::validation(format!(
                "task `{}` writes `{}`, which is already set by then",
                task.id, task.output_key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use geist_capability::{CompletionRequest, ModelBackend, RetryPolicy};
    use geist_shared::{Agent, Capability, CapabilityError};

    use super::*;
    use crate::progress::SilentProgress;

    /// Echoes the prompt's last line; fails fatally on the call numbered `fail_on`.
    struct EchoBackend {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl ModelBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> std::result::Result<String, CapabilityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(CapabilityError::fatal("HTTP 401: bad key"));
            }
            Ok(format!("answer to: {}", request.prompt.lines().last().unwrap_or("")))
        }
    }

    fn client(fail_on: Option<usize>) -> (CapabilityClient, Arc<EchoBackend>) {
        let backend = Arc::new(EchoBackend {
            calls: AtomicUsize::new(0),
            fail_on,
        });
        let client = CapabilityClient::new(backend.clone(), RetryPolicy::immediate(1), Duration::from_secs(5));
        (client, backend)
    }

    fn agent(caps: &[Capability]) -> Arc<Agent> {
        Arc::new(Agent::new("Tester", "Test", vec![], caps.iter().copied()))
    }

    fn two_step() -> Vec<TaskSpec> {
        let a = agent(&[Capability::Research, Capability::Write]);
        vec![
            TaskSpec::new("first", a.clone(), Capability::Research, "Research {topic}")
                .reads(["topic"])
                .writes("notes"),
            TaskSpec::new("second", a, Capability::Write, "Write up {notes}")
                .reads(["notes"])
                .writes("report")
                .after(["first"]),
        ]
    }

    #[derive(Default)]
    struct RecordingProgress {
        states: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn state(&self, state: &RunState) {
            self.states.lock().unwrap().push(state.to_string());
        }
        fn phase(&self, _name: &str) {}
        fn file_analyzed(&self, _current: usize, _total: usize, _rel_path: &str) {}
        fn done(&self, _document: &geist_shared::ReportDocument) {}
    }

    #[tokio::test]
    async fn context_threads_through_the_chain() {
        let pipeline = Pipeline::new(PipelineShape::Topic, ["topic"], two_step()).unwrap();
        let (client, backend) = client(None);
        let progress = RecordingProgress::default();
        let seed = Context::new().with("topic", "ghosts").unwrap();

        let ctx = pipeline.run(&client, seed, &progress).await.unwrap();
        assert_eq!(ctx.require_text("notes").unwrap(), "answer to: Research ghosts");
        assert_eq!(
            ctx.require_text("report").unwrap(),
            "answer to: Write up answer to: Research ghosts"
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *progress.states.lock().unwrap(),
            vec!["PENDING", "RUNNING(first)", "RUNNING(second)"]
        );
    }

    #[test]
    fn unproduced_input_key_fails_at_construction() {
        let a = agent(&[Capability::Write]);
        let tasks = vec![
            TaskSpec::new("first", a.clone(), Capability::Write, "Do {topic}")
                .reads(["topic"])
                .writes("draft"),
            TaskSpec::new("second", a, Capability::Write, "Polish {summary}")
                .reads(["summary"])
                .after(["first"]),
        ];
        let err = Pipeline::new(PipelineShape::Topic, ["topic"], tasks).unwrap_err();
        assert_eq!(err.stage(), "validation");
        assert!(err.to_string().contains("summary"));
    }

    #[test]
    fn placeholder_outside_input_keys_is_rejected() {
        let a = agent(&[Capability::Write]);
        let tasks = vec![TaskSpec::new("only", a, Capability::Write, "Use {topic} and {year}").reads(["topic"])];
        let err = Pipeline::new(PipelineShape::Topic, ["topic", "year"], tasks).unwrap_err();
        assert!(err.to_string().contains("{year}"));
    }

    #[test]
    fn cycles_and_unknown_dependencies_are_rejected() {
        let a = agent(&[Capability::Write]);
        let cyclic = vec![
            TaskSpec::new("a", a.clone(), Capability::Write, "x").after(["b"]),
            TaskSpec::new("b", a.clone(), Capability::Write, "y").after(["a"]),
        ];
        let err = Pipeline::new(PipelineShape::Topic, Vec::<String>::new(), cyclic).unwrap_err();
        assert!(err.to_string().contains("cyclic"));

        let unknown = vec![TaskSpec::new("a", a, Capability::Write, "x").after(["ghost"])];
        let err = Pipeline::new(PipelineShape::Topic, Vec::<String>::new(), unknown).unwrap_err();
        assert!(err.to_string().contains("unknown task `ghost`"));
    }

    #[test]
    fn branching_is_rejected() {
        let a = agent(&[Capability::Write]);
        let branching = vec![
            TaskSpec::new("a", a.clone(), Capability::Write, "x"),
            TaskSpec::new("b", a, Capability::Write, "y"),
        ];
        let err = Pipeline::new(PipelineShape::Topic, Vec::<String>::new(), branching).unwrap_err();
        assert!(err.to_string().contains("unordered"));
    }

    #[test]
    fn declaration_order_does_not_matter() {
        let mut tasks = two_step();
        tasks.reverse();
        let pipeline = Pipeline::new(PipelineShape::Topic, ["topic"], tasks).unwrap();
        let ids: Vec<&str> = pipeline.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn unpermitted_capability_is_rejected() {
        let tasks = vec![
            TaskSpec::new("first", agent(&[Capability::Write]), Capability::Research, "{topic}").reads(["topic"]),
        ];
        let err = Pipeline::new(PipelineShape::Topic, ["topic"], tasks).unwrap_err();
        assert!(err.to_string().contains("RESEARCH"));
    }

    #[tokio::test]
    async fn missing_seed_key_fails_before_any_call() {
        let pipeline = Pipeline::new(PipelineShape::Topic, ["topic"], two_step()).unwrap();
        let (client, backend) = client(None);
        let err = pipeline.run(&client, Context::new(), &SilentProgress).await.unwrap_err();
        assert_eq!(err.stage(), "validation");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_returns_task_id_and_partial_context() {
        let pipeline = Pipeline::new(PipelineShape::Topic, ["topic"], two_step()).unwrap();
        let (client, _backend) = client(Some(2));
        let progress = RecordingProgress::default();
        let seed = Context::new().with("topic", "ghosts").unwrap();

        let err = pipeline.run(&client, seed, &progress).await.unwrap_err();
        assert_eq!(err.failed_task(), Some("second"));
        match err {
            GeistError::TaskFailed { source, partial, .. } => {
                assert_eq!(source.stage(), "capability");
                assert!(partial.contains("notes"));
                assert!(!partial.contains("report"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            progress.states.lock().unwrap().last().map(String::as_str),
            Some("FAILED(second)")
        );
    }
}

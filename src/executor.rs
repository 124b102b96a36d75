//! Target execution engine
//!
//! A single coordinator owns the target-state table and hands ready targets
//! to a bounded pool of worker tasks over a channel. Workers report back over
//! a second channel, so every state transition happens in one place and no
//! target can be started twice.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{FrankenError, Result};
use crate::graph::{Selection, TargetGraph, TargetId, TargetKey};
use crate::manifest::OperationKind;
use crate::report::{Report, SkipReason, TargetReport, TargetState};

/// What happens to the rest of the run once a target fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop launching new targets, let running ones finish
    #[default]
    FailFast,
    /// Keep running everything whose dependencies succeeded
    Continue,
}

/// Where command output goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Collect stdout/stderr into the report
    #[default]
    Capture,
    /// Inherit the terminal
    Stream,
}

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of parallel targets (0 = available parallelism)
    pub parallelism: usize,
    pub failure_policy: FailurePolicy,
    /// Cancel the run (cooperatively) after this long
    pub timeout: Option<Duration>,
    /// Run each command through `sh -c` instead of splitting it
    pub shell: bool,
    pub output: OutputMode,
    /// Show spinners for running targets
    pub progress: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            failure_policy: FailurePolicy::default(),
            timeout: None,
            shell: false,
            output: OutputMode::default(),
            progress: false,
        }
    }
}

impl ExecutorConfig {
    /// Effective worker count
    pub fn workers(&self) -> usize {
        if self.parallelism == 0 {
            available_parallelism()
        } else {
            self.parallelism
        }
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// A target handed to a worker
#[derive(Debug)]
struct Job {
    id: TargetId,
    key: TargetKey,
    workdir: PathBuf,
    commands: Vec<String>,
}

/// What a worker did with a job
#[derive(Debug)]
enum Outcome {
    Finished(TargetRun),
    /// Dequeued after cancellation; never started
    Cancelled,
}

#[derive(Debug)]
struct Completion {
    id: TargetId,
    outcome: Outcome,
}

/// Result of running a target's commands
#[derive(Debug, Default)]
struct TargetRun {
    success: bool,
    exit_code: Option<i32>,
    output: String,
    error: Option<String>,
    duration: Duration,
}

/// Output of a single command
#[derive(Debug)]
struct CommandOutput {
    success: bool,
    code: Option<i32>,
    output: String,
}

/// Target executor
pub struct Executor {
    config: Arc<ExecutorConfig>,
}

impl Executor {
    /// Create a new executor
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run the selected packages' targets of `kind`, pulling in every
    /// dependency they need.
    pub async fn run(
        &self,
        graph: &TargetGraph,
        order: &[TargetId],
        kind: OperationKind,
        selection: &Selection,
    ) -> Result<Report> {
        let roots = graph.select(kind, selection)?;
        let selected = graph.with_dependencies(&roots);

        info!(
            operation = %kind,
            selected = selected.len(),
            workers = self.config.workers(),
            "starting run"
        );

        Ok(self.execute(graph, order, &selected, kind).await)
    }

    /// Execute exactly the `selected` targets, respecting `order`
    pub async fn execute(
        &self,
        graph: &TargetGraph,
        order: &[TargetId],
        selected: &HashSet<TargetId>,
        kind: OperationKind,
    ) -> Report {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let workers = self.config.workers().max(1);

        let progress = if self.config.progress && self.config.output == OutputMode::Capture {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                tokio::spawn(worker(
                    Arc::clone(&job_rx),
                    done_tx.clone(),
                    cancel_rx.clone(),
                    Arc::clone(&self.config),
                    progress.clone(),
                ))
            })
            .collect();
        drop(done_tx);

        let mut schedule = Schedule::new(graph, order, selected);
        let deadline = self
            .config
            .timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let mut in_flight = 0usize;
        let mut cancelled = false;

        loop {
            if !cancelled {
                while in_flight < workers {
                    let Some(id) = schedule.next_ready() else {
                        break;
                    };
                    let target = &graph[id];

                    // Aggregates have nothing to run
                    if target.commands.is_empty() {
                        schedule.complete(
                            id,
                            TargetRun {
                                success: true,
                                ..Default::default()
                            },
                        );
                        continue;
                    }

                    schedule.mark_running(id);
                    debug!(unit = %target.key, "dispatching target");
                    let job = Job {
                        id,
                        key: target.key.clone(),
                        workdir: target.workdir.clone(),
                        commands: target.commands.clone(),
                    };
                    if job_tx.send(job).is_err() {
                        warn!("worker pool shut down unexpectedly");
                        break;
                    }
                    in_flight += 1;
                }
            }

            if in_flight == 0 {
                break;
            }

            tokio::select! {
                completion = done_rx.recv() => {
                    let Some(Completion { id, outcome }) = completion else {
                        break;
                    };
                    in_flight -= 1;

                    match outcome {
                        Outcome::Finished(run) => {
                            let failed = !run.success;
                            schedule.complete(id, run);
                            if failed && self.config.failure_policy == FailurePolicy::FailFast && !cancelled {
                                warn!(unit = %graph[id].key, "target failed; not starting new targets");
                                cancelled = true;
                                let _ = cancel_tx.send(true);
                            }
                        }
                        Outcome::Cancelled => schedule.cancel(id),
                    }
                }
                _ = sleep_until(deadline), if !cancelled => {
                    warn!(timeout = ?self.config.timeout, "run timed out; waiting for running targets");
                    cancelled = true;
                    let _ = cancel_tx.send(true);
                }
            }
        }

        drop(job_tx);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "worker task ended abnormally");
            }
        }

        schedule.cancel_pending();
        schedule.into_report(kind, started_at, start.elapsed())
    }

    /// Split a command string into program and arguments (handles quotes)
    fn parse_command(cmd: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut quote_char = '"';

        for c in cmd.chars() {
            match c {
                '"' | '\'' if !in_quotes => {
                    in_quotes = true;
                    quote_char = c;
                }
                c if c == quote_char && in_quotes => {
                    in_quotes = false;
                }
                ' ' | '\t' if !in_quotes => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                }
                _ => {
                    current.push(c);
                }
            }
        }

        if !current.is_empty() {
            parts.push(current);
        }

        parts
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn worker(
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    done: mpsc::UnboundedSender<Completion>,
    cancel: watch::Receiver<bool>,
    config: Arc<ExecutorConfig>,
    progress: MultiProgress,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let cancelled = *cancel.borrow();
        let outcome = if cancelled {
            debug!(unit = %job.key, "run cancelled; not starting target");
            Outcome::Cancelled
        } else {
            Outcome::Finished(run_target(&job, &config, &progress).await)
        };

        if done.send(Completion { id: job.id, outcome }).is_err() {
            break;
        }
    }
}

/// Run a target's commands in order, stopping at the first failure
async fn run_target(job: &Job, config: &ExecutorConfig, progress: &MultiProgress) -> TargetRun {
    let start = Instant::now();

    let pb = progress.add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("Running {}", job.key));
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut output = String::new();
    let mut exit_code = None;

    for cmd in &job.commands {
        debug!(unit = %job.key, command = %cmd, workdir = %job.workdir.display(), "running command");

        let result = match execute_command(cmd, &job.workdir, config).await {
            Ok(result) => result,
            Err(e) => {
                pb.finish_and_clear();
                return TargetRun {
                    success: false,
                    exit_code,
                    output,
                    error: Some(e.to_string()),
                    duration: start.elapsed(),
                };
            }
        };

        output.push_str(&result.output);
        exit_code = result.code;

        if !result.success {
            pb.finish_and_clear();
            let error = FrankenError::CommandFailed {
                command: cmd.clone(),
                code: result.code.unwrap_or(-1),
                stderr: None,
            };
            info!(unit = %job.key, command = %cmd, exit_code = ?result.code, "command failed");
            return TargetRun {
                success: false,
                exit_code,
                output,
                error: Some(error.to_string()),
                duration: start.elapsed(),
            };
        }
    }

    pb.finish_and_clear();
    info!(unit = %job.key, "target succeeded");

    TargetRun {
        success: true,
        exit_code,
        output,
        error: None,
        duration: start.elapsed(),
    }
}

/// Execute a single command in `workdir`
async fn execute_command(cmd: &str, workdir: &Path, config: &ExecutorConfig) -> Result<CommandOutput> {
    let mut command = if config.shell {
        let shell = if cfg!(windows) { "cmd" } else { "sh" };
        let flag = if cfg!(windows) { "/C" } else { "-c" };
        let mut c = Command::new(shell);
        c.arg(flag).arg(cmd);
        c
    } else {
        let parts = Executor::parse_command(cmd);
        let Some((program, args)) = parts.split_first() else {
            return Err(FrankenError::InvalidCommand {
                command: cmd.to_string(),
            });
        };

        let resolved = which::which_in(program, std::env::var_os("PATH"), workdir).map_err(|_| {
            FrankenError::CommandNotFound {
                command: program.clone(),
            }
        })?;

        let mut c = Command::new(resolved);
        c.args(args);
        c
    };

    command.current_dir(workdir).stdin(Stdio::null());

    match config.output {
        OutputMode::Capture => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
            let out = command.output().await?;

            let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
            output.push_str(&String::from_utf8_lossy(&out.stderr));

            Ok(CommandOutput {
                success: out.status.success(),
                code: out.status.code(),
                output,
            })
        }
        OutputMode::Stream => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            let status = command.status().await?;

            Ok(CommandOutput {
                success: status.success(),
                code: status.code(),
                output: String::new(),
            })
        }
    }
}

/// The target-state table, owned by the coordinator
struct Schedule<'g> {
    graph: &'g TargetGraph,
    /// Selected targets in execution order
    order: Vec<TargetId>,
    position: HashMap<TargetId, usize>,
    states: HashMap<TargetId, TargetState>,
    /// Unfinished dependencies per target
    waiting: HashMap<TargetId, usize>,
    /// Positions of targets whose dependencies all succeeded
    ready: BTreeSet<usize>,
    results: HashMap<TargetId, TargetReport>,
}

impl<'g> Schedule<'g> {
    fn new(graph: &'g TargetGraph, order: &[TargetId], selected: &HashSet<TargetId>) -> Self {
        let order: Vec<TargetId> = order
            .iter()
            .copied()
            .filter(|id| selected.contains(id))
            .collect();
        let position = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut states = HashMap::new();
        let mut waiting = HashMap::new();
        let mut ready = BTreeSet::new();

        for (i, &id) in order.iter().enumerate() {
            let count = graph.dependencies(id).count();
            states.insert(id, TargetState::Pending);
            waiting.insert(id, count);
            if count == 0 {
                ready.insert(i);
            }
        }

        Self {
            graph,
            order,
            position,
            states,
            waiting,
            ready,
            results: HashMap::new(),
        }
    }

    fn next_ready(&mut self) -> Option<TargetId> {
        self.ready.pop_first().map(|pos| self.order[pos])
    }

    fn mark_running(&mut self, id: TargetId) {
        self.states.insert(id, TargetState::Running);
    }

    fn complete(&mut self, id: TargetId, run: TargetRun) {
        let graph = self.graph;
        let state = if run.success {
            TargetState::Succeeded
        } else {
            TargetState::Failed
        };
        self.states.insert(id, state);
        self.results.insert(
            id,
            TargetReport {
                target: graph[id].key.clone(),
                state,
                duration: run.duration,
                exit_code: run.exit_code,
                output: Some(run.output).filter(|o| !o.is_empty()),
                error: run.error,
                skip_reason: None,
            },
        );

        if state == TargetState::Failed {
            self.skip_dependents(id);
            return;
        }

        for dependent in graph.dependents(id) {
            let Some(count) = self.waiting.get_mut(&dependent) else {
                continue;
            };
            *count -= 1;
            if *count == 0 && self.states.get(&dependent) == Some(&TargetState::Pending) {
                self.ready.insert(self.position[&dependent]);
            }
        }
    }

    /// Mark everything downstream of a failed target as skipped
    fn skip_dependents(&mut self, failed: TargetId) {
        let graph = self.graph;
        let failed_key = graph[failed].key.clone();
        let mut stack: Vec<TargetId> = graph.dependents(failed).collect();

        while let Some(id) = stack.pop() {
            // Unselected targets have no state; terminal ones are already settled
            match self.states.get(&id) {
                Some(state) if !state.is_terminal() => {}
                _ => continue,
            }

            debug!(unit = %graph[id].key, dependency = %failed_key, "skipping target");
            self.states.insert(id, TargetState::Skipped);
            self.results.insert(
                id,
                TargetReport::skipped(
                    graph[id].key.clone(),
                    SkipReason::DependencyFailed {
                        dependency: failed_key.clone(),
                    },
                ),
            );
            stack.extend(graph.dependents(id));
        }
    }

    fn cancel(&mut self, id: TargetId) {
        self.states.insert(id, TargetState::Skipped);
        self.results.insert(
            id,
            TargetReport::skipped(self.graph[id].key.clone(), SkipReason::Cancelled),
        );
    }

    /// Everything still pending once dispatch stopped was cancelled
    fn cancel_pending(&mut self) {
        let pending: Vec<TargetId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.states.get(id) == Some(&TargetState::Pending))
            .collect();
        for id in pending {
            self.cancel(id);
        }
    }

    fn into_report(
        self,
        operation: OperationKind,
        started_at: chrono::DateTime<chrono::Utc>,
        duration: Duration,
    ) -> Report {
        let Schedule {
            graph,
            order,
            mut results,
            ..
        } = self;
        let targets = order
            .iter()
            .filter(|id| !graph[**id].key.is_aggregate())
            .filter_map(|id| results.remove(id))
            .collect();

        Report {
            operation,
            started_at,
            duration,
            targets,
        }
    }
}

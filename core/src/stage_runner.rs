use anyhow::Context;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::BuildContext;
use crate::dependency_graph::StageGraph;
use crate::executor;
use crate::logger::StageTransition;
use crate::stage::{Stage, StageStatus};
use crate::staleness::{self, Staleness, StalenessCheck};
use crate::timing::{format_duration, StageTimer, TimingRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Started(String),
    Skipped(String),
    Finished { stage: String, success: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Success {
        duration: f64,
    },
    Skipped {
        reason: Staleness,
    },
    Failed {
        exit_code: Option<i32>,
        command: String,
        reason: String,
        duration: f64,
    },
    Blocked {
        by: String,
    },
}

impl StageOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, StageOutcome::Success { .. } | StageOutcome::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Success { .. } => "success",
            StageOutcome::Skipped { .. } => "skipped",
            StageOutcome::Failed { .. } => "failed",
            StageOutcome::Blocked { .. } => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BuildRun {
    /// Outcome per planned stage, in topological order.
    pub outcomes: Vec<(String, StageOutcome)>,
    pub records: Vec<TimingRecord>,
    pub status: RunStatus,
    pub duration: f64,
    failures: Vec<String>,
}

impl BuildRun {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == stage)
            .map(|(_, outcome)| outcome)
    }

    /// The first stage to fail, in completion order.
    pub fn first_failure(&self) -> Option<(&str, &StageOutcome)> {
        let stage = self.failures.first()?;
        self.outcome(stage).map(|outcome| (stage.as_str(), outcome))
    }

    pub fn blocked_by(&self, failed: &str) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StageOutcome::Blocked { by } if by == failed))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn executed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| {
                matches!(outcome, StageOutcome::Success { .. } | StageOutcome::Failed { .. })
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            return 0;
        }

        match self.first_failure() {
            Some((_, StageOutcome::Failed { exit_code: Some(code), .. })) if *code != 0 => *code,
            _ => 1,
        }
    }
}

impl fmt::Display for BuildRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .outcomes
            .iter()
            .map(|(id, _)| id.len())
            .max()
            .unwrap_or(0);

        writeln!(f, "Build summary:")?;
        for (id, outcome) in &self.outcomes {
            let (marker, detail) = match outcome {
                StageOutcome::Success { duration } => ("✓", format_duration(*duration)),
                StageOutcome::Skipped { reason } => ("-", format!("({})", reason)),
                StageOutcome::Failed {
                    exit_code, reason, ..
                } => (
                    "✗",
                    exit_code
                        .map(|code| format!("exit {}", code))
                        .unwrap_or_else(|| reason.clone()),
                ),
                StageOutcome::Blocked { by } => ("⊘", format!("(blocked by {})", by)),
            };
            writeln!(
                f,
                "  {} {:<width$}  {:<7}  {}",
                marker,
                id,
                outcome.label(),
                detail,
                width = width
            )?;
        }

        if self.is_success() {
            write!(f, "Result: SUCCESS in {}", format_duration(self.duration))
        } else {
            write!(f, "Result: FAILED")?;
            for failed in &self.failures {
                let blocked = self.blocked_by(failed);
                if blocked.is_empty() {
                    write!(f, "\n  {} failed", failed)?;
                } else {
                    write!(f, "\n  {} failed; blocked: {}", failed, blocked.join(", "))?;
                }
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub id: String,
    pub description: String,
    pub command: String,
    pub check: StalenessCheck,
}

struct Job {
    index: usize,
    stage: Stage,
}

struct JobDone {
    index: usize,
    outcome: StageOutcome,
    record: TimingRecord,
}

/// Fixed set of workers pulling from one queue; each job is one blocking
/// external command.
struct WorkerPool {
    jobs_tx: Option<mpsc::UnboundedSender<Job>>,
    done_rx: mpsc::UnboundedReceiver<JobDone>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(runner: &StageRunner, size: usize) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel::<Job>();
        let (done_tx, done_rx) = mpsc::unbounded_channel::<JobDone>();
        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));

        let workers = (0..size)
            .map(|_| {
                let runner = runner.clone();
                let jobs_rx = Arc::clone(&jobs_rx);
                let done_tx = done_tx.clone();

                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = jobs_rx.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else {
                            break;
                        };

                        let (outcome, record) = runner.execute_stage(&job.stage).await;
                        let done = JobDone {
                            index: job.index,
                            outcome,
                            record,
                        };
                        if done_tx.send(done).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        Self {
            jobs_tx: Some(jobs_tx),
            done_rx,
            workers,
        }
    }

    fn dispatch(&self, job: Job) -> anyhow::Result<()> {
        self.jobs_tx
            .as_ref()
            .context("worker pool already shut down")?
            .send(job)
            .map_err(|_| anyhow::anyhow!("all workers have exited"))
    }

    async fn next(&mut self) -> Option<JobDone> {
        self.done_rx.recv().await
    }

    async fn shutdown(mut self) {
        self.jobs_tx.take();
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[derive(Clone)]
pub struct StageRunner {
    ctx: BuildContext,
    statuses: Arc<Mutex<HashMap<String, StageStatus>>>,
    events: Option<mpsc::UnboundedSender<StageEvent>>,
}

impl StageRunner {
    pub fn new(ctx: BuildContext) -> Self {
        Self {
            ctx,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<StageEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn get_status(&self, stage: &str) -> Option<StageStatus> {
        self.lock_statuses().get(stage).copied()
    }

    pub fn clear(&self) {
        self.lock_statuses().clear();
    }

    fn lock_statuses(&self) -> MutexGuard<'_, HashMap<String, StageStatus>> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, stage: &str, next: StageStatus) -> bool {
        let mut statuses = self.lock_statuses();
        let current = statuses
            .get(stage)
            .copied()
            .unwrap_or(StageStatus::Pending);

        if current.can_transition_to(next) {
            statuses.insert(stage.to_string(), next);
            true
        } else {
            self.ctx.logger().debug(&format!(
                "ignoring transition of {} from {} to {}",
                stage, current, next
            ));
            false
        }
    }

    fn emit(&self, event: StageEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn assess(&self, stage: &Stage) -> StalenessCheck {
        let check = staleness::check(stage);
        let logger = self.ctx.logger();
        for warning in &check.warnings {
            logger.warn(&format!("{}: {}", stage.id, warning));
        }
        logger.debug(&format!("{}: {}", stage.id, check.verdict));
        check
    }

    fn skip(&self, stage: &Stage, reason: Staleness) -> StageOutcome {
        self.transition(&stage.id, StageStatus::Skipped);
        self.ctx
            .logger()
            .stage(&stage.id, StageTransition::Skip, &format!("reason=\"{}\"", reason));
        self.emit(StageEvent::Skipped(stage.id.clone()));
        StageOutcome::Skipped { reason }
    }

    /// Runs one stage's command, recording its timing whatever the result.
    pub async fn execute_stage(&self, stage: &Stage) -> (StageOutcome, TimingRecord) {
        let logger = self.ctx.logger();
        let command = stage
            .command
            .clone()
            .with_base_env(self.ctx.toolchain_env());
        let command_line = command.command_line();

        self.transition(&stage.id, StageStatus::Running);
        self.emit(StageEvent::Started(stage.id.clone()));
        logger.stage(
            &stage.id,
            StageTransition::Start,
            &format!("cmd=\"{}\"", command_line),
        );

        let timer = StageTimer::start(&stage.id);

        let output_logger = self.ctx.logger();
        let classifier = self.ctx.classifier();
        let stage_id = stage.id.clone();
        let result = executor::execute_command(&command, move |_stream, line| {
            output_logger.tool_output(&stage_id, classifier.classify(&line), &line);
        })
        .await;

        let record = timer.finish();
        if let Err(err) = self.ctx.timing().append(&record) {
            logger.warn(&format!("could not record timing for {}: {:#}", stage.id, err));
        }

        let outcome = match result {
            Ok(result) if result.success => StageOutcome::Success {
                duration: record.duration_secs,
            },
            Ok(result) => StageOutcome::Failed {
                exit_code: result.exit_code,
                command: command_line.clone(),
                reason: result
                    .failure_reason
                    .unwrap_or_else(|| "Stage execution failed".to_string()),
                duration: record.duration_secs,
            },
            Err(err) => StageOutcome::Failed {
                exit_code: None,
                command: command_line.clone(),
                reason: format!("{:#}", err),
                duration: record.duration_secs,
            },
        };

        match &outcome {
            StageOutcome::Success { duration } => {
                self.transition(&stage.id, StageStatus::Success);
                logger.stage(
                    &stage.id,
                    StageTransition::Success,
                    &format!("duration={}", format_duration(*duration)),
                );
            }
            StageOutcome::Failed {
                exit_code, reason, ..
            } => {
                self.transition(&stage.id, StageStatus::Failed);
                logger.stage(
                    &stage.id,
                    StageTransition::Fail,
                    &format!("reason=\"{}\"", reason),
                );
                logger.failure_banner(&stage.id, &command, *exit_code);
            }
            _ => {}
        }

        self.emit(StageEvent::Finished {
            stage: stage.id.clone(),
            success: outcome.is_satisfied(),
        });

        (outcome, record)
    }

    /// Builds every stage in `plan`, which must be closed under dependencies
    /// and listed in topological order.
    pub async fn run(&self, graph: &StageGraph, plan: &[usize]) -> anyhow::Result<BuildRun> {
        let start = Instant::now();

        {
            let mut statuses = self.lock_statuses();
            for &index in plan {
                statuses.insert(graph.stage(index).id.clone(), StageStatus::Pending);
            }
        }

        let logger = self.ctx.logger();
        logger.info(&format!(
            "Building {} stage(s) {} [{}]",
            plan.len(),
            if self.ctx.is_parallel() {
                format!("with {} workers", self.ctx.jobs())
            } else {
                "serially".to_string()
            },
            plan.iter()
                .map(|&i| graph.stage(i).id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));

        let (outcomes, records, failures) = if self.ctx.is_parallel() {
            self.run_parallel(graph, plan).await?
        } else {
            self.run_serial(graph, plan).await
        };

        let mut ordered = Vec::with_capacity(plan.len());
        for &index in plan {
            let id = graph.stage(index).id.clone();
            let outcome = match outcomes.get(&index) {
                Some(outcome) => outcome.clone(),
                None => StageOutcome::Blocked {
                    by: "unknown".to_string(),
                },
            };
            ordered.push((id, outcome));
        }

        let status = if failures.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        Ok(BuildRun {
            outcomes: ordered,
            records,
            status,
            duration: start.elapsed().as_secs_f64(),
            failures,
        })
    }

    async fn run_serial(
        &self,
        graph: &StageGraph,
        plan: &[usize],
    ) -> (HashMap<usize, StageOutcome>, Vec<TimingRecord>, Vec<String>) {
        let mut outcomes: HashMap<usize, StageOutcome> = HashMap::new();
        let mut records = Vec::new();
        let mut failures = Vec::new();

        for &index in plan {
            let stage = graph.stage(index);

            if let Some(by) = blocker(graph, index, &outcomes) {
                self.block(stage, &by);
                outcomes.insert(index, StageOutcome::Blocked { by });
                continue;
            }

            let check = self.assess(stage);
            let outcome = if check.needs_rebuild() {
                let (outcome, record) = self.execute_stage(stage).await;
                records.push(record);
                outcome
            } else {
                self.skip(stage, check.verdict)
            };

            if outcome.is_failed() {
                failures.push(stage.id.clone());
            }
            outcomes.insert(index, outcome);
        }

        (outcomes, records, failures)
    }

    // Dependents of a failed stage are never released into the ready set, so
    // they are never queued and never hold a worker. Running stages are left
    // to finish.
    async fn run_parallel(
        &self,
        graph: &StageGraph,
        plan: &[usize],
    ) -> anyhow::Result<(HashMap<usize, StageOutcome>, Vec<TimingRecord>, Vec<String>)> {
        let position: HashMap<usize, usize> =
            plan.iter().enumerate().map(|(pos, &i)| (i, pos)).collect();
        let mut waiting: HashMap<usize, usize> = plan
            .iter()
            .map(|&i| {
                let pending = graph
                    .dependencies(i)
                    .iter()
                    .filter(|dep| position.contains_key(dep))
                    .count();
                (i, pending)
            })
            .collect();

        let mut ready: BTreeSet<(usize, usize)> = waiting
            .iter()
            .filter(|&(_, &pending)| pending == 0)
            .map(|(&i, _)| (position[&i], i))
            .collect();

        let mut outcomes: HashMap<usize, StageOutcome> = HashMap::new();
        let mut records = Vec::new();
        let mut failures = Vec::new();

        let mut pool = WorkerPool::spawn(self, self.ctx.jobs());
        let mut idle = self.ctx.jobs();
        let mut in_flight = 0usize;

        let mut release = |index: usize, ready: &mut BTreeSet<(usize, usize)>| {
            for &dependent in graph.dependents(index) {
                if let Some(pending) = waiting.get_mut(&dependent) {
                    *pending -= 1;
                    if *pending == 0 {
                        ready.insert((position[&dependent], dependent));
                    }
                }
            }
        };

        loop {
            while idle > 0 {
                let Some(&(pos, index)) = ready.iter().next() else {
                    break;
                };
                ready.remove(&(pos, index));

                let stage = graph.stage(index);
                let check = self.assess(stage);

                if !check.needs_rebuild() {
                    outcomes.insert(index, self.skip(stage, check.verdict));
                    release(index, &mut ready);
                    continue;
                }

                pool.dispatch(Job {
                    index,
                    stage: stage.clone(),
                })?;
                idle -= 1;
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let done = pool
                .next()
                .await
                .context("worker pool stopped before all stages finished")?;
            in_flight -= 1;
            idle += 1;

            records.push(done.record);
            if done.outcome.is_satisfied() {
                release(done.index, &mut ready);
            } else {
                failures.push(graph.stage(done.index).id.clone());
            }
            outcomes.insert(done.index, done.outcome);
        }

        pool.shutdown().await;

        for &index in plan {
            if outcomes.contains_key(&index) {
                continue;
            }
            let by = blocker(graph, index, &outcomes).unwrap_or_else(|| "unknown".to_string());
            self.block(graph.stage(index), &by);
            outcomes.insert(index, StageOutcome::Blocked { by });
        }

        Ok((outcomes, records, failures))
    }

    fn block(&self, stage: &Stage, by: &str) {
        self.ctx.logger().stage(
            &stage.id,
            StageTransition::Blocked,
            &format!("failed_dependency={}", by),
        );
    }

    /// Staleness verdict for each planned stage, without running anything.
    pub fn dry_run(&self, graph: &StageGraph, plan: &[usize]) -> Vec<PlannedStage> {
        plan.iter()
            .map(|&index| {
                let stage = graph.stage(index);
                PlannedStage {
                    id: stage.id.clone(),
                    description: stage.description.clone(),
                    command: stage.command.command_line(),
                    check: staleness::check(stage),
                }
            })
            .collect()
    }
}

/// The failed stage that prevents `index` from running, if any.
fn blocker(
    graph: &StageGraph,
    index: usize,
    outcomes: &HashMap<usize, StageOutcome>,
) -> Option<String> {
    graph
        .dependencies(index)
        .iter()
        .find_map(|dep| match outcomes.get(dep) {
            Some(StageOutcome::Failed { .. }) => Some(graph.stage(*dep).id.clone()),
            Some(StageOutcome::Blocked { by }) => Some(by.clone()),
            _ => None,
        })
}

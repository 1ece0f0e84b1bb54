//! Batch orchestrator.
//!
//! Drives courses → assessments → backends, consulting the checkpoint store
//! before each task and writing it after, so a crash loses at most the tasks
//! in flight. Tasks within a course run concurrently up to `parallelism`.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::{
    input_hash, resume_decision, CheckpointEntry, CheckpointStatus, CheckpointStore, ErrorRecord,
    ResumeDecision,
};
use crate::context::ContextBuilder;
use crate::error::EvalError;
use crate::gateway::{CallMeter, ModelGateway};
use crate::metrics::{LlmCallStats, TokenMetrics};
use crate::model::{AssessmentRecord, CourseContext, EvaluationTask};
use crate::report::{CourseFailure, CourseReport, RunSummary, TaskRecord, TaskStatus};
use crate::results::{Applicability, AqsResult, QualityFlag};
use crate::scoring::ScoringEngine;
use crate::traits::{Backend, BackendRegistry};

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Stage of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Pending,
    Loading,
    ScoringCall,
    Parsing,
    Combining,
    Persisted,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal task transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: TaskStage,
    pub to: TaskStage,
}

impl From<IllegalTransition> for EvalError {
    fn from(e: IllegalTransition) -> Self {
        EvalError::Internal(e.to_string())
    }
}

impl TaskStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStage::Persisted | TaskStage::Failed | TaskStage::Skipped)
    }

    /// `Loading -> Combining` is the zero-question path, which makes no call.
    pub fn can_advance(self, to: TaskStage) -> bool {
        use TaskStage::*;
        match (self, to) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Loading | Skipped)
            | (Loading, ScoringCall | Combining)
            | (ScoringCall, Parsing)
            | (Parsing, Combining)
            | (Combining, Persisted) => true,
            _ => false,
        }
    }

    pub fn advance(&mut self, to: TaskStage) -> Result<(), IllegalTransition> {
        if !self.can_advance(to) {
            return Err(IllegalTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStage::Pending => "pending",
            TaskStage::Loading => "loading",
            TaskStage::ScoringCall => "scoring_call",
            TaskStage::Parsing => "parsing",
            TaskStage::Combining => "combining",
            TaskStage::Persisted => "persisted",
            TaskStage::Failed => "failed",
            TaskStage::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum concurrent tasks within a course.
    pub parallelism: usize,
    /// Backends to evaluate with, by registry name.
    pub backends: Vec<String>,
    /// Restrict the run to these course ids; `None` runs every course.
    pub courses: Option<Vec<String>>,
    /// Leave tasks that failed in an earlier run alone.
    pub skip_failed: bool,
    /// Ignore stored checkpoints and evaluate everything.
    pub force_restart: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            backends: vec![],
            courses: None,
            skip_failed: false,
            force_restart: false,
        }
    }
}

/// Destination of finished artifacts.
pub trait ResultSink: Send + Sync {
    fn write_task(&self, result: &AqsResult) -> Result<()>;
    fn write_course(&self, report: &CourseReport) -> Result<()>;
    fn write_run(&self, summary: &RunSummary) -> Result<()>;
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_course_start(&self, course_id: &str, tasks: usize);
    fn on_task_start(&self, task: &EvaluationTask, attempt: u32);
    fn on_task_complete(&self, record: &TaskRecord);
    fn on_run_complete(&self, summary: &RunSummary);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_course_start(&self, _: &str, _: usize) {}
    fn on_task_start(&self, _: &EvaluationTask, _: u32) {}
    fn on_task_complete(&self, _: &TaskRecord) {}
    fn on_run_complete(&self, _: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RunAggregator {
    tasks: Vec<TaskRecord>,
    course_failures: Vec<CourseFailure>,
    cancelled_courses: Vec<String>,
    tokens: TokenMetrics,
    llm_calls: LlmCallStats,
}

impl RunAggregator {
    fn record(&mut self, record: &TaskRecord) {
        self.tokens += record.tokens;
        self.llm_calls += record.llm_calls;
        self.tasks.push(record.clone());
    }
}

enum Job {
    Ready {
        course: Arc<CourseContext>,
        assessment: Arc<AssessmentRecord>,
        backend: Backend,
    },
    LoadFailed {
        task: EvaluationTask,
        error: ErrorRecord,
    },
}

impl Job {
    fn task(&self) -> EvaluationTask {
        match self {
            Job::Ready {
                course,
                assessment,
                backend,
            } => EvaluationTask::new(&course.id, &assessment.id, &backend.descriptor.name),
            Job::LoadFailed { task, .. } => task.clone(),
        }
    }
}

struct TaskOutcome {
    record: TaskRecord,
    result: Option<AqsResult>,
}

/// The batch orchestrator.
pub struct Orchestrator {
    context: ContextBuilder,
    gateway: ModelGateway,
    scoring: ScoringEngine,
    backends: BackendRegistry,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ResultSink>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        context: ContextBuilder,
        gateway: ModelGateway,
        scoring: ScoringEngine,
        backends: BackendRegistry,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn ResultSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            context,
            gateway,
            scoring,
            backends,
            checkpoints,
            sink,
            config,
        }
    }

    /// Run the batch until every course is done or `cancel` fires.
    ///
    /// Only configuration problems (unknown backend, unreadable data
    /// directory, failing run sink) are returned as errors; task and course
    /// failures are recorded in the summary.
    pub async fn run(
        &self,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let backends = self.resolve_backends()?;
        let courses = match &self.config.courses {
            Some(ids) => {
                let mut ids = ids.clone();
                ids.sort();
                ids.dedup();
                ids
            }
            None => self.context.list_courses()?,
        };
        tracing::info!(
            courses = courses.len(),
            backends = backends.len(),
            parallelism = self.config.parallelism,
            "starting run"
        );

        let aggregator = Mutex::new(RunAggregator::default());
        for course_id in &courses {
            if cancel.is_cancelled() {
                lock(&aggregator).cancelled_courses.push(course_id.clone());
                continue;
            }
            match self
                .run_course(course_id, &backends, progress, cancel, &aggregator)
                .await
            {
                Ok(report) => {
                    if let Err(e) = self.sink.write_course(&report) {
                        tracing::error!(course = %course_id, "failed to write course report: {e:#}");
                        lock(&aggregator).course_failures.push(CourseFailure {
                            course_id: course_id.clone(),
                            error: ErrorRecord {
                                kind: crate::error::ErrorKind::Io,
                                message: format!("{e:#}"),
                            },
                        });
                    }
                }
                Err(e) => {
                    tracing::error!(course = %course_id, "course failed: {e}");
                    lock(&aggregator).course_failures.push(CourseFailure {
                        course_id: course_id.clone(),
                        error: ErrorRecord::from(&e),
                    });
                }
            }
            self.context.evict(course_id);
        }

        let agg = aggregator.into_inner().unwrap_or_else(|e| e.into_inner());
        let mut tasks = agg.tasks;
        tasks.sort_by(|a, b| a.task.cmp(&b.task));
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            started_at,
            completed_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            backends: backends.iter().map(|b| b.descriptor.name.clone()).collect(),
            cancelled: cancel.is_cancelled(),
            tasks,
            course_failures: agg.course_failures,
            cancelled_courses: agg.cancelled_courses,
            tokens: agg.tokens,
            llm_calls: agg.llm_calls,
        };

        self.sink.write_run(&summary)?;
        progress.on_run_complete(&summary);
        let counts = summary.counts();
        tracing::info!(
            completed = counts.completed,
            reused = counts.reused,
            skipped = counts.skipped_failed,
            failed = counts.failed,
            cancelled = counts.cancelled,
            cost_usd = summary.tokens.cost().total,
            "run finished"
        );
        Ok(summary)
    }

    fn resolve_backends(&self) -> Result<Vec<Backend>> {
        if self.config.backends.is_empty() {
            bail!("no backends selected");
        }
        let mut backends = Vec::new();
        for name in &self.config.backends {
            match self.backends.get(name) {
                Some(backend) => backends.push(backend.clone()),
                None => bail!(
                    "unknown backend '{name}' (configured: {})",
                    self.backends.names().join(", ")
                ),
            }
        }
        Ok(backends)
    }

    #[tracing::instrument(skip_all, fields(course = %course_id))]
    async fn run_course(
        &self,
        course_id: &str,
        backends: &[Backend],
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
        aggregator: &Mutex<RunAggregator>,
    ) -> Result<CourseReport, EvalError> {
        let course = self.context.course(course_id)?;
        let locations = self.context.assessments(course_id)?;

        let mut jobs = Vec::new();
        for location in &locations {
            match self.context.build(course_id, &location.id) {
                Ok((_, record)) => {
                    let assessment = Arc::new(record);
                    for backend in backends {
                        jobs.push(Job::Ready {
                            course: Arc::clone(&course),
                            assessment: Arc::clone(&assessment),
                            backend: backend.clone(),
                        });
                    }
                }
                Err(e) => {
                    tracing::error!(assessment = %location.id, "failed to load assessment: {e}");
                    for backend in backends {
                        jobs.push(Job::LoadFailed {
                            task: EvaluationTask::new(course_id, &location.id, &backend.descriptor.name),
                            error: ErrorRecord::from(&e),
                        });
                    }
                }
            }
        }

        progress.on_course_start(course_id, jobs.len());
        tracing::info!(assessments = locations.len(), tasks = jobs.len(), "evaluating course");

        let semaphore = Semaphore::new(self.config.parallelism.max(1));
        let mut futures: FuturesUnordered<_> = jobs
            .into_iter()
            .map(|job| self.dispatch(job, &semaphore, progress, cancel))
            .collect();

        let mut results = Vec::new();
        let mut records = Vec::new();
        while let Some(outcome) = futures.next().await {
            lock(aggregator).record(&outcome.record);
            progress.on_task_complete(&outcome.record);
            results.extend(outcome.result);
            records.push(outcome.record);
        }

        Ok(CourseReport::new(
            course.id.clone(),
            course.name.clone(),
            results,
            records,
        ))
    }

    async fn dispatch(
        &self,
        job: Job,
        semaphore: &Semaphore,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let cancelled = |job: &Job| TaskOutcome {
            record: TaskRecord::new(job.task(), TaskStatus::Cancelled),
            result: None,
        };
        if cancel.is_cancelled() {
            return cancelled(&job);
        }
        let Ok(_permit) = semaphore.acquire().await else {
            return cancelled(&job);
        };
        if cancel.is_cancelled() {
            return cancelled(&job);
        }

        match job {
            Job::Ready {
                course,
                assessment,
                backend,
            } => self.execute(&course, &assessment, &backend, progress).await,
            Job::LoadFailed { task, error } => self.record_load_failure(task, error),
        }
    }

    fn record_load_failure(&self, task: EvaluationTask, error: ErrorRecord) -> TaskOutcome {
        let previous = self.checkpoints.get(&task).ok().flatten();
        let attempts = previous.map(|e| e.attempts).unwrap_or(0) + 1;
        let entry = CheckpointEntry {
            status: CheckpointStatus::Failed,
            stage: TaskStage::Failed,
            attempts,
            last_error: Some(error.clone()),
            ..CheckpointEntry::pending(
                task.clone(),
                String::new(),
                self.gateway.templates().version.clone(),
            )
        };
        if let Err(e) = self.checkpoints.put(&entry) {
            tracing::error!(%task, "failed to write checkpoint: {e}");
        }

        let mut record = TaskRecord::new(task, TaskStatus::Failed);
        record.attempt = attempts;
        record.error = Some(error);
        TaskOutcome {
            record,
            result: None,
        }
    }

    #[tracing::instrument(skip_all, fields(course = %course.id, assessment = %assessment.id, backend = %backend.descriptor.name))]
    async fn execute(
        &self,
        course: &CourseContext,
        assessment: &AssessmentRecord,
        backend: &Backend,
        progress: &dyn ProgressReporter,
    ) -> TaskOutcome {
        let task = EvaluationTask::new(&course.id, &assessment.id, &backend.descriptor.name);
        let prompt_version = self.gateway.templates().version.clone();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut stage = TaskStage::Pending;

        let mut record = TaskRecord::new(task.clone(), TaskStatus::Failed);
        record.started_at = Some(started_at);

        let hash = match input_hash(course, assessment, &prompt_version, &backend.descriptor.name) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(%task, "{e}");
                record.error = Some(ErrorRecord::from(&e));
                return TaskOutcome {
                    record,
                    result: None,
                };
            }
        };

        let stored = match self.checkpoints.get(&task) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(%task, "unreadable checkpoint, evaluating afresh: {e}");
                None
            }
        };
        let observed = stored
            .as_ref()
            .map(|e| e.status)
            .unwrap_or(CheckpointStatus::Pending);
        let decision = if self.config.force_restart {
            ResumeDecision::Evaluate {
                previous_attempts: stored.as_ref().map(|e| e.attempts).unwrap_or(0),
            }
        } else {
            resume_decision(&task, stored, &hash, self.config.skip_failed)
        };

        let previous_attempts = match decision {
            ResumeDecision::Evaluate { previous_attempts } => previous_attempts,
            ResumeDecision::Reuse(result) => {
                skip(&mut stage, &task);
                tracing::info!(%task, %stage, "inputs unchanged, reusing stored result");
                record.status = TaskStatus::Reused;
                record.attempt = result.attempt;
                record.composite = result.composite;
                record.tier = result.tier;
                return TaskOutcome {
                    record,
                    result: Some(*result),
                };
            }
            ResumeDecision::SkipFailed { last_error } => {
                skip(&mut stage, &task);
                tracing::info!(%task, %stage, "skipping previously failed task");
                record.status = TaskStatus::SkippedFailed;
                record.error = last_error;
                return TaskOutcome {
                    record,
                    result: None,
                };
            }
        };

        let attempt = previous_attempts + 1;
        record.attempt = attempt;
        let claim = CheckpointEntry {
            status: CheckpointStatus::InProgress,
            stage: TaskStage::Loading,
            attempts: attempt,
            ..CheckpointEntry::pending(task.clone(), hash.clone(), prompt_version.clone())
        };
        match self.checkpoints.transition(&[observed], &claim) {
            Ok(true) => {}
            Ok(false) => {
                let e = EvalError::Checkpoint(format!("{task} was claimed by another worker"));
                tracing::error!(%task, "{e}");
                record.error = Some(ErrorRecord::from(&e));
                return TaskOutcome {
                    record,
                    result: None,
                };
            }
            Err(e) => {
                tracing::error!(%task, "failed to claim task: {e}");
                record.error = Some(ErrorRecord::from(&e));
                return TaskOutcome {
                    record,
                    result: None,
                };
            }
        }

        progress.on_task_start(&task, attempt);
        tracing::info!(%task, attempt, "evaluating");

        let mut meter = CallMeter::default();
        let evaluated = self
            .evaluate(course, assessment, backend, &mut stage, &mut meter)
            .await;
        let result = evaluated.and_then(|mut result| {
            result.attempt = attempt;
            result.input_hash = hash.clone();
            result.prompt_version = prompt_version.clone();
            result.started_at = started_at;
            result.completed_at = Utc::now();
            result.duration_ms = clock.elapsed().as_millis() as u64;
            self.sink.write_task(&result).map_err(|e| {
                EvalError::Io(std::io::Error::other(format!("failed to write result: {e:#}")))
            })?;
            stage.advance(TaskStage::Persisted)?;
            Ok(result)
        });

        record.tokens = meter.tokens;
        record.llm_calls = meter.llm_calls;
        record.duration_ms = clock.elapsed().as_millis() as u64;

        let base = CheckpointEntry {
            attempts: attempt,
            ..CheckpointEntry::pending(task.clone(), hash, prompt_version)
        };
        match result {
            Ok(result) => {
                let entry = CheckpointEntry {
                    status: CheckpointStatus::Completed,
                    stage,
                    result: Some(result.clone()),
                    ..base
                };
                if let Err(e) = self.write_final(&entry) {
                    tracing::error!(%task, "failed to checkpoint completed task: {e}");
                    record.error = Some(ErrorRecord::from(&e));
                    return TaskOutcome {
                        record,
                        result: Some(result),
                    };
                }
                tracing::info!(
                    %task,
                    composite = ?result.composite,
                    tier = ?result.tier,
                    cost_usd = meter.tokens.cost().total,
                    "task completed"
                );
                record.status = TaskStatus::Completed;
                record.composite = result.composite;
                record.tier = result.tier;
                TaskOutcome {
                    record,
                    result: Some(result),
                }
            }
            Err(e) => {
                let failed_at = stage;
                if let Err(illegal) = stage.advance(TaskStage::Failed) {
                    tracing::error!(%task, "{illegal}");
                }
                tracing::error!(%task, stage = %failed_at, kind = %e.kind(), "task failed: {e}");
                let error = ErrorRecord::from(&e);
                let entry = CheckpointEntry {
                    status: CheckpointStatus::Failed,
                    stage: TaskStage::Failed,
                    last_error: Some(error.clone()),
                    ..base
                };
                if let Err(e) = self.write_final(&entry) {
                    tracing::error!(%task, "failed to checkpoint failed task: {e}");
                }
                record.error = Some(error);
                TaskOutcome {
                    record,
                    result: None,
                }
            }
        }
    }

    fn write_final(&self, entry: &CheckpointEntry) -> Result<(), EvalError> {
        if self
            .checkpoints
            .transition(&[CheckpointStatus::InProgress], entry)?
        {
            Ok(())
        } else {
            Err(EvalError::Checkpoint(format!(
                "{} left in_progress by another writer",
                entry.task
            )))
        }
    }

    /// Loading through combining. Returns the result before persistence
    /// fields are filled in.
    async fn evaluate(
        &self,
        course: &CourseContext,
        assessment: &AssessmentRecord,
        backend: &Backend,
        stage: &mut TaskStage,
        meter: &mut CallMeter,
    ) -> Result<AqsResult, EvalError> {
        stage.advance(TaskStage::Loading)?;
        let task = EvaluationTask::new(&course.id, &assessment.id, &backend.descriptor.name);
        let question_count = assessment.question_count();

        let mut flags = Vec::new();
        let mut warnings = assessment.numbering_anomalies();
        if !warnings.is_empty() {
            tracing::warn!(%task, anomalies = ?warnings, "question numbering anomaly");
            flags.push(QualityFlag::QuestionNumberingAnomaly);
        }

        let now = Utc::now();
        let mut result = AqsResult {
            task,
            assessment_name: assessment.name.clone(),
            assessment_kind: assessment.kind,
            question_count,
            backend_model: backend.descriptor.model.clone(),
            difficulty_level: String::new(),
            difficulty_rationale: String::new(),
            difficulty_scores: None,
            blooms: Applicability::NotApplicable,
            blooms_distribution_summary: String::new(),
            question_classifications: vec![],
            course_fit: Applicability::NotApplicable,
            components: None,
            composite: None,
            tier: None,
            quality_tier_reasoning: String::new(),
            flags: vec![],
            warnings: vec![],
            tokens: TokenMetrics::default(),
            llm_calls: LlmCallStats::default(),
            attempt: 0,
            input_hash: String::new(),
            prompt_version: String::new(),
            started_at: now,
            completed_at: now,
            duration_ms: 0,
        };

        if question_count == 0 {
            stage.advance(TaskStage::Combining)?;
            let sentinel = EvalError::NoQuestionsEvaluable(assessment.name.clone());
            tracing::warn!(task = %result.task, "{sentinel}");
            flags.push(QualityFlag::NoQuestionsEvaluable);
            warnings.push(sentinel.to_string());
            result.flags = flags;
            result.warnings = warnings;
            return Ok(result);
        }

        stage.advance(TaskStage::ScoringCall)?;
        let scored = self
            .gateway
            .score_metered(course, assessment, backend, meter)
            .await?;
        stage.advance(TaskStage::Parsing)?;
        let analysis = scored.analysis;

        stage.advance(TaskStage::Combining)?;
        let outcome = self.scoring.score(&analysis, question_count);
        flags.extend(analysis.flags.iter().copied());
        flags.extend(outcome.flags);
        warnings.extend(analysis.warnings.iter().cloned());
        flags.sort();
        flags.dedup();

        result.backend_model = scored.model;
        result.difficulty_level = analysis.difficulty_level;
        result.difficulty_rationale = analysis.difficulty_rationale;
        result.difficulty_scores = Some(analysis.difficulty_scores);
        result.blooms = Applicability::Applicable(analysis.blooms);
        result.blooms_distribution_summary = analysis.blooms_distribution_summary;
        result.question_classifications = analysis.question_classifications;
        result.course_fit = analysis.course_fit;
        result.components = Some(outcome.components);
        result.composite = Some(outcome.composite);
        result.tier = Some(outcome.tier);
        result.quality_tier_reasoning = analysis.quality_tier_reasoning;
        result.flags = flags;
        result.warnings = warnings;
        result.tokens = scored.tokens;
        result.llm_calls = scored.llm_calls;
        Ok(result)
    }
}

fn skip(stage: &mut TaskStage, task: &EvaluationTask) {
    if let Err(e) = stage.advance(TaskStage::Skipped) {
        tracing::error!(%task, "{e}");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Rough time left for `remaining` tasks at the observed pace.
pub fn estimate_remaining(elapsed: Duration, done: usize, remaining: usize) -> Option<Duration> {
    if done == 0 {
        return None;
    }
    Some(elapsed / done as u32 * remaining as u32)
}

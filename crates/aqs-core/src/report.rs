//! Run and course reports with JSON persistence and run-to-run comparison.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkpoint::ErrorRecord;
use crate::metrics::{LlmCallStats, TokenMetrics};
use crate::model::EvaluationTask;
use crate::results::{AqsResult, QualityTier};
use crate::statistics::CourseStatistics;

/// How a task ended in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Evaluated and persisted.
    Completed,
    /// Stored result reused; no backend call.
    Reused,
    /// Failed in an earlier run and skipped.
    SkippedFailed,
    Failed,
    /// Never dispatched because the run was cancelled.
    Cancelled,
}

/// One line of the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: EvaluationTask,
    pub status: TaskStatus,
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub composite: Option<f64>,
    pub tier: Option<QualityTier>,
    pub error: Option<ErrorRecord>,
    /// Spent in this run only; reused tasks cost nothing.
    pub tokens: TokenMetrics,
    pub llm_calls: LlmCallStats,
}

impl TaskRecord {
    pub fn new(task: EvaluationTask, status: TaskStatus) -> Self {
        Self {
            task,
            status,
            attempt: 0,
            started_at: None,
            duration_ms: 0,
            composite: None,
            tier: None,
            error: None,
            tokens: TokenMetrics::default(),
            llm_calls: LlmCallStats::default(),
        }
    }
}

/// A course that could not be processed at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseFailure {
    pub course_id: String,
    pub error: ErrorRecord,
}

/// Spend and task count of one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub tasks: usize,
    pub tokens: TokenMetrics,
    pub llm_calls: LlmCallStats,
}

/// Everything produced for one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseReport {
    pub course_id: String,
    pub course_name: String,
    pub generated_at: DateTime<Utc>,
    /// Completed and reused results, ordered by task.
    pub results: Vec<AqsResult>,
    /// Every task of the course, ordered by task.
    pub tasks: Vec<TaskRecord>,
    pub tokens: TokenMetrics,
    pub llm_calls: LlmCallStats,
    pub per_backend: BTreeMap<String, BackendMetrics>,
    pub statistics: CourseStatistics,
}

impl CourseReport {
    pub fn new(
        course_id: String,
        course_name: String,
        mut results: Vec<AqsResult>,
        mut tasks: Vec<TaskRecord>,
    ) -> Self {
        results.sort_by(|a, b| a.task.cmp(&b.task));
        tasks.sort_by(|a, b| a.task.cmp(&b.task));

        let mut per_backend: BTreeMap<String, BackendMetrics> = BTreeMap::new();
        for record in &tasks {
            let metrics = per_backend.entry(record.task.backend.clone()).or_default();
            metrics.tasks += 1;
            metrics.tokens += record.tokens;
            metrics.llm_calls += record.llm_calls;
        }

        Self {
            tokens: tasks.iter().map(|t| t.tokens).sum(),
            llm_calls: tasks.iter().map(|t| t.llm_calls).sum(),
            statistics: CourseStatistics::compute(&results),
            course_id,
            course_name,
            generated_at: Utc::now(),
            results,
            tasks,
            per_backend,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Failed)
    }
}

/// Task counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub completed: usize,
    pub reused: usize,
    pub skipped_failed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.completed + self.reused + self.skipped_failed + self.failed + self.cancelled
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub backends: Vec<String>,
    pub cancelled: bool,
    /// Every task seen, ordered by task.
    pub tasks: Vec<TaskRecord>,
    pub course_failures: Vec<CourseFailure>,
    /// Courses never started because the run was cancelled.
    #[serde(default)]
    pub cancelled_courses: Vec<String>,
    pub tokens: TokenMetrics,
    pub llm_calls: LlmCallStats,
}

impl RunSummary {
    pub fn with_status(&self, status: TaskStatus) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(move |t| t.status == status)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Reused => counts.reused += 1,
                TaskStatus::SkippedFailed => counts.skipped_failed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// No failed tasks and no failed courses.
    pub fn is_clean(&self) -> bool {
        self.course_failures.is_empty() && self.with_status(TaskStatus::Failed).next().is_none()
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize run summary")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write run summary to {}", path.display()))?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run summary from {}", path.display()))?;
        serde_json::from_str(&content).context("failed to parse run summary JSON")
    }

    /// Compare composites against a baseline run. Changes of at most
    /// `threshold` points count as unchanged.
    pub fn compare(&self, baseline: &RunSummary, threshold: f64) -> ComparisonReport {
        let scores = |summary: &RunSummary| -> HashMap<EvaluationTask, f64> {
            summary
                .tasks
                .iter()
                .filter_map(|t| t.composite.map(|c| (t.task.clone(), c)))
                .collect()
        };
        let baseline_scores = scores(baseline);
        let current_scores = scores(self);

        let mut report = ComparisonReport::default();
        for (task, &current) in &current_scores {
            let Some(&before) = baseline_scores.get(task) else {
                report.new_tasks += 1;
                continue;
            };
            let change = ScoreChange {
                task: task.clone(),
                baseline: before,
                current,
                delta: current - before,
            };
            if change.delta < -threshold {
                report.regressions.push(change);
            } else if change.delta > threshold {
                report.improvements.push(change);
            } else {
                report.unchanged += 1;
            }
        }
        report.removed_tasks = baseline_scores
            .keys()
            .filter(|k| !current_scores.contains_key(k))
            .count();

        report.regressions.sort_by(|a, b| a.delta.total_cmp(&b.delta));
        report.improvements.sort_by(|a, b| b.delta.total_cmp(&a.delta));
        report
    }
}

/// One task's composite in two runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub task: EvaluationTask,
    pub baseline: f64,
    pub current: f64,
    pub delta: f64,
}

/// Result of comparing two runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Largest drop first.
    pub regressions: Vec<ScoreChange>,
    /// Largest gain first.
    pub improvements: Vec<ScoreChange>,
    pub unchanged: usize,
    pub new_tasks: usize,
    pub removed_tasks: usize,
}

impl ComparisonReport {
    pub fn has_regressions(&self) -> bool {
        !self.regressions.is_empty()
    }

    pub fn to_markdown(&self) -> String {
        let mut md = format!(
            "**Summary:** {} regressions, {} improvements, {} unchanged, {} new, {} removed\n\n",
            self.regressions.len(),
            self.improvements.len(),
            self.unchanged,
            self.new_tasks,
            self.removed_tasks
        );

        for (title, changes) in [
            ("Regressions", &self.regressions),
            ("Improvements", &self.improvements),
        ] {
            if changes.is_empty() {
                continue;
            }
            md.push_str(&format!("### {title}\n\n"));
            md.push_str("| Course | Assessment | Backend | Baseline | Current | Delta |\n");
            md.push_str("|--------|------------|---------|----------|---------|-------|\n");
            for c in changes {
                md.push_str(&format!(
                    "| {} | {} | {} | {:.2} | {:.2} | {:+.2} |\n",
                    c.task.course_id, c.task.assessment_id, c.task.backend, c.baseline, c.current, c.delta
                ));
            }
            md.push('\n');
        }

        md
    }

    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{} regressions, {} improvements, {} unchanged, {} new, {} removed\n",
            self.regressions.len(),
            self.improvements.len(),
            self.unchanged,
            self.new_tasks,
            self.removed_tasks
        );
        for c in &self.regressions {
            out.push_str(&format!(
                "  REGRESSED {}: {:.2} -> {:.2} ({:+.2})\n",
                c.task, c.baseline, c.current, c.delta
            ));
        }
        for c in &self.improvements {
            out.push_str(&format!(
                "  IMPROVED  {}: {:.2} -> {:.2} ({:+.2})\n",
                c.task, c.baseline, c.current, c.delta
            ));
        }
        out
    }
}

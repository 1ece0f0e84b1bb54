//! Filesystem result sink.
//!
//! Layout under the output directory:
//!
//! ```text
//! <out>/<course>/<backend>/<assessment>_aqs.json   (+ .txt)
//! <out>/<course>/course_aqs.json                   (+ .txt)
//! <out>/run_log.json
//! <out>/run_summary.json                           (+ .txt)
//! <out>/cost_summary.csv
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! reader never sees a partial document.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

use aqs_core::engine::ResultSink;
use aqs_core::model::{path_component, EvaluationTask};
use aqs_core::report::{CourseReport, RunSummary, TaskRecord};
use aqs_core::results::AqsResult;

use crate::costs::render_cost_csv;
use crate::text::{render_course, render_result, render_run};

pub const COURSE_FILE: &str = "course_aqs";
pub const RUN_LOG_FILE: &str = "run_log.json";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";
pub const COST_SUMMARY_FILE: &str = "cost_summary.csv";

/// Per-task timing, attempts and final status of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub tasks: Vec<TaskRecord>,
}

/// Writes results as JSON and text files under one directory.
#[derive(Debug, Clone)]
pub struct FsResultSink {
    root: PathBuf,
}

impl FsResultSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn course_dir(&self, course_id: &str) -> PathBuf {
        self.root.join(path_component(course_id))
    }

    /// Path of a task's JSON result.
    pub fn task_path(&self, task: &EvaluationTask) -> PathBuf {
        self.course_dir(&task.course_id)
            .join(path_component(&task.backend))
            .join(format!("{}_aqs.json", path_component(&task.assessment_id)))
    }

    pub fn course_path(&self, course_id: &str) -> PathBuf {
        self.course_dir(course_id).join(format!("{COURSE_FILE}.json"))
    }

    pub fn run_summary_path(&self) -> PathBuf {
        self.root.join(RUN_SUMMARY_FILE)
    }

    pub fn cost_summary_path(&self) -> PathBuf {
        self.root.join(COST_SUMMARY_FILE)
    }

    /// Read back a task result written earlier.
    pub fn load_task(&self, task: &EvaluationTask) -> Result<AqsResult> {
        read_json(&self.task_path(task))
    }

    pub fn load_course(&self, course_id: &str) -> Result<CourseReport> {
        read_json(&self.course_path(course_id))
    }
}

impl ResultSink for FsResultSink {
    fn write_task(&self, result: &AqsResult) -> Result<()> {
        let json_path = self.task_path(&result.task);
        write_json(&json_path, result)?;
        write_atomic(&json_path.with_extension("txt"), &render_result(result))?;
        debug!(task = %result.task, path = %json_path.display(), "wrote task result");
        Ok(())
    }

    fn write_course(&self, report: &CourseReport) -> Result<()> {
        let json_path = self.course_path(&report.course_id);
        write_json(&json_path, report)?;
        write_atomic(&json_path.with_extension("txt"), &render_course(report))?;
        debug!(course = %report.course_id, path = %json_path.display(), "wrote course report");
        Ok(())
    }

    fn write_run(&self, summary: &RunSummary) -> Result<()> {
        let log = RunLog {
            run_id: summary.run_id,
            started_at: summary.started_at,
            completed_at: summary.completed_at,
            tasks: summary.tasks.clone(),
        };
        write_json(&self.root.join(RUN_LOG_FILE), &log)?;

        let summary_path = self.run_summary_path();
        write_json(&summary_path, summary)?;
        write_atomic(&summary_path.with_extension("txt"), &render_run(summary))?;
        write_atomic(&self.cost_summary_path(), &render_cost_csv(summary)?)?;
        debug!(path = %summary_path.display(), "wrote run summary");
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    write_atomic(path, &json)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Write to a temp file in the target directory, then rename.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqs_core::metrics::{LlmCallStats, Pricing, TokenMetrics, TokenUsage};
    use aqs_core::model::AssessmentKind;
    use aqs_core::report::TaskStatus;
    use aqs_core::results::{
        Applicability, BloomsDistribution, ComponentScores, CourseFitDetails, QualityFlag,
        QualityTier,
    };

    fn result(assessment_id: &str, backend: &str, composite: Option<f64>) -> AqsResult {
        let now = Utc::now();
        let mut llm_calls = LlmCallStats::default();
        llm_calls.record_success();
        AqsResult {
            task: EvaluationTask::new("do_1", assessment_id, backend),
            assessment_name: assessment_id.replace('_', " "),
            assessment_kind: AssessmentKind::Final,
            question_count: 12,
            backend_model: "gemini-2.0-flash".into(),
            difficulty_level: "Intermediate".into(),
            difficulty_rationale: "Mixed recall and application.".into(),
            difficulty_scores: None,
            blooms: Applicability::Applicable(BloomsDistribution {
                remember: 40.0,
                understand: 30.0,
                apply: 30.0,
                ..Default::default()
            }),
            blooms_distribution_summary: String::new(),
            question_classifications: vec![],
            course_fit: Applicability::Applicable(CourseFitDetails {
                course_fit_score: 80.0,
                course_fit_status: "Good Fit".into(),
                content_coverage_score: Some(75.0),
                content_coverage_rationale: String::new(),
                objective_alignment_score: None,
                objective_alignment_rationale: String::new(),
                difficulty_appropriateness_score: Some(90.0),
                difficulty_appropriateness_rationale: String::new(),
                completeness_score: None,
                completeness_rationale: String::new(),
                alignment_details: String::new(),
                improvement_suggestions: vec!["Add a case study".into()],
            }),
            components: composite.map(|_| ComponentScores {
                difficulty: 70.0,
                blooms: 55.0,
                course_fit: Some(80.0),
            }),
            composite,
            tier: composite.map(|_| QualityTier::Satisfactory),
            quality_tier_reasoning: String::new(),
            flags: vec![QualityFlag::QuestionNumberingAnomaly],
            warnings: vec!["question 4 is missing".into()],
            tokens: TokenMetrics::from_usage(
                TokenUsage {
                    input_tokens: 1000,
                    output_tokens: 200,
                    ..Default::default()
                },
                &Pricing::default(),
            ),
            llm_calls,
            attempt: 1,
            input_hash: "ab".repeat(32),
            prompt_version: "v4".into(),
            started_at: now,
            completed_at: now,
            duration_ms: 1500,
        }
    }

    #[test]
    fn task_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsResultSink::new(dir.path());
        let r = result("Final_Exam", "flash", Some(68.5));

        sink.write_task(&r).unwrap();

        let json = dir.path().join("do_1/flash/Final_Exam_aqs.json");
        assert!(json.exists());
        assert_eq!(sink.load_task(&r.task).unwrap(), r);

        let text = std::fs::read_to_string(dir.path().join("do_1/flash/Final_Exam_aqs.txt")).unwrap();
        assert!(text.contains("ASSESSMENT QUALITY SCORE: Final Exam"));
        assert!(text.contains("AQS: 68.50"));
        assert!(text.contains("Tier: Satisfactory"));
        assert!(text.contains("COURSE FIT: 80.0 (Good Fit)"));
        assert!(text.contains("  Content coverage: 75.0"));
        assert!(text.contains("    - Add a case study"));
        assert!(text.contains("Flags: question_numbering_anomaly"));
        assert!(text.contains("Warning: question 4 is missing"));
    }

    #[test]
    fn rewrite_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsResultSink::new(dir.path());
        sink.write_task(&result("Quiz_1", "flash", Some(50.0))).unwrap();
        let second = result("Quiz_1", "flash", Some(90.0));
        sink.write_task(&second).unwrap();

        assert_eq!(sink.load_task(&second.task).unwrap().composite, Some(90.0));
        let leftovers = std::fs::read_dir(dir.path().join("do_1/flash"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn course_and_run_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsResultSink::new(dir.path());

        let done = result("Final_Exam", "flash", Some(68.5));
        let sentinel = result("Empty", "pro", None);
        let mut failed = TaskRecord::new(EvaluationTask::new("do_1", "Quiz_2", "flash"), TaskStatus::Failed);
        failed.error = Some(aqs_core::checkpoint::ErrorRecord {
            kind: aqs_core::error::ErrorKind::BackendUnavailable,
            message: "gave up".into(),
        });
        let mut ok = TaskRecord::new(done.task.clone(), TaskStatus::Completed);
        ok.composite = done.composite;
        ok.tier = done.tier;
        ok.tokens = done.tokens;
        let tasks = vec![
            ok,
            TaskRecord::new(sentinel.task.clone(), TaskStatus::Completed),
            failed,
        ];

        let report = CourseReport::new(
            "do_1".into(),
            "Data Basics".into(),
            vec![done, sentinel],
            tasks.clone(),
        );
        sink.write_course(&report).unwrap();
        assert_eq!(sink.load_course("do_1").unwrap(), report);

        let text = std::fs::read_to_string(dir.path().join("do_1/course_aqs.txt")).unwrap();
        assert!(text.contains("COURSE: Data Basics (do_1)"));
        assert!(text.contains("Scored: 1 | Unscored: 1 | Failed: 1"));
        assert!(text.contains("Average AQS: 68.50"));
        assert!(text.contains("BackendUnavailable: gave up"));
        assert!(text.contains("flash: 2 tasks"));

        let now = Utc::now();
        let summary = RunSummary {
            run_id: Uuid::nil(),
            started_at: now,
            completed_at: now,
            duration_ms: 2500,
            backends: vec!["flash".into(), "pro".into()],
            cancelled: false,
            tokens: report.tokens,
            llm_calls: report.llm_calls,
            tasks,
            course_failures: vec![],
            cancelled_courses: vec![],
        };
        sink.write_run(&summary).unwrap();

        let log: RunLog = read_json(&dir.path().join(RUN_LOG_FILE)).unwrap();
        assert_eq!(log.tasks.len(), 3);
        assert_eq!(RunSummary::load_json(&sink.run_summary_path()).unwrap(), summary);
        let text = std::fs::read_to_string(dir.path().join("run_summary.txt")).unwrap();
        assert!(text.contains("Tasks: 2 completed, 0 reused, 0 skipped, 1 failed, 0 cancelled"));
        assert!(text.contains("do_1/Quiz_2@flash [BackendUnavailable] gave up"));

        let costs = std::fs::read_to_string(sink.cost_summary_path()).unwrap();
        let rows: Vec<&str> = costs.lines().collect();
        assert!(rows[0].starts_with("course_id,backend,tasks,"));
        assert!(rows[1].starts_with("do_1,flash,2,"));
        assert!(rows[2].starts_with("do_1,pro,1,"));
        assert!(rows[3].starts_with("TOTAL,,3,"));
    }

    #[test]
    fn unsafe_names_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsResultSink::new(dir.path());
        let task = EvaluationTask::new("../escape", "a/b", "x");
        let path = sink.task_path(&task);
        assert!(path.starts_with(dir.path()));
        assert!(path
            .components()
            .all(|c| c != std::path::Component::ParentDir));
    }
}

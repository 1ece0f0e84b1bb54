//! Plain-text renderings of results, course reports and run summaries.

use std::fmt::Write;

use aqs_core::metrics::{LlmCallStats, TokenMetrics};
use aqs_core::report::{CourseReport, RunSummary, TaskRecord, TaskStatus};
use aqs_core::results::{Applicability, AqsResult, QualityTier, BLOOM_LEVELS};

const RULE: &str =
    "================================================================================";
const THIN_RULE: &str =
    "--------------------------------------------------------------------------------";

fn score(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
}

fn tier(value: Option<QualityTier>) -> String {
    value.map_or_else(|| "n/a".to_string(), |t| t.to_string())
}

fn usage_lines(out: &mut String, tokens: &TokenMetrics, calls: &LlmCallStats) {
    let cost = tokens.cost();
    let _ = writeln!(
        out,
        "Tokens: {} input, {} output, {} reasoning, {} cached ({} total)",
        tokens.input_tokens(),
        tokens.output_tokens(),
        tokens.reasoning_tokens(),
        tokens.cached_tokens(),
        tokens.total_tokens()
    );
    let _ = writeln!(
        out,
        "Cost: ${:.4} (input ${:.4}, output ${:.4})",
        cost.total, cost.input, cost.output
    );
    let _ = writeln!(
        out,
        "LLM calls: {} total, {} successful, {} failed",
        calls.total, calls.successful, calls.failed
    );
}

/// Render one task's result.
pub fn render_result(result: &AqsResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "ASSESSMENT QUALITY SCORE: {}", result.assessment_name);
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "Course: {}", result.task.course_id);
    let _ = writeln!(out, "Assessment: {}", result.task.assessment_id);
    let _ = writeln!(
        out,
        "Backend: {} ({})",
        result.task.backend, result.backend_model
    );
    let _ = writeln!(out, "Type: {}", result.assessment_kind);
    let _ = writeln!(out, "Questions: {}", result.question_count);
    let _ = writeln!(out);
    let _ = writeln!(out, "AQS: {}", score(result.composite));
    let _ = writeln!(out, "Tier: {}", tier(result.tier));
    if !result.quality_tier_reasoning.is_empty() {
        let _ = writeln!(out, "  {}", result.quality_tier_reasoning);
    }

    if let Some(components) = &result.components {
        let _ = writeln!(out);
        let _ = writeln!(out, "Components:");
        let _ = writeln!(out, "  Difficulty: {:.2}", components.difficulty);
        let _ = writeln!(out, "  Bloom's:    {:.2}", components.blooms);
        let _ = writeln!(out, "  Course fit: {}", score(components.course_fit));
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{THIN_RULE}");
    let _ = writeln!(out, "DIFFICULTY: {}", result.difficulty_level);
    if let Some(d) = &result.difficulty_scores {
        let _ = writeln!(out, "  Complexity:           {:.1}", d.complexity_score);
        let _ = writeln!(out, "  Language difficulty:  {:.1}", d.language_difficulty_score);
        let _ = writeln!(out, "  Cognitive effort:     {:.1}", d.cognitive_effort_score);
        let _ = writeln!(out, "  Course alignment:     {:.1}", d.course_alignment_score);
    }
    if !result.difficulty_rationale.is_empty() {
        let _ = writeln!(out, "  {}", result.difficulty_rationale);
    }

    let _ = writeln!(out, "{THIN_RULE}");
    match &result.blooms {
        Applicability::Applicable(blooms) => {
            let _ = writeln!(out, "BLOOM'S TAXONOMY:");
            for (level, value) in BLOOM_LEVELS.iter().zip(blooms.values()) {
                let _ = writeln!(out, "  {level:<11} {value:>6.1}%");
            }
            if !result.blooms_distribution_summary.is_empty() {
                let _ = writeln!(out, "  {}", result.blooms_distribution_summary);
            }
        }
        Applicability::NotApplicable => {
            let _ = writeln!(out, "BLOOM'S TAXONOMY: not applicable");
        }
    }

    let _ = writeln!(out, "{THIN_RULE}");
    match &result.course_fit {
        Applicability::Applicable(fit) => {
            let _ = writeln!(
                out,
                "COURSE FIT: {:.1} ({})",
                fit.course_fit_score, fit.course_fit_status
            );
            for (label, value) in [
                ("Content coverage", fit.content_coverage_score),
                ("Objective alignment", fit.objective_alignment_score),
                ("Difficulty appropriateness", fit.difficulty_appropriateness_score),
                ("Completeness", fit.completeness_score),
            ] {
                if let Some(value) = value {
                    let _ = writeln!(out, "  {label}: {value:.1}");
                }
            }
            if !fit.improvement_suggestions.is_empty() {
                let _ = writeln!(out, "  Suggestions:");
                for suggestion in &fit.improvement_suggestions {
                    let _ = writeln!(out, "    - {suggestion}");
                }
            }
        }
        Applicability::NotApplicable => {
            let _ = writeln!(out, "COURSE FIT: not applicable");
        }
    }

    if !result.flags.is_empty() || !result.warnings.is_empty() {
        let _ = writeln!(out, "{THIN_RULE}");
        if !result.flags.is_empty() {
            let flags: Vec<String> = result.flags.iter().map(|f| f.to_string()).collect();
            let _ = writeln!(out, "Flags: {}", flags.join(", "));
        }
        for warning in &result.warnings {
            let _ = writeln!(out, "Warning: {warning}");
        }
    }

    let _ = writeln!(out, "{THIN_RULE}");
    usage_lines(&mut out, &result.tokens, &result.llm_calls);
    let _ = writeln!(
        out,
        "Attempt {} | prompt {} | {}ms | completed {}",
        result.attempt,
        result.prompt_version,
        result.duration_ms,
        result.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    out
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => "completed",
        TaskStatus::Reused => "reused",
        TaskStatus::SkippedFailed => "skipped",
        TaskStatus::Failed => "FAILED",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn task_line(out: &mut String, record: &TaskRecord) {
    let _ = write!(
        out,
        "  {:<40} {:<10} {:>7} {:<18}",
        format!("{}@{}", record.task.assessment_id, record.task.backend),
        status_label(record.status),
        score(record.composite),
        tier(record.tier),
    );
    if let Some(error) = &record.error {
        let _ = write!(out, " {}: {}", error.kind, error.message);
    }
    out.push('\n');
}

/// Render a course report.
pub fn render_course(report: &CourseReport) -> String {
    let stats = &report.statistics;
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "COURSE: {} ({})", report.course_name, report.course_id);
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(
        out,
        "Scored: {} | Unscored: {} | Failed: {}",
        stats.scored,
        stats.unscored,
        report.failed().count()
    );
    let _ = writeln!(out, "Average AQS: {}", score(stats.average_composite));
    let _ = writeln!(out, "Average course fit: {}", score(stats.average_course_fit));

    if !stats.tier_distribution.is_empty() {
        let _ = writeln!(out, "Tiers:");
        for t in QualityTier::ALL {
            let count = stats.tier_count(t);
            if count > 0 {
                let _ = writeln!(out, "  {:<18} {count}", t.to_string());
            }
        }
    }
    if !stats.difficulty_distribution.is_empty() {
        let _ = writeln!(out, "Difficulty:");
        for (level, count) in &stats.difficulty_distribution {
            let _ = writeln!(out, "  {level:<18} {count}");
        }
    }
    if let Some(blooms) = &stats.average_blooms {
        let _ = writeln!(out, "Average Bloom's:");
        for (level, value) in BLOOM_LEVELS.iter().zip(blooms.values()) {
            let _ = writeln!(out, "  {level:<11} {value:>6.1}%");
        }
    }
    if !stats.flag_counts.is_empty() {
        let _ = writeln!(out, "Flags:");
        for (flag, count) in &stats.flag_counts {
            let _ = writeln!(out, "  {flag}: {count}");
        }
    }

    let _ = writeln!(out, "{THIN_RULE}");
    let _ = writeln!(out, "Tasks:");
    for record in &report.tasks {
        task_line(&mut out, record);
    }

    let _ = writeln!(out, "{THIN_RULE}");
    usage_lines(&mut out, &report.tokens, &report.llm_calls);
    if report.per_backend.len() > 1 {
        for (backend, metrics) in &report.per_backend {
            let _ = writeln!(
                out,
                "  {backend}: {} tasks, {} tokens, ${:.4}",
                metrics.tasks,
                metrics.tokens.total_tokens(),
                metrics.tokens.cost().total
            );
        }
    }
    out
}

/// Render a run summary.
pub fn render_run(summary: &RunSummary) -> String {
    let counts = summary.counts();
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "RUN {}", summary.run_id);
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(
        out,
        "Started {} | {:.1}s | backends: {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.duration_ms as f64 / 1000.0,
        summary.backends.join(", ")
    );
    if summary.cancelled {
        let _ = writeln!(out, "Run was cancelled.");
    }
    let _ = writeln!(
        out,
        "Tasks: {} completed, {} reused, {} skipped, {} failed, {} cancelled",
        counts.completed, counts.reused, counts.skipped_failed, counts.failed, counts.cancelled
    );
    usage_lines(&mut out, &summary.tokens, &summary.llm_calls);

    let failed: Vec<&TaskRecord> = summary.with_status(TaskStatus::Failed).collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "{THIN_RULE}");
        let _ = writeln!(out, "Failed tasks:");
        for record in failed {
            let _ = write!(out, "  {}", record.task);
            if let Some(error) = &record.error {
                let _ = write!(out, " [{}] {}", error.kind, error.message);
            }
            out.push('\n');
        }
    }
    if !summary.course_failures.is_empty() {
        let _ = writeln!(out, "Failed courses:");
        for failure in &summary.course_failures {
            let _ = writeln!(
                out,
                "  {} [{}] {}",
                failure.course_id, failure.error.kind, failure.error.message
            );
        }
    }
    if !summary.cancelled_courses.is_empty() {
        let _ = writeln!(
            out,
            "Not started: {}",
            summary.cancelled_courses.join(", ")
        );
    }
    out
}

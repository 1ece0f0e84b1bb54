//! Fixtures shared by unit tests.

use chrono::Utc;

use crate::metrics::{LlmCallStats, TokenMetrics};
use crate::model::{AssessmentKind, EvaluationTask};
use crate::results::{Applicability, AqsResult, BloomsDistribution};

/// A scored result for `do_1/<assessment>@flash`.
pub(crate) fn sample_result(assessment_id: &str, composite: f64) -> AqsResult {
    let now = Utc::now();
    AqsResult {
        task: EvaluationTask::new("do_1", assessment_id, "flash"),
        assessment_name: assessment_id.replace('_', " "),
        assessment_kind: AssessmentKind::Standalone,
        question_count: 10,
        backend_model: "gemini-2.0-flash".into(),
        difficulty_level: "Intermediate".into(),
        difficulty_rationale: String::new(),
        difficulty_scores: None,
        blooms: Applicability::Applicable(BloomsDistribution {
            remember: 50.0,
            understand: 50.0,
            ..Default::default()
        }),
        blooms_distribution_summary: String::new(),
        question_classifications: vec![],
        course_fit: Applicability::NotApplicable,
        components: None,
        composite: Some(composite),
        tier: None,
        quality_tier_reasoning: String::new(),
        flags: vec![],
        warnings: vec![],
        tokens: TokenMetrics::default(),
        llm_calls: LlmCallStats::default(),
        attempt: 1,
        input_hash: "0".repeat(64),
        prompt_version: "v4".into(),
        started_at: now,
        completed_at: now,
        duration_ms: 0,
    }
}

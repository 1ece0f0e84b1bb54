//! Core data model types.
//!
//! Course and assessment records are immutable once the context builder has
//! produced them; everything downstream reads them by reference.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single assessment question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// 1-based ordinal position.
    pub number: u32,
    pub text: String,
    /// Source type tag (e.g. "MCQ-SCA"); free-form.
    #[serde(default)]
    pub question_type: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// Correct option indices or values. Empty means unknown.
    #[serde(default)]
    pub correct_answers: Vec<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Where an assessment sits in its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentKind {
    Final,
    Practice,
    Standalone,
}

impl AssessmentKind {
    /// Classify an assessment from its directory or display name.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("final") {
            AssessmentKind::Final
        } else if lower.contains("practice") || lower.contains("quiz") {
            AssessmentKind::Practice
        } else {
            AssessmentKind::Standalone
        }
    }

    /// Whether course fit can be judged for this kind of assessment.
    pub fn has_course_fit(self) -> bool {
        !matches!(self, AssessmentKind::Standalone)
    }
}

impl fmt::Display for AssessmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssessmentKind::Final => write!(f, "final"),
            AssessmentKind::Practice => write!(f, "practice"),
            AssessmentKind::Standalone => write!(f, "standalone"),
        }
    }
}

impl FromStr for AssessmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "final" => Ok(AssessmentKind::Final),
            "practice" | "quiz" => Ok(AssessmentKind::Practice),
            "standalone" => Ok(AssessmentKind::Standalone),
            other => Err(format!("unknown assessment kind: {other}")),
        }
    }
}

/// An assessment with its questions, normalized from any source encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    /// Directory name of the assessment inside its course.
    pub id: String,
    /// Display name.
    pub name: String,
    pub kind: AssessmentKind,
    /// Module directory this assessment belongs to (practice quizzes only).
    #[serde(default)]
    pub module: Option<String>,
    /// Question count declared by the source, when it declares one.
    #[serde(default)]
    pub total_questions: Option<u32>,
    /// Expected duration in seconds (0 if unknown).
    #[serde(default)]
    pub expected_duration_secs: u64,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl AssessmentRecord {
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    /// Report deviations from a dense, unique `1..=N` numbering that agrees
    /// with the declared total.
    pub fn numbering_anomalies(&self) -> Vec<String> {
        let mut anomalies = Vec::new();
        let mut seen = BTreeSet::new();

        for q in &self.questions {
            if !seen.insert(q.number) {
                anomalies.push(format!("duplicate question number {}", q.number));
            }
        }

        let n = self.questions.len() as u32;
        let missing: Vec<String> = (1..=n)
            .filter(|i| !seen.contains(i))
            .map(|i| i.to_string())
            .collect();
        if !missing.is_empty() {
            anomalies.push(format!("question numbers not dense, missing {}", missing.join(", ")));
        }

        if let Some(total) = self.total_questions {
            if total != n {
                anomalies.push(format!(
                    "declared {total} questions but found {n}"
                ));
            }
        }

        anomalies
    }
}

/// A bounded segment of reference material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceChunk {
    pub index: usize,
    pub text: String,
}

/// Canonical course descriptor used as evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseContext {
    /// Directory name; keys tasks, checkpoints and outputs.
    pub id: String,
    /// Platform identifier from `metadata.json`, falling back to the directory name.
    #[serde(default)]
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub competencies: Vec<String>,
    /// Platform category (e.g. "Course", "Program").
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Human-readable module names, in course order.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Whole-course reference material.
    #[serde(default)]
    pub reference: Vec<ReferenceChunk>,
    /// Reference material keyed by module directory name.
    #[serde(default)]
    pub module_reference: BTreeMap<String, Vec<ReferenceChunk>>,
}

impl CourseContext {
    /// Reference material relevant to an assessment: the associated module's
    /// material for practice quizzes that have one, the whole course otherwise.
    pub fn reference_for(&self, assessment: &AssessmentRecord) -> &[ReferenceChunk] {
        if assessment.kind == AssessmentKind::Practice {
            if let Some(chunks) = assessment
                .module
                .as_ref()
                .and_then(|m| self.module_reference.get(m))
                .filter(|c| !c.is_empty())
            {
                return chunks;
            }
        }
        &self.reference
    }
}

/// The unit of work: one assessment scored by one backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvaluationTask {
    pub course_id: String,
    pub assessment_id: String,
    pub backend: String,
}

impl EvaluationTask {
    pub fn new(
        course_id: impl Into<String>,
        assessment_id: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            course_id: course_id.into(),
            assessment_id: assessment_id.into(),
            backend: backend.into(),
        }
    }
}

/// Make a name safe to use as a single path component.
pub fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        s => s.to_string(),
    }
}

impl fmt::Display for EvaluationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.course_id, self.assessment_id, self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(number: u32) -> Question {
        Question {
            number,
            text: format!("Question {number}"),
            question_type: "MCQ".into(),
            options: vec!["a".into(), "b".into()],
            correct_answers: vec!["0".into()],
            explanation: None,
        }
    }

    fn record(numbers: &[u32], total: Option<u32>) -> AssessmentRecord {
        AssessmentRecord {
            id: "Quiz_1".into(),
            name: "Quiz 1".into(),
            kind: AssessmentKind::Practice,
            module: None,
            total_questions: total,
            expected_duration_secs: 0,
            questions: numbers.iter().copied().map(question).collect(),
        }
    }

    #[test]
    fn kind_from_name() {
        assert_eq!(AssessmentKind::from_name("Final_Assessment"), AssessmentKind::Final);
        assert_eq!(AssessmentKind::from_name("Quiz_2"), AssessmentKind::Practice);
        assert_eq!(
            AssessmentKind::from_name("Practice Quiz"),
            AssessmentKind::Practice
        );
        assert_eq!(
            AssessmentKind::from_name("Onboarding check"),
            AssessmentKind::Standalone
        );
        assert!(!AssessmentKind::Standalone.has_course_fit());
        assert_eq!("quiz".parse::<AssessmentKind>().unwrap(), AssessmentKind::Practice);
        assert!("exam".parse::<AssessmentKind>().is_err());
    }

    #[test]
    fn dense_numbering_has_no_anomalies() {
        assert!(record(&[1, 2, 3], Some(3)).numbering_anomalies().is_empty());
        assert!(record(&[2, 1, 3], None).numbering_anomalies().is_empty());
    }

    #[test]
    fn numbering_anomalies_reported() {
        let anomalies = record(&[1, 1, 4], Some(5)).numbering_anomalies();
        assert!(anomalies.iter().any(|a| a.contains("duplicate question number 1")));
        assert!(anomalies.iter().any(|a| a.contains("missing 2, 3")));
        assert!(anomalies.iter().any(|a| a.contains("declared 5 questions but found 3")));
    }

    #[test]
    fn practice_quiz_prefers_module_reference() {
        let mut course = CourseContext {
            id: "do_1".into(),
            identifier: "do_1".into(),
            name: "Course".into(),
            description: String::new(),
            competencies: vec![],
            category: String::new(),
            keywords: vec![],
            modules: vec!["Module 1".into()],
            reference: vec![ReferenceChunk {
                index: 0,
                text: "whole course".into(),
            }],
            module_reference: BTreeMap::new(),
        };
        course.module_reference.insert(
            "Module_1".into(),
            vec![ReferenceChunk {
                index: 0,
                text: "module one".into(),
            }],
        );

        let mut quiz = record(&[1], None);
        quiz.module = Some("Module_1".into());
        assert_eq!(course.reference_for(&quiz)[0].text, "module one");

        quiz.kind = AssessmentKind::Final;
        assert_eq!(course.reference_for(&quiz)[0].text, "whole course");
    }

    #[test]
    fn path_components_are_sanitized() {
        assert_eq!(path_component("Quiz_1"), "Quiz_1");
        assert_eq!(path_component("a/b\\c"), "a_b_c");
        assert_eq!(path_component(".."), "_");
        assert_eq!(path_component("Final Assessment"), "Final Assessment");
    }

    #[test]
    fn task_display() {
        let task = EvaluationTask::new("do_1", "Quiz_1", "flash");
        assert_eq!(task.to_string(), "do_1/Quiz_1@flash");
    }
}

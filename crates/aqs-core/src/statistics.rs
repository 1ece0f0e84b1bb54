//! Course-level statistics over finished results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::results::{AqsResult, BloomsDistribution, QualityFlag, QualityTier};
use crate::scoring::round_to;

/// Summary numbers for one course's results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseStatistics {
    /// Results carrying a composite score.
    pub scored: usize,
    /// Zero-question sentinels.
    pub unscored: usize,
    pub average_composite: Option<f64>,
    /// Over results where course fit applies.
    pub average_course_fit: Option<f64>,
    pub tier_distribution: BTreeMap<QualityTier, usize>,
    /// Results per reported difficulty level.
    #[serde(default)]
    pub difficulty_distribution: BTreeMap<String, usize>,
    /// Results per course-fit status, where course fit applies.
    #[serde(default)]
    pub course_fit_distribution: BTreeMap<String, usize>,
    /// Mean Bloom's percentages over results that report them.
    pub average_blooms: Option<BloomsDistribution>,
    pub flag_counts: BTreeMap<QualityFlag, usize>,
    pub warning_count: usize,
}

impl CourseStatistics {
    pub fn compute(results: &[AqsResult]) -> Self {
        let mut stats = CourseStatistics::default();

        let composites: Vec<f64> = results.iter().filter_map(|r| r.composite).collect();
        stats.scored = composites.len();
        stats.unscored = results.len() - composites.len();
        stats.average_composite = mean(&composites);

        let fits: Vec<f64> = results
            .iter()
            .filter_map(|r| r.components.and_then(|c| c.course_fit))
            .collect();
        stats.average_course_fit = mean(&fits);

        for tier in results.iter().filter_map(|r| r.tier) {
            *stats.tier_distribution.entry(tier).or_default() += 1;
        }
        for result in results.iter().filter(|r| r.composite.is_some()) {
            let level = match result.difficulty_level.trim() {
                "" => "Unknown",
                level => level,
            };
            *stats
                .difficulty_distribution
                .entry(level.to_string())
                .or_default() += 1;
            if let Some(fit) = result.course_fit.as_ref() {
                *stats
                    .course_fit_distribution
                    .entry(fit.course_fit_status.clone())
                    .or_default() += 1;
            }
        }

        let blooms: Vec<BloomsDistribution> =
            results.iter().filter_map(|r| r.blooms.as_ref().copied()).collect();
        if !blooms.is_empty() {
            let n = blooms.len() as f64;
            let total = blooms
                .into_iter()
                .fold(BloomsDistribution::default(), |acc, b| acc + b);
            stats.average_blooms = Some(BloomsDistribution {
                remember: round_to(total.remember / n, 2),
                understand: round_to(total.understand / n, 2),
                apply: round_to(total.apply / n, 2),
                analyze: round_to(total.analyze / n, 2),
                evaluate: round_to(total.evaluate / n, 2),
                create: round_to(total.create / n, 2),
            });
        }

        for result in results {
            for flag in &result.flags {
                *stats.flag_counts.entry(*flag).or_default() += 1;
            }
            stats.warning_count += result.warnings.len();
        }

        stats
    }

    /// Count of results in `tier`.
    pub fn tier_count(&self, tier: QualityTier) -> usize {
        self.tier_distribution.get(&tier).copied().unwrap_or(0)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(round_to(values.iter().sum::<f64>() / values.len() as f64, 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Applicability, ComponentScores};
    use crate::test_support::sample_result;

    #[test]
    fn empty_course() {
        let stats = CourseStatistics::compute(&[]);
        assert_eq!(stats.scored, 0);
        assert_eq!(stats.average_composite, None);
        assert!(stats.tier_distribution.is_empty());
    }

    #[test]
    fn averages_and_distribution() {
        let mut a = sample_result("Final", 80.0);
        a.tier = Some(QualityTier::Good);
        a.components = Some(ComponentScores {
            difficulty: 70.0,
            blooms: 60.0,
            course_fit: Some(90.0),
        });
        a.warnings.push("odd numbering".into());

        let mut b = sample_result("Quiz_1", 61.0);
        b.tier = Some(QualityTier::Satisfactory);
        b.blooms = Applicability::Applicable(BloomsDistribution {
            remember: 100.0,
            ..Default::default()
        });

        let mut sentinel = sample_result("Empty", 0.0);
        sentinel.composite = None;
        sentinel.tier = None;
        sentinel.components = None;
        sentinel.blooms = Applicability::NotApplicable;
        sentinel.flags = vec![QualityFlag::NoQuestionsEvaluable];

        let stats = CourseStatistics::compute(&[a, b, sentinel]);
        assert_eq!(stats.scored, 2);
        assert_eq!(stats.unscored, 1);
        assert_eq!(stats.average_composite, Some(70.5));
        assert_eq!(stats.average_course_fit, Some(90.0));
        assert_eq!(stats.tier_count(QualityTier::Good), 1);
        assert_eq!(stats.tier_count(QualityTier::Poor), 0);
        assert_eq!(stats.flag_counts[&QualityFlag::NoQuestionsEvaluable], 1);
        assert_eq!(stats.warning_count, 1);
        assert_eq!(stats.difficulty_distribution["Intermediate"], 2);
        assert!(stats.course_fit_distribution.is_empty());

        // sample_result reports 50/50 remember/understand.
        let blooms = stats.average_blooms.unwrap();
        assert_eq!(blooms.remember, 75.0);
        assert_eq!(blooms.understand, 25.0);
    }
}

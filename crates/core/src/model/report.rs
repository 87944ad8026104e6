use serde::Serialize;

use crate::model::ids::{ChoiceId, QuestionId};

/// Choice text shown next to a graded question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceSummary {
    pub id: ChoiceId,
    pub text: String,
}

/// Grading verdict for one attempted question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionOutcome {
    pub question_id: QuestionId,
    pub text: String,
    pub selected: Vec<ChoiceId>,
    pub correct: Vec<ChoiceId>,
    pub is_correct: bool,
    pub explanation: Option<String>,
    /// Choices in the order the learner saw them.
    pub choices: Vec<ChoiceSummary>,
}

/// Read-only result of a finished session.
///
/// Counts are derived from the details, so they can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreReport {
    correct: usize,
    total: usize,
    details: Vec<QuestionOutcome>,
}

impl ScoreReport {
    #[must_use]
    pub fn from_outcomes(details: Vec<QuestionOutcome>) -> Self {
        let correct = details.iter().filter(|d| d.is_correct).count();
        Self {
            correct,
            total: details.len(),
            details,
        }
    }

    /// Number of exactly-correct answers.
    #[must_use]
    pub fn correct(&self) -> usize {
        self.correct
    }

    /// Number of attempted questions.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn details(&self) -> &[QuestionOutcome] {
        &self.details
    }

    /// Share of correct answers, rounded half-up to a whole percent. 0 when nothing was attempted.
    #[must_use]
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        let pct = (self.correct * 100 + self.total / 2) / self.total;
        u32::try_from(pct).unwrap_or(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: u64, is_correct: bool) -> QuestionOutcome {
        QuestionOutcome {
            question_id: QuestionId::new(id),
            text: format!("Q{id}"),
            selected: vec![ChoiceId::new(1)],
            correct: vec![ChoiceId::new(1)],
            is_correct,
            explanation: None,
            choices: Vec::new(),
        }
    }

    #[test]
    fn counts_follow_details() {
        let report = ScoreReport::from_outcomes(vec![outcome(1, true), outcome(2, false), outcome(3, true)]);
        assert_eq!(report.total(), 3);
        assert_eq!(report.correct(), 2);
        assert_eq!(report.percent(), 67);
    }

    #[test]
    fn empty_report_is_zero_percent() {
        let report = ScoreReport::from_outcomes(Vec::new());
        assert_eq!(report.total(), 0);
        assert_eq!(report.percent(), 0);
    }

    #[test]
    fn half_rounds_up() {
        let report = ScoreReport::from_outcomes(vec![outcome(1, true), outcome(2, false)]);
        assert_eq!(report.percent(), 50);
        let mut details: Vec<_> = (0..8).map(|i| outcome(i, false)).collect();
        details[0].is_correct = true;
        // 1/8 = 12.5% -> 13
        assert_eq!(ScoreReport::from_outcomes(details).percent(), 13);
    }
}

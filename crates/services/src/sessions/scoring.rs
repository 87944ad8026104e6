use std::collections::{BTreeSet, HashMap};

use exam_core::model::{ChoiceId, ChoiceSummary, Question, QuestionId, QuestionOutcome, ScoreReport};

/// Grades the attempted questions of a session, in working-set order.
///
/// Questions without a selection are left out entirely. A question is correct
/// only when the selection equals the correct set exactly.
#[must_use]
pub fn grade(questions: &[Question], answers: &HashMap<QuestionId, BTreeSet<ChoiceId>>) -> ScoreReport {
    let details = questions
        .iter()
        .filter_map(|question| {
            let selected = answers.get(&question.id()).filter(|s| !s.is_empty())?;
            let correct = question.correct_choice_ids();
            Some(QuestionOutcome {
                question_id: question.id(),
                text: question.text().to_owned(),
                selected: selected.iter().copied().collect(),
                is_correct: *selected == correct,
                correct: correct.into_iter().collect(),
                explanation: question.explanation().map(ToOwned::to_owned),
                choices: question
                    .choices()
                    .iter()
                    .map(|c| ChoiceSummary {
                        id: c.id(),
                        text: c.text().to_owned(),
                    })
                    .collect(),
            })
        })
        .collect();
    ScoreReport::from_outcomes(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{ChoiceDraft, QuestionDraft, TopicId};

    fn question(id: u64, multiple: bool, correct: &[u64]) -> Question {
        QuestionDraft {
            id: QuestionId::new(id),
            topic_id: TopicId::new(1),
            text: format!("Q{id}"),
            multiple,
            image_url: None,
            image_alt: None,
            explanation: Some(format!("why {id}")),
            sort_order: None,
            choices: (1..=3)
                .map(|c| ChoiceDraft {
                    id: ChoiceId::new(c),
                    text: format!("c{c}"),
                    is_correct: correct.contains(&c),
                    sort_order: None,
                })
                .collect(),
        }
        .validate()
        .unwrap()
    }

    fn pick(ids: &[u64]) -> BTreeSet<ChoiceId> {
        ids.iter().copied().map(ChoiceId::new).collect()
    }

    #[test]
    fn unanswered_questions_do_not_count() {
        let questions = vec![question(1, false, &[1]), question(2, false, &[2]), question(3, false, &[3])];
        let mut answers = HashMap::new();
        answers.insert(QuestionId::new(1), pick(&[1]));
        answers.insert(QuestionId::new(2), BTreeSet::new());

        let report = grade(&questions, &answers);
        assert_eq!(report.total(), 1);
        assert_eq!(report.correct(), 1);
        assert_eq!(report.details()[0].explanation.as_deref(), Some("why 1"));
        assert_eq!(report.details()[0].choices.len(), 3);
    }

    #[test]
    fn multi_choice_needs_the_exact_set() {
        let questions = vec![
            question(1, true, &[1, 2]),
            question(2, true, &[1, 2]),
            question(3, true, &[1, 2]),
        ];
        let mut answers = HashMap::new();
        answers.insert(QuestionId::new(1), pick(&[1, 2]));
        answers.insert(QuestionId::new(2), pick(&[1]));
        answers.insert(QuestionId::new(3), pick(&[1, 2, 3]));

        let report = grade(&questions, &answers);
        let verdicts: Vec<bool> = report.details().iter().map(|d| d.is_correct).collect();
        assert_eq!(verdicts, vec![true, false, false]);
        assert_eq!(report.correct(), 1);
        assert_eq!(report.total(), 3);
        assert_eq!(report.percent(), 33);
    }

    #[test]
    fn nothing_answered_is_an_empty_report() {
        let report = grade(&[question(1, false, &[1])], &HashMap::new());
        assert_eq!(report.total(), 0);
        assert_eq!(report.percent(), 0);
    }
}

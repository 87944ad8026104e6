use std::collections::{BTreeSet, HashMap};

use exam_core::model::{ChoiceId, Question, QuestionId, ScoreReport};

use super::scoring::grade;
use super::view::SessionProgress;
use crate::error::SessionError;

/// Outcome of `ExamSession::next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved { index: usize },
    Finished,
}

/// One pass through a working set.
///
/// Owns the shuffled questions and the learner's answers. Answers are keyed
/// by the ids of working-set questions only.
#[derive(Debug, Clone)]
pub struct ExamSession {
    questions: Vec<Question>,
    current: usize,
    answers: HashMap<QuestionId, BTreeSet<ChoiceId>>,
    report: Option<ScoreReport>,
}

impl ExamSession {
    #[must_use]
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            current: 0,
            answers: HashMap::new(),
            report: None,
        }
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The question on screen, `None` for an empty set.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current)
    }

    #[must_use]
    pub fn selection(&self, question: QuestionId) -> Option<&BTreeSet<ChoiceId>> {
        self.answers.get(&question)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.report.is_some()
    }

    #[must_use]
    pub fn report(&self) -> Option<&ScoreReport> {
        self.report.as_ref()
    }

    /// Questions with a non-empty selection.
    #[must_use]
    pub fn answered(&self) -> usize {
        self.answers.values().filter(|s| !s.is_empty()).count()
    }

    /// Select `choice` on the current question.
    ///
    /// Single-choice questions replace the selection; multi-choice questions
    /// toggle membership.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Finished` after grading, `Empty` for an empty set,
    /// and `UnknownChoice` when `choice` is not on the current question.
    pub fn select(&mut self, choice: ChoiceId) -> Result<(), SessionError> {
        if self.is_finished() {
            return Err(SessionError::Finished);
        }
        let question = self.current_question().ok_or(SessionError::Empty)?;
        let (question_id, multiple) = (question.id(), question.multiple());
        if !question.has_choice(choice) {
            return Err(SessionError::UnknownChoice {
                question: question_id,
                choice,
            });
        }

        let selected = self.answers.entry(question_id).or_default();
        if !multiple {
            selected.clear();
            selected.insert(choice);
        } else if !selected.remove(&choice) {
            selected.insert(choice);
        }
        Ok(())
    }

    /// Move forward, finishing the session from the last question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoSelection` when the current question has no
    /// selection, `Finished` after grading, `Empty` for an empty set.
    pub fn next(&mut self) -> Result<Advance, SessionError> {
        if self.is_finished() {
            return Err(SessionError::Finished);
        }
        let question = self.current_question().ok_or(SessionError::Empty)?;
        if self.selection(question.id()).is_none_or(BTreeSet::is_empty) {
            return Err(SessionError::NoSelection);
        }

        if self.current + 1 < self.questions.len() {
            self.current += 1;
            Ok(Advance::Moved {
                index: self.current,
            })
        } else {
            self.finish();
            Ok(Advance::Finished)
        }
    }

    /// Step back one question, keeping all answers. Stops at the first question.
    pub fn back(&mut self) {
        if !self.is_finished() {
            self.current = self.current.saturating_sub(1);
        }
    }

    /// Finish now and grade whatever has been answered.
    pub fn stop_and_grade(&mut self) -> &ScoreReport {
        self.finish()
    }

    fn finish(&mut self) -> &ScoreReport {
        let questions = &self.questions;
        let answers = &self.answers;
        let report = self.report.get_or_insert_with(|| grade(questions, answers));
        tracing::info!(
            correct = report.correct(),
            total = report.total(),
            "session graded"
        );
        report
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        let total = self.questions.len();
        let index = self.current;
        let percent = if total == 0 {
            0
        } else {
            u32::try_from(((index + 1) * 100 * 2 + total) / (total * 2)).unwrap_or(100)
        };
        let can_go_next = !self.is_finished()
            && self
                .current_question()
                .and_then(|q| self.selection(q.id()))
                .is_some_and(|s| !s.is_empty());
        SessionProgress {
            index,
            total,
            answered: self.answered(),
            percent,
            is_last: total > 0 && index + 1 == total,
            can_go_next,
            is_finished: self.is_finished(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{ChoiceDraft, QuestionDraft, TopicId};

    fn question(id: u64, multiple: bool) -> Question {
        QuestionDraft {
            id: QuestionId::new(id),
            topic_id: TopicId::new(1),
            text: format!("Q{id}"),
            multiple,
            image_url: None,
            image_alt: None,
            explanation: None,
            sort_order: None,
            choices: (1..=3)
                .map(|c| ChoiceDraft {
                    id: ChoiceId::new(id * 10 + c),
                    text: format!("c{c}"),
                    is_correct: c == 1 || (multiple && c == 2),
                    sort_order: None,
                })
                .collect(),
        }
        .validate()
        .unwrap()
    }

    fn c(id: u64) -> ChoiceId {
        ChoiceId::new(id)
    }

    #[test]
    fn single_choice_replaces_selection() {
        let mut session = ExamSession::new(vec![question(1, false)]);
        session.select(c(11)).unwrap();
        session.select(c(12)).unwrap();
        let selected: Vec<_> = session.selection(QuestionId::new(1)).unwrap().iter().copied().collect();
        assert_eq!(selected, vec![c(12)]);
    }

    #[test]
    fn multi_choice_toggles_selection() {
        let mut session = ExamSession::new(vec![question(1, true)]);
        session.select(c(11)).unwrap();
        session.select(c(12)).unwrap();
        session.select(c(11)).unwrap();
        let selected: Vec<_> = session.selection(QuestionId::new(1)).unwrap().iter().copied().collect();
        assert_eq!(selected, vec![c(12)]);

        session.select(c(12)).unwrap();
        assert!(session.selection(QuestionId::new(1)).unwrap().is_empty());
        assert_eq!(session.next(), Err(SessionError::NoSelection));
    }

    #[test]
    fn choice_from_another_question_is_rejected() {
        let mut session = ExamSession::new(vec![question(1, false), question(2, false)]);
        assert_eq!(
            session.select(c(21)),
            Err(SessionError::UnknownChoice {
                question: QuestionId::new(1),
                choice: c(21)
            })
        );
    }

    #[test]
    fn next_requires_a_selection() {
        let mut session = ExamSession::new(vec![question(1, false), question(2, false)]);
        assert_eq!(session.next(), Err(SessionError::NoSelection));
        assert!(!session.progress().can_go_next);
        session.select(c(11)).unwrap();
        assert!(session.progress().can_go_next);
        assert_eq!(session.next(), Ok(Advance::Moved { index: 1 }));
    }

    #[test]
    fn next_on_last_question_finishes() {
        let mut session = ExamSession::new(vec![question(1, false)]);
        session.select(c(11)).unwrap();
        assert!(session.progress().is_last);
        assert_eq!(session.next(), Ok(Advance::Finished));
        assert!(session.is_finished());
        assert_eq!(session.report().unwrap().correct(), 1);
        assert_eq!(session.select(c(12)), Err(SessionError::Finished));
    }

    #[test]
    fn back_saturates_and_keeps_answers() {
        let mut session = ExamSession::new(vec![question(1, false), question(2, false)]);
        session.back();
        assert_eq!(session.current_index(), 0);

        session.select(c(12)).unwrap();
        session.next().unwrap();
        session.back();
        assert_eq!(session.current_index(), 0);
        assert!(session.selection(QuestionId::new(1)).unwrap().contains(&c(12)));
    }

    #[test]
    fn stop_grades_only_answered_questions() {
        let mut session = ExamSession::new(vec![question(1, false), question(2, false), question(3, false)]);
        session.select(c(11)).unwrap();
        session.next().unwrap();
        session.select(c(22)).unwrap();

        let report = session.stop_and_grade().clone();
        assert_eq!(report.total(), 2);
        assert_eq!(report.correct(), 1);
        assert_eq!(session.report(), Some(&report));
    }

    #[test]
    fn empty_session_has_no_current_question() {
        let mut session = ExamSession::new(Vec::new());
        assert!(session.current_question().is_none());
        assert_eq!(session.next(), Err(SessionError::Empty));
        assert_eq!(session.progress().percent, 0);
        assert_eq!(session.stop_and_grade().total(), 0);
    }

    #[test]
    fn progress_counts_position_and_answers() {
        let mut session = ExamSession::new(vec![question(1, false), question(2, false), question(3, false)]);
        assert_eq!(session.progress().percent, 33);
        session.select(c(11)).unwrap();
        session.next().unwrap();
        let progress = session.progress();
        assert_eq!(progress.index, 1);
        assert_eq!(progress.answered, 1);
        assert_eq!(progress.percent, 67);
        assert!(!progress.is_last);
    }
}

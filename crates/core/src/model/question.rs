use rand::Rng;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use url::Url;

use crate::model::ids::{ChoiceId, QuestionId, TopicId};
use crate::shuffle::shuffle_in_place;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question {0} has empty text")]
    EmptyText(QuestionId),

    #[error("question {0} has no choices")]
    NoChoices(QuestionId),

    #[error("question {question} lists choice {choice} more than once")]
    DuplicateChoice { question: QuestionId, choice: ChoiceId },

    #[error("single-choice question {question} must have exactly one correct choice, found {found}")]
    SingleChoiceCorrectCount { question: QuestionId, found: usize },

    #[error("multiple-choice question {0} has no correct choice")]
    NoCorrectChoice(QuestionId),

    #[error("image url cannot be empty")]
    EmptyImageUrl,
}

//
// ─── MEDIA ─────────────────────────────────────────────────────────────────────
//

/// Location of a question illustration, as authored in the content store.
///
/// The raw string is kept even when it is not a well-formed absolute URL so a
/// broken reference degrades to a missing image instead of rejecting the bank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageUrl(String);

impl ImageUrl {
    /// # Errors
    ///
    /// Returns `QuestionError::EmptyImageUrl` for blank input.
    pub fn new(raw: impl Into<String>) -> Result<Self, QuestionError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(QuestionError::EmptyImageUrl);
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the reference as an absolute URL, if it is one.
    #[must_use]
    pub fn parsed(&self) -> Option<Url> {
        Url::parse(&self.0).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionImage {
    pub url: ImageUrl,
    pub alt: Option<String>,
}

//
// ─── CHOICE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    id: ChoiceId,
    question_id: QuestionId,
    text: String,
    is_correct: bool,
    sort_order: i64,
}

impl Choice {
    #[must_use]
    pub fn id(&self) -> ChoiceId {
        self.id
    }

    #[must_use]
    pub fn question_id(&self) -> QuestionId {
        self.question_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Correctness flag. Only grading and review code should read this.
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.is_correct
    }

    #[must_use]
    pub fn sort_order(&self) -> i64 {
        self.sort_order
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceDraft {
    pub id: ChoiceId,
    pub text: String,
    pub is_correct: bool,
    pub sort_order: Option<i64>,
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// Unvalidated question as read from the content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    pub id: QuestionId,
    pub topic_id: TopicId,
    pub text: String,
    pub multiple: bool,
    pub image_url: Option<String>,
    pub image_alt: Option<String>,
    pub explanation: Option<String>,
    pub sort_order: Option<i64>,
    pub choices: Vec<ChoiceDraft>,
}

impl QuestionDraft {
    /// Checks the authored question against the choice/correctness rules.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` when the text is empty, there are no choices,
    /// a choice id repeats, or the correct-choice count does not fit `multiple`.
    pub fn validate(self) -> Result<Question, QuestionError> {
        if self.text.trim().is_empty() {
            return Err(QuestionError::EmptyText(self.id));
        }
        if self.choices.is_empty() {
            return Err(QuestionError::NoChoices(self.id));
        }

        let mut seen = HashSet::with_capacity(self.choices.len());
        for choice in &self.choices {
            if !seen.insert(choice.id) {
                return Err(QuestionError::DuplicateChoice {
                    question: self.id,
                    choice: choice.id,
                });
            }
        }

        let correct = self.choices.iter().filter(|c| c.is_correct).count();
        if self.multiple {
            if correct == 0 {
                return Err(QuestionError::NoCorrectChoice(self.id));
            }
        } else if correct != 1 {
            return Err(QuestionError::SingleChoiceCorrectCount {
                question: self.id,
                found: correct,
            });
        }

        let image = match non_blank(self.image_url) {
            Some(url) => Some(QuestionImage {
                url: ImageUrl::new(url)?,
                alt: non_blank(self.image_alt),
            }),
            None => None,
        };

        let question_id = self.id;
        let choices = self
            .choices
            .into_iter()
            .map(|c| Choice {
                id: c.id,
                question_id,
                text: c.text,
                is_correct: c.is_correct,
                sort_order: c.sort_order.unwrap_or(0),
            })
            .collect();

        Ok(Question {
            id: self.id,
            topic_id: self.topic_id,
            text: self.text,
            multiple: self.multiple,
            image,
            explanation: non_blank(self.explanation),
            sort_order: self.sort_order.unwrap_or(0),
            choices,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A validated question with its choices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    topic_id: TopicId,
    text: String,
    multiple: bool,
    image: Option<QuestionImage>,
    explanation: Option<String>,
    sort_order: i64,
    choices: Vec<Choice>,
}

impl Question {
    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True when several choices may be correct and selection toggles.
    #[must_use]
    pub fn multiple(&self) -> bool {
        self.multiple
    }

    #[must_use]
    pub fn image(&self) -> Option<&QuestionImage> {
        self.image.as_ref()
    }

    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    #[must_use]
    pub fn sort_order(&self) -> i64 {
        self.sort_order
    }

    #[must_use]
    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    #[must_use]
    pub fn has_choice(&self, id: ChoiceId) -> bool {
        self.choices.iter().any(|c| c.id == id)
    }

    #[must_use]
    pub fn correct_choice_ids(&self) -> BTreeSet<ChoiceId> {
        self.choices
            .iter()
            .filter(|c| c.is_correct)
            .map(Choice::id)
            .collect()
    }

    /// Puts choices back into authored order. Stable, so equal orders keep fetch order.
    pub fn sort_choices(&mut self) {
        self.choices.sort_by_key(Choice::sort_order);
    }

    /// Randomizes the presentation order of the choices.
    pub fn shuffle_choices<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        shuffle_in_place(&mut self.choices, rng);
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn choice(id: u64, correct: bool, order: Option<i64>) -> ChoiceDraft {
        ChoiceDraft {
            id: ChoiceId::new(id),
            text: format!("choice {id}"),
            is_correct: correct,
            sort_order: order,
        }
    }

    fn draft(multiple: bool, choices: Vec<ChoiceDraft>) -> QuestionDraft {
        QuestionDraft {
            id: QuestionId::new(1),
            topic_id: TopicId::new(1),
            text: "Which?".into(),
            multiple,
            image_url: None,
            image_alt: None,
            explanation: None,
            sort_order: None,
            choices,
        }
    }

    #[test]
    fn single_choice_needs_exactly_one_correct() {
        let err = draft(false, vec![choice(1, true, None), choice(2, true, None)])
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            QuestionError::SingleChoiceCorrectCount { found: 2, .. }
        ));

        let err = draft(false, vec![choice(1, false, None)])
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            QuestionError::SingleChoiceCorrectCount { found: 0, .. }
        ));
    }

    #[test]
    fn multiple_choice_accepts_several_correct() {
        let q = draft(
            true,
            vec![choice(1, true, None), choice(2, true, None), choice(3, false, None)],
        )
        .validate()
        .unwrap();
        let expected: BTreeSet<_> = [ChoiceId::new(1), ChoiceId::new(2)].into();
        assert_eq!(q.correct_choice_ids(), expected);
    }

    #[test]
    fn multiple_choice_needs_a_correct_choice() {
        let err = draft(true, vec![choice(1, false, None)])
            .validate()
            .unwrap_err();
        assert_eq!(err, QuestionError::NoCorrectChoice(QuestionId::new(1)));
    }

    #[test]
    fn rejects_empty_choices_and_duplicates() {
        assert_eq!(
            draft(false, vec![]).validate().unwrap_err(),
            QuestionError::NoChoices(QuestionId::new(1))
        );
        let err = draft(false, vec![choice(1, true, None), choice(1, false, None)])
            .validate()
            .unwrap_err();
        assert!(matches!(err, QuestionError::DuplicateChoice { .. }));
    }

    #[test]
    fn blank_image_url_means_no_image() {
        let mut d = draft(false, vec![choice(1, true, None)]);
        d.image_url = Some("  ".into());
        d.image_alt = Some("alt".into());
        let q = d.validate().unwrap();
        assert!(q.image().is_none());
    }

    #[test]
    fn image_keeps_unparseable_reference() {
        let mut d = draft(false, vec![choice(1, true, None)]);
        d.image_url = Some("not a url".into());
        let q = d.validate().unwrap();
        let image = q.image().unwrap();
        assert_eq!(image.url.as_str(), "not a url");
        assert!(image.url.parsed().is_none());
    }

    #[test]
    fn sort_choices_treats_missing_order_as_zero_and_is_stable() {
        let mut q = draft(
            false,
            vec![
                choice(1, false, Some(2)),
                choice(2, true, None),
                choice(3, false, Some(-1)),
                choice(4, false, Some(0)),
            ],
        )
        .validate()
        .unwrap();
        q.sort_choices();
        let ids: Vec<u64> = q.choices().iter().map(|c| c.id().value()).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }

    #[test]
    fn shuffling_choices_keeps_correctness_attached() {
        let mut q = draft(
            true,
            (1..=8).map(|i| choice(i, i % 3 == 0, None)).collect(),
        )
        .validate()
        .unwrap();
        let before = q.correct_choice_ids();
        q.shuffle_choices(&mut StdRng::seed_from_u64(3));
        assert_eq!(q.correct_choice_ids(), before);
        assert!(q.choices().iter().all(|c| c.question_id() == q.id()));
    }
}

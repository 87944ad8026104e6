//! Read-only projections handed to a UI. Nothing here exposes correctness
//! before grading.

use serde::Serialize;

use exam_core::model::{ChoiceId, Question, QuestionId, ScoreReport};

use crate::preload::ImageState;

/// Position and answer counts for the progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionProgress {
    /// Zero-based index of the current question.
    pub index: usize,
    pub total: usize,
    pub answered: usize,
    /// Position as a whole percent, rounded half up.
    pub percent: u32,
    pub is_last: bool,
    pub can_go_next: bool,
    pub is_finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceView {
    pub id: ChoiceId,
    pub text: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageView {
    pub url: String,
    pub alt: Option<String>,
    pub state: ImageState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub text: String,
    pub multiple: bool,
    pub image: Option<ImageView>,
    pub choices: Vec<ChoiceView>,
}

impl QuestionView {
    pub(crate) fn build(
        question: &Question,
        is_selected: impl Fn(ChoiceId) -> bool,
        image_state: impl Fn(&str) -> ImageState,
    ) -> Self {
        Self {
            id: question.id(),
            text: question.text().to_owned(),
            multiple: question.multiple(),
            image: question.image().map(|image| ImageView {
                url: image.url.as_str().to_owned(),
                alt: image.alt.clone(),
                state: image_state(image.url.as_str()),
            }),
            choices: question
                .choices()
                .iter()
                .map(|c| ChoiceView {
                    id: c.id(),
                    text: c.text().to_owned(),
                    selected: is_selected(c.id()),
                })
                .collect(),
        }
    }
}

/// What the learner should see right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExamView {
    /// Nothing loaded yet.
    Idle,
    /// The bank is large; waiting for a `SampleMode`.
    ChooseSample { topic: String, bank_size: usize },
    /// Images are being fetched.
    Preloading { loaded: usize, total: usize },
    /// The topic has no questions.
    Empty { topic: String },
    Question {
        topic: String,
        bank_size: usize,
        question: QuestionView,
        progress: SessionProgress,
    },
    Report { topic: String, report: ScoreReport },
}

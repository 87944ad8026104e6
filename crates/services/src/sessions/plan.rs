use rand::Rng;
use serde::{Deserialize, Serialize};

use exam_core::model::Question;
use exam_core::shuffle::shuffle_in_place;

use crate::config::ExamConfig;

/// How much of a large bank goes into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMode {
    /// A random subset of `ExamConfig::sample_size` questions.
    Capped,
    /// The whole bank in random order.
    All,
}

/// True when the learner must pick a `SampleMode` before starting.
#[must_use]
pub fn needs_choice(bank_len: usize, config: &ExamConfig) -> bool {
    bank_len > config.sample_threshold
}

/// The mode used when no choice is required.
#[must_use]
pub fn automatic_mode(bank_len: usize, config: &ExamConfig) -> Option<SampleMode> {
    (!needs_choice(bank_len, config)).then_some(SampleMode::All)
}

/// Builds the randomized question list for one session.
///
/// The whole bank is shuffled before truncation so every subset of the
/// requested size is equally likely. Each selected question then gets its
/// choices shuffled independently.
pub fn build_working_set<R: Rng + ?Sized>(
    bank: &[Question],
    mode: SampleMode,
    config: &ExamConfig,
    rng: &mut R,
) -> Vec<Question> {
    let mut picked = bank.to_vec();
    shuffle_in_place(&mut picked, rng);
    if mode == SampleMode::Capped {
        picked.truncate(config.sample_size);
    }
    for question in &mut picked {
        question.shuffle_choices(rng);
    }
    picked
}

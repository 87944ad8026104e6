/// Sampling knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamConfig {
    /// Banks with more questions than this require a sample choice.
    pub sample_threshold: usize,
    /// Number of questions in a capped sample.
    pub sample_size: usize,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            sample_threshold: 50,
            sample_size: 50,
        }
    }
}

impl ExamConfig {
    #[must_use]
    pub fn with_sample_threshold(mut self, threshold: usize) -> Self {
        self.sample_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size;
        self
    }
}

use std::sync::{Arc, Mutex, PoisonError};

use exam_core::model::{ImageUrl, Question, Topic, TopicSlug, TopicSummary};
use storage::repository::QuestionBankRepository;
use tokio_util::sync::CancellationToken;

use crate::error::BankError;

/// A topic with its full question list, choices in authored order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionBank {
    topic: Topic,
    questions: Vec<Question>,
}

impl QuestionBank {
    #[must_use]
    pub fn new(topic: Topic, mut questions: Vec<Question>) -> Self {
        for question in &mut questions {
            question.sort_choices();
        }
        Self { topic, questions }
    }

    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
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
}

/// Distinct image urls of `questions`, in first-seen order.
#[must_use]
pub fn image_urls(questions: &[Question]) -> Vec<ImageUrl> {
    let mut urls: Vec<ImageUrl> = Vec::new();
    for question in questions {
        if let Some(image) = question.image() {
            if !urls.contains(&image.url) {
                urls.push(image.url.clone());
            }
        }
    }
    urls
}

/// Fetches a topic and its questions.
///
/// Clones share the current topic token, so a topic started through one
/// clone supersedes work started through any other.
#[derive(Clone)]
pub struct QuestionBankLoader {
    repo: Arc<dyn QuestionBankRepository>,
    current: Arc<Mutex<CancellationToken>>,
}

impl QuestionBankLoader {
    #[must_use]
    pub fn new(repo: Arc<dyn QuestionBankRepository>) -> Self {
        Self {
            repo,
            current: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Make a new topic current and cancel the token of the previous one.
    #[must_use]
    pub fn start_topic(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(
            &mut *self.current.lock().unwrap_or_else(PoisonError::into_inner),
            token.clone(),
        );
        previous.cancel();
        token
    }

    /// Load the bank for `slug`. No randomization happens here.
    ///
    /// # Errors
    ///
    /// Returns `BankError::InvalidSlug` for a blank slug, `TopicNotFound` for an
    /// unknown one, `Cancelled` if `cancel` fires first, and `Fetch` when the
    /// store fails. None of these are retried.
    pub async fn load(
        &self,
        slug: &str,
        cancel: &CancellationToken,
    ) -> Result<QuestionBank, BankError> {
        let slug = TopicSlug::new(slug).map_err(BankError::InvalidSlug)?;
        if cancel.is_cancelled() {
            return Err(BankError::Cancelled);
        }

        let topic = cancel
            .run_until_cancelled(self.repo.find_topic(&slug))
            .await
            .ok_or(BankError::Cancelled)??
            .ok_or_else(|| BankError::TopicNotFound(slug.clone()))?;

        let questions = cancel
            .run_until_cancelled(self.repo.list_questions(topic.id()))
            .await
            .ok_or(BankError::Cancelled)??;

        tracing::debug!(topic = %slug, questions = questions.len(), "question bank loaded");
        Ok(QuestionBank::new(topic, questions))
    }

    /// Topic catalog with question counts.
    ///
    /// # Errors
    ///
    /// Returns `BankError::Fetch` when the store fails.
    pub async fn catalog(&self) -> Result<Vec<TopicSummary>, BankError> {
        Ok(self.repo.list_topics().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{ChoiceDraft, ChoiceId, QuestionDraft, QuestionId, TopicId};
    use storage::repository::InMemoryRepository;

    fn question(id: u64, image: Option<&str>, orders: &[Option<i64>]) -> Question {
        QuestionDraft {
            id: QuestionId::new(id),
            topic_id: TopicId::new(1),
            text: format!("Q{id}"),
            multiple: true,
            image_url: image.map(str::to_owned),
            image_alt: None,
            explanation: None,
            sort_order: None,
            choices: orders
                .iter()
                .enumerate()
                .map(|(i, order)| ChoiceDraft {
                    id: ChoiceId::new(id * 10 + i as u64),
                    text: format!("c{i}"),
                    is_correct: true,
                    sort_order: *order,
                })
                .collect(),
        }
        .validate()
        .unwrap()
    }

    async fn seeded() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        let topic = Topic::new(
            TopicId::new(1),
            TopicSlug::new("roads").unwrap(),
            "Roads",
            None,
            0,
        )
        .unwrap();
        repo.upsert_topic(&topic).await.unwrap();
        repo.upsert_question(&question(1, None, &[Some(3), None, Some(1), None]))
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn load_sorts_choices_with_missing_order_as_zero() {
        let loader = QuestionBankLoader::new(Arc::new(seeded().await));
        let bank = loader.load("roads", &CancellationToken::new()).await.unwrap();

        let ids: Vec<u64> = bank.questions()[0]
            .choices()
            .iter()
            .map(|c| c.id().value())
            .collect();
        assert_eq!(ids, vec![11, 13, 12, 10]);
    }

    #[tokio::test]
    async fn blank_slug_is_rejected() {
        let loader = QuestionBankLoader::new(Arc::new(seeded().await));
        let err = loader.load("  ", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BankError::InvalidSlug(_)));
    }

    #[tokio::test]
    async fn unknown_topic_names_the_slug() {
        let loader = QuestionBankLoader::new(Arc::new(seeded().await));
        let err = loader
            .load("nowhere", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "topic not found for slug: nowhere");
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_load() {
        let loader = QuestionBankLoader::new(Arc::new(seeded().await));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = loader.load("roads", &cancel).await.unwrap_err();
        assert!(matches!(err, BankError::Cancelled));
    }

    #[test]
    fn image_urls_are_deduplicated() {
        let questions = vec![
            question(1, Some("https://a/1.png"), &[None]),
            question(2, None, &[None]),
            question(3, Some("https://a/1.png"), &[None]),
            question(4, Some("https://a/2.png"), &[None]),
        ];
        let urls = image_urls(&questions);
        let urls: Vec<&str> = urls.iter().map(ImageUrl::as_str).collect();
        assert_eq!(urls, vec!["https://a/1.png", "https://a/2.png"]);
    }

    #[test]
    fn starting_a_topic_cancels_the_one_before_across_clones() {
        let loader = QuestionBankLoader::new(Arc::new(InMemoryRepository::new()));
        let other = loader.clone();

        let first = loader.start_topic();
        assert!(!first.is_cancelled());
        let second = other.start_topic();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}

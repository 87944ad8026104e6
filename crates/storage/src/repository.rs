use async_trait::async_trait;
use exam_core::model::{
    EntitlementRecord, Question, Topic, TopicId, TopicSlug, TopicSummary, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid content: {0}")]
    Invalid(#[from] exam_core::Error),
}

impl StorageError {
    /// True for failures that may succeed when tried again later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

/// Read access to topics and their question graph.
#[async_trait]
pub trait QuestionBankRepository: Send + Sync {
    /// Look up a topic by its slug.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures. A missing topic is `Ok(None)`.
    async fn find_topic(&self, slug: &TopicSlug) -> Result<Option<Topic>, StorageError>;

    /// All questions of a topic, with choices, in authored order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` when a stored row fails validation.
    async fn list_questions(&self, topic_id: TopicId) -> Result<Vec<Question>, StorageError>;

    /// Topic catalog with per-topic question counts, ordered by `sort_order`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_topics(&self) -> Result<Vec<TopicSummary>, StorageError>;

    /// Persist or update a topic.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the slug belongs to another topic.
    async fn upsert_topic(&self, topic: &Topic) -> Result<(), StorageError>;

    /// Persist or replace a question together with its choices.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the owning topic does not exist.
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError>;
}

/// Access records keyed by user.
#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    /// Fetch the entitlement record for a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::PermissionDenied` when the store refuses the read,
    /// or other storage errors. A missing record is `Ok(None)`.
    async fn get_entitlement(&self, user_id: UserId)
    -> Result<Option<EntitlementRecord>, StorageError>;

    /// Persist or update a user's entitlement.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn upsert_entitlement(&self, record: &EntitlementRecord) -> Result<(), StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    topics: Arc<Mutex<HashMap<TopicId, Topic>>>,
    questions: Arc<Mutex<HashMap<TopicId, Vec<Question>>>>,
    entitlements: Arc<Mutex<HashMap<UserId, EntitlementRecord>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl QuestionBankRepository for InMemoryRepository {
    async fn find_topic(&self, slug: &TopicSlug) -> Result<Option<Topic>, StorageError> {
        let guard = self.topics.lock().map_err(poisoned)?;
        Ok(guard.values().find(|t| t.slug() == slug).cloned())
    }

    async fn list_questions(&self, topic_id: TopicId) -> Result<Vec<Question>, StorageError> {
        let guard = self.questions.lock().map_err(poisoned)?;
        let mut questions = guard.get(&topic_id).cloned().unwrap_or_default();
        questions.sort_by_key(|q| (q.sort_order(), q.id()));
        Ok(questions)
    }

    async fn list_topics(&self) -> Result<Vec<TopicSummary>, StorageError> {
        let topics = self.topics.lock().map_err(poisoned)?;
        let questions = self.questions.lock().map_err(poisoned)?;
        let mut out: Vec<TopicSummary> = topics
            .values()
            .map(|topic| -> Result<TopicSummary, StorageError> {
                let count = questions.get(&topic.id()).map_or(0, Vec::len);
                Ok(TopicSummary {
                    topic: topic.clone(),
                    question_count: u32::try_from(count)
                        .map_err(|_| StorageError::Serialization("question count overflow".into()))?,
                })
            })
            .collect::<Result<_, _>>()?;
        out.sort_by_key(|s| (s.topic.sort_order(), s.topic.id()));
        Ok(out)
    }

    async fn upsert_topic(&self, topic: &Topic) -> Result<(), StorageError> {
        let mut guard = self.topics.lock().map_err(poisoned)?;
        if guard
            .values()
            .any(|t| t.slug() == topic.slug() && t.id() != topic.id())
        {
            return Err(StorageError::Conflict);
        }
        guard.insert(topic.id(), topic.clone());
        Ok(())
    }

    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        if !self
            .topics
            .lock()
            .map_err(poisoned)?
            .contains_key(&question.topic_id())
        {
            return Err(StorageError::NotFound);
        }
        let mut guard = self.questions.lock().map_err(poisoned)?;
        let list = guard.entry(question.topic_id()).or_default();
        match list.iter_mut().find(|q| q.id() == question.id()) {
            Some(existing) => *existing = question.clone(),
            None => list.push(question.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementRepository for InMemoryRepository {
    async fn get_entitlement(
        &self,
        user_id: UserId,
    ) -> Result<Option<EntitlementRecord>, StorageError> {
        let guard = self.entitlements.lock().map_err(poisoned)?;
        Ok(guard.get(&user_id).cloned())
    }

    async fn upsert_entitlement(&self, record: &EntitlementRecord) -> Result<(), StorageError> {
        let mut guard = self.entitlements.lock().map_err(poisoned)?;
        guard.insert(record.user_id, record.clone());
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub bank: Arc<dyn QuestionBankRepository>,
    pub entitlements: Arc<dyn EntitlementRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let bank: Arc<dyn QuestionBankRepository> = Arc::new(repo.clone());
        let entitlements: Arc<dyn EntitlementRepository> = Arc::new(repo);
        Self { bank, entitlements }
    }
}

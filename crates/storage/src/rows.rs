//! Raw row shapes exchanged with the content store, and their validation into
//! domain types. Nothing past this module sees an unvalidated row.

use chrono::{DateTime, Utc};
use exam_core::model::{
    ChoiceDraft, ChoiceId, EntitlementRecord, Question, QuestionDraft, QuestionId, Topic,
    TopicId, TopicSlug, UserId,
};
use serde::{Deserialize, Serialize};

use crate::repository::{Storage, StorageError};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRow {
    pub id: u64,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

impl TopicRow {
    /// # Errors
    ///
    /// Returns `StorageError::Invalid` for a blank slug or title.
    pub fn into_topic(self) -> Result<Topic, StorageError> {
        let slug = TopicSlug::new(self.slug).map_err(exam_core::Error::from)?;
        let topic = Topic::new(
            TopicId::new(self.id),
            slug,
            self.title,
            self.description,
            self.sort_order.unwrap_or(0),
        )
        .map_err(exam_core::Error::from)?;
        Ok(topic)
    }

    #[must_use]
    pub fn from_topic(topic: &Topic) -> Self {
        Self {
            id: topic.id().value(),
            slug: topic.slug().as_str().to_owned(),
            title: topic.title().to_owned(),
            description: topic.description().map(ToOwned::to_owned),
            sort_order: Some(topic.sort_order()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRow {
    pub id: u64,
    pub text: String,
    pub is_correct: bool,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRow {
    pub id: u64,
    pub text: String,
    #[serde(default)]
    pub multiple: Option<bool>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_alt: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub choices: Vec<ChoiceRow>,
}

impl QuestionRow {
    /// Validate the row into a domain question owned by `topic_id`.
    ///
    /// A missing `multiple` flag reads as single-choice.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Invalid` when the question breaks the
    /// choice/correctness invariants.
    pub fn into_question(self, topic_id: TopicId) -> Result<Question, StorageError> {
        let question = QuestionDraft {
            id: QuestionId::new(self.id),
            topic_id,
            text: self.text,
            multiple: self.multiple.unwrap_or(false),
            image_url: self.image_url,
            image_alt: self.image_alt,
            explanation: self.explanation,
            sort_order: self.sort_order,
            choices: self
                .choices
                .into_iter()
                .map(|c| ChoiceDraft {
                    id: ChoiceId::new(c.id),
                    text: c.text,
                    is_correct: c.is_correct,
                    sort_order: c.sort_order,
                })
                .collect(),
        }
        .validate()
        .map_err(exam_core::Error::from)?;
        Ok(question)
    }

    #[must_use]
    pub fn from_question(question: &Question) -> Self {
        Self {
            id: question.id().value(),
            text: question.text().to_owned(),
            multiple: Some(question.multiple()),
            image_url: question.image().map(|i| i.url.as_str().to_owned()),
            image_alt: question.image().and_then(|i| i.alt.clone()),
            explanation: question.explanation().map(ToOwned::to_owned),
            sort_order: Some(question.sort_order()),
            choices: question
                .choices()
                .iter()
                .map(|c| ChoiceRow {
                    id: c.id().value(),
                    text: c.text().to_owned(),
                    is_correct: c.is_correct(),
                    sort_order: Some(c.sort_order()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRow {
    pub user_id: String,
    pub active: bool,
    pub never_expires: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

impl EntitlementRow {
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if `user_id` is not a UUID.
    pub fn into_record(self) -> Result<EntitlementRecord, StorageError> {
        let user_id: UserId = self.user_id.parse().map_err(ser)?;
        Ok(EntitlementRecord {
            user_id,
            active: self.active,
            never_expires: self.never_expires,
            expires_at: self.expires_at,
            note: self.note.filter(|n| !n.trim().is_empty()),
        })
    }
}

/// A topic with its full question graph, as exported from the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBundle {
    #[serde(flatten)]
    pub topic: TopicRow,
    #[serde(default)]
    pub questions: Vec<QuestionRow>,
}

/// Import document accepted by the seed tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankImport {
    #[serde(default)]
    pub topics: Vec<TopicBundle>,
    #[serde(default)]
    pub entitlements: Vec<EntitlementRow>,
}

impl BankImport {
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` for malformed JSON.
    pub fn from_json(raw: &str) -> Result<Self, StorageError> {
        serde_json::from_str(raw).map_err(ser)
    }

    /// Validate every row and upsert it into `storage`.
    ///
    /// Rows are written in document order; a failure stops the import with the
    /// rows before it already stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Invalid` for a topic or question that fails
    /// validation, `StorageError::Serialization` for an entitlement row with a
    /// malformed user id, or the repository error of the failing write.
    pub async fn apply(self, storage: &Storage) -> Result<ImportSummary, StorageError> {
        let mut summary = ImportSummary::default();
        for bundle in self.topics {
            let topic = bundle.topic.into_topic()?;
            storage.bank.upsert_topic(&topic).await?;
            summary.topics += 1;
            for row in bundle.questions {
                storage
                    .bank
                    .upsert_question(&row.into_question(topic.id())?)
                    .await?;
                summary.questions += 1;
            }
        }
        for row in self.entitlements {
            storage
                .entitlements
                .upsert_entitlement(&row.into_record()?)
                .await?;
            summary.entitlements += 1;
        }
        tracing::info!(
            topics = summary.topics,
            questions = summary.questions,
            entitlements = summary.entitlements,
            "bank imported"
        );
        Ok(summary)
    }
}

/// Row counts written by `BankImport::apply`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub topics: usize,
    pub questions: usize,
    pub entitlements: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_row_defaults_to_single_choice() {
        let row: QuestionRow = serde_json::from_str(
            r#"{"id": 1, "text": "Pick", "choices": [{"id": 5, "text": "a", "is_correct": true}]}"#,
        )
        .unwrap();
        let q = row.into_question(TopicId::new(2)).unwrap();
        assert!(!q.multiple());
        assert_eq!(q.topic_id(), TopicId::new(2));
        assert_eq!(q.sort_order(), 0);
    }

    #[test]
    fn malformed_question_is_rejected_at_the_boundary() {
        let row: QuestionRow = serde_json::from_str(
            r#"{"id": 1, "text": "Pick", "multiple": false, "choices": [
                {"id": 5, "text": "a", "is_correct": true},
                {"id": 6, "text": "b", "is_correct": true}
            ]}"#,
        )
        .unwrap();
        let err = row.into_question(TopicId::new(1)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Invalid(exam_core::Error::Question(_))
        ));
    }

    #[test]
    fn entitlement_row_requires_uuid_user() {
        let row = EntitlementRow {
            user_id: "nope".into(),
            active: true,
            never_expires: true,
            expires_at: None,
            note: None,
        };
        assert!(row.into_record().is_err());
    }

    #[test]
    fn bank_import_reads_nested_topics() {
        let doc = BankImport::from_json(
            r#"{
                "topics": [{
                    "id": 1, "slug": "first-aid", "title": "First aid", "sort_order": 1,
                    "questions": [{"id": 10, "text": "Q", "choices": [{"id": 100, "text": "A", "is_correct": true}]}]
                }],
                "entitlements": [{
                    "user_id": "9b2f7c1e-3d4a-4f5b-8c6d-7e8f9a0b1c2d",
                    "active": true, "never_expires": false,
                    "expires_at": "2030-01-01T00:00:00Z"
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.topics.len(), 1);
        assert_eq!(doc.topics[0].topic.slug, "first-aid");
        assert_eq!(doc.topics[0].questions.len(), 1);
        let record = doc.entitlements[0].clone().into_record().unwrap();
        assert!(!record.never_expires);
        assert!(record.expires_at.is_some());
    }

    #[test]
    fn question_row_round_trips_domain_question() {
        let row: QuestionRow = serde_json::from_str(
            r#"{"id": 3, "text": "Which two?", "multiple": true, "image_url": "https://cdn.example.com/a.png",
                "choices": [{"id": 1, "text": "x", "is_correct": true, "sort_order": 2},
                            {"id": 2, "text": "y", "is_correct": true, "sort_order": 1}]}"#,
        )
        .unwrap();
        let q = row.clone().into_question(TopicId::new(1)).unwrap();
        let back = QuestionRow::from_question(&q);
        assert_eq!(back.image_url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!(back.choices.len(), 2);
        assert_eq!(back.multiple, Some(true));
    }

    #[test]
    fn topic_row_keeps_slug_and_order() {
        let row = TopicRow {
            id: 4,
            slug: " road-signs ".into(),
            title: "Road signs".into(),
            description: None,
            sort_order: Some(3),
        };
        let topic = row.into_topic().unwrap();
        let back = TopicRow::from_topic(&topic);
        assert_eq!(back.slug, "road-signs");
        assert_eq!(back.sort_order, Some(3));
        assert_eq!(back.id, 4);
    }

    #[tokio::test]
    async fn import_stops_at_the_first_invalid_question() {
        let storage = Storage::in_memory();
        let doc = BankImport::from_json(
            r#"{"topics": [{
                "id": 1, "slug": "first-aid", "title": "First aid",
                "questions": [
                    {"id": 10, "text": "Q", "choices": [{"id": 100, "text": "A", "is_correct": true}]},
                    {"id": 11, "text": "Q", "choices": [{"id": 110, "text": "A", "is_correct": false}]}
                ]
            }]}"#,
        )
        .unwrap();

        let err = doc.apply(&storage).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Invalid(exam_core::Error::Question(_))
        ));
        let stored = storage.bank.list_questions(TopicId::new(1)).await.unwrap();
        assert_eq!(stored.len(), 1);
    }
}

use std::collections::HashMap;

use exam_core::model::{Question, Topic, TopicId, TopicSlug, TopicSummary};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{db_err, id_to_i64, map_choice_row, map_question_row, map_topic_row, ser};
use crate::repository::{QuestionBankRepository, StorageError};
use crate::rows::QuestionRow;

#[async_trait::async_trait]
impl QuestionBankRepository for SqliteRepository {
    async fn find_topic(&self, slug: &TopicSlug) -> Result<Option<Topic>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, slug, title, description, sort_order
            FROM topics WHERE slug = ?1
            ",
        )
        .bind(slug.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => map_topic_row(&row)?.into_topic().map(Some),
            None => Ok(None),
        }
    }

    async fn list_questions(&self, topic_id: TopicId) -> Result<Vec<Question>, StorageError> {
        let topic_key = id_to_i64("topic_id", topic_id.value())?;

        let question_rows = sqlx::query(
            r"
            SELECT id, text, multiple, image_url, image_alt, explanation, sort_order
            FROM questions
            WHERE topic_id = ?1
            ORDER BY COALESCE(sort_order, 0) ASC, id ASC
            ",
        )
        .bind(topic_key)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        if question_rows.is_empty() {
            return Ok(Vec::new());
        }

        let choice_rows = sqlx::query(
            r"
            SELECT c.id, c.question_id, c.text, c.is_correct, c.sort_order
            FROM choices c
            JOIN questions q ON q.id = c.question_id
            WHERE q.topic_id = ?1
            ORDER BY c.id ASC
            ",
        )
        .bind(topic_key)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut choices_by_question: HashMap<u64, Vec<_>> = HashMap::new();
        for row in &choice_rows {
            let (question_id, choice) = map_choice_row(row)?;
            choices_by_question.entry(question_id).or_default().push(choice);
        }

        let mut questions = Vec::with_capacity(question_rows.len());
        for row in &question_rows {
            let mut question: QuestionRow = map_question_row(row)?;
            question.choices = choices_by_question.remove(&question.id).unwrap_or_default();
            questions.push(question.into_question(topic_id)?);
        }
        Ok(questions)
    }

    async fn list_topics(&self) -> Result<Vec<TopicSummary>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT t.id, t.slug, t.title, t.description, t.sort_order,
                   (SELECT COUNT(*) FROM questions q WHERE q.topic_id = t.id) AS question_count
            FROM topics t
            ORDER BY COALESCE(t.sort_order, 0) ASC, t.id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let count: i64 = row.try_get("question_count").map_err(ser)?;
            out.push(TopicSummary {
                topic: map_topic_row(row)?.into_topic()?,
                question_count: u32::try_from(count)
                    .map_err(|_| StorageError::Serialization("question_count overflow".into()))?,
            });
        }
        Ok(out)
    }

    async fn upsert_topic(&self, topic: &Topic) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO topics (id, slug, title, description, sort_order)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                title = excluded.title,
                description = excluded.description,
                sort_order = excluded.sort_order
            ",
        )
        .bind(id_to_i64("topic_id", topic.id().value())?)
        .bind(topic.slug().as_str())
        .bind(topic.title())
        .bind(topic.description())
        .bind(topic.sort_order())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let question_key = id_to_i64("question_id", question.id().value())?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r"
            INSERT INTO questions (id, topic_id, text, multiple, image_url, image_alt, explanation, sort_order)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                topic_id = excluded.topic_id,
                text = excluded.text,
                multiple = excluded.multiple,
                image_url = excluded.image_url,
                image_alt = excluded.image_alt,
                explanation = excluded.explanation,
                sort_order = excluded.sort_order
            ",
        )
        .bind(question_key)
        .bind(id_to_i64("topic_id", question.topic_id().value())?)
        .bind(question.text())
        .bind(i64::from(question.multiple()))
        .bind(question.image().map(|i| i.url.as_str()))
        .bind(question.image().and_then(|i| i.alt.as_deref()))
        .bind(question.explanation())
        .bind(question.sort_order())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // Choices are owned by the question: replace the whole set.
        sqlx::query("DELETE FROM choices WHERE question_id = ?1")
            .bind(question_key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for choice in question.choices() {
            sqlx::query(
                r"
                INSERT INTO choices (id, question_id, text, is_correct, sort_order)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(id_to_i64("choice_id", choice.id().value())?)
            .bind(question_key)
            .bind(choice.text())
            .bind(i64::from(choice.is_correct()))
            .bind(choice.sort_order())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}

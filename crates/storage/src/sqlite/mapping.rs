use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;
use crate::rows::{ChoiceRow, EntitlementRow, QuestionRow, TopicRow};

// Primary SQLite result codes that mean "not allowed" rather than "unreachable".
const SQLITE_PERM: i64 = 3;
const SQLITE_READONLY: i64 = 8;
const SQLITE_AUTH: i64 = 23;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Classifies a driver error. Permission-style failures are kept apart from
/// connectivity so callers can log them differently.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        let primary = db
            .code()
            .and_then(|code| code.parse::<i64>().ok())
            .map(|code| code & 0xff);
        if matches!(primary, Some(SQLITE_PERM | SQLITE_READONLY | SQLITE_AUTH)) {
            return StorageError::PermissionDenied(db.message().to_owned());
        }
        if db.is_unique_violation() {
            return StorageError::Conflict;
        }
        if db.is_foreign_key_violation() {
            return StorageError::NotFound;
        }
    }
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn map_topic_row(row: &SqliteRow) -> Result<TopicRow, StorageError> {
    Ok(TopicRow {
        id: i64_to_u64("topic_id", row.try_get("id").map_err(ser)?)?,
        slug: row.try_get("slug").map_err(ser)?,
        title: row.try_get("title").map_err(ser)?,
        description: row.try_get("description").map_err(ser)?,
        sort_order: row.try_get("sort_order").map_err(ser)?,
    })
}

/// Maps a question row without its choices; the caller attaches them.
pub(crate) fn map_question_row(row: &SqliteRow) -> Result<QuestionRow, StorageError> {
    let multiple: Option<i64> = row.try_get("multiple").map_err(ser)?;
    Ok(QuestionRow {
        id: i64_to_u64("question_id", row.try_get("id").map_err(ser)?)?,
        text: row.try_get("text").map_err(ser)?,
        multiple: multiple.map(|m| m != 0),
        image_url: row.try_get("image_url").map_err(ser)?,
        image_alt: row.try_get("image_alt").map_err(ser)?,
        explanation: row.try_get("explanation").map_err(ser)?,
        sort_order: row.try_get("sort_order").map_err(ser)?,
        choices: Vec::new(),
    })
}

/// Returns the owning question id alongside the choice.
pub(crate) fn map_choice_row(row: &SqliteRow) -> Result<(u64, ChoiceRow), StorageError> {
    let question_id = i64_to_u64("question_id", row.try_get("question_id").map_err(ser)?)?;
    Ok((
        question_id,
        ChoiceRow {
            id: i64_to_u64("choice_id", row.try_get("id").map_err(ser)?)?,
            text: row.try_get("text").map_err(ser)?,
            is_correct: row.try_get::<i64, _>("is_correct").map_err(ser)? != 0,
            sort_order: row.try_get("sort_order").map_err(ser)?,
        },
    ))
}

pub(crate) fn map_entitlement_row(row: &SqliteRow) -> Result<EntitlementRow, StorageError> {
    Ok(EntitlementRow {
        user_id: row.try_get("user_id").map_err(ser)?,
        active: row.try_get::<i64, _>("active").map_err(ser)? != 0,
        never_expires: row.try_get::<i64, _>("never_expires").map_err(ser)? != 0,
        expires_at: row.try_get("expires_at").map_err(ser)?,
        note: row.try_get("note").map_err(ser)?,
    })
}

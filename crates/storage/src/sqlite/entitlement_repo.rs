use chrono::Utc;
use exam_core::model::{EntitlementRecord, UserId};

use super::SqliteRepository;
use super::mapping::{db_err, map_entitlement_row};
use crate::repository::{EntitlementRepository, StorageError};

#[async_trait::async_trait]
impl EntitlementRepository for SqliteRepository {
    async fn get_entitlement(
        &self,
        user_id: UserId,
    ) -> Result<Option<EntitlementRecord>, StorageError> {
        // A plain LIMIT 1 read: zero rows is a normal outcome, not an error.
        let row = sqlx::query(
            r"
            SELECT user_id, active, never_expires, expires_at, note
            FROM user_access
            WHERE user_id = ?1
            LIMIT 1
            ",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| map_entitlement_row(&row)?.into_record())
            .transpose()
    }

    async fn upsert_entitlement(&self, record: &EntitlementRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO user_access (user_id, active, never_expires, expires_at, note, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                active = excluded.active,
                never_expires = excluded.never_expires,
                expires_at = excluded.expires_at,
                note = excluded.note,
                updated_at = excluded.updated_at
            ",
        )
        .bind(record.user_id.to_string())
        .bind(i64::from(record.active))
        .bind(i64::from(record.never_expires))
        .bind(record.expires_at)
        .bind(record.note.as_deref())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use iskolar_core::types::{ReviewAction, ValidationChecklist, ValidationRecord};

use crate::{parse_column, to_rfc3339, StorageError};

/// Append-only audit log of validator decisions.
#[derive(Clone)]
pub struct ValidationRepository {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct NewValidation {
    pub application_id: i64,
    pub validator_id: i64,
    pub action: ReviewAction,
    pub checklist: Option<ValidationChecklist>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ValidationRow {
    id: i64,
    application_id: i64,
    validator_id: i64,
    action: String,
    checklist_json: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl ValidationRow {
    fn into_domain(self) -> Result<ValidationRecord, StorageError> {
        let checklist = self
            .checklist_json
            .as_deref()
            .map(serde_json::from_str::<ValidationChecklist>)
            .transpose()
            .map_err(|err| StorageError::decode("checklist_json", err))?;

        Ok(ValidationRecord {
            id: self.id,
            application_id: self.application_id,
            validator_id: self.validator_id,
            action: parse_column(&self.action, "action")?,
            checklist,
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}

impl ValidationRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewValidation,
    ) -> Result<i64, StorageError> {
        let checklist_json = record
            .checklist
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StorageError::decode("checklist_json", err))?;

        let row = sqlx::query(
            "INSERT INTO validations \
             (application_id, validator_id, action, checklist_json, notes, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(record.application_id)
        .bind(record.validator_id)
        .bind(record.action.as_str())
        .bind(checklist_json)
        .bind(&record.notes)
        .bind(to_rfc3339(record.created_at))
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("id"))
    }

    /// Newest first.
    pub async fn list_for_application(
        &self,
        application_id: i64,
    ) -> Result<Vec<ValidationRecord>, StorageError> {
        let rows = sqlx::query_as::<_, ValidationRow>(
            "SELECT id, application_id, validator_id, action, checklist_json, notes, created_at \
             FROM validations \
             WHERE application_id = ? \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ValidationRow::into_domain).collect()
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};

use iskolar_core::types::{RequirementStatus, RequirementSubmission, SubmissionVerdict};

use crate::{narrow, parse_column, to_rfc3339, StorageError};

/// Repository for `requirement_submissions`, one row per (application, key).
#[derive(Clone)]
pub struct SubmissionRepository {
    pool: SqlitePool,
}

/// An applicant upload for one requirement.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub application_id: i64,
    pub requirement_key: String,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub notes: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A validator decision on submissions.
#[derive(Debug, Clone)]
pub struct SubmissionUpdate {
    pub verdict: SubmissionVerdict,
    pub validator_id: i64,
    pub notes: Option<String>,
    pub validated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SubmissionRow {
    id: i64,
    application_id: i64,
    requirement_key: String,
    status: String,
    progress: i64,
    file_name: Option<String>,
    file_url: Option<String>,
    uploaded_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    validated_by: Option<i64>,
    validated_at: Option<DateTime<Utc>>,
    validator_notes: Option<String>,
}

impl SubmissionRow {
    fn into_domain(self) -> Result<RequirementSubmission, StorageError> {
        Ok(RequirementSubmission {
            id: self.id,
            application_id: self.application_id,
            requirement_key: self.requirement_key,
            status: parse_column(&self.status, "status")?,
            progress: narrow(self.progress, "progress")?,
            file_name: self.file_name,
            file_url: self.file_url,
            uploaded_at: self.uploaded_at,
            notes: self.notes,
            validated_by: self.validated_by,
            validated_at: self.validated_at,
            validator_notes: self.validator_notes,
        })
    }
}

const SELECT_SUBMISSION: &str = "SELECT id, application_id, requirement_key, status, progress, \
     file_name, file_url, uploaded_at, notes, validated_by, validated_at, validator_notes \
     FROM requirement_submissions";

impl SubmissionRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or overwrites the submission for `(application_id, requirement_key)`.
    ///
    /// Either way the row ends up `pending` at full progress with validator
    /// metadata cleared, starting a fresh review cycle.
    pub async fn upsert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        submission: &NewSubmission,
    ) -> Result<i64, StorageError> {
        let row = sqlx::query(
            "INSERT INTO requirement_submissions \
             (application_id, requirement_key, status, progress, file_name, file_url, uploaded_at, notes) \
             VALUES (?, ?, 'pending', 100, ?, ?, ?, ?) \
             ON CONFLICT(application_id, requirement_key) DO UPDATE \
             SET status = 'pending', \
                 progress = 100, \
                 file_name = excluded.file_name, \
                 file_url = excluded.file_url, \
                 uploaded_at = excluded.uploaded_at, \
                 notes = excluded.notes, \
                 validated_by = NULL, \
                 validated_at = NULL, \
                 validator_notes = NULL \
             RETURNING id",
        )
        .bind(submission.application_id)
        .bind(&submission.requirement_key)
        .bind(&submission.file_name)
        .bind(&submission.file_url)
        .bind(to_rfc3339(submission.uploaded_at))
        .bind(&submission.notes)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("id"))
    }

    /// Records a verdict on one submission and returns its application id,
    /// or `None` if the submission does not exist.
    pub async fn apply_verdict(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        submission_id: i64,
        update: &SubmissionUpdate,
    ) -> Result<Option<i64>, StorageError> {
        let row = sqlx::query(
            "UPDATE requirement_submissions \
             SET status = ?, validated_by = ?, validated_at = ?, validator_notes = ? \
             WHERE id = ? \
             RETURNING application_id",
        )
        .bind(update.verdict.as_str())
        .bind(update.validator_id)
        .bind(to_rfc3339(update.validated_at))
        .bind(&update.notes)
        .bind(submission_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|row| row.get("application_id")))
    }

    /// Applies the verdict to every `pending` submission of the application.
    /// Other statuses are left untouched.
    pub async fn apply_verdict_to_pending(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        application_id: i64,
        update: &SubmissionUpdate,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE requirement_submissions \
             SET status = ?, validated_by = ?, validated_at = ?, validator_notes = ? \
             WHERE application_id = ? AND status = 'pending'",
        )
        .bind(update.verdict.as_str())
        .bind(update.validator_id)
        .bind(to_rfc3339(update.validated_at))
        .bind(&update.notes)
        .bind(application_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// `(requirement_key, status)` pairs read inside an open transaction.
    pub async fn statuses_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        application_id: i64,
    ) -> Result<Vec<(String, RequirementStatus)>, StorageError> {
        let rows = sqlx::query(
            "SELECT requirement_key, status FROM requirement_submissions WHERE application_id = ?",
        )
        .bind(application_id)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<(String, RequirementStatus), StorageError> {
                let key: String = row.get("requirement_key");
                let status = parse_column(row.get::<&str, _>("status"), "status")?;
                Ok((key, status))
            })
            .collect()
    }

    /// `(requirement_key, status)` pairs grouped by application.
    pub async fn statuses_for_applications(
        &self,
        application_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<(String, RequirementStatus)>>, StorageError> {
        let mut grouped: HashMap<i64, Vec<(String, RequirementStatus)>> = HashMap::new();
        if application_ids.is_empty() {
            return Ok(grouped);
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT application_id, requirement_key, status FROM requirement_submissions \
             WHERE application_id IN (",
        );
        let mut ids = builder.separated(", ");
        for id in application_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        for row in builder.build().fetch_all(&self.pool).await? {
            let application_id: i64 = row.get("application_id");
            let key: String = row.get("requirement_key");
            let status = parse_column(row.get::<&str, _>("status"), "status")?;
            grouped.entry(application_id).or_default().push((key, status));
        }

        Ok(grouped)
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<RequirementSubmission>, StorageError> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!("{SELECT_SUBMISSION} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SubmissionRow::into_domain).transpose()
    }

    pub async fn list_for_application(
        &self,
        application_id: i64,
    ) -> Result<Vec<RequirementSubmission>, StorageError> {
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            "{SELECT_SUBMISSION} WHERE application_id = ? ORDER BY requirement_key"
        ))
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SubmissionRow::into_domain).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn upload(application_id: i64, key: &str, file: &str) -> NewSubmission {
        NewSubmission {
            application_id,
            requirement_key: key.to_string(),
            file_name: Some(file.to_string()),
            file_url: Some(format!("https://files.example/{file}")),
            notes: None,
            uploaded_at: now(),
        }
    }

    fn verdict(verdict: SubmissionVerdict, notes: &str) -> SubmissionUpdate {
        SubmissionUpdate {
            verdict,
            validator_id: 42,
            notes: Some(notes.to_string()),
            validated_at: now(),
        }
    }

    async fn application(db: &crate::Database, student_number: &str) -> i64 {
        let applicant_id = seed_applicant(db, student_number).await;
        let scholarship_id = seed_scholarship(db, 3).await;
        seed_application(db, applicant_id, scholarship_id).await
    }

    #[tokio::test]
    async fn resubmission_resets_review_metadata() {
        let (_dir, db) = temp_db().await;
        let application_id = application(&db, "2026-0700").await;
        let repo = db.submissions();

        let mut tx = db.begin().await.expect("begin");
        let id = repo
            .upsert(&mut tx, &upload(application_id, "id_photo", "photo.jpg"))
            .await
            .expect("insert");
        repo.apply_verdict(&mut tx, id, &verdict(SubmissionVerdict::Rejected, "blurry"))
            .await
            .expect("reject");
        let again = repo
            .upsert(&mut tx, &upload(application_id, "id_photo", "photo-v2.jpg"))
            .await
            .expect("re-upload");
        tx.commit().await.expect("commit");

        assert_eq!(again, id);
        let row = repo.fetch(id).await.expect("fetch").expect("row exists");
        assert_eq!(row.status, RequirementStatus::Pending);
        assert_eq!(row.progress, 100);
        assert_eq!(row.file_name.as_deref(), Some("photo-v2.jpg"));
        assert_eq!(row.validated_by, None);
        assert_eq!(row.validated_at, None);
        assert_eq!(row.validator_notes, None);
    }

    #[tokio::test]
    async fn verdict_on_unknown_submission_returns_none() {
        let (_dir, db) = temp_db().await;
        let mut tx = db.begin().await.expect("begin");
        let outcome = db
            .submissions()
            .apply_verdict(&mut tx, 999, &verdict(SubmissionVerdict::Approved, "ok"))
            .await
            .expect("update");
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn bulk_verdict_only_touches_pending_rows() {
        let (_dir, db) = temp_db().await;
        let application_id = application(&db, "2026-0800").await;
        let repo = db.submissions();

        let mut tx = db.begin().await.expect("begin");
        let rejected = repo
            .upsert(&mut tx, &upload(application_id, "id_photo", "a.jpg"))
            .await
            .expect("insert");
        repo.apply_verdict(&mut tx, rejected, &verdict(SubmissionVerdict::Rejected, "redo"))
            .await
            .expect("reject");
        repo.upsert(&mut tx, &upload(application_id, "birth_certificate", "b.pdf"))
            .await
            .expect("insert");
        repo.upsert(&mut tx, &upload(application_id, "guardian_consent", "c.pdf"))
            .await
            .expect("insert");

        let affected = repo
            .apply_verdict_to_pending(
                &mut tx,
                application_id,
                &verdict(SubmissionVerdict::Approved, "bulk"),
            )
            .await
            .expect("bulk");
        let mut statuses = repo.statuses_in(&mut tx, application_id).await.expect("statuses");
        tx.commit().await.expect("commit");

        assert_eq!(affected, 2);
        statuses.sort_by(|left, right| left.0.cmp(&right.0));
        assert_eq!(
            statuses,
            vec![
                ("birth_certificate".to_string(), RequirementStatus::Approved),
                ("guardian_consent".to_string(), RequirementStatus::Approved),
                ("id_photo".to_string(), RequirementStatus::Rejected),
            ]
        );

        let grouped = repo
            .statuses_for_applications(&[application_id, application_id + 1])
            .await
            .expect("grouped");
        assert_eq!(grouped.get(&application_id).map(Vec::len), Some(3));
        assert!(!grouped.contains_key(&(application_id + 1)));
    }
}

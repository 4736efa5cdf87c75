use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use iskolar_core::types::Scholarship;

use crate::{narrow, to_rfc3339, StorageError};

/// Repository for scholarship definitions.
#[derive(Clone)]
pub struct ScholarshipRepository {
    pool: SqlitePool,
}

/// Parameters required to create a scholarship.
#[derive(Debug, Clone)]
pub struct NewScholarship {
    pub name: String,
    pub grantor: String,
    pub description: Option<String>,
    pub min_gpa: f64,
    pub max_monthly_income: Option<f64>,
    pub max_year_level: Option<u8>,
    pub application_open: NaiveDate,
    pub application_close: NaiveDate,
    pub slots_total: u32,
    pub slots_available: u32,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct ScholarshipRow {
    id: i64,
    name: String,
    grantor: String,
    description: Option<String>,
    min_gpa: f64,
    max_monthly_income: Option<f64>,
    max_year_level: Option<i64>,
    application_open: NaiveDate,
    application_close: NaiveDate,
    slots_total: i64,
    slots_available: i64,
    is_active: bool,
}

impl ScholarshipRow {
    fn into_domain(self) -> Result<Scholarship, StorageError> {
        Ok(Scholarship {
            id: self.id,
            name: self.name,
            grantor: self.grantor,
            description: self.description,
            min_gpa: self.min_gpa,
            max_monthly_income: self.max_monthly_income,
            max_year_level: self
                .max_year_level
                .map(|value| narrow(value, "max_year_level"))
                .transpose()?,
            application_open: self.application_open,
            application_close: self.application_close,
            slots_total: narrow(self.slots_total, "slots_total")?,
            slots_available: narrow(self.slots_available, "slots_available")?,
            is_active: self.is_active,
        })
    }
}

const SELECT_SCHOLARSHIP: &str = "SELECT id, name, grantor, description, min_gpa, \
     max_monthly_income, max_year_level, application_open, application_close, \
     slots_total, slots_available, is_active FROM scholarships";

impl ScholarshipRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        scholarship: &NewScholarship,
        now: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO scholarships \
             (name, grantor, description, min_gpa, max_monthly_income, max_year_level, \
              application_open, application_close, slots_total, slots_available, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(&scholarship.name)
        .bind(&scholarship.grantor)
        .bind(&scholarship.description)
        .bind(scholarship.min_gpa)
        .bind(scholarship.max_monthly_income)
        .bind(scholarship.max_year_level.map(i64::from))
        .bind(scholarship.application_open)
        .bind(scholarship.application_close)
        .bind(i64::from(scholarship.slots_total))
        .bind(i64::from(scholarship.slots_available))
        .bind(scholarship.is_active)
        .bind(to_rfc3339(now))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(row.get("id"))
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<Scholarship>, StorageError> {
        let row =
            sqlx::query_as::<_, ScholarshipRow>(&format!("{SELECT_SCHOLARSHIP} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(ScholarshipRow::into_domain).transpose()
    }

    /// Inactive scholarships are reported as absent.
    pub async fn fetch_active(&self, id: i64) -> Result<Option<Scholarship>, StorageError> {
        let row = sqlx::query_as::<_, ScholarshipRow>(&format!(
            "{SELECT_SCHOLARSHIP} WHERE id = ? AND is_active = 1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ScholarshipRow::into_domain).transpose()
    }

    pub async fn fetch_by_name(&self, name: &str) -> Result<Option<Scholarship>, StorageError> {
        let row =
            sqlx::query_as::<_, ScholarshipRow>(&format!("{SELECT_SCHOLARSHIP} WHERE name = ?"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(ScholarshipRow::into_domain).transpose()
    }
}

/// Result of trying to take one award slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Consumed { remaining: u32 },
    /// Already at zero; the count was left untouched.
    Exhausted,
}

/// Award slot accounting.
///
/// Every decrement is a single conditional statement, so concurrent
/// approvals never read a stale count and the value never drops below zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotAllocator;

impl SlotAllocator {
    /// Floor-clamped decrement of `slots_available`.
    pub async fn decrement(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        scholarship_id: i64,
    ) -> Result<SlotOutcome, StorageError> {
        let row = sqlx::query(
            "UPDATE scholarships \
             SET slots_available = slots_available - 1 \
             WHERE id = ? AND slots_available > 0 \
             RETURNING slots_available",
        )
        .bind(scholarship_id)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = row {
            let remaining: i64 = row.get("slots_available");
            return Ok(SlotOutcome::Consumed {
                remaining: narrow(remaining, "slots_available")?,
            });
        }

        let exists = sqlx::query("SELECT 1 FROM scholarships WHERE id = ?")
            .bind(scholarship_id)
            .fetch_optional(&mut **tx)
            .await?;

        match exists {
            Some(_) => Ok(SlotOutcome::Exhausted),
            None => Err(StorageError::Missing {
                entity: "scholarship",
                id: scholarship_id,
            }),
        }
    }

    /// Takes a slot for the application's scholarship unless this
    /// application already holds one. Returns `None` when it does.
    pub async fn consume_for_application(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        application_id: i64,
    ) -> Result<Option<SlotOutcome>, StorageError> {
        let row = sqlx::query(
            "UPDATE applications SET slot_consumed = 1 \
             WHERE id = ? AND slot_consumed = 0 \
             RETURNING scholarship_id",
        )
        .bind(application_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let scholarship_id: i64 = row.get("scholarship_id");
        self.decrement(tx, scholarship_id).await.map(Some)
    }
}

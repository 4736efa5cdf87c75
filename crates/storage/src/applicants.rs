use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use iskolar_core::types::Applicant;

use crate::{narrow, to_rfc3339, StorageError};

/// Repository for applicant profiles.
#[derive(Clone)]
pub struct ApplicantRepository {
    pool: SqlitePool,
}

/// Profile fields required to register an applicant.
#[derive(Debug, Clone)]
pub struct NewApplicant {
    pub full_name: String,
    pub student_number: String,
    pub gpa: f64,
    pub monthly_income: f64,
    pub year_level: u8,
    pub course: String,
    pub college: String,
    pub household_size: u32,
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicantRow {
    id: i64,
    full_name: String,
    student_number: String,
    gpa: f64,
    monthly_income: f64,
    year_level: i64,
    course: String,
    college: String,
    household_size: i64,
}

impl ApplicantRow {
    fn into_domain(self) -> Result<Applicant, StorageError> {
        Ok(Applicant {
            id: self.id,
            full_name: self.full_name,
            student_number: self.student_number,
            gpa: self.gpa,
            monthly_income: self.monthly_income,
            year_level: narrow(self.year_level, "year_level")?,
            course: self.course,
            college: self.college,
            household_size: narrow(self.household_size, "household_size")?,
        })
    }
}

const SELECT_APPLICANT: &str = "SELECT id, full_name, student_number, gpa, monthly_income, \
     year_level, course, college, household_size FROM applicants";

impl ApplicantRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        applicant: &NewApplicant,
        now: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let timestamp = to_rfc3339(now);
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO applicants \
             (full_name, student_number, gpa, monthly_income, year_level, course, college, household_size, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(&applicant.full_name)
        .bind(&applicant.student_number)
        .bind(applicant.gpa)
        .bind(applicant.monthly_income)
        .bind(i64::from(applicant.year_level))
        .bind(&applicant.course)
        .bind(&applicant.college)
        .bind(i64::from(applicant.household_size))
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(row.get("id"))
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<Applicant>, StorageError> {
        let row = sqlx::query_as::<_, ApplicantRow>(&format!("{SELECT_APPLICANT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ApplicantRow::into_domain).transpose()
    }

    pub async fn fetch_by_student_number(
        &self,
        student_number: &str,
    ) -> Result<Option<Applicant>, StorageError> {
        let row = sqlx::query_as::<_, ApplicantRow>(&format!(
            "{SELECT_APPLICANT} WHERE student_number = ?"
        ))
        .bind(student_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ApplicantRow::into_domain).transpose()
    }
}

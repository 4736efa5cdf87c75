use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

mod applicants;
mod applications;
mod scholarships;
mod submissions;
mod validations;

pub use applicants::{ApplicantRepository, NewApplicant};
pub use applications::{
    ApplicationDetail, ApplicationFilter, ApplicationInsertOutcome, ApplicationListing,
    ApplicationPage, ApplicationRepository, NewApplication, Page, QueueFilter, StatusCount,
};
pub use scholarships::{NewScholarship, ScholarshipRepository, SlotAllocator, SlotOutcome};
pub use submissions::{NewSubmission, SubmissionRepository, SubmissionUpdate};
pub use validations::{NewValidation, ValidationRepository};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (and creates if needed) the SQLite database behind `database_url`.
    ///
    /// `timeout` bounds both pool acquisition and SQLite's busy wait.
    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Round-trips a trivial query; used by the readiness probe.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Begins a SQLite transaction.
    ///
    /// The first statement executed inside it should be a write so the
    /// write lock is taken before any state is read.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StorageError> {
        Ok(self.pool.begin().await?)
    }

    pub fn applicants(&self) -> ApplicantRepository {
        ApplicantRepository::new(self.pool.clone())
    }

    pub fn scholarships(&self) -> ScholarshipRepository {
        ScholarshipRepository::new(self.pool.clone())
    }

    pub fn applications(&self) -> ApplicationRepository {
        ApplicationRepository::new(self.pool.clone())
    }

    pub fn submissions(&self) -> SubmissionRepository {
        SubmissionRepository::new(self.pool.clone())
    }

    pub fn validations(&self) -> ValidationRepository {
        ValidationRepository::new(self.pool.clone())
    }

    pub fn slots(&self) -> SlotAllocator {
        SlotAllocator
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database is busy: {0}")]
    Busy(sqlx::Error),
    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: i64 },
    #[error("failed to decode column '{column}': {detail}")]
    Decode { column: &'static str, detail: String },
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StorageError {
    /// Transient contention that a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Migration(_) => "migration",
            Self::Busy(_) => "busy",
            Self::Missing { .. } => "missing",
            Self::Decode { .. } => "decode",
            Self::Database(_) => "database",
        }
    }

    pub(crate) fn decode(column: &'static str, detail: impl ToString) -> Self {
        Self::Decode {
            column,
            detail: detail.to_string(),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => Self::Busy(err),
            sqlx::Error::Database(db_err)
                if matches!(db_err.code().as_deref(), Some("5" | "6" | "261" | "517" | "773")) =>
            {
                Self::Busy(err)
            }
            _ => Self::Database(err),
        }
    }
}

/// `true` for SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("2067" | "1555"))
        }
        _ => false,
    }
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn narrow<T: TryFrom<i64>>(value: i64, column: &'static str) -> Result<T, StorageError> {
    T::try_from(value).map_err(|_| StorageError::decode(column, format!("{value} is out of range")))
}

pub(crate) fn parse_column<T>(value: &str, column: &'static str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err: T::Err| StorageError::decode(column, err))
}


#[cfg(test)]
mod tests {
    use super::testing::*;

    #[tokio::test]
    async fn migrations_apply() {
        let (_dir, db) = temp_db().await;

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('applicants', 'scholarships', 'applications', 'requirement_submissions', 'validations')",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 5);
        db.ping().await.expect("ping");
    }

    #[tokio::test]
    async fn missing_entity_is_not_retryable() {
        let err = super::StorageError::Missing {
            entity: "scholarship",
            id: 9,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "missing");
        assert_eq!(err.to_string(), "scholarship 9 does not exist");
    }
}

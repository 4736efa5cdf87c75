//! Shared fixtures for service and router tests.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, NaiveDate, Utc};
use tempfile::TempDir;

use iskolar_core::{
    ApplicationStatus, EligibilityEvaluator, RequirementCatalog, ValidationRecord,
};
use iskolar_storage::{Database, NewApplicant, NewScholarship};

use crate::{router::AppState, telemetry};

static STUDENT_SEQ: AtomicU32 = AtomicU32::new(1);

pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-15T08:00:00Z")
        .expect("timestamp")
        .with_timezone(&Utc)
}

pub struct TestContext {
    _dir: TempDir,
    pub database: Database,
    pub state: AppState,
    catalog_len: u32,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::build(RequirementCatalog::builtin().expect("builtin catalog")).await
    }

    /// Catalog restricted to the given built-in keys.
    pub async fn with_catalog(keys: &[&str]) -> Self {
        let builtin = RequirementCatalog::builtin().expect("builtin catalog");
        let entries = keys
            .iter()
            .map(|key| builtin.get(key).expect("known key").clone())
            .collect();
        Self::build(RequirementCatalog::new(entries).expect("catalog")).await
    }

    async fn build(catalog: RequirementCatalog) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("app.db").display());
        let database = Database::connect(&url, Duration::from_secs(5))
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        let metrics = telemetry::init_metrics().expect("metrics init");
        let catalog_len = catalog.len() as u32;
        let state = AppState::new(
            metrics,
            database.clone(),
            catalog,
            EligibilityEvaluator::default(),
            Duration::from_secs(5),
        )
        .with_clock(Arc::new(fixed_now));

        Self {
            _dir: dir,
            database,
            state,
            catalog_len,
        }
    }

    pub fn catalog_len(&self) -> u32 {
        self.catalog_len
    }

    pub async fn applicant(&self, gpa: f64, monthly_income: f64) -> i64 {
        let seq = STUDENT_SEQ.fetch_add(1, Ordering::Relaxed);
        self.database
            .applicants()
            .insert(
                &NewApplicant {
                    full_name: format!("Student {seq}"),
                    student_number: format!("2026-{seq:05}"),
                    gpa,
                    monthly_income,
                    year_level: 2,
                    course: "BS Civil Engineering".to_string(),
                    college: "College of Engineering".to_string(),
                    household_size: 5,
                },
                fixed_now(),
            )
            .await
            .expect("insert applicant")
    }

    /// Active scholarship open around [`fixed_now`].
    pub async fn scholarship(&self, slots: u32) -> i64 {
        self.database
            .scholarships()
            .insert(
                &NewScholarship {
                    name: format!("Merit Grant {}", STUDENT_SEQ.fetch_add(1, Ordering::Relaxed)),
                    grantor: "Provincial Government".to_string(),
                    description: Some("Tuition support".to_string()),
                    min_gpa: 1.75,
                    max_monthly_income: Some(20_000.0),
                    max_year_level: None,
                    application_open: NaiveDate::from_ymd_opt(2026, 1, 1).expect("date"),
                    application_close: NaiveDate::from_ymd_opt(2026, 3, 31).expect("date"),
                    slots_total: slots,
                    slots_available: slots,
                    is_active: true,
                },
                fixed_now(),
            )
            .await
            .expect("insert scholarship")
    }

    /// New eligible applicant with a submitted application.
    pub async fn application_for(&self, scholarship_id: i64) -> (i64, i64) {
        let applicant_id = self.applicant(1.82, 15_000.0).await;
        let application_id = self
            .state
            .intake()
            .submit_application(applicant_id, scholarship_id)
            .await
            .expect("submit application");
        (applicant_id, application_id)
    }

    pub async fn submitted_application(&self) -> (i64, i64) {
        let scholarship_id = self.scholarship(5).await;
        self.application_for(scholarship_id).await
    }

    pub async fn status(&self, application_id: i64) -> ApplicationStatus {
        self.database
            .applications()
            .fetch(application_id)
            .await
            .expect("fetch")
            .expect("application exists")
            .status
    }

    pub async fn remarks(&self, application_id: i64) -> Option<String> {
        self.database
            .applications()
            .fetch(application_id)
            .await
            .expect("fetch")
            .expect("application exists")
            .remarks
    }

    pub async fn set_status(&self, application_id: i64, status: ApplicationStatus) {
        sqlx::query("UPDATE applications SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(application_id)
            .execute(self.database.pool())
            .await
            .expect("set status");
    }

    pub async fn slots_left(&self, scholarship_id: i64) -> u32 {
        self.database
            .scholarships()
            .fetch(scholarship_id)
            .await
            .expect("fetch")
            .expect("scholarship exists")
            .slots_available
    }

    pub async fn history(&self, application_id: i64) -> Vec<ValidationRecord> {
        self.database
            .validations()
            .list_for_application(application_id)
            .await
            .expect("history")
    }
}

use chrono::{DateTime, Days, Utc};
use tracing::info;

use iskolar_storage::{Database, NewApplicant, NewScholarship, StorageError};

pub const DEMO_STUDENT_NUMBER: &str = "2026-DEMO-001";
pub const DEMO_SCHOLARSHIP: &str = "Demo Merit Scholarship";

/// Ids of the demo records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoSeed {
    pub applicant_id: i64,
    pub scholarship_id: i64,
}

/// Creates a demo applicant and an open scholarship unless they exist.
pub async fn seed_demo(database: &Database, now: DateTime<Utc>) -> Result<DemoSeed, StorageError> {
    let applicants = database.applicants();
    let applicant_id = match applicants.fetch_by_student_number(DEMO_STUDENT_NUMBER).await? {
        Some(existing) => existing.id,
        None => {
            applicants
                .insert(
                    &NewApplicant {
                        full_name: "Juan Dela Cruz".to_string(),
                        student_number: DEMO_STUDENT_NUMBER.to_string(),
                        gpa: 1.82,
                        monthly_income: 15_000.0,
                        year_level: 3,
                        course: "BS Computer Science".to_string(),
                        college: "College of Computing".to_string(),
                        household_size: 5,
                    },
                    now,
                )
                .await?
        }
    };

    let scholarships = database.scholarships();
    let scholarship_id = match scholarships.fetch_by_name(DEMO_SCHOLARSHIP).await? {
        Some(existing) => existing.id,
        None => {
            let today = now.date_naive();
            scholarships
                .insert(
                    &NewScholarship {
                        name: DEMO_SCHOLARSHIP.to_string(),
                        grantor: "Office of Student Affairs".to_string(),
                        description: Some("Demo scholarship for local development".to_string()),
                        min_gpa: 1.75,
                        max_monthly_income: Some(20_000.0),
                        max_year_level: None,
                        application_open: today - Days::new(30),
                        application_close: today + Days::new(60),
                        slots_total: 10,
                        slots_available: 10,
                        is_active: true,
                    },
                    now,
                )
                .await?
        }
    };

    info!(stage = "app", applicant_id, scholarship_id, "demo data ready");
    Ok(DemoSeed {
        applicant_id,
        scholarship_id,
    })
}

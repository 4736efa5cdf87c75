use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};

use iskolar_core::{
    catalog::RequirementView,
    lifecycle::Transition,
    normalize_notes, Application, ApplicationStatus, CompletionSummary, DocumentRef,
    EligibilityEvaluator, EligibilityReport, RequirementCatalog, ValidationRecord,
};
use iskolar_storage::{
    ApplicationDetail, ApplicationFilter, ApplicationInsertOutcome, ApplicationPage, Database,
    NewApplication, NewSubmission, Page,
};

use crate::{
    error::{within, ServiceError},
    router::Clock,
};

const REOPEN_REMARKS: &str = "New document submitted; review reopened";
const NEW_DOCUMENT_REMARKS: &str = "New document submitted for review";

/// Applicant-facing operations: eligibility-gated submission and
/// requirement uploads.
#[derive(Clone)]
pub struct ApplicationIntake {
    database: Database,
    evaluator: EligibilityEvaluator,
    catalog: Arc<RequirementCatalog>,
    clock: Clock,
    store_timeout: Duration,
}

/// Requirement upload as received from the applicant.
#[derive(Debug, Clone)]
pub struct RequirementUpload {
    pub requirement_key: String,
    pub document: DocumentRef,
    pub notes: Option<String>,
    pub application_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequirementReceipt {
    pub submission_id: i64,
    pub application_id: i64,
    /// `false` when the key is not part of the catalog and will never count
    /// toward completion.
    pub tracked: bool,
    pub application_status: ApplicationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequirementsOverview {
    pub application: Option<Application>,
    pub requirements: Vec<RequirementView>,
    pub summary: CompletionSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationWithHistory {
    pub application: ApplicationDetail,
    pub history: Vec<ValidationRecord>,
}

impl ApplicationIntake {
    pub fn new(
        database: Database,
        evaluator: EligibilityEvaluator,
        catalog: Arc<RequirementCatalog>,
        clock: Clock,
        store_timeout: Duration,
    ) -> Self {
        Self {
            database,
            evaluator,
            catalog,
            clock,
            store_timeout,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Side-effect free eligibility report for the caller.
    pub async fn check_eligibility(
        &self,
        applicant_id: i64,
        scholarship_id: i64,
    ) -> Result<EligibilityReport, ServiceError> {
        within(self.store_timeout, async {
            let applicant = self
                .database
                .applicants()
                .fetch(applicant_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("applicant", applicant_id))?;
            let scholarship = self
                .database
                .scholarships()
                .fetch_active(scholarship_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("scholarship", scholarship_id))?;

            Ok(self.evaluator.evaluate(&applicant, &scholarship, self.now()))
        })
        .await
    }

    /// Creates a `submitted` application after the eligibility gate passes.
    pub async fn submit_application(
        &self,
        applicant_id: i64,
        scholarship_id: i64,
    ) -> Result<i64, ServiceError> {
        within(self.store_timeout, async {
            let now = self.now();
            let applicant = self
                .database
                .applicants()
                .fetch(applicant_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("applicant", applicant_id))?;
            let scholarship = self
                .database
                .scholarships()
                .fetch_active(scholarship_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("scholarship", scholarship_id))?;

            let report = self.evaluator.evaluate(&applicant, &scholarship, now);
            if !report.eligible {
                counter!("applications_submitted_total", "result" => "ineligible").increment(1);
                info!(
                    stage = "intake",
                    applicant_id,
                    scholarship_id,
                    failed = ?report.checks.failed(),
                    "eligibility gate rejected submission"
                );
                return Err(ServiceError::Ineligible {
                    reasons: report.reasons,
                });
            }

            let applications = self.database.applications();
            if applications
                .find_active_for_pair(applicant_id, scholarship_id)
                .await?
                .is_some()
            {
                counter!("applications_submitted_total", "result" => "duplicate").increment(1);
                return Err(duplicate_application());
            }

            let outcome = applications
                .insert(&NewApplication {
                    applicant_id,
                    scholarship_id,
                    gpa_at_submission: applicant.gpa,
                    income_at_submission: applicant.monthly_income,
                    submitted_at: now,
                })
                .await?;

            match outcome {
                ApplicationInsertOutcome::Inserted(id) => {
                    counter!("applications_submitted_total", "result" => "created").increment(1);
                    info!(stage = "intake", application_id = id, applicant_id, scholarship_id, "application submitted");
                    Ok(id)
                }
                ApplicationInsertOutcome::Duplicate => {
                    counter!("applications_submitted_total", "result" => "duplicate").increment(1);
                    Err(duplicate_application())
                }
            }
        })
        .await
    }

    /// Records an upload for one requirement and reopens review where needed.
    pub async fn submit_requirement(
        &self,
        applicant_id: i64,
        upload: RequirementUpload,
    ) -> Result<RequirementReceipt, ServiceError> {
        let requirement_key = upload.requirement_key.trim().to_string();
        if requirement_key.is_empty() {
            return Err(ServiceError::Validation(
                "requirement_key is required".to_string(),
            ));
        }
        let notes = normalize_notes(upload.notes.as_deref())?;
        let tracked = self.catalog.contains(&requirement_key);

        within(self.store_timeout, async {
            let now = self.now();
            let applications = self.database.applications();
            let application = match upload.application_id {
                Some(id) => applications
                    .fetch(id)
                    .await?
                    .filter(|application| application.applicant_id == applicant_id)
                    .ok_or_else(|| ServiceError::not_found("application", id))?,
                None => applications
                    .latest_for_applicant(applicant_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(
                            "no application found; submit an application first".to_string(),
                        )
                    })?,
            };
            if application.status == ApplicationStatus::Withdrawn {
                return Err(ServiceError::Conflict(format!(
                    "application {} has been withdrawn",
                    application.id
                )));
            }

            if !tracked {
                warn!(
                    stage = "intake",
                    application_id = application.id,
                    requirement_key = %requirement_key,
                    "requirement key is not in the catalog; it will not count toward completion"
                );
            }

            let mut tx = self.database.begin().await?;
            let submission_id = self
                .database
                .submissions()
                .upsert(
                    &mut tx,
                    &NewSubmission {
                        application_id: application.id,
                        requirement_key: requirement_key.clone(),
                        file_name: upload.document.file_name.clone(),
                        file_url: upload.document.file_url.clone(),
                        notes: notes.clone(),
                        uploaded_at: now,
                    },
                )
                .await?;

            let mut status = application.status;
            for (transition, remarks) in [
                (Transition::Reopen, REOPEN_REMARKS),
                (Transition::ReturnToReview, NEW_DOCUMENT_REMARKS),
            ] {
                if let Some(next) = applications
                    .apply_transition(&mut tx, application.id, transition, Some(remarks), now)
                    .await?
                {
                    counter!("application_transitions_total", "to" => next.as_str()).increment(1);
                    info!(
                        stage = "intake",
                        application_id = application.id,
                        transition = %transition,
                        to = %next,
                        "application moved by document submission"
                    );
                    status = next;
                    break;
                }
            }
            tx.commit().await.map_err(iskolar_storage::StorageError::from)?;

            counter!(
                "requirement_submissions_total",
                "tracked" => if tracked { "true" } else { "false" }
            )
            .increment(1);
            info!(
                stage = "intake",
                application_id = application.id,
                submission_id,
                requirement_key = %requirement_key,
                "requirement submitted"
            );

            Ok(RequirementReceipt {
                submission_id,
                application_id: application.id,
                tracked,
                application_status: status,
            })
        })
        .await
    }

    /// Catalog merged with the applicant's most recent application.
    pub async fn requirements_overview(
        &self,
        applicant_id: i64,
    ) -> Result<RequirementsOverview, ServiceError> {
        within(self.store_timeout, async {
            let application = self
                .database
                .applications()
                .latest_for_applicant(applicant_id)
                .await?;
            let submissions = match &application {
                Some(application) => {
                    self.database
                        .submissions()
                        .list_for_application(application.id)
                        .await?
                }
                None => Vec::new(),
            };

            let summary = self.catalog.summarize(
                submissions
                    .iter()
                    .map(|submission| (submission.requirement_key.as_str(), submission.status)),
            );
            Ok(RequirementsOverview {
                requirements: self.catalog.overview(&submissions),
                application,
                summary,
            })
        })
        .await
    }

    pub async fn list_applications(
        &self,
        filter: ApplicationFilter,
        page: Page,
    ) -> Result<ApplicationPage, ServiceError> {
        within(self.store_timeout, async {
            Ok(self.database.applications().list(&filter, page).await?)
        })
        .await
    }

    pub async fn application_detail(
        &self,
        application_id: i64,
    ) -> Result<ApplicationWithHistory, ServiceError> {
        within(self.store_timeout, async {
            let application = self
                .database
                .applications()
                .fetch_detail(application_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("application", application_id))?;
            let history = self
                .database
                .validations()
                .list_for_application(application_id)
                .await?;
            Ok(ApplicationWithHistory {
                application,
                history,
            })
        })
        .await
    }
}

fn duplicate_application() -> ServiceError {
    ServiceError::Conflict("an application for this scholarship already exists".to_string())
}

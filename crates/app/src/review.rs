use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use tracing::{info, warn};

use iskolar_core::{
    lifecycle::Transition, next_status, normalize_notes, require_checklist, Applicant,
    ApplicationStatus, CompletionSummary, RequirementCatalog, RequirementStatus,
    RequirementSubmission, ReviewAction, Scholarship, SubmissionVerdict, TransitionError,
    ValidationChecklist, ValidationRecord,
};
use iskolar_storage::{
    ApplicationDetail, ApplicationListing, Database, NewValidation, Page, QueueFilter,
    SlotOutcome, StatusCount, StorageError, SubmissionUpdate,
};

use crate::{
    error::{within, ServiceError},
    router::Clock,
};

const AUTO_APPROVED_REMARKS: &str = "All documents validated";
const BULK_APPROVED_REMARKS: &str = "All documents approved by staff";
const NEEDS_REVISION_REMARKS: &str = "Documents need revision";

/// Staff review operations: per-document validation, bulk validation and
/// application decisions.
#[derive(Clone)]
pub struct ValidationEngine {
    database: Database,
    catalog: Arc<RequirementCatalog>,
    clock: Clock,
    store_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionValidated {
    pub submission_id: i64,
    pub application_id: i64,
    pub status: RequirementStatus,
    /// Present when the verdict moved the application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_status: Option<ApplicationStatus>,
    pub summary: CompletionSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkValidated {
    pub application_id: i64,
    pub affected_count: u64,
    pub application_status: ApplicationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub application_id: i64,
    pub new_status: ApplicationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub listing: ApplicationListing,
    pub requirements_total: u32,
    pub requirements_approved: u32,
    pub requirements_pending: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffQueue {
    pub rows: Vec<QueueEntry>,
    pub total: u64,
    pub summary: Vec<StatusCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffApplicationDetail {
    pub application: ApplicationDetail,
    pub applicant: Applicant,
    pub scholarship: Scholarship,
    pub submissions: Vec<RequirementSubmission>,
    pub history: Vec<ValidationRecord>,
    pub summary: CompletionSummary,
}

impl ValidationEngine {
    pub fn new(
        database: Database,
        catalog: Arc<RequirementCatalog>,
        clock: Clock,
        store_timeout: Duration,
    ) -> Self {
        Self {
            database,
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

    /// Records a verdict on one submission, then lets the completion
    /// summary drive the application: every catalog requirement approved
    /// auto-approves it, a rejection pulls a `submitted` one into review.
    pub async fn validate_one(
        &self,
        validator_id: i64,
        submission_id: i64,
        verdict: SubmissionVerdict,
        notes: Option<&str>,
    ) -> Result<SubmissionValidated, ServiceError> {
        let notes = normalize_notes(notes)?;

        within(self.store_timeout, async {
            let now = self.now();
            let update = SubmissionUpdate {
                verdict,
                validator_id,
                notes,
                validated_at: now,
            };

            let mut tx = self.database.begin().await?;
            let application_id = self
                .database
                .submissions()
                .apply_verdict(&mut tx, submission_id, &update)
                .await?
                .ok_or_else(|| ServiceError::not_found("submission", submission_id))?;

            let statuses = self
                .database
                .submissions()
                .statuses_in(&mut tx, application_id)
                .await?;
            let summary = self
                .catalog
                .summarize(statuses.iter().map(|(key, status)| (key.as_str(), *status)));

            let follow_up = if summary.all_approved() {
                Some((Transition::AutoApprove, AUTO_APPROVED_REMARKS))
            } else if verdict == SubmissionVerdict::Rejected {
                Some((Transition::ReturnToReview, NEEDS_REVISION_REMARKS))
            } else {
                None
            };

            let mut application_status = None;
            if let Some((transition, remarks)) = follow_up {
                application_status = self
                    .database
                    .applications()
                    .apply_transition(&mut tx, application_id, transition, Some(remarks), now)
                    .await?;
                if let Some(status) = application_status {
                    record_transition(application_id, transition, status);
                    if status == ApplicationStatus::Approved {
                        self.consume_slot(&mut tx, application_id).await?;
                    }
                }
            }
            tx.commit().await.map_err(StorageError::from)?;

            counter!("validations_total", "kind" => "single", "action" => verdict.as_str())
                .increment(1);
            info!(
                stage = "review",
                validator_id,
                submission_id,
                application_id,
                verdict = verdict.as_str(),
                approved = summary.approved,
                total = summary.total,
                "submission validated"
            );

            Ok(SubmissionValidated {
                submission_id,
                application_id,
                status: verdict.requirement_status(),
                application_status,
                summary,
            })
        })
        .await
    }

    /// Applies the verdict to every pending submission and sets the
    /// application status directly. One audit entry is written per call.
    pub async fn validate_bulk(
        &self,
        validator_id: i64,
        application_id: i64,
        verdict: SubmissionVerdict,
        notes: Option<&str>,
    ) -> Result<BulkValidated, ServiceError> {
        let notes = normalize_notes(notes)?;

        within(self.store_timeout, async {
            let now = self.now();
            let (target, default_remarks) = match verdict {
                SubmissionVerdict::Approved => (ApplicationStatus::Approved, BULK_APPROVED_REMARKS),
                SubmissionVerdict::Rejected => {
                    (ApplicationStatus::UnderReview, NEEDS_REVISION_REMARKS)
                }
            };
            let remarks = notes.as_deref().unwrap_or(default_remarks);

            let mut tx = self.database.begin().await?;
            let applications = self.database.applications();
            if !applications
                .override_status(&mut tx, application_id, target, Some(remarks), now)
                .await?
            {
                return Err(match applications.status_in(&mut tx, application_id).await? {
                    None => ServiceError::not_found("application", application_id),
                    Some(status) => ServiceError::Conflict(format!(
                        "application {application_id} is {status} and cannot be validated"
                    )),
                });
            }

            let affected_count = self
                .database
                .submissions()
                .apply_verdict_to_pending(
                    &mut tx,
                    application_id,
                    &SubmissionUpdate {
                        verdict,
                        validator_id,
                        notes: notes.clone(),
                        validated_at: now,
                    },
                )
                .await?;

            if target == ApplicationStatus::Approved {
                self.consume_slot(&mut tx, application_id).await?;
            }

            self.database
                .validations()
                .append(
                    &mut tx,
                    &NewValidation {
                        application_id,
                        validator_id,
                        action: verdict.review_action(),
                        checklist: None,
                        notes: Some(remarks.to_string()),
                        created_at: now,
                    },
                )
                .await?;
            tx.commit().await.map_err(StorageError::from)?;

            counter!("validations_total", "kind" => "bulk", "action" => verdict.as_str())
                .increment(1);
            counter!("application_transitions_total", "to" => target.as_str()).increment(1);
            info!(
                stage = "review",
                validator_id,
                application_id,
                verdict = verdict.as_str(),
                affected_count,
                to = %target,
                "bulk validation applied"
            );

            Ok(BulkValidated {
                application_id,
                affected_count,
                application_status: target,
            })
        })
        .await
    }

    /// Staff decision on the whole application.
    ///
    /// The transition table is checked first, then the checklist gate for
    /// approvals; the write itself is a compare-and-set on the status read
    /// here, so a concurrent decision surfaces as a conflict.
    pub async fn decide(
        &self,
        validator_id: i64,
        application_id: i64,
        action: ReviewAction,
        checklist: Option<ValidationChecklist>,
        notes: Option<&str>,
    ) -> Result<Decision, ServiceError> {
        let notes = normalize_notes(notes)?;
        let transition = Transition::from(action);

        within(self.store_timeout, async {
            let now = self.now();
            let applications = self.database.applications();
            let current = applications
                .fetch(application_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("application", application_id))?
                .status;
            next_status(current, transition)?;
            if action == ReviewAction::Approved {
                require_checklist(checklist.as_ref())?;
            }

            let mut tx = self.database.begin().await?;
            let Some(new_status) = applications
                .apply_transition(&mut tx, application_id, transition, notes.as_deref(), now)
                .await?
            else {
                let latest = applications
                    .status_in(&mut tx, application_id)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("application", application_id))?;
                return Err(TransitionError::Illegal {
                    current: latest,
                    transition,
                }
                .into());
            };

            self.database
                .validations()
                .append(
                    &mut tx,
                    &NewValidation {
                        application_id,
                        validator_id,
                        action,
                        checklist,
                        notes: notes.clone(),
                        created_at: now,
                    },
                )
                .await?;

            if new_status == ApplicationStatus::Approved {
                self.consume_slot(&mut tx, application_id).await?;
            }
            tx.commit().await.map_err(StorageError::from)?;

            counter!("validations_total", "kind" => "decision", "action" => action.as_str())
                .increment(1);
            record_transition(application_id, transition, new_status);
            info!(
                stage = "review",
                validator_id,
                application_id,
                action = action.as_str(),
                from = %current,
                to = %new_status,
                "application decision recorded"
            );

            Ok(Decision {
                application_id,
                new_status,
            })
        })
        .await
    }

    pub async fn staff_queue(
        &self,
        filter: QueueFilter,
        page: Page,
    ) -> Result<StaffQueue, ServiceError> {
        within(self.store_timeout, async {
            let applications = self.database.applications();
            let queue = applications.staff_queue(&filter, page).await?;
            let summary = applications.status_summary(filter.search.as_deref()).await?;

            let ids: Vec<i64> = queue.rows.iter().map(|row| row.application.id).collect();
            let mut statuses = self
                .database
                .submissions()
                .statuses_for_applications(&ids)
                .await?;

            let rows = queue
                .rows
                .into_iter()
                .map(|listing| {
                    let counts = self.summarize_rows(&mut statuses, listing.application.id);
                    QueueEntry {
                        listing,
                        requirements_total: counts.total,
                        requirements_approved: counts.approved,
                        requirements_pending: counts.pending,
                    }
                })
                .collect();

            Ok(StaffQueue {
                rows,
                total: queue.total,
                summary,
            })
        })
        .await
    }

    pub async fn staff_detail(
        &self,
        application_id: i64,
    ) -> Result<StaffApplicationDetail, ServiceError> {
        within(self.store_timeout, async {
            let application = self
                .database
                .applications()
                .fetch_detail(application_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("application", application_id))?;
            let applicant_id = application.application.applicant_id;
            let scholarship_id = application.application.scholarship_id;

            let applicant = self
                .database
                .applicants()
                .fetch(applicant_id)
                .await?
                .ok_or(StorageError::Missing {
                    entity: "applicant",
                    id: applicant_id,
                })?;
            let scholarship = self
                .database
                .scholarships()
                .fetch(scholarship_id)
                .await?
                .ok_or(StorageError::Missing {
                    entity: "scholarship",
                    id: scholarship_id,
                })?;
            let submissions = self
                .database
                .submissions()
                .list_for_application(application_id)
                .await?;
            let history = self
                .database
                .validations()
                .list_for_application(application_id)
                .await?;
            let summary = self.catalog.summarize(
                submissions
                    .iter()
                    .map(|submission| (submission.requirement_key.as_str(), submission.status)),
            );

            Ok(StaffApplicationDetail {
                application,
                applicant,
                scholarship,
                submissions,
                history,
                summary,
            })
        })
        .await
    }

    fn summarize_rows(
        &self,
        statuses: &mut HashMap<i64, Vec<(String, RequirementStatus)>>,
        application_id: i64,
    ) -> CompletionSummary {
        let rows = statuses.remove(&application_id).unwrap_or_default();
        self.catalog
            .summarize(rows.iter().map(|(key, status)| (key.as_str(), *status)))
    }

    async fn consume_slot(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        application_id: i64,
    ) -> Result<(), StorageError> {
        match self
            .database
            .slots()
            .consume_for_application(tx, application_id)
            .await?
        {
            Some(SlotOutcome::Consumed { remaining }) => {
                counter!("slots_consumed_total", "result" => "consumed").increment(1);
                info!(stage = "review", application_id, remaining, "award slot consumed");
            }
            Some(SlotOutcome::Exhausted) => {
                counter!("slots_consumed_total", "result" => "exhausted").increment(1);
                warn!(
                    stage = "review",
                    application_id,
                    "application approved with no slots remaining; count left at zero"
                );
            }
            None => {}
        }
        Ok(())
    }

}

fn record_transition(application_id: i64, transition: Transition, to: ApplicationStatus) {
    counter!("application_transitions_total", "to" => to.as_str()).increment(1);
    info!(
        stage = "review",
        application_id,
        transition = %transition,
        to = %to,
        "application status changed"
    );
}

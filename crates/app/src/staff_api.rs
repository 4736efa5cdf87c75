//! Validator-facing HTTP handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use iskolar_core::{ReviewAction, SubmissionVerdict, ValidationChecklist};
use iskolar_storage::{QueueFilter, StatusCount};

use crate::{
    applicant_api::{page_from, parse_status_filter, required, PageMeta},
    error::ServiceError,
    identity::ValidatorCaller,
    problem::ProblemResponse,
    review::{BulkValidated, Decision, QueueEntry, StaffApplicationDetail, SubmissionValidated},
    router::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ValidateOneBody {
    #[serde(default, alias = "submissionId")]
    submission_id: Option<i64>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateOneResponse {
    success: bool,
    #[serde(rename = "submissionId")]
    submission_id: i64,
    #[serde(flatten)]
    result: SubmissionValidated,
}

pub async fn validate_one(
    State(state): State<AppState>,
    ValidatorCaller(validator_id): ValidatorCaller,
    body: Result<Json<ValidateOneBody>, JsonRejection>,
) -> Result<Json<ValidateOneResponse>, ProblemResponse> {
    const ROUTE: &str = "validate_one";
    let Json(body) = body?;
    let submission_id = body
        .submission_id
        .ok_or_else(|| required("submission_id").into_problem(ROUTE))?;
    let verdict = parse_verdict(body.action.as_deref()).map_err(|err| err.into_problem(ROUTE))?;

    let result = state
        .review()
        .validate_one(validator_id, submission_id, verdict, body.notes.as_deref())
        .await
        .map_err(|err| err.into_problem(ROUTE))?;

    Ok(Json(ValidateOneResponse {
        success: true,
        submission_id: result.submission_id,
        result,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ValidateBulkBody {
    #[serde(default, alias = "applicationId")]
    application_id: Option<i64>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

pub async fn validate_bulk(
    State(state): State<AppState>,
    ValidatorCaller(validator_id): ValidatorCaller,
    body: Result<Json<ValidateBulkBody>, JsonRejection>,
) -> Result<Json<BulkValidated>, ProblemResponse> {
    const ROUTE: &str = "validate_bulk";
    let Json(body) = body?;
    let application_id = body
        .application_id
        .ok_or_else(|| required("application_id").into_problem(ROUTE))?;
    let verdict = parse_verdict(body.action.as_deref()).map_err(|err| err.into_problem(ROUTE))?;

    state
        .review()
        .validate_bulk(validator_id, application_id, verdict, body.notes.as_deref())
        .await
        .map(Json)
        .map_err(|err| err.into_problem(ROUTE))
}

#[derive(Debug, Deserialize)]
pub struct DecideBody {
    #[serde(default, alias = "applicationId")]
    application_id: Option<i64>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    checklist: Option<ValidationChecklist>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecideResponse {
    success: bool,
    #[serde(flatten)]
    decision: Decision,
}

pub async fn decide(
    State(state): State<AppState>,
    ValidatorCaller(validator_id): ValidatorCaller,
    body: Result<Json<DecideBody>, JsonRejection>,
) -> Result<Json<DecideResponse>, ProblemResponse> {
    const ROUTE: &str = "decide";
    let Json(body) = body?;
    let application_id = body
        .application_id
        .ok_or_else(|| required("application_id").into_problem(ROUTE))?;
    let action: ReviewAction = body
        .action
        .as_deref()
        .ok_or_else(|| required("action"))
        .and_then(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ServiceError::Validation(format!("unknown action '{raw}'")))
        })
        .map_err(|err| err.into_problem(ROUTE))?;

    let decision = state
        .review()
        .decide(
            validator_id,
            application_id,
            action,
            body.checklist,
            body.notes.as_deref(),
        )
        .await
        .map_err(|err| err.into_problem(ROUTE))?;

    Ok(Json(DecideResponse {
        success: true,
        decision,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    status: Option<String>,
    search: Option<String>,
    page: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    data: Vec<QueueEntry>,
    meta: PageMeta,
    summary: Vec<StatusCount>,
}

pub async fn queue(
    State(state): State<AppState>,
    ValidatorCaller(_): ValidatorCaller,
    Query(query): Query<QueueQuery>,
) -> Result<Json<QueueResponse>, ProblemResponse> {
    const ROUTE: &str = "staff_queue";
    let filter = QueueFilter {
        status: parse_status_filter(query.status.as_deref()).map_err(|err| err.into_problem(ROUTE))?,
        search: query
            .search
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty()),
    };
    let page = page_from(query.page.as_deref(), query.limit.as_deref());

    let queue = state
        .review()
        .staff_queue(filter, page)
        .await
        .map_err(|err| err.into_problem(ROUTE))?;

    Ok(Json(QueueResponse {
        meta: PageMeta::new(page, queue.total),
        data: queue.rows,
        summary: queue.summary,
    }))
}

pub async fn detail(
    State(state): State<AppState>,
    ValidatorCaller(_): ValidatorCaller,
    Path(id): Path<i64>,
) -> Result<Json<StaffApplicationDetail>, ProblemResponse> {
    state
        .review()
        .staff_detail(id)
        .await
        .map(Json)
        .map_err(|err| err.into_problem("staff_detail"))
}

fn parse_verdict(raw: Option<&str>) -> Result<SubmissionVerdict, ServiceError> {
    let raw = raw.ok_or_else(|| required("action"))?;
    raw.trim().parse().map_err(|_| {
        ServiceError::Validation(format!("action must be 'approved' or 'rejected' (got '{raw}')"))
    })
}

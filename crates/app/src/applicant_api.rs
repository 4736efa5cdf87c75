//! Applicant-facing and public HTTP handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use iskolar_core::{ApplicationStatus, DocumentRef, EligibilityReport};
use iskolar_storage::{ApplicationFilter, ApplicationListing, Page};

use crate::{
    error::ServiceError,
    identity::ApplicantCaller,
    intake::{ApplicationWithHistory, RequirementReceipt, RequirementUpload, RequirementsOverview},
    problem::ProblemResponse,
    router::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SubmitApplicationBody {
    #[serde(default, alias = "scholarshipId")]
    scholarship_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SubmittedResponse {
    id: i64,
    message: &'static str,
}

pub async fn submit_application(
    State(state): State<AppState>,
    ApplicantCaller(applicant_id): ApplicantCaller,
    body: Result<Json<SubmitApplicationBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmittedResponse>), ProblemResponse> {
    const ROUTE: &str = "submit_application";
    let Json(body) = body?;
    let scholarship_id = body
        .scholarship_id
        .ok_or_else(|| required("scholarship_id").into_problem(ROUTE))?;

    let id = state
        .intake()
        .submit_application(applicant_id, scholarship_id)
        .await
        .map_err(|err| err.into_problem(ROUTE))?;

    Ok((
        StatusCode::CREATED,
        Json(SubmittedResponse {
            id,
            message: "Application submitted successfully",
        }),
    ))
}

/// Raw listing query. Values are parsed leniently so a bad page number
/// falls back to the default instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    #[serde(alias = "scholarshipId")]
    scholarship_id: Option<String>,
    page: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl PageMeta {
    pub fn new(page: Page, total: u64) -> Self {
        Self {
            total,
            page: page.page,
            limit: page.limit,
            pages: page.pages(total),
        }
    }
}

pub async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<ApplicationListing>>, ProblemResponse> {
    const ROUTE: &str = "list_applications";
    let filter = ApplicationFilter {
        status: parse_status_filter(query.status.as_deref()).map_err(|err| err.into_problem(ROUTE))?,
        scholarship_id: query.scholarship_id.as_deref().and_then(lenient_int),
        applicant_id: None,
    };
    let page = page_from(query.page.as_deref(), query.limit.as_deref());

    let listing = state
        .intake()
        .list_applications(filter, page)
        .await
        .map_err(|err| err.into_problem(ROUTE))?;

    Ok(Json(ListResponse {
        meta: PageMeta::new(page, listing.total),
        data: listing.rows,
    }))
}

pub async fn application_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApplicationWithHistory>, ProblemResponse> {
    state
        .intake()
        .application_detail(id)
        .await
        .map(Json)
        .map_err(|err| err.into_problem("application_detail"))
}

pub async fn check_eligibility(
    State(state): State<AppState>,
    ApplicantCaller(applicant_id): ApplicantCaller,
    Path(scholarship_id): Path<i64>,
) -> Result<Json<EligibilityReport>, ProblemResponse> {
    state
        .intake()
        .check_eligibility(applicant_id, scholarship_id)
        .await
        .map(Json)
        .map_err(|err| err.into_problem("check_eligibility"))
}

pub async fn requirements_overview(
    State(state): State<AppState>,
    ApplicantCaller(applicant_id): ApplicantCaller,
) -> Result<Json<RequirementsOverview>, ProblemResponse> {
    state
        .intake()
        .requirements_overview(applicant_id)
        .await
        .map(Json)
        .map_err(|err| err.into_problem("requirements_overview"))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequirementBody {
    #[serde(default, alias = "requirementKey")]
    requirement_key: Option<String>,
    #[serde(default, alias = "fileName")]
    file_name: Option<String>,
    #[serde(default, alias = "fileUrl")]
    file_url: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default, alias = "applicationId")]
    application_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RequirementSubmitted {
    success: bool,
    #[serde(flatten)]
    receipt: RequirementReceipt,
}

pub async fn submit_requirement(
    State(state): State<AppState>,
    ApplicantCaller(applicant_id): ApplicantCaller,
    body: Result<Json<SubmitRequirementBody>, JsonRejection>,
) -> Result<Json<RequirementSubmitted>, ProblemResponse> {
    const ROUTE: &str = "submit_requirement";
    let Json(body) = body?;
    let requirement_key = body
        .requirement_key
        .ok_or_else(|| required("requirement_key").into_problem(ROUTE))?;

    let receipt = state
        .intake()
        .submit_requirement(
            applicant_id,
            RequirementUpload {
                requirement_key,
                document: DocumentRef {
                    file_name: body.file_name,
                    file_url: body.file_url,
                },
                notes: body.notes,
                application_id: body.application_id,
            },
        )
        .await
        .map_err(|err| err.into_problem(ROUTE))?;

    Ok(Json(RequirementSubmitted {
        success: true,
        receipt,
    }))
}

pub(crate) fn required(field: &str) -> ServiceError {
    ServiceError::Validation(format!("{field} is required"))
}

/// `all` or an empty value means no filter.
pub(crate) fn parse_status_filter(raw: Option<&str>) -> Result<Option<ApplicationStatus>, ServiceError> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|err: iskolar_core::ParseEnumError| ServiceError::Validation(err.to_string())),
    }
}

pub(crate) fn page_from(page: Option<&str>, limit: Option<&str>) -> Page {
    Page::clamped(page.and_then(lenient_int), limit.and_then(lenient_int))
}

fn lenient_int(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

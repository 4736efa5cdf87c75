use std::{future::Future, time::Duration};

use axum::http::StatusCode;
use metrics::counter;
use thiserror::Error;
use tracing::error;

use iskolar_core::{ChecklistError, NotesError, TransitionError};
use iskolar_storage::StorageError;

use crate::problem::ProblemResponse;

/// Failures surfaced by the intake and review services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("applicant is not eligible for this scholarship")]
    Ineligible { reasons: Vec<String> },
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{0}")]
    Conflict(String),
    #[error("missing or invalid {0} header")]
    Unauthenticated(&'static str),
    #[error("store did not respond within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ChecklistError> for ServiceError {
    fn from(err: ChecklistError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<NotesError> for ServiceError {
    fn from(err: NotesError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl ServiceError {
    pub fn not_found(entity: &str, id: i64) -> Self {
        Self::NotFound(format!("{entity} {id} not found"))
    }

    /// Translates the error for HTTP callers. Storage failures are logged
    /// with the route before their detail is replaced by a generic message.
    pub fn into_problem(self, route: &'static str) -> ProblemResponse {
        match self {
            Self::Validation(detail) => {
                ProblemResponse::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", detail)
            }
            Self::Ineligible { reasons } => ProblemResponse::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "not_eligible",
                "applicant is not eligible for this scholarship",
            )
            .with_reasons(reasons),
            Self::NotFound(detail) => ProblemResponse::new(StatusCode::NOT_FOUND, "not_found", detail),
            Self::Transition(err) => {
                ProblemResponse::new(StatusCode::CONFLICT, "invalid_transition", err.to_string())
            }
            Self::Conflict(detail) => ProblemResponse::new(StatusCode::CONFLICT, "conflict", detail),
            err @ Self::Unauthenticated(_) => {
                ProblemResponse::new(StatusCode::UNAUTHORIZED, "unauthenticated", err.to_string())
            }
            Self::Timeout(limit) => {
                counter!("store_errors_total", "kind" => "timeout").increment(1);
                error!(stage = "app", route, timeout_ms = limit.as_millis() as u64, "store operation timed out");
                ProblemResponse::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_timeout",
                    "the data store did not respond in time; retry the request",
                )
                .with_retry_after(1)
            }
            Self::Storage(err) => {
                counter!("store_errors_total", "kind" => err.kind()).increment(1);
                error!(stage = "app", route, error = %err, retryable = err.is_retryable(), "storage failure");
                if err.is_retryable() {
                    ProblemResponse::new(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "store_busy",
                        "the data store is busy; retry the request",
                    )
                    .with_retry_after(1)
                } else {
                    ProblemResponse::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "an unexpected storage error occurred",
                    )
                }
            }
        }
    }
}

/// Runs a store-bound operation under the configured deadline.
pub async fn within<T, F>(limit: Duration, operation: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| ServiceError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use iskolar_core::{lifecycle::Transition, ApplicationStatus};

    #[test]
    fn maps_taxonomy_to_status_codes() {
        let cases = [
            (ServiceError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                ServiceError::Ineligible {
                    reasons: vec!["GPA".into()],
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ServiceError::not_found("application", 4), StatusCode::NOT_FOUND),
            (
                ServiceError::Transition(TransitionError::Illegal {
                    current: ApplicationStatus::Approved,
                    transition: Transition::Approve,
                }),
                StatusCode::CONFLICT,
            ),
            (ServiceError::Conflict("dup".into()), StatusCode::CONFLICT),
            (ServiceError::Unauthenticated("x-applicant-id"), StatusCode::UNAUTHORIZED),
            (
                ServiceError::Timeout(Duration::from_millis(5)),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ServiceError::Storage(StorageError::Missing {
                    entity: "scholarship",
                    id: 1,
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_problem("test").status(), expected);
        }
    }

    #[tokio::test]
    async fn deadline_turns_into_timeout() {
        let result: Result<(), ServiceError> = within(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Timeout(_))));
    }
}

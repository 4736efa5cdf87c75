//! Caller identity supplied by the upstream auth layer as opaque headers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::{error::ServiceError, problem::ProblemResponse};

pub const APPLICANT_HEADER: &str = "x-applicant-id";
pub const VALIDATOR_HEADER: &str = "x-validator-id";

/// The acting applicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicantCaller(pub i64);

/// The acting staff reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorCaller(pub i64);

fn caller_id(headers: &HeaderMap, name: &'static str) -> Result<i64, ProblemResponse> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ServiceError::Unauthenticated(name).into_problem("identity"))
}

#[async_trait]
impl<S> FromRequestParts<S> for ApplicantCaller
where
    S: Send + Sync,
{
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_id(&parts.headers, APPLICANT_HEADER).map(Self)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatorCaller
where
    S: Send + Sync,
{
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_id(&parts.headers, VALIDATOR_HEADER).map(Self)
    }
}

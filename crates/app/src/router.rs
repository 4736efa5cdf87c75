use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::warn;

use iskolar_core::{EligibilityEvaluator, RequirementCatalog};
use iskolar_storage::Database;

use crate::{
    applicant_api, intake::ApplicationIntake, review::ValidationEngine, staff_api, telemetry,
};

/// Injected wall clock.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Clock,
    store_timeout: Duration,
    intake: ApplicationIntake,
    review: ValidationEngine,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        catalog: RequirementCatalog,
        evaluator: EligibilityEvaluator,
        store_timeout: Duration,
    ) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let catalog = Arc::new(catalog);
        let intake = ApplicationIntake::new(
            storage.clone(),
            evaluator,
            catalog.clone(),
            clock.clone(),
            store_timeout,
        );
        let review = ValidationEngine::new(storage.clone(), catalog, clock.clone(), store_timeout);
        Self {
            metrics,
            storage,
            clock,
            store_timeout,
            intake,
            review,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.intake = self.intake.with_clock(clock.clone());
        self.review = self.review.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn intake(&self) -> ApplicationIntake {
        self.intake.clone()
    }

    pub fn review(&self) -> ValidationEngine {
        self.review.clone()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route(
            "/api/applications",
            post(applicant_api::submit_application).get(applicant_api::list_applications),
        )
        .route("/api/applications/:id", get(applicant_api::application_detail))
        .route(
            "/api/scholarships/:id/eligibility",
            get(applicant_api::check_eligibility),
        )
        .route(
            "/api/me/requirements",
            get(applicant_api::requirements_overview).post(applicant_api::submit_requirement),
        )
        .route(
            "/api/staff/validate",
            put(staff_api::validate_one).post(staff_api::validate_bulk),
        )
        .route("/api/validations", put(staff_api::decide))
        .route("/api/staff/applications", get(staff_api::queue))
        .route("/api/staff/applications/:id", get(staff_api::detail))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    match tokio::time::timeout(state.store_timeout, state.storage().ping()).await {
        Ok(Ok(())) => StatusCode::OK,
        Ok(Err(err)) => {
            warn!(stage = "app", error = %err, "readiness probe failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(_) => {
            warn!(stage = "app", "readiness probe timed out");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

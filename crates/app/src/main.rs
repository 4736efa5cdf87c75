mod applicant_api;
mod error;
mod identity;
mod intake;
mod problem;
mod review;
mod router;
mod seed;
mod staff_api;
mod telemetry;
#[cfg(test)]
mod testing;

use std::{fs, net::SocketAddr};

use tracing::info;

use iskolar_core::{EligibilityEvaluator, RequirementCatalog};
use iskolar_storage::Database;
use iskolar_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url, config.store_timeout).await?;
    database.run_migrations().await?;

    let catalog = match &config.requirement_catalog_path {
        Some(path) => RequirementCatalog::from_json(&fs::read_to_string(path)?)?,
        None => RequirementCatalog::builtin()?,
    };
    info!(
        stage = "app",
        requirements = catalog.len(),
        custom = config.requirement_catalog_path.is_some(),
        "requirement catalog loaded"
    );

    let state = router::AppState::new(
        metrics,
        database,
        catalog,
        EligibilityEvaluator::new(config.eligibility_timezone),
        config.store_timeout,
    );

    if config.seed_demo {
        seed::seed_demo(state.storage(), state.now()).await?;
    }

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}

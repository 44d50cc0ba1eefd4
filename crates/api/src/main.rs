use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use voucherflow_api::app::services::{AppServices, Stores};
use voucherflow_api::middleware::StaticTokenResolver;
use voucherflow_core::UserId;
use voucherflow_infra::config::OrchestratorConfig;
use voucherflow_infra::workflow::InvocationWorker;

const RESUME_LIMIT: usize = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    voucherflow_observability::init();

    let config = OrchestratorConfig::from_env().context("invalid orchestrator configuration")?;

    let stores = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            tracing::info!("using postgres stores");
            Stores::postgres(pool)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            Stores::in_memory()
        }
    };

    let sessions = match std::env::var("API_TOKENS") {
        Ok(spec) => StaticTokenResolver::parse(&spec).context("invalid API_TOKENS")?,
        Err(_) => {
            let user = UserId::new();
            tracing::warn!(%user, "API_TOKENS not set; accepting insecure dev token `dev-token`");
            StaticTokenResolver::new().with_token("dev-token", user)
        }
    };

    let services = Arc::new(AppServices::build(stores, config));
    let worker = services.start_worker();
    InvocationWorker::resume_unfinished(services.orchestrator.clone(), RESUME_LIMIT).await;

    let app = voucherflow_api::app::build_app(services.clone(), Arc::new(sessions));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    services.orchestrator.stop_admitting();
    worker.shutdown().await;
    Ok(())
}

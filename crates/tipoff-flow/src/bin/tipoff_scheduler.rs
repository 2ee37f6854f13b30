//! Tipoff forecast scheduler service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tipoff_core::init_logging;
use tipoff_flow::config::OrchestratorConfig;
use tipoff_flow::context::ContextAssembler;
use tipoff_flow::error::{Error, Result};
use tipoff_flow::generation::GenerationClient;
use tipoff_flow::generation::http::ChatCompletionsGenerator;
use tipoff_flow::ledger::file::FileLedger;
use tipoff_flow::registry::{EventRegistry, RefreshOutcome};
use tipoff_flow::scheduler::{SchedulerConfig, TickSummary, TriggerScheduler};
use tipoff_flow::sources::fixture::JsonFixtureSource;
use tipoff_flow::store::memory::InMemoryGateway;

#[derive(Clone)]
struct AppState {
    registry: Arc<EventRegistry>,
    scheduler: Arc<TriggerScheduler>,
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    as_of: DateTime<Utc>,
    registry_refreshed: bool,
    summary: TickSummary,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    message: String,
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn run_handler(
    State(state): State<AppState>,
    body: Option<Json<RunRequest>>,
) -> std::result::Result<Json<RunResponse>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let as_of = request.as_of.unwrap_or_else(Utc::now);

    let refreshed = state.registry.refresh(Utc::now()).await?;
    if let RefreshOutcome::KeptPrevious { reason } = &refreshed {
        warn!(reason = %reason, "operator run using previous registry snapshot");
    }
    let summary = state.scheduler.run_once(as_of).await?;
    info!(as_of = %as_of, committed = summary.committed, "operator run complete");

    Ok(Json(RunResponse {
        as_of,
        registry_refreshed: refreshed.is_refreshed(),
        summary,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = OrchestratorConfig::from_env()?;
    init_logging(config.log_format);
    info!(?config, "starting tipoff scheduler");

    let fixture_path = config
        .fixture_path
        .clone()
        .ok_or_else(|| Error::configuration("missing TIPOFF_FIXTURE_PATH"))?;
    let generation_url = config
        .generation_url
        .as_deref()
        .ok_or_else(|| Error::configuration("missing TIPOFF_GENERATION_URL"))?;
    let ledger_path = config
        .ledger_path
        .clone()
        .ok_or_else(|| Error::configuration("missing TIPOFF_LEDGER_PATH"))?;

    let ledger = FileLedger::open(ledger_path, config.retry).await?;
    info!(path = %ledger.path().display(), "ledger opened");
    let source =
        Arc::new(JsonFixtureSource::new(fixture_path).with_recent_games(config.recent_games));
    let registry = Arc::new(EventRegistry::new(source.clone(), config.fetch_timeout));
    let assembler = ContextAssembler::new(source.clone(), source, config.assembler_config());
    let generator = ChatCompletionsGenerator::new(
        generation_url,
        config.generation_api_key.clone(),
        config.model.clone(),
    )?;
    let generation = GenerationClient::new(Arc::new(generator), config.generation_timeout)
        .with_calibration(config.calibration()?);

    let scheduler = Arc::new(TriggerScheduler::new(
        SchedulerConfig::from(&config),
        Arc::clone(&registry),
        Arc::new(assembler),
        Arc::new(generation),
        Arc::new(ledger),
        Arc::new(InMemoryGateway::new()),
    ));

    let cancel = CancellationToken::new();
    let mut loops = tokio::task::JoinSet::new();
    {
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        let interval = config.registry_refresh_interval;
        loops.spawn(async move { registry.run_refresh_loop(interval, cancel).await });
    }
    {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        loops.spawn(async move { scheduler.run(cancel).await });
    }
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
            cancel.cancel();
        });
    }

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/run", post(run_handler))
        .with_state(AppState {
            registry,
            scheduler,
        });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::configuration(format!("failed to bind: {e}")))?;
    info!(%addr, "listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::configuration(format!("server error: {e}")))?;

    cancel.cancel();
    while loops.join_next().await.is_some() {}
    Ok(())
}

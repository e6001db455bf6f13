use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use campus_faq_api::{
    CampusFaqApi, ChatRequest, ClearChatLogsResult, DeleteFaqResult, SeedResult,
    API_CONTRACT_VERSION,
};
use campus_faq_core::replies::SERVER_ERROR_REPLY;
use campus_faq_core::{parse_date, ChatLogEntry, ChatLogFilter, FaqDraft, FaqError, FaqId, FaqRecord};
use campus_faq_store_sqlite::StatsSummary;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, Time};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const EXPORT_FILE_NAME: &str = "campus_chat_history.csv";

#[derive(Debug, Clone)]
struct ServiceState {
    api: CampusFaqApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Chat-facing reply. Match outcomes and reason codes stay server-side.
#[derive(Debug, Clone, Serialize)]
struct ChatResponse {
    reply: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ExportQuery {
    limit: Option<usize>,
    search: Option<String>,
    department: Option<String>,
    year: Option<String>,
    tag: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "campus-faq-service")]
#[command(about = "HTTP service for the campus FAQ assistant")]
struct Args {
    #[arg(long, env = "CAMPUS_FAQ_DB", default_value = "./campus_faq.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "CAMPUS_FAQ_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,
    /// Clear chat history every day at UTC midnight.
    #[arg(long, env = "CAMPUS_FAQ_DAILY_CLEANUP", default_value_t = true, action = ArgAction::Set)]
    daily_cleanup: bool,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> ServiceError {
        Self::error(StatusCode::BAD_REQUEST, message)
    }

    /// Domain errors become 4xx; anything else is an infrastructure failure.
    fn from_api(err: &anyhow::Error) -> ServiceError {
        match err.downcast_ref::<FaqError>() {
            Some(FaqError::NotFound(_)) => Self::error(StatusCode::NOT_FOUND, err.to_string()),
            Some(_) => Self::bad_request(err.to_string()),
            None => {
                tracing::error!(error = %format!("{err:#}"), "request failed");
                Self::error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/faqs", get(list_faqs).post(create_faq))
        .route("/api/faqs/:faq_id", put(update_faq).delete(delete_faq))
        .route("/api/stats/summary", get(stats_summary))
        .route("/api/chatlogs/recent", get(recent_chat_logs))
        .route("/api/chatlogs/export", get(export_chat_logs))
        .route("/api/chatlogs/clear", post(clear_chat_logs))
        .route("/api/seed", post(seed))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let api = CampusFaqApi::new(args.db.clone());
    api.migrate(false).context("failed to migrate campus faq database")?;

    if args.daily_cleanup {
        tokio::spawn(run_daily_cleanup(api.clone()));
    }

    let state = ServiceState { api };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        addr = %args.bind,
        db = %args.db.display(),
        daily_cleanup = args.daily_cleanup,
        "campus faq service listening"
    );

    axum::serve(listener, app(state)).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("campus faq service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("received ctrl-c, shutting down");
}

/// Wait until the next UTC midnight, clear chat history, repeat.
async fn run_daily_cleanup(api: CampusFaqApi) {
    loop {
        let wait = match until_next_midnight(OffsetDateTime::now_utc()) {
            Ok(wait) => wait,
            Err(err) => {
                tracing::error!(error = %err, "daily chat log cleanup disabled");
                return;
            }
        };
        tracing::debug!(seconds = wait.as_secs(), "next chat log cleanup scheduled");
        tokio::time::sleep(wait).await;

        match api.clear_chat_logs() {
            Ok(result) => tracing::info!(removed = result.removed, "daily chat log cleanup"),
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "daily chat log cleanup failed"),
        }
    }
}

fn until_next_midnight(now: OffsetDateTime) -> Result<std::time::Duration> {
    let now = now.to_offset(time::UtcOffset::UTC);
    let next_day = now.date().next_day().ok_or_else(|| anyhow!("calendar overflow after {now}"))?;
    let next_midnight = next_day.with_time(Time::MIDNIGHT).assume_utc();
    std::time::Duration::try_from(next_midnight - now)
        .context("next midnight is not in the future")
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn chat(
    State(state): State<ServiceState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ServiceEnvelope<ChatResponse>>, ServiceError> {
    let reply = state.api.chat(&request).map_err(|err| {
        tracing::error!(error = %format!("{err:#}"), "chat request failed");
        ServiceState::error(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_REPLY)
    })?;
    tracing::info!(outcome = ?reply.outcome, "chat answered");
    Ok(Json(envelope(ChatResponse { reply: reply.reply })))
}

async fn list_faqs(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<FaqRecord>>>, ServiceError> {
    let faqs = state.api.list_faqs().map_err(|err| ServiceState::from_api(&err))?;
    Ok(Json(envelope(faqs)))
}

async fn create_faq(
    State(state): State<ServiceState>,
    Json(draft): Json<FaqDraft>,
) -> Result<(StatusCode, Json<ServiceEnvelope<FaqRecord>>), ServiceError> {
    let record = state.api.create_faq(draft).map_err(|err| ServiceState::from_api(&err))?;
    Ok((StatusCode::CREATED, Json(envelope(record))))
}

fn parse_faq_id(raw: &str) -> Result<FaqId, ServiceError> {
    raw.parse::<FaqId>().map_err(|err| ServiceState::bad_request(err.to_string()))
}

async fn update_faq(
    State(state): State<ServiceState>,
    Path(faq_id): Path<String>,
    Json(draft): Json<FaqDraft>,
) -> Result<Json<ServiceEnvelope<FaqRecord>>, ServiceError> {
    let faq_id = parse_faq_id(&faq_id)?;
    let record =
        state.api.update_faq(faq_id, draft).map_err(|err| ServiceState::from_api(&err))?;
    Ok(Json(envelope(record)))
}

async fn delete_faq(
    State(state): State<ServiceState>,
    Path(faq_id): Path<String>,
) -> Result<Json<ServiceEnvelope<DeleteFaqResult>>, ServiceError> {
    let faq_id = parse_faq_id(&faq_id)?;
    let result = state.api.delete_faq(faq_id).map_err(|err| ServiceState::from_api(&err))?;
    Ok(Json(envelope(result)))
}

async fn stats_summary(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<StatsSummary>>, ServiceError> {
    let stats = state.api.stats_summary().map_err(|err| ServiceState::from_api(&err))?;
    Ok(Json(envelope(stats)))
}

async fn recent_chat_logs(
    State(state): State<ServiceState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<ServiceEnvelope<Vec<ChatLogEntry>>>, ServiceError> {
    let logs =
        state.api.recent_chat_logs(query.limit).map_err(|err| ServiceState::from_api(&err))?;
    Ok(Json(envelope(logs)))
}

impl ExportQuery {
    fn into_filter(self) -> Result<ChatLogFilter, ServiceError> {
        let date = |raw: Option<String>| {
            raw.filter(|value| !value.trim().is_empty())
                .map(|value| parse_date(&value))
                .transpose()
                .map_err(|err| ServiceState::bad_request(err.to_string()))
        };

        Ok(ChatLogFilter {
            search: self.search,
            department: self.department,
            year: self.year,
            tag: self.tag,
            start_date: date(self.start_date)?,
            end_date: date(self.end_date)?,
        })
    }
}

async fn export_chat_logs(
    State(state): State<ServiceState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ServiceError> {
    let limit = query.limit;
    let filter = query.into_filter()?;

    let mut body = Vec::new();
    state
        .api
        .export_chat_history_csv(limit, &filter, &mut body)
        .map_err(|err| ServiceState::from_api(&err))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{EXPORT_FILE_NAME}\"")),
        ],
        body,
    )
        .into_response())
}

async fn clear_chat_logs(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<ClearChatLogsResult>>, ServiceError> {
    let result = state.api.clear_chat_logs().map_err(|err| ServiceState::from_api(&err))?;
    Ok(Json(envelope(result)))
}

async fn seed(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SeedResult>>, ServiceError> {
    let result = state.api.seed().map_err(|err| ServiceState::from_api(&err))?;
    Ok(Json(envelope(result)))
}

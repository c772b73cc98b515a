//! The dashboard + chat-webhook long-running process: one `axum::Router`
//! serving read-only `/api/*` routes and the chat webhook receiver, plus a
//! health-check timer and a suggestion-expiry sweep, all on one runtime.
//!
//! Grounded on `gator-cli/src/serve_cmd.rs`'s router/response shapes and
//! `run_serve`'s graceful-shutdown wiring.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use fleetwatch_chat::{BotType, ChatDispatcher, CommandRouter, InboundUpdate, RunRegistry};
use fleetwatch_db::models::{AgentInstance, ExecutionRun, FailureRecord, FileImpact, Task, TaskList, Wave};
use fleetwatch_db::queries::{agent_instances, execution_runs, failure_records, file_impacts, task_lists, tasks as task_db, waves as wave_db};

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: err.to_string() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ListSummaryResponse {
    #[serde(flatten)]
    pub list: TaskList,
    pub latest_run: Option<ExecutionRun>,
}

#[derive(Debug, Serialize)]
pub struct ListDetailResponse {
    #[serde(flatten)]
    pub list: TaskList,
    pub latest_run: Option<ExecutionRun>,
    pub waves: Vec<Wave>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub impacts: Vec<FileImpact>,
    pub recent_failures: Vec<FailureRecord>,
}

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    router: Arc<CommandRouter>,
    webhook_secret: String,
    project_id: Uuid,
}

pub fn build_router(pool: PgPool, router: Arc<CommandRouter>, webhook_secret: String, project_id: Uuid) -> Router {
    let state = AppState { pool, router, webhook_secret, project_id };
    Router::new()
        .route("/api/lists", get(list_lists))
        .route("/api/lists/{id}", get(get_list_detail))
        .route("/api/tasks/{id}", get(get_task_detail))
        .route("/api/agents", get(list_agents))
        .route("/webhook/{bot_type}", post(receive_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_serve(
    pool: PgPool,
    dispatcher: Arc<ChatDispatcher>,
    runs: Arc<RunRegistry>,
    bind: &str,
    port: u16,
    webhook_secret: String,
    project_id: Uuid,
    bot_credentials: HashMap<BotType, String>,
) -> Result<()> {
    let router = Arc::new(CommandRouter::new(pool.clone(), Arc::clone(&dispatcher), runs));
    let app = build_router(pool.clone(), router, webhook_secret, project_id);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;

    let health_pool = pool.clone();
    tokio::spawn(async move {
        let cancel = tokio_util::sync::CancellationToken::new();
        fleetwatch_chat::dispatch::run_health_checks(dispatcher, bot_credentials, cancel).await;
        let _ = health_pool;
    });

    let sweep_pool = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            match fleetwatch_db::queries::grouping_suggestions::expire_lapsed(&sweep_pool).await {
                Ok(n) if n > 0 => tracing::info!(expired = n, "swept lapsed grouping suggestions"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "grouping suggestion sweep failed"),
            }
        }
    });

    tracing::info!("fleetwatch serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("fleetwatch serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
}

async fn list_lists(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let lists = task_lists::list_all(&state.pool).await.map_err(AppError::internal)?;

    let mut results = Vec::with_capacity(lists.len());
    for list in lists {
        let latest_run = execution_runs::latest_run_for_list(&state.pool, list.id).await.map_err(AppError::internal)?;
        results.push(ListSummaryResponse { list, latest_run });
    }

    Ok(Json(results).into_response())
}

async fn get_list_detail(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<axum::response::Response, AppError> {
    let list = task_lists::get_list(&state.pool, id).await.map_err(AppError::internal)?;

    let latest_run = execution_runs::latest_run_for_list(&state.pool, id).await.map_err(AppError::internal)?;
    let waves = match &latest_run {
        Some(run) => wave_db::list_waves_for_execution(&state.pool, run.id).await.map_err(AppError::internal)?,
        None => Vec::new(),
    };
    let tasks = task_db::list_tasks_for_list(&state.pool, id).await.map_err(AppError::internal)?;

    Ok(Json(ListDetailResponse { list, latest_run, waves, tasks }).into_response())
}

async fn get_task_detail(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<axum::response::Response, AppError> {
    let task = task_db::get_task(&state.pool, id).await.map_err(AppError::internal)?;
    let impacts = file_impacts::list_impacts_for_task(&state.pool, id).await.map_err(AppError::internal)?;
    let recent_failures = failure_records::recent_for_task(&state.pool, id, 10).await.map_err(AppError::internal)?;

    Ok(Json(TaskDetailResponse { task, impacts, recent_failures }).into_response())
}

async fn list_agents(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let agents: Vec<AgentInstance> = agent_instances::list_active(&state.pool).await.map_err(AppError::internal)?;
    Ok(Json(agents).into_response())
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(bot_type): Path<String>,
    headers: HeaderMap,
    Json(update): Json<InboundUpdate>,
) -> Result<axum::response::Response, AppError> {
    let provided = headers.get("x-telegram-bot-api-secret-token").and_then(|v| v.to_str().ok());
    if provided != Some(state.webhook_secret.as_str()) {
        return Err(AppError { status: StatusCode::UNAUTHORIZED, message: "invalid webhook secret".to_string() });
    }

    let bot_type: BotType = bot_type.parse().map_err(|_| AppError::not_found(format!("unknown bot type: {bot_type}")))?;

    state
        .router
        .handle(update, bot_type, state.project_id)
        .await
        .map_err(AppError::internal)?;

    Ok(StatusCode::OK.into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use fleetwatch_db::models::{ListStatus, TaskCategory, TaskEffort};
    use fleetwatch_db::queries::{task_lists as list_db, tasks as task_insert};
    use fleetwatch_test_utils::{create_test_db, drop_test_db};

    use super::*;

    fn test_router(pool: PgPool) -> Router {
        let dispatcher = Arc::new(ChatDispatcher::new(pool.clone(), "https://api.telegram.org", HashMap::new()));
        let runs = Arc::new(RunRegistry::new());
        let router = Arc::new(CommandRouter::new(pool.clone(), dispatcher, runs));
        build_router(pool, router, "test-secret".to_string(), Uuid::new_v4())
    }

    async fn send(pool: PgPool, uri: &str) -> axum::response::Response {
        test_router(pool).oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_lists_empty() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(pool.clone(), "/api/lists").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!([]));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn list_detail_includes_tasks() {
        let (pool, db_name) = create_test_db().await;
        let project_id = Uuid::new_v4();

        let list = list_db::insert_list(&pool, "wave one", project_id, 2).await.unwrap();
        let task = task_insert::insert_task(&pool, "T-1", project_id, "title", "desc", TaskCategory::Task, TaskEffort::Medium, 0)
            .await
            .unwrap();
        task_insert::assign_to_list(&pool, task.id, list.id, 0).await.unwrap();
        list_db::transition_status(&pool, list.id, ListStatus::Draft, ListStatus::Ready).await.unwrap();

        let resp = send(pool.clone(), &format!("/api/lists/{}", list.id)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["tasks"].as_array().unwrap().len(), 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn list_detail_not_found() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(pool.clone(), &format!("/api/lists/{}", Uuid::new_v4())).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn agents_empty() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(pool.clone(), "/api/agents").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!([]));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn webhook_rejects_bad_secret() {
        let (pool, db_name) = create_test_db().await;

        let body = r#"{"message":{"chat":{"id":"1"},"text":"/queue","from":{"id":"1"}}}"#;
        let resp = test_router(pool.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/system")
                    .header("content-type", "application/json")
                    .header("x-telegram-bot-api-secret-token", "wrong")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use satchel_core::sync::{PullResponse, PushRequest, PushResponse};

use crate::error::AppError;
use crate::state::ServerStore;

#[derive(Clone)]
pub struct AppState {
    store: Arc<RwLock<ServerStore>>,
    /// Static bearer token; `None` disables auth (local development)
    auth_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            store: Arc::new(RwLock::new(ServerStore::default())),
            auth_token: auth_token.map(Into::into),
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/changes", get(pull_changes).post(push_changes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", sync_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    records: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let records = state.store.read().await.record_count();
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        records,
    })
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = &state.auth_token {
        let presented = request
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
        if presented != expected.as_ref() {
            return Err(AppError::unauthorized("invalid bearer token"));
        }
    }
    Ok(next.run(request).await)
}

async fn push_changes(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    if request.entries.is_empty() {
        return Err(AppError::bad_request("push batch must not be empty"));
    }

    let mut store = state.store.write().await;
    let outcomes = request
        .entries
        .iter()
        .map(|entry| store.apply_entry(entry))
        .collect();

    Ok(Json(PushResponse { outcomes }))
}

#[derive(Debug, Deserialize)]
struct PullQuery {
    since: Option<String>,
}

async fn pull_changes(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Json<PullResponse> {
    let since = ServerStore::parse_cursor(query.since.as_deref());
    let page = state.store.read().await.page_since(since);
    Json(page)
}

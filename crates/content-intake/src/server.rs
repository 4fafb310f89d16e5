//! HTTP API for the intake pipeline.
//!
//! Every endpoint except `/health` requires `Authorization: Bearer <token>`
//! resolving to the configured administrator.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ingest/crawl` | Crawl the search page, return annotated candidates |
//! | `POST` | `/ingest/workbook?kind=news\|case` | Read an uploaded `.xlsx` (multipart field `file`) |
//! | `POST` | `/staged/commit` | Save accepted candidates to staging |
//! | `GET`  | `/staged` | List staged rows with live flags |
//! | `DELETE` | `/staged` | Delete staged rows |
//! | `POST` | `/published/{target}/publish` | Publish staged rows |
//! | `POST` | `/published/{target}/direct` | Publish candidates without staging |
//! | `POST` | `/published/{target}/pin` | Pin or unpin rows |
//! | `POST` | `/published/{target}/bulk-update` | Overwrite author / image fields |
//! | `DELETE` | `/published/{target}` | Delete published rows |
//! | `GET`  | `/published/{target}` | Pinned-first listing |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "ids must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `not_found` (404), `upstream_unreachable` / `navigation_failed` /
//! `session_lost` (502), `timeout` (504), `internal` (500).
//!
//! Batch endpoints always answer 200 with a report; per-item failures are
//! listed in its `errors` array.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use content_intake_core::batch::BatchReport;
use content_intake_core::models::{CandidateItem, ContentKind, FieldPatch, PublishTarget};
use content_intake_core::publish::{PublicationCoordinator, PublishedListing};
use content_intake_core::staging::{StagedFilter, StagedView, StagingRepository};

use crate::auth::{bearer_token, IdentityProvider, StaticTokens};
use crate::config::Config;
use crate::crawl::{AcquireError, Crawler, HttpFetcher};
use crate::db;
use crate::ingest::{self, IngestError, IngestReport};
use crate::sqlite_store::SqliteStore;

/// Largest accepted request body (workbook uploads).
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<SqliteStore>,
    identity: Arc<dyn IdentityProvider>,
    crawler: Arc<Crawler<HttpFetcher>>,
}

impl AppState {
    pub fn new(config: Config, store: SqliteStore) -> anyhow::Result<Self> {
        let identity = Arc::new(StaticTokens::from_config(&config.auth));
        Self::with_identity(config, store, identity)
    }

    /// State with a custom identity provider.
    pub fn with_identity(
        config: Config,
        store: SqliteStore,
        identity: Arc<dyn IdentityProvider>,
    ) -> anyhow::Result<Self> {
        let crawler = Crawler::from_config(&config.crawl)?;
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            identity,
            crawler: Arc::new(crawler),
        })
    }
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let state = AppState::new(config.clone(), SqliteStore::new(pool))?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "intake server listening");
    println!("Intake server listening on http://{}", bind_addr);

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest/crawl", post(handle_ingest_crawl))
        .route("/ingest/workbook", post(handle_ingest_workbook))
        .route("/staged/commit", post(handle_commit))
        .route("/staged", get(handle_list_staged).delete(handle_delete_staged))
        .route("/published/{target}/publish", post(handle_publish))
        .route("/published/{target}/direct", post(handle_publish_direct))
        .route("/published/{target}/pin", post(handle_pin))
        .route("/published/{target}/bulk-update", post(handle_bulk_update))
        .route(
            "/published/{target}",
            get(handle_list_published).delete(handle_delete_published),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    app_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        format!("{:#}", err),
    )
}

impl From<AcquireError> for AppError {
    fn from(err: AcquireError) -> Self {
        let status = match err {
            AcquireError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        app_error(status, err.code(), err.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Acquire(e) => e.into(),
            IngestError::Workbook(e) => bad_request(e.to_string()),
            IngestError::Input(message) => bad_request(message),
            IngestError::Lookup(e) => internal(e.context("identity lookup failed")),
        }
    }
}

fn parse_target(raw: &str) -> Result<PublishTarget, AppError> {
    raw.parse()
        .map_err(|e: anyhow::Error| not_found(e.to_string()))
}

fn require_ids(ids: &[String]) -> Result<(), AppError> {
    if ids.is_empty() {
        return Err(bad_request("ids must not be empty"));
    }
    Ok(())
}

// ============ Admin guard ============

/// Extractor that admits only the configured administrator.
pub struct Admin {
    /// Actor id recorded on written rows.
    pub actor: String,
}

impl FromRequestParts<AppState> for Admin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| {
                app_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token")
            })?;
        let caller = state.identity.resolve(token).await.ok_or_else(|| {
            app_error(StatusCode::UNAUTHORIZED, "unauthorized", "unknown token")
        })?;
        if !caller.is_admin(&state.config.admin) {
            tracing::warn!(email = %caller.email, "non-admin caller rejected");
            return Err(app_error(
                StatusCode::FORBIDDEN,
                "forbidden",
                "administrator access required",
            ));
        }
        Ok(Admin {
            actor: state.config.admin.id.clone(),
        })
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest/* ============

async fn handle_ingest_crawl(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<Json<IngestReport>, AppError> {
    let report = ingest::crawl_candidates(state.store.as_ref(), state.crawler.as_ref()).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct KindQuery {
    kind: String,
}

/// Handler for `POST /ingest/workbook?kind=`.
///
/// Reads the multipart field `file`; other fields are ignored.
async fn handle_ingest_workbook(
    State(state): State<AppState>,
    _admin: Admin,
    Query(query): Query<KindQuery>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, AppError> {
    let kind: ContentKind = query
        .kind
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        upload = Some((file_name, bytes));
        break;
    }
    let (file_name, bytes) =
        upload.ok_or_else(|| bad_request("multipart field 'file' is required"))?;

    let report = ingest::workbook_candidates(state.store.as_ref(), kind, &file_name, &bytes).await?;
    Ok(Json(report))
}

// ============ /staged ============

#[derive(Deserialize)]
struct CommitRequest {
    kind: ContentKind,
    candidates: Vec<CandidateItem>,
    #[serde(default)]
    selected: Option<Vec<usize>>,
}

/// Handler for `POST /staged/commit`.
///
/// Client-side duplicate flags are ignored; each candidate is resolved
/// again before it is saved.
async fn handle_commit(
    State(state): State<AppState>,
    admin: Admin,
    Json(req): Json<CommitRequest>,
) -> Result<Json<BatchReport>, AppError> {
    if let Some(other) = req.candidates.iter().find(|c| c.kind != req.kind) {
        return Err(bad_request(format!(
            "candidate '{}' is {}, expected {}",
            other.label(),
            other.kind,
            req.kind
        )));
    }
    let picked = ingest::pick_selected(req.candidates, req.selected.as_deref())?;
    let report = StagingRepository::new(state.store.as_ref())
        .save_accepted(picked, &admin.actor)
        .await
        .map_err(internal)?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct StagedListResponse {
    success: bool,
    total: usize,
    items: Vec<StagedView>,
}

async fn handle_list_staged(
    State(state): State<AppState>,
    _admin: Admin,
    Query(filter): Query<StagedFilter>,
) -> Result<Json<StagedListResponse>, AppError> {
    let items = StagingRepository::new(state.store.as_ref())
        .list_staged(&filter)
        .await
        .map_err(internal)?;
    Ok(Json(StagedListResponse {
        success: true,
        total: items.len(),
        items,
    }))
}

#[derive(Deserialize)]
struct IdsRequest {
    ids: Vec<String>,
}

async fn handle_delete_staged(
    State(state): State<AppState>,
    _admin: Admin,
    Json(req): Json<IdsRequest>,
) -> Result<Json<BatchReport>, AppError> {
    require_ids(&req.ids)?;
    let report = StagingRepository::new(state.store.as_ref())
        .delete_staged(req.ids)
        .await;
    Ok(Json(report))
}

// ============ /published/{target} ============

async fn handle_publish(
    State(state): State<AppState>,
    admin: Admin,
    Path(target): Path<String>,
    Json(req): Json<IdsRequest>,
) -> Result<Json<BatchReport>, AppError> {
    let target = parse_target(&target)?;
    require_ids(&req.ids)?;
    let report = PublicationCoordinator::new(state.store.as_ref())
        .publish_staged(req.ids, target, &admin.actor)
        .await
        .map_err(internal)?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct DirectRequest {
    candidates: Vec<CandidateItem>,
}

async fn handle_publish_direct(
    State(state): State<AppState>,
    admin: Admin,
    Path(target): Path<String>,
    Json(req): Json<DirectRequest>,
) -> Result<Json<BatchReport>, AppError> {
    let target = parse_target(&target)?;
    if req.candidates.is_empty() {
        return Err(bad_request("candidates must not be empty"));
    }
    let report = PublicationCoordinator::new(state.store.as_ref())
        .publish_candidates(req.candidates, target, &admin.actor)
        .await
        .map_err(internal)?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct PinRequest {
    ids: Vec<String>,
    pinned: bool,
}

async fn handle_pin(
    State(state): State<AppState>,
    _admin: Admin,
    Path(target): Path<String>,
    Json(req): Json<PinRequest>,
) -> Result<Json<BatchReport>, AppError> {
    let target = parse_target(&target)?;
    require_ids(&req.ids)?;
    let report = PublicationCoordinator::new(state.store.as_ref())
        .set_pinned(target, req.ids, req.pinned)
        .await;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct BulkUpdateRequest {
    /// Omitted means every row of the target.
    #[serde(default)]
    ids: Option<Vec<String>>,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

async fn handle_bulk_update(
    State(state): State<AppState>,
    _admin: Admin,
    Path(target): Path<String>,
    Json(req): Json<BulkUpdateRequest>,
) -> Result<Json<BatchReport>, AppError> {
    let target = parse_target(&target)?;
    let patch = FieldPatch {
        author_name: req.author_name,
        image_url: req.image_url,
    };
    if patch.is_empty() {
        return Err(bad_request(
            "at least one of author_name or image_url must be provided",
        ));
    }
    let report = PublicationCoordinator::new(state.store.as_ref())
        .bulk_update(target, req.ids, patch)
        .await
        .map_err(internal)?;
    Ok(Json(report))
}

async fn handle_delete_published(
    State(state): State<AppState>,
    _admin: Admin,
    Path(target): Path<String>,
    Json(req): Json<IdsRequest>,
) -> Result<Json<BatchReport>, AppError> {
    let target = parse_target(&target)?;
    require_ids(&req.ids)?;
    let report = PublicationCoordinator::new(state.store.as_ref())
        .delete_published(target, req.ids)
        .await;
    Ok(Json(report))
}

async fn handle_list_published(
    State(state): State<AppState>,
    _admin: Admin,
    Path(target): Path<String>,
) -> Result<Json<PublishedListing>, AppError> {
    let target = parse_target(&target)?;
    let listing = PublicationCoordinator::new(state.store.as_ref())
        .list_published(target, state.config.feed.max_pinned)
        .await
        .map_err(internal)?;
    Ok(Json(listing))
}

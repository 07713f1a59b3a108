//! Router, shared state and handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::{BytesRejection, JsonRejection},
        State,
    },
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use riskdiag_core::{
    crm::Lead,
    webhook::SECRET_HEADER,
    AppConfig, AssetDelivery, ChatRegistry, CrmError, IdentityVerifier, LeadSink,
    MessagingPlatform, Resolution, ScenarioAssetCatalog, SubmissionResolver, SubmitForm,
    ValidationError, WebhookDispatcher,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;

#[derive(Clone)]
pub struct AppState {
    crm: Arc<dyn LeadSink>,
    resolver: Arc<SubmissionResolver>,
    delivery: Arc<AssetDelivery>,
    dispatcher: Arc<WebhookDispatcher>,
    webapp_dir: PathBuf,
    pdf_path: PathBuf,
}

impl AppState {
    /// Wires the pipeline. `registry` is shared by the dispatcher (writes) and the
    /// resolver (reads).
    pub fn assemble(
        cfg: &AppConfig,
        crm: Arc<dyn LeadSink>,
        platform: Arc<dyn MessagingPlatform>,
        catalog: ScenarioAssetCatalog,
        registry: ChatRegistry,
    ) -> Self {
        let verifier =
            IdentityVerifier::new(cfg.bot_token.clone()).with_max_auth_age(cfg.auth_max_age_secs);
        let resolver = SubmissionResolver::new(
            verifier,
            registry.clone(),
            platform.clone(),
            cfg.telegram_timeout(),
        );

        let mut delivery =
            AssetDelivery::new(Arc::new(catalog), platform.clone(), cfg.telegram_timeout());
        if let Some(caption) = cfg.delivery_caption.as_deref().filter(|c| !c.trim().is_empty()) {
            delivery = delivery.with_caption(caption);
        }

        let dispatcher =
            WebhookDispatcher::new(registry, platform, cfg.web_app_url(), cfg.telegram_timeout())
                .with_secret(cfg.webhook_secret.clone());

        Self {
            crm,
            resolver: Arc::new(resolver),
            delivery: Arc::new(delivery),
            dispatcher: Arc::new(dispatcher),
            webapp_dir: PathBuf::from(&cfg.webapp_dir),
            pdf_path: PathBuf::from(&cfg.pdf_path),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let webapp_dir = state.webapp_dir.clone();

    Router::new()
        .route("/health", get(health))
        .route("/submit", post(submit_handler))
        .route("/webhook", post(webhook_handler))
        .route("/download", get(download_handler))
        .route_service("/", ServeFile::new(webapp_dir.join("index.html")))
        .route_service("/style.css", ServeFile::new(webapp_dir.join("style.css")))
        .route_service("/script.js", ServeFile::new(webapp_dir.join("script.js")))
        .with_state(state)
        .layer(axum::middleware::from_fn(log_requests))
        .layer(cors)
}

async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

async fn health() -> &'static str {
    "OK"
}

/// Error body: `{"status": "error", "message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Validation(ValidationError),
    Crm(CrmError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Crm(e) if !e.is_upstream() => (
                StatusCode::BAD_REQUEST,
                "Не удалось создать лид. Проверьте данные.".to_string(),
            ),
            ApiError::Crm(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Ошибка соединения с CRM.".to_string(),
            ),
        };
        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

/// POST /submit: validate, create the CRM lead, then resolve the chat and deliver assets.
async fn submit_handler(
    State(state): State<AppState>,
    body: Result<Json<SubmitForm>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(form) = body.map_err(|e| {
        tracing::debug!(error = %e, "unreadable submit body");
        ApiError::BadRequest("Некорректный запрос.".to_string())
    })?;
    let request = form.validate().map_err(ApiError::Validation)?;

    let catalog = state.delivery.catalog();
    if !catalog.contains(&request.scenario_id) {
        tracing::info!(scenario = %request.scenario_id, "unknown scenario, default bundle applies");
    }
    let title = catalog.title_for(&request.scenario_id).to_string();
    let lead = Lead::new(&request, &title);

    // Own task: the lead is created even if the submitter disconnects mid-request.
    let crm = state.crm.clone();
    let lead_id = tokio::spawn(async move { crm.create_lead(&lead).await })
        .await
        .map_err(|e| ApiError::Crm(CrmError::Transport(e.to_string())))?
        .map_err(|e| {
            tracing::warn!(error = %e, scenario = %title, "lead not created");
            ApiError::Crm(e)
        })?;

    match state.resolver.resolve(&request).await {
        Resolution::Resolved { chat_id, via } => {
            tracing::info!(chat_id, ?via, scenario = %request.scenario_id, "delivering scenario assets");
            state.delivery.deliver(chat_id, &request.scenario_id).await;
        }
        Resolution::Unresolved => {
            tracing::info!(scenario = %request.scenario_id, "no chat for submitter, skipping delivery");
        }
    }

    Ok(Json(json!({
        "status": "ok",
        "lead_id": lead_id,
        "pdf_url": "/download",
    })))
}

/// POST /webhook: always acknowledged so the platform does not redeliver.
async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Json<serde_json::Value> {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "webhook body rejected");
            return Json(json!({ "ok": true }));
        }
    };
    let secret = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    let report = state.dispatcher.dispatch(secret, &body).await;
    tracing::debug!(
        stage = ?report.stage,
        update_id = ?report.update_id,
        route = ?report.route,
        rejected = report.rejected,
        "webhook handled"
    );
    Json(json!({ "ok": true }))
}

/// GET /download: the general checklist as an attachment.
async fn download_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read(&state.pdf_path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/pdf"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"checklist.pdf\""),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(path = %state.pdf_path.display(), error = %e, "checklist unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

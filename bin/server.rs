// Marie Reconciliation - Web Server
// REST API with Axum over the shared Ledger

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post, put},
    Router,
};
use chrono::Utc;
use marie_reconcile::{
    export_file_name, init_tracing, reports, session_to_csv, AnnotationField, CancelToken, Config,
    DashboardTotals, ExtractionGate, ExtractionOutcome, GeminiExtractor, Ledger, ReconcileSession,
    SqliteStorage, StatementDocument, StatementExtractor, TransactionFilter, WorkspaceView,
    NO_CREDITS_MESSAGE,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
struct AppState {
    ledger: Arc<Mutex<Ledger>>,
    extractor: Arc<dyn StatementExtractor>,
    gate: ExtractionGate,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

fn fail(status: StatusCode, message: impl Into<String>) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        message: None,
        error: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

fn lock_ledger(state: &AppState) -> Result<MutexGuard<'_, Ledger>, Response> {
    state.ledger.lock().map_err(|_| {
        error!("ledger lock poisoned");
        fail(StatusCode::INTERNAL_SERVER_ERROR, "Estado da aplicação indisponível")
    })
}

fn storage_failure(err: anyhow::Error) -> Response {
    error!(error = %format!("{:#}", err), "persistence failed");
    fail(StatusCode::INTERNAL_SERVER_ERROR, "Não foi possível salvar os dados")
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Deserialize)]
struct CategoryRequest {
    name: String,
}

#[derive(Deserialize)]
struct RenameRequest {
    new_name: String,
}

#[derive(Deserialize)]
struct ExtractRequest {
    /// Data URI or bare base64 of the statement image/PDF
    data: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct FieldRequest {
    field: AnnotationField,
    value: String,
}

#[derive(Deserialize, Default)]
struct FilterQuery {
    date: Option<String>,
    payer: Option<String>,
    min_amount: Option<String>,
}

impl From<FilterQuery> for TransactionFilter {
    fn from(query: FilterQuery) -> Self {
        TransactionFilter {
            date_contains: query.date.unwrap_or_default(),
            payer_contains: query.payer.unwrap_or_default(),
            min_amount: query.min_amount,
        }
    }
}

#[derive(Deserialize, Default)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Serialize)]
struct WorkspaceResponse {
    #[serde(flatten)]
    view: WorkspaceView,
    extracting: bool,
}

#[derive(Serialize)]
struct DashboardResponse {
    totals: DashboardTotals,
    recent_sessions: Vec<ReconcileSession>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/categories - Registry in display order
async fn list_categories(State(state): State<AppState>) -> Response {
    match lock_ledger(&state) {
        Ok(ledger) => ok(ledger.categories().names().to_vec()),
        Err(resp) => resp,
    }
}

/// POST /api/categories - Add a category (no-op if present)
async fn add_category(State(state): State<AppState>, Json(req): Json<CategoryRequest>) -> Response {
    let mut ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    match ledger.add_category(&req.name) {
        Ok(_) => ok(ledger.categories().names().to_vec()),
        Err(e) => storage_failure(e),
    }
}

/// PUT /api/categories/:name - Rename, cascading into saved sessions
async fn rename_category(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Response {
    let mut ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    match ledger.rename_category(&name, &req.new_name) {
        Ok(_) => ok(ledger.categories().names().to_vec()),
        Err(e) => storage_failure(e),
    }
}

/// DELETE /api/categories/:name - Remove from the registry only
async fn remove_category(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let mut ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    match ledger.remove_category(&name) {
        Ok(_) => ok(ledger.categories().names().to_vec()),
        Err(e) => storage_failure(e),
    }
}

/// POST /api/extract - Run the extractor and load the workspace
async fn extract_statement(State(state): State<AppState>, Json(req): Json<ExtractRequest>) -> Response {
    let _permit = match state.gate.try_acquire() {
        Ok(permit) => permit,
        Err(e) => return fail(StatusCode::CONFLICT, e.user_message()),
    };

    let document = match StatementDocument::from_data_uri(&req.data) {
        Ok(doc) => doc.with_text(req.text.as_deref().unwrap_or("")),
        Err(e) => {
            warn!(error = %e, "rejected uploaded document");
            return fail(StatusCode::BAD_REQUEST, e.user_message());
        }
    };

    // The ledger is not locked while the remote call is in flight
    let result = state.extractor.extract(&document, &CancelToken::new()).await;

    let batch = match result {
        Ok(batch) => batch,
        Err(e) => {
            error!(error = %e, "statement extraction failed");
            return fail(StatusCode::BAD_GATEWAY, e.user_message());
        }
    };

    let mut ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    let outcome = ledger.accept_extraction(batch);
    let message = match outcome {
        ExtractionOutcome::Loaded { count } => {
            format!("{} novos créditos identificados! Prontos para conciliar.", count)
        }
        ExtractionOutcome::NoCredits => NO_CREDITS_MESSAGE.to_string(),
    };

    (StatusCode::OK, Json(ApiResponse::ok(outcome).with_message(message))).into_response()
}

/// GET /api/workspace - Current batch with annotations and progress
async fn get_workspace(State(state): State<AppState>) -> Response {
    let extracting = state.gate.is_busy();
    match lock_ledger(&state) {
        Ok(ledger) => ok(WorkspaceResponse {
            view: ledger.workspace_view(&TransactionFilter::default()),
            extracting,
        }),
        Err(resp) => resp,
    }
}

/// GET /api/workspace/filter - Filtered view of the batch
async fn filter_workspace(State(state): State<AppState>, Query(query): Query<FilterQuery>) -> Response {
    let filter: TransactionFilter = query.into();
    match lock_ledger(&state) {
        Ok(ledger) => ok(ledger.workspace_view(&filter)),
        Err(resp) => resp,
    }
}

/// PATCH /api/workspace/:id - Set one annotation field
async fn set_field(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FieldRequest>,
) -> Response {
    let mut ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    if ledger.set_field(&id, req.field, &req.value) {
        ok(ledger.workspace().annotation(&id))
    } else {
        fail(StatusCode::NOT_FOUND, format!("Transação {} não está no lote atual", id))
    }
}

/// POST /api/workspace/:id/category - Create a category and select it
async fn add_category_for(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CategoryRequest>,
) -> Response {
    let mut ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    match ledger.add_category_for(&id, &req.name) {
        Ok(true) => ok(ledger.workspace().annotation(&id)),
        Ok(false) => fail(StatusCode::BAD_REQUEST, "Categoria vazia ou transação desconhecida"),
        Err(e) => storage_failure(e),
    }
}

/// POST /api/workspace/finalize - Save the batch as a session
async fn finalize_workspace(State(state): State<AppState>) -> Response {
    let mut ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    match ledger.finalize(Utc::now()) {
        Ok(Some(session)) => {
            let message = format!("Conciliação de {} itens salva com sucesso!", session.transaction_count());
            (StatusCode::OK, Json(ApiResponse::ok(session).with_message(message))).into_response()
        }
        Ok(None) => fail(StatusCode::BAD_REQUEST, "Nenhuma transação para conciliar"),
        Err(e) => storage_failure(e),
    }
}

/// DELETE /api/workspace - Discard the batch
async fn discard_workspace(State(state): State<AppState>) -> Response {
    match lock_ledger(&state) {
        Ok(mut ledger) => {
            ledger.discard_workspace();
            ok(true)
        }
        Err(resp) => resp,
    }
}

/// GET /api/sessions?q= - History, optionally searched
async fn list_sessions(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    let ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    match query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => ok(reports::search_sessions(ledger.sessions(), q)),
        None => ok(ledger.sessions().to_vec()),
    }
}

/// GET /api/sessions/:id/export - CSV download
async fn export_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let ledger = match lock_ledger(&state) {
        Ok(ledger) => ledger,
        Err(resp) => return resp,
    };

    let Some(session) = ledger.session(&id) else {
        return fail(StatusCode::NOT_FOUND, format!("Lote {} não encontrado", id));
    };

    match session_to_csv(session) {
        Ok(bytes) => {
            let file_name = export_file_name(session);
            let disposition = format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                file_name,
                urlencoding::encode(&file_name)
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            error!(session = %id, error = %e, "CSV export failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Falha ao gerar o CSV")
        }
    }
}

/// GET /api/reports/dashboard - Totals and the five newest sessions
async fn get_dashboard(State(state): State<AppState>) -> Response {
    match lock_ledger(&state) {
        Ok(ledger) => {
            let sessions = ledger.sessions();
            ok(DashboardResponse {
                totals: reports::dashboard_totals(sessions),
                recent_sessions: reports::recent_sessions(sessions, 5).to_vec(),
            })
        }
        Err(resp) => resp,
    }
}

/// GET /api/reports - Monthly, daily and category series
async fn get_reports(State(state): State<AppState>) -> Response {
    match lock_ledger(&state) {
        Ok(ledger) => ok(reports::report_summary(ledger.sessions())),
        Err(resp) => resp,
    }
}

// ============================================================================
// Main Server
// ============================================================================

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/categories", get(list_categories).post(add_category))
        .route("/categories/:name", put(rename_category).delete(remove_category))
        .route("/extract", post(extract_statement))
        .route("/workspace", get(get_workspace).delete(discard_workspace))
        .route("/workspace/filter", get(filter_workspace))
        .route("/workspace/finalize", post(finalize_workspace))
        .route("/workspace/:id", patch(set_field))
        .route("/workspace/:id/category", post(add_category_for))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id/export", get(export_session))
        .route("/reports", get(get_reports))
        .route("/reports/dashboard", get(get_dashboard))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env();

    println!("🌐 Marie Reconciliation - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let storage = SqliteStorage::open(&config.db_path)?;
    info!(path = %config.db_path.display(), "database opened");

    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set; statement extraction will fail until it is configured");
    }

    let state = AppState {
        ledger: Arc::new(Mutex::new(Ledger::open(Arc::new(storage)))),
        extractor: Arc::new(GeminiExtractor::new(config.gemini_api_key.clone(), &config.gemini_model)),
        gate: ExtractionGate::new(),
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;

    println!("\n🚀 Server running on http://{}", config.bind_address);
    println!("   API: http://{}/api/sessions", config.bind_address);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use marie_reconcile::{ExtractionError, MemoryStorage, Transaction};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    /// Returns a fixed batch, optionally after a delay
    struct ScriptedExtractor {
        batch: Vec<Transaction>,
        delay: Duration,
    }

    #[async_trait]
    impl StatementExtractor for ScriptedExtractor {
        async fn extract(
            &self,
            _document: &StatementDocument,
            _cancel: &CancelToken,
        ) -> Result<Vec<Transaction>, ExtractionError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.batch.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl StatementExtractor for FailingExtractor {
        async fn extract(
            &self,
            _document: &StatementDocument,
            _cancel: &CancelToken,
        ) -> Result<Vec<Transaction>, ExtractionError> {
            Err(ExtractionError::Api {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    fn state_with(extractor: Arc<dyn StatementExtractor>) -> AppState {
        AppState {
            ledger: Arc::new(Mutex::new(Ledger::open(Arc::new(MemoryStorage::new())))),
            extractor,
            gate: ExtractionGate::new(),
        }
    }

    fn pix_state() -> AppState {
        state_with(Arc::new(ScriptedExtractor {
            batch: vec![Transaction::credit("10/05", "PIX RECEBIDO", 150.0)
                .with_id("t1")
                .with_document("123")],
            delay: Duration::ZERO,
        }))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    const PNG_DATA_URI: &str = "data:image/png;base64,aGVsbG8=";

    #[tokio::test]
    async fn test_health() {
        let app = build_router(pix_state());

        let (status, body) = send(&app, "GET", "/api/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
    }

    #[tokio::test]
    async fn test_full_reconciliation_flow() {
        let app = build_router(pix_state());

        let (status, body) = send(&app, "POST", "/api/extract", Some(json!({ "data": PNG_DATA_URI }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "loaded");
        assert_eq!(body["data"]["count"], 1);

        let (status, _) = send(
            &app,
            "PATCH",
            "/api/workspace/t1",
            Some(json!({ "field": "payerName", "value": "Ana Silva" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        send(
            &app,
            "PATCH",
            "/api/workspace/t1",
            Some(json!({ "field": "category", "value": "Consulta" })),
        )
        .await;

        let (_, workspace) = send(&app, "GET", "/api/workspace", None).await;
        assert_eq!(workspace["data"]["completion_percent"], 100);

        let (status, saved) = send(&app, "POST", "/api/workspace/finalize", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["data"]["totalAmount"], 150.0);

        let (_, sessions) = send(&app, "GET", "/api/sessions", None).await;
        let sessions = sessions["data"].as_array().unwrap().clone();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["transactions"][0]["payerName"], "Ana Silva");
        assert_eq!(sessions[0]["transactions"][0]["patientName"], "");

        let (_, dashboard) = send(&app, "GET", "/api/reports/dashboard", None).await;
        assert_eq!(dashboard["data"]["totals"]["total_amount"], 150.0);
        assert_eq!(dashboard["data"]["totals"]["transaction_count"], 1);
    }

    #[tokio::test]
    async fn test_no_credits_is_not_an_error() {
        let app = build_router(state_with(Arc::new(ScriptedExtractor {
            batch: Vec::new(),
            delay: Duration::ZERO,
        })));

        let (status, body) = send(&app, "POST", "/api/extract", Some(json!({ "data": PNG_DATA_URI }))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "no_credits");
        assert_eq!(body["message"], NO_CREDITS_MESSAGE);
    }

    #[tokio::test]
    async fn test_extraction_failure_maps_to_user_message() {
        let app = build_router(state_with(Arc::new(FailingExtractor)));

        let (status, body) = send(&app, "POST", "/api/extract", Some(json!({ "data": PNG_DATA_URI }))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Ocorreu um erro ao processar o arquivo com a IA. Tente novamente.");
    }

    #[tokio::test]
    async fn test_bad_payload_is_rejected() {
        let app = build_router(pix_state());

        let (status, body) = send(&app, "POST", "/api/extract", Some(json!({ "data": "data:image/png;base64,%%%" }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Falha ao ler o arquivo.");
    }

    #[tokio::test]
    async fn test_concurrent_extraction_is_refused() {
        let state = state_with(Arc::new(ScriptedExtractor {
            batch: vec![Transaction::credit("01/01", "PIX", 1.0)],
            delay: Duration::from_millis(300),
        }));
        let app = build_router(state.clone());

        let first = {
            let app = app.clone();
            tokio::spawn(async move { send(&app, "POST", "/api/extract", Some(json!({ "data": PNG_DATA_URI }))).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.gate.is_busy());

        let (status, _) = send(&app, "POST", "/api/extract", Some(json!({ "data": PNG_DATA_URI }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(!state.gate.is_busy());
    }

    #[tokio::test]
    async fn test_category_rename_cascades_over_http() {
        let app = build_router(pix_state());
        send(&app, "POST", "/api/extract", Some(json!({ "data": PNG_DATA_URI }))).await;
        send(&app, "PATCH", "/api/workspace/t1", Some(json!({ "field": "category", "value": "Consulta" }))).await;
        send(&app, "POST", "/api/workspace/finalize", None).await;

        let (status, categories) = send(
            &app,
            "PUT",
            "/api/categories/Consulta",
            Some(json!({ "new_name": "Atendimento" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(categories["data"][0], "Atendimento");

        let (_, reports) = send(&app, "GET", "/api/reports", None).await;
        assert_eq!(reports["data"]["top_category"]["category"], "Atendimento");
    }

    #[tokio::test]
    async fn test_search_and_export() {
        let app = build_router(pix_state());
        send(&app, "POST", "/api/extract", Some(json!({ "data": PNG_DATA_URI }))).await;
        send(&app, "PATCH", "/api/workspace/t1", Some(json!({ "field": "payerName", "value": "Ana Silva" }))).await;
        let (_, saved) = send(&app, "POST", "/api/workspace/finalize", None).await;
        let id = saved["data"]["id"].as_str().unwrap().to_string();

        let (_, hits) = send(&app, "GET", "/api/sessions?q=ana", None).await;
        assert_eq!(hits["data"][0]["matchingCount"], 1);
        let (_, none) = send(&app, "GET", "/api/sessions?q=zzz", None).await;
        assert_eq!(none["data"].as_array().unwrap().len(), 0);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{}/export", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains("conciliacao_marie_"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with("\u{feff}Data Banco".as_bytes()));
    }

    #[tokio::test]
    async fn test_filter_endpoint() {
        let app = build_router(pix_state());
        send(&app, "POST", "/api/extract", Some(json!({ "data": PNG_DATA_URI }))).await;

        let (_, hit) = send(&app, "GET", "/api/workspace/filter?date=10&min_amount=100", None).await;
        assert_eq!(hit["data"]["transactions"].as_array().unwrap().len(), 1);

        let (_, miss) = send(&app, "GET", "/api/workspace/filter?min_amount=200", None).await;
        assert_eq!(miss["data"]["transactions"].as_array().unwrap().len(), 0);
        assert_eq!(miss["data"]["total_count"], 1);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_404() {
        let app = build_router(pix_state());

        let (status, _) = send(
            &app,
            "PATCH",
            "/api/workspace/missing",
            Some(json!({ "field": "phone", "value": "123" })),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

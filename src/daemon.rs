use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Json, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use bytes::Bytes;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::analytics::calculate_plan_analytics;
use crate::config::Config;
use crate::db::Database;
use crate::error::{PlanoraError, Result};
use crate::interfaces::providers::LlmProvider;
use crate::planning::{generate_structured_plan, NewStudyPlan, PlanDay, PlanStore, StudyPlan};
use crate::providers::openai::OpenAiProvider;
use crate::rag::RagService;
use crate::services::{adaptive, ai_adaptive, feedback};
use crate::users::{User, UserStore};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub users: Arc<UserStore>,
    pub plans: Arc<PlanStore>,
    pub rag: Arc<RagService>,
    pub llm: Arc<dyn LlmProvider>,
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(db: Database, llm: Arc<dyn LlmProvider>, config: &Config) -> Self {
        Self {
            users: Arc::new(UserStore::new(db.clone())),
            plans: Arc::new(PlanStore::new(db.clone())),
            rag: Arc::new(RagService::new(llm.clone(), config.rag())),
            llm,
            db,
            cors_origins: config.cors_origins(),
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct DbTestResponse {
    db_status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct SignupRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    access_token: String,
    token_type: String,
}

#[derive(Serialize)]
struct MeResponse {
    id: i32,
    name: String,
    email: String,
}

#[derive(Deserialize)]
struct CreatePlanRequest {
    exam_name: String,
    subject: String,
    exam_date: NaiveDate,
    study_hours_per_day: i32,
    level: String,
    #[serde(default)]
    topics: Vec<String>,
}

/// List view of a plan; the day-by-day content is only served by the detail route.
#[derive(Serialize)]
struct PlanSummary {
    id: i32,
    exam_name: String,
    subject: String,
    exam_date: NaiveDate,
    study_hours_per_day: i32,
    level: String,
    status: String,
}

impl From<&StudyPlan> for PlanSummary {
    fn from(plan: &StudyPlan) -> Self {
        Self {
            id: plan.id,
            exam_name: plan.exam_name.clone(),
            subject: plan.subject.clone(),
            exam_date: plan.exam_date,
            study_hours_per_day: plan.study_hours_per_day,
            level: plan.level.clone(),
            status: plan.status.clone(),
        }
    }
}

#[derive(Serialize)]
struct PlanDetail {
    id: i32,
    exam_name: String,
    subject: String,
    exam_date: NaiveDate,
    study_hours_per_day: i32,
    level: String,
    topics: Vec<String>,
    status: String,
    plan_content: Vec<PlanDay>,
}

impl From<StudyPlan> for PlanDetail {
    fn from(plan: StudyPlan) -> Self {
        Self {
            id: plan.id,
            exam_name: plan.exam_name,
            subject: plan.subject,
            exam_date: plan.exam_date,
            study_hours_per_day: plan.study_hours_per_day,
            level: plan.level,
            topics: plan.topics,
            status: plan.status,
            plan_content: plan.plan_content,
        }
    }
}

#[derive(Deserialize)]
struct ProgressUpdateRequest {
    completed: bool,
    completion_percentage: i32,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/db-test", get(db_test))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/plans", post(create_plan).get(list_plans))
        .route("/plans/{id}", get(get_plan).delete(delete_plan))
        .route("/plans/{id}/progress", get(list_progress))
        .route("/plans/progress/{progress_id}", patch(update_progress))
        .route("/plans/{id}/analytics", get(plan_analytics))
        .route("/plans/{id}/adapt", post(adapt_plan))
        .route("/plans/{id}/ai-feedback", post(ai_feedback))
        .route("/plans/{id}/ai-adapt", post(ai_adapt_plan))
        .route("/rag/upload", post(rag_upload))
        .route("/rag/ask", post(rag_ask))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors_layer(&state.cors_origins))
        .with_state(state)
}

/// Credentialed CORS for the configured origins; methods and headers mirror the preflight.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Welcome to Planora Backend".to_string(),
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

async fn db_test(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(DbTestResponse {
                db_status: "connected".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn signup(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SignupRequest>, JsonRejection>,
) -> impl IntoResponse {
    let payload = match json_body(payload) {
        Ok(payload) => payload,
        Err(err) => return error_response(err),
    };
    match state
        .users
        .signup(&payload.name, &payload.email, &payload.password)
        .await
    {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> impl IntoResponse {
    let payload = match json_body(payload) {
        Ok(payload) => payload,
        Err(err) => return error_response(err),
    };
    match state.users.login(&payload.email, &payload.password).await {
        Ok(access_token) => (
            StatusCode::OK,
            Json(LoginResponse {
                access_token,
                token_type: "bearer".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(err) = authorize(&state, &headers).await {
        return err.into_response();
    }
    let token = request_token(&headers).unwrap_or_default();
    match state.users.logout(token).await {
        Ok(_) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Logged out".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    match authorize(&state, &headers).await {
        Ok(user) => (
            StatusCode::OK,
            Json(MeResponse {
                id: user.id,
                name: user.name,
                email: user.email,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<CreatePlanRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let plan = match json_body(payload).and_then(validate_new_plan) {
        Ok(plan) => plan,
        Err(err) => return error_response(err),
    };
    let content = generate_structured_plan(today(), plan.exam_date, &plan.topics, &plan.level);

    match state.plans.create_plan(user.id, &plan, &content).await {
        Ok(created) => (StatusCode::OK, Json(PlanSummary::from(&created))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_plans(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    match state.plans.list_plans(user.id).await {
        Ok(plans) => {
            let summaries: Vec<PlanSummary> = plans.iter().map(PlanSummary::from).collect();
            (StatusCode::OK, Json(summaries)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn get_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    match state.plans.get_owned_plan(id, user.id).await {
        Ok(plan) => (StatusCode::OK, Json(PlanDetail::from(plan))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let result = async {
        let plan = state.plans.get_owned_plan(id, user.id).await?;
        state.plans.delete_plan(plan.id).await
    }
    .await;
    match result {
        Ok(_) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Plan deleted".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let result = async {
        let plan = state.plans.get_owned_plan(id, user.id).await?;
        state.plans.list_progress(plan.id).await
    }
    .await;
    match result {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(progress_id): Path<i32>,
    payload: std::result::Result<Json<ProgressUpdateRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    let payload = match json_body(payload) {
        Ok(payload) => payload,
        Err(err) => return error_response(err),
    };

    let result = async {
        let entry = state
            .plans
            .get_progress(progress_id)
            .await?
            .ok_or_else(|| PlanoraError::NotFound("Progress entry not found".to_string()))?;
        let owned = state
            .plans
            .get_plan(entry.study_plan_id)
            .await?
            .is_some_and(|plan| plan.user_id == user.id);
        if !owned {
            return Err(PlanoraError::Forbidden("Not authorized".to_string()));
        }
        state
            .plans
            .update_progress(
                progress_id,
                payload.completed,
                payload.completion_percentage,
                payload.notes.as_deref(),
            )
            .await
    }
    .await;
    match result {
        Ok(entry) => (StatusCode::OK, Json(entry)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn plan_analytics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let result = async {
        let plan = state.plans.get_owned_plan(id, user.id).await?;
        let progress = state.plans.list_progress(plan.id).await?;
        calculate_plan_analytics(&progress, today())
            .ok_or_else(|| PlanoraError::NotFound("No progress data found".to_string()))
    }
    .await;
    match result {
        Ok(analytics) => (StatusCode::OK, Json(analytics)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn adapt_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let result = async {
        let plan = state.plans.get_owned_plan(id, user.id).await?;
        adaptive::adapt_study_plan(&state.plans, plan.id, today())
            .await?
            .ok_or_else(|| PlanoraError::Validation("Adaptation failed".to_string()))
    }
    .await;
    match result {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn ai_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let result = async {
        let plan = state.plans.get_owned_plan(id, user.id).await?;
        feedback::generate_ai_feedback(&state.plans, state.llm.as_ref(), &plan, today()).await
    }
    .await;
    match result {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn ai_adapt_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let result = async {
        let plan = state.plans.get_owned_plan(id, user.id).await?;
        ai_adaptive::adapt_study_plan_with_ai(&state.plans, state.llm.as_ref(), &plan, today())
            .await
    }
    .await;
    match result {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn rag_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(err) = authorize(&state, &headers).await {
        return err.into_response();
    }
    if body.is_empty() {
        return error_response(PlanoraError::Validation(
            "Request body must contain a PDF document".to_string(),
        ));
    }

    match state.rag.process_pdf(body).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn rag_ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<AskRequest>, JsonRejection>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&state, &headers).await {
        return err.into_response();
    }
    let payload = match json_body(payload) {
        Ok(payload) => payload,
        Err(err) => return error_response(err),
    };

    match state.rag.answer_question(&payload.question).await {
        Ok(answer) => (StatusCode::OK, Json(AskResponse { answer })).into_response(),
        Err(err) => error_response(err),
    }
}

/// Unwraps a JSON body, turning axum's rejection into a 400 with the usual error body.
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| PlanoraError::Validation(rejection.body_text()))
}

fn validate_new_plan(payload: CreatePlanRequest) -> Result<NewStudyPlan> {
    let exam_name = payload.exam_name.trim().to_string();
    let subject = payload.subject.trim().to_string();
    if exam_name.is_empty() || subject.is_empty() {
        return Err(PlanoraError::Validation(
            "Exam name and subject are required".to_string(),
        ));
    }
    if payload.study_hours_per_day < 1 {
        return Err(PlanoraError::Validation(
            "Study hours per day must be at least 1".to_string(),
        ));
    }
    let topics: Vec<String> = payload
        .topics
        .iter()
        .map(|topic| topic.trim())
        .filter(|topic| !topic.is_empty())
        .map(str::to_string)
        .collect();
    if topics.is_empty() {
        return Err(PlanoraError::Validation(
            "At least one topic is required".to_string(),
        ));
    }
    Ok(NewStudyPlan {
        exam_name,
        subject,
        exam_date: payload.exam_date,
        study_hours_per_day: payload.study_hours_per_day,
        level: payload.level.trim().to_string(),
        topics,
    })
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn status_for(err: &PlanoraError) -> StatusCode {
    match err {
        PlanoraError::NotFound(_) => StatusCode::NOT_FOUND,
        PlanoraError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        PlanoraError::Forbidden(_) => StatusCode::FORBIDDEN,
        PlanoraError::Validation(_) => StatusCode::BAD_REQUEST,
        PlanoraError::Http(_) => StatusCode::BAD_GATEWAY,
        PlanoraError::Config(_) | PlanoraError::Serialization(_) | PlanoraError::Runtime(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: PlanoraError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(%status, "Request failed: {}", err);
    } else {
        tracing::debug!(%status, "Request rejected: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn request_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    bearer.or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|token| !token.is_empty())
    })
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
) -> std::result::Result<User, (StatusCode, Json<ErrorResponse>)> {
    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Could not validate credentials".to_string(),
            }),
        )
    };

    let token = request_token(headers).ok_or_else(unauthorized)?;
    match state.users.user_for_token(token).await {
        Ok(user) => Ok(user),
        Err(PlanoraError::Unauthorized(_)) => Err(unauthorized()),
        Err(err) => {
            tracing::error!("Session lookup failed: {}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            ))
        }
    }
}

pub async fn run(host: &str, port: u16, config: Config) -> Result<()> {
    run_with_shutdown(host, port, config, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(host: &str, port: u16, config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sqlite_path = config
        .sqlite_path
        .clone()
        .unwrap_or_else(|| crate::runtime_paths::default_db_path());
    let db = Database::open(&sqlite_path).await?;

    let provider = match OpenAiProvider::from_config(&config) {
        Ok(provider) => provider,
        Err(err) => {
            tracing::warn!("{}; model-backed routes will fail until a key is configured", err);
            let openai = config.openai.clone().unwrap_or_default();
            OpenAiProvider::new(String::new(), openai.model, openai.base_url)
        }
    };
    tracing::info!(model = provider.model(), "Using chat model");
    let llm: Arc<dyn LlmProvider> = Arc::new(provider);

    let app = build_router(AppState::new(db, llm, &config));

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
    tracing::info!(%addr, "Planora daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| PlanoraError::Runtime(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(topics: &[&str], hours: i32) -> CreatePlanRequest {
        CreatePlanRequest {
            exam_name: " Finals ".to_string(),
            subject: "Physics".to_string(),
            exam_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            study_hours_per_day: hours,
            level: "Beginner".to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn plan_validation_trims_and_rejects_blank_topics() {
        let plan = validate_new_plan(request(&[" Optics ", ""], 2)).unwrap();
        assert_eq!(plan.exam_name, "Finals");
        assert_eq!(plan.topics, vec!["Optics".to_string()]);

        assert!(matches!(
            validate_new_plan(request(&["  "], 2)),
            Err(PlanoraError::Validation(_))
        ));
        assert!(matches!(
            validate_new_plan(request(&["Optics"], 0)),
            Err(PlanoraError::Validation(_))
        ));
    }

    #[test]
    fn errors_map_to_http_statuses() {
        assert_eq!(
            status_for(&PlanoraError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&PlanoraError::Forbidden("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&PlanoraError::Http("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&PlanoraError::Runtime("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bearer_header_wins_over_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "key-token".parse().unwrap());
        assert_eq!(request_token(&headers), Some("key-token"));
        headers.insert("authorization", "Bearer bearer-token".parse().unwrap());
        assert_eq!(request_token(&headers), Some("bearer-token"));
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(request_token(&headers), Some("key-token"));
    }
}

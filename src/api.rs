//! JSON endpoints.
//!
//! Handlers never hold the world lock across an `.await`: they snapshot what
//! they need, ask the assistant, then apply a command under the write lock.

use crate::assistant::{Assisted, FallbackReason, ParsedTask};
use crate::auth::{self, auth_middleware, lock_poisoned, CurrentUser, SharedState};
use crate::insights::{self, ChartData, TaskCounts, RECENT_TASKS};
use crate::world::{
    AiAnnotations, Category, Command, Event, Priority, ProductivityInsight, Task, TaskChanges, TaskDraft,
    TaskFilter, TaskStatus, World, WorldError,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

type ApiError = (StatusCode, String);

// ── Request / response types ───────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    #[serde(flatten)]
    pub task: Task,
    pub category_name: Option<String>,
    pub is_overdue: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub category_id: Option<Uuid>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_duration: Option<u32>,
    pub actual_duration: Option<u32>,
    /// When present, the parsed title/description/priority win.
    pub natural_language_input: Option<String>,
}

/// `null` clears a nullable field; leaving it out keeps it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_id: Option<Option<Uuid>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub estimated_duration: Option<Option<u32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub actual_duration: Option<Option<u32>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TextRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ParseResponse {
    #[serde(flatten)]
    pub task: ParsedTask,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}

#[derive(Debug, Serialize)]
pub struct QuickAddTask {
    pub id: Uuid,
    pub title: String,
    /// Display label, e.g. "Urgent"
    pub priority: &'static str,
}

#[derive(Debug, Serialize)]
pub struct QuickAddResponse {
    pub success: bool,
    pub task: QuickAddTask,
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub recommendations: String,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    #[serde(flatten)]
    pub counts: TaskCounts,
    pub recent_tasks: Vec<TaskResponse>,
    pub recommendations: String,
    pub chart_data: ChartData,
    pub revision: u64,
}

// ── Helpers ────────────────────────────────────────────────────

fn world_error(e: WorldError) -> ApiError {
    let status = match e {
        WorldError::TaskNotFound | WorldError::CategoryNotFound => StatusCode::NOT_FOUND,
        WorldError::DuplicateCategory => StatusCode::CONFLICT,
        WorldError::InvalidTitle
        | WorldError::InvalidCategoryName
        | WorldError::InvalidColor
        | WorldError::InvalidDuration => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string())
}

fn task_to_response(task: &Task, world: &World, now: DateTime<Utc>) -> TaskResponse {
    let category_name = task
        .category_id
        .and_then(|id| world.categories.get(&id))
        .map(|c| c.name.clone());

    TaskResponse {
        task: task.clone(),
        category_name,
        is_overdue: task.is_overdue(now),
    }
}

/// Parsed due dates are whole days; a task is due by the end of that day.
fn end_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc())
}

fn annotations(parsed: &ParsedTask) -> AiAnnotations {
    AiAnnotations {
        priority_score: Some(parsed.priority.score()),
        category_suggestion: parsed.category_suggestion.clone(),
        estimated_duration: Some(parsed.estimated_duration),
    }
}

/// Apply a task command under the write lock and flush. Flush failures are
/// logged, not returned: the world has already moved on.
fn apply_task(state: &SharedState, cmd: Command, user_id: Uuid) -> Result<TaskResponse, ApiError> {
    let now = Utc::now();
    let mut world = state.world.write().map_err(lock_poisoned)?;
    let event = world.apply(cmd, user_id, now).map_err(world_error)?;

    if let Err(e) = state.save_file.flush(&world, &event) {
        tracing::error!(error = %e, revision = event.revision(), "save file flush failed");
    }

    match &event {
        Event::TaskCreated { task, .. } | Event::TaskUpdated { task, .. } => Ok(task_to_response(task, &world, now)),
        _ => Err((StatusCode::INTERNAL_SERVER_ERROR, "unexpected event".to_string())),
    }
}

fn parse_filter(query: &TaskQuery) -> Result<TaskFilter, ApiError> {
    fn field<T: std::str::FromStr>(value: &Option<String>) -> Result<Option<T>, ApiError>
    where
        T::Err: std::fmt::Display,
    {
        match value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v.parse::<T>().map(Some).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string())),
            None => Ok(None),
        }
    }

    Ok(TaskFilter {
        status: field(&query.status)?,
        priority: field(&query.priority)?,
        category_id: field(&query.category)?,
    })
}

// ── Tasks ──────────────────────────────────────────────────────

// GET /api/tasks
pub async fn list_tasks(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<TaskResponse>>, ApiError> {
    let filter = parse_filter(&query)?;
    let now = Utc::now();
    let world = state.world.read().map_err(lock_poisoned)?;

    let tasks = world
        .tasks_for(user.id, &filter)
        .into_iter()
        .map(|t| task_to_response(t, &world, now))
        .collect();

    Ok(Json(tasks))
}

// POST /api/tasks
pub async fn create_task(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let mut draft = TaskDraft {
        title: payload.title,
        description: payload.description,
        category_id: payload.category_id,
        priority: payload.priority.unwrap_or_default(),
        status: payload.status.unwrap_or_default(),
        due_date: payload.due_date,
        estimated_duration: payload.estimated_duration,
        actual_duration: payload.actual_duration,
        ai: AiAnnotations::default(),
    };

    let text = payload.natural_language_input.unwrap_or_default();
    if !text.trim().is_empty() {
        let parsed = state.assistant.parse_natural_language(&text).await.into_value();
        draft.title = parsed.title.clone();
        draft.description = parsed.description.clone();
        draft.priority = parsed.priority;
        if draft.due_date.is_none() {
            draft.due_date = parsed.due_date.and_then(end_of_day);
        }
        draft.ai = annotations(&parsed);
    }

    let response = apply_task(&state, Command::CreateTask(draft), user.id)?;
    insights::generate_daily_insight(&state, user.id).await;

    Ok((StatusCode::CREATED, Json(response)))
}

// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ApiError> {
    let world = state.world.read().map_err(lock_poisoned)?;
    let task = world
        .task_for(user.id, id)
        .ok_or_else(|| world_error(WorldError::TaskNotFound))?;

    Ok(Json(task_to_response(task, &world, Utc::now())))
}

// PUT /api/tasks/:id
pub async fn update_task(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let changes = TaskChanges {
        title: payload.title,
        description: payload.description,
        category_id: payload.category_id,
        priority: payload.priority,
        status: payload.status,
        due_date: payload.due_date,
        estimated_duration: payload.estimated_duration,
        actual_duration: payload.actual_duration,
    };

    let response = apply_task(&state, Command::UpdateTask { task_id: id, changes }, user.id)?;
    insights::generate_daily_insight(&state, user.id).await;

    Ok(Json(response))
}

// DELETE /api/tasks/:id
pub async fn delete_task(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut world = state.world.write().map_err(lock_poisoned)?;
    let event = world
        .apply(Command::DeleteTask { task_id: id }, user.id, Utc::now())
        .map_err(world_error)?;

    if let Err(e) = state.save_file.flush(&world, &event) {
        tracing::error!(error = %e, revision = event.revision(), "save file flush failed");
    }

    Ok(StatusCode::NO_CONTENT)
}

// POST /api/tasks/quick-add
pub async fn quick_add(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<TextRequest>,
) -> Result<Json<QuickAddResponse>, (StatusCode, Json<Value>)> {
    let failure = |status: StatusCode, error: String| (status, Json(json!({ "success": false, "error": error })));

    if payload.text.trim().is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "Invalid request".to_string()));
    }

    let parsed = state.assistant.parse_natural_language(&payload.text).await.into_value();

    let category_id = {
        let world = state.world.read().map_err(|_| failure(StatusCode::INTERNAL_SERVER_ERROR, "World lock poisoned".to_string()))?;
        world.match_category(user.id, &parsed.category_suggestion).map(|c| c.id)
    };

    let draft = TaskDraft {
        title: parsed.title.clone(),
        description: parsed.description.clone(),
        category_id,
        priority: parsed.priority,
        due_date: parsed.due_date.and_then(end_of_day),
        ai: annotations(&parsed),
        ..TaskDraft::default()
    };

    let response = apply_task(&state, Command::CreateTask(draft), user.id)
        .map_err(|(status, error)| failure(status, error))?;

    tracing::info!(task_id = %response.task.id, priority = %response.task.priority, "quick-add created task");
    Ok(Json(QuickAddResponse {
        success: true,
        task: QuickAddTask {
            id: response.task.id,
            title: response.task.title,
            priority: response.task.priority.label(),
        },
    }))
}

// ── Categories ─────────────────────────────────────────────────

// GET /api/categories
pub async fn list_categories(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let world = state.world.read().map_err(lock_poisoned)?;
    Ok(Json(world.categories_for(user.id).into_iter().cloned().collect()))
}

// POST /api/categories
pub async fn create_category(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let mut world = state.world.write().map_err(lock_poisoned)?;
    let event = world
        .apply(Command::CreateCategory { name: payload.name, color: payload.color }, user.id, Utc::now())
        .map_err(world_error)?;

    if let Err(e) = state.save_file.flush(&world, &event) {
        tracing::error!(error = %e, revision = event.revision(), "save file flush failed");
    }

    match event {
        Event::CategoryCreated { category, .. } => Ok((StatusCode::CREATED, Json(category))),
        _ => Err((StatusCode::INTERNAL_SERVER_ERROR, "unexpected event".to_string())),
    }
}

// ── Insights & assistant ───────────────────────────────────────

// GET /api/insights
pub async fn list_insights(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ProductivityInsight>>, ApiError> {
    let world = state.world.read().map_err(lock_poisoned)?;
    Ok(Json(world.insights_for(user.id).into_iter().cloned().collect()))
}

// POST /api/ai/parse
pub async fn ai_parse(
    State(state): State<SharedState>,
    Json(payload): Json<TextRequest>,
) -> Result<Json<ParseResponse>, (StatusCode, Json<Value>)> {
    if payload.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "No text provided" }))));
    }

    let result = state.assistant.parse_natural_language(&payload.text).await;
    let (source, fallback_reason) = (result.source(), result.reason());
    Ok(Json(ParseResponse { task: result.into_value(), source, fallback_reason }))
}

/// Summaries of every task the user owns, newest first.
fn summaries(state: &SharedState, user_id: Uuid) -> Result<Vec<crate::assistant::TaskSummary>, ApiError> {
    let now = Utc::now();
    let world = state.world.read().map_err(lock_poisoned)?;
    Ok(world.recent_tasks(user_id).iter().map(|t| t.summary(now)).collect())
}

// GET /api/recommendations
pub async fn recommendations(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<RecommendationsResponse>, ApiError> {
    let tasks = summaries(&state, user.id)?;
    let result: Assisted<String> = state.assistant.recommendations(&tasks).await;
    let (source, fallback_reason) = (result.source(), result.reason());

    Ok(Json(RecommendationsResponse {
        recommendations: result.into_value(),
        source,
        fallback_reason,
    }))
}

// GET /api/dashboard
pub async fn dashboard(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let now = Utc::now();
    let (counts, recent_tasks, chart_data, revision, tasks) = {
        let world = state.world.read().map_err(lock_poisoned)?;
        let all = world.recent_tasks(user.id);
        (
            insights::task_counts(&all, now),
            all.iter().take(RECENT_TASKS).map(|t| task_to_response(t, &world, now)).collect::<Vec<_>>(),
            insights::chart_data(&world, user.id, now.date_naive()),
            world.revision,
            all.iter().map(|t| t.summary(now)).collect::<Vec<_>>(),
        )
    };

    let recommendations = state.assistant.recommendations(&tasks).await.into_value();

    Ok(Json(DashboardResponse { counts, recent_tasks, recommendations, chart_data, revision }))
}

// GET /api/health
pub async fn health() -> &'static str {
    "ok"
}

// ── Router ─────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/quick-add", post(quick_add))
        .route("/api/tasks/:id", get(get_task).put(update_task).delete(delete_task))
        .route("/api/categories", get(list_categories).post(create_category))
        .route("/api/insights", get(list_insights))
        .route("/api/ai/parse", post(ai_parse))
        .route("/api/recommendations", get(recommendations))
        .route("/api/dashboard", get(dashboard))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ── Tests ──────────────────────────────────────────────────────

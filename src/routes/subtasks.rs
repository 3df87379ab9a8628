use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{collection_guard, filtered_select, object_guard, required_text, AppJson};
use crate::app::AppState;
use crate::authz::{Action, Principal, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::models::subtask::{Subtask, SubtaskCreateRequest, SubtaskListQuery, SubtaskUpdateRequest, SUBTASK_COLUMNS};
use crate::utils::utc_now;

async fn fetch_subtask(pool: &SqlitePool, id: Uuid) -> AppResult<Subtask> {
    sqlx::query_as::<_, Subtask>(&format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE subtasks.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("subtask not found"))
}

#[utoipa::path(
    get,
    path = "/subtasks",
    tag = "Tasks",
    params(("task" = Option<Uuid>, Query, description = "Only subtasks of this task")),
    responses(
        (status = 200, description = "Subtasks visible to the caller", body = [Subtask]),
        (status = 403, description = "No way to see any subtask")
    )
)]
pub async fn list_subtasks(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<SubtaskListQuery>,
) -> AppResult<Json<Vec<Subtask>>> {
    let snapshot = collection_guard(&state, &principal, Action::View, ResourceType::Subtask).await?;
    let predicate = snapshot.filter_visible(ResourceType::Subtask, Action::View)?;

    let mut qb = filtered_select(
        format!("SELECT {SUBTASK_COLUMNS} FROM subtasks"),
        ResourceType::Subtask,
        &predicate,
    )?;
    if let Some(task) = query.task {
        qb.push(" AND subtasks.task_id = ").push_bind(task);
    }
    qb.push(" ORDER BY subtasks.sort_order, subtasks.created_at, subtasks.id");

    Ok(Json(qb.build_query_as().fetch_all(&state.pool).await?))
}

#[utoipa::path(
    post,
    path = "/subtasks",
    tag = "Tasks",
    request_body = SubtaskCreateRequest,
    responses(
        (status = 201, description = "Subtask created", body = Subtask),
        (status = 400, description = "Unknown task"),
        (status = 403, description = "Missing add_subtask")
    )
)]
pub async fn create_subtask(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<SubtaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Subtask>)> {
    collection_guard(&state, &principal, Action::Add, ResourceType::Subtask).await?;
    let title = required_text(&payload.title, "title")?;

    let task_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?)")
        .bind(payload.task_id)
        .fetch_one(&state.pool)
        .await?;
    if !task_exists {
        return Err(AppError::bad_request(format!("task {} does not exist", payload.task_id)));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO subtasks (id, task_id, title, is_done, sort_order, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(payload.task_id)
    .bind(&title)
    .bind(payload.is_done)
    .bind(payload.sort_order.unwrap_or(0))
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(fetch_subtask(&state.pool, id).await?)))
}

#[utoipa::path(
    get,
    path = "/subtasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Subtask id")),
    responses(
        (status = 200, description = "Subtask", body = Subtask),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "No such subtask")
    )
)]
pub async fn get_subtask(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Subtask>> {
    let subtask = fetch_subtask(&state.pool, id).await?;
    object_guard(&state, &principal, Action::View, ResourceType::Subtask, id).await?;
    Ok(Json(subtask))
}

#[utoipa::path(
    put,
    path = "/subtasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Subtask id")),
    request_body = SubtaskUpdateRequest,
    responses(
        (status = 200, description = "Subtask updated", body = Subtask),
        (status = 403, description = "Missing change_subtask"),
        (status = 404, description = "No such subtask")
    )
)]
pub async fn update_subtask(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<SubtaskUpdateRequest>,
) -> AppResult<Json<Subtask>> {
    let current = fetch_subtask(&state.pool, id).await?;
    object_guard(&state, &principal, Action::Change, ResourceType::Subtask, id).await?;

    let title = match payload.title.as_deref() {
        Some(title) => required_text(title, "title")?,
        None => current.title,
    };

    sqlx::query("UPDATE subtasks SET title = ?, is_done = ?, sort_order = ?, updated_at = ? WHERE id = ?")
        .bind(&title)
        .bind(payload.is_done.unwrap_or(current.is_done))
        .bind(payload.sort_order.unwrap_or(current.sort_order))
        .bind(utc_now())
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(Json(fetch_subtask(&state.pool, id).await?))
}

#[utoipa::path(
    delete,
    path = "/subtasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Subtask id")),
    responses(
        (status = 204, description = "Subtask deleted"),
        (status = 403, description = "Missing delete_subtask"),
        (status = 404, description = "No such subtask")
    )
)]
pub async fn delete_subtask(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    fetch_subtask(&state.pool, id).await?;
    object_guard(&state, &principal, Action::Delete, ResourceType::Subtask, id).await?;

    sqlx::query("DELETE FROM subtasks WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use std::collections::{BTreeSet, HashMap};

use axum::Json;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{collection_guard, filtered_select, object_guard, required_text, AppJson};
use crate::app::AppState;
use crate::authz::{Action, Predicate, Principal, ResourceType};
use crate::db::WriteTx;
use crate::errors::{AppError, AppResult};
use crate::models::task::{
    DbTask, Task, TaskCreateRequest, TaskListQuery, TaskStatus, TaskUpdateRequest, TASK_COLUMNS,
};
use crate::utils::utc_now;

async fn fetch_task(pool: &SqlitePool, id: Uuid) -> AppResult<DbTask> {
    sqlx::query_as::<_, DbTask>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE tasks.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))
}

async fn ensure_reference(pool: &SqlitePool, table: &str, id: Option<Uuid>, label: &str) -> AppResult<()> {
    let Some(id) = id else {
        return Ok(());
    };
    let exists: bool = sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)"))
        .bind(id)
        .fetch_one(pool)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(AppError::bad_request(format!("{label} {id} does not exist")))
    }
}

async fn assignees_of(pool: &SqlitePool, task_ids: &[Uuid]) -> AppResult<HashMap<Uuid, Vec<Uuid>>> {
    let mut assignees: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    if task_ids.is_empty() {
        return Ok(assignees);
    }

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT task_id, collaborator_id FROM task_assignees WHERE task_id IN (");
    let mut list = qb.separated(", ");
    for id in task_ids {
        list.push_bind(*id);
    }
    list.push_unseparated(") ORDER BY task_id, collaborator_id");

    let rows: Vec<(Uuid, Uuid)> = qb.build_query_as().fetch_all(pool).await?;
    for (task_id, collaborator_id) in rows {
        assignees.entry(task_id).or_default().push(collaborator_id);
    }
    Ok(assignees)
}

async fn present(pool: &SqlitePool, rows: Vec<DbTask>) -> AppResult<Vec<Task>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut assignees = assignees_of(pool, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let assigned_to = assignees.remove(&row.id).unwrap_or_default();
            Task::assemble(row, assigned_to)
        })
        .collect()
}

async fn present_one(pool: &SqlitePool, id: Uuid) -> AppResult<Task> {
    let row = fetch_task(pool, id).await?;
    present(pool, vec![row])
        .await?
        .pop()
        .ok_or_else(|| AppError::not_found("task not found"))
}

async fn ensure_collaborators_exist(conn: &mut SqliteConnection, ids: &BTreeSet<Uuid>) -> AppResult<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(1) FROM collaborators WHERE id IN (");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");

    let found: i64 = qb.build_query_scalar().fetch_one(conn).await?;
    if found as usize != ids.len() {
        return Err(AppError::bad_request("unknown collaborator in assigned_to"));
    }
    Ok(())
}

async fn replace_assignees(conn: &mut SqliteConnection, task_id: Uuid, collaborators: &[Uuid]) -> AppResult<()> {
    let distinct: BTreeSet<Uuid> = collaborators.iter().copied().collect();
    ensure_collaborators_exist(&mut *conn, &distinct).await?;

    sqlx::query("DELETE FROM task_assignees WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

    for collaborator_id in &distinct {
        sqlx::query("INSERT INTO task_assignees (task_id, collaborator_id) VALUES (?, ?)")
            .bind(task_id)
            .bind(collaborator_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Entering DONE stamps `completed_at`; leaving it clears the stamp.
fn completion_stamp(
    previous: Option<TaskStatus>,
    next: TaskStatus,
    current: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (previous, next) {
        (Some(TaskStatus::Done), TaskStatus::Done) => current,
        (_, TaskStatus::Done) => Some(utc_now()),
        _ => None,
    }
}

#[utoipa::path(
    get,
    path = "/tasks",
    tag = "Tasks",
    params(
        ("project" = Option<Uuid>, Query, description = "Only tasks of this project"),
        ("status" = Option<String>, Query, description = "TODO, IN_PROGRESS, IN_REVIEW or DONE"),
        ("department" = Option<Uuid>, Query, description = "Only tasks whose project is used by this department"),
        ("assigned_to" = Option<Uuid>, Query, description = "Only tasks assigned to this collaborator"),
        ("responsavel" = Option<Uuid>, Query, description = "Only tasks this collaborator is responsible for; `responsible` is accepted too")
    ),
    responses(
        (status = 200, description = "Tasks visible to the caller", body = [Task]),
        (status = 400, description = "Unknown status"),
        (status = 403, description = "No way to see any task")
    )
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<TaskListQuery>,
) -> AppResult<Json<Vec<Task>>> {
    let snapshot = collection_guard(&state, &principal, Action::View, ResourceType::Task).await?;

    let mut predicate = snapshot.filter_visible(ResourceType::Task, Action::View)?;
    if let Some(project) = query.project {
        predicate = predicate.and(Predicate::project_in([project]));
    }
    if let Some(department) = query.department {
        predicate = predicate.and(Predicate::scoped_to_any([department]));
    }

    let mut qb = filtered_select(format!("SELECT {TASK_COLUMNS} FROM tasks"), ResourceType::Task, &predicate)?;
    if let Some(raw) = query.status.as_deref() {
        let status: TaskStatus = raw.parse()?;
        qb.push(" AND tasks.status = ").push_bind(status.as_str());
    }
    if let Some(responsible) = query.responsible {
        qb.push(" AND tasks.responsible_id = ").push_bind(responsible);
    }
    if let Some(collaborator) = query.assigned_to {
        qb.push(" AND EXISTS (SELECT 1 FROM task_assignees WHERE task_assignees.task_id = tasks.id")
            .push(" AND task_assignees.collaborator_id = ")
            .push_bind(collaborator)
            .push(")");
    }
    qb.push(" ORDER BY tasks.sort_order, tasks.created_at, tasks.id");

    let rows: Vec<DbTask> = qb.build_query_as().fetch_all(&state.pool).await?;
    Ok(Json(present(&state.pool, rows).await?))
}

#[utoipa::path(
    post,
    path = "/tasks",
    tag = "Tasks",
    request_body = TaskCreateRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Missing add_task")
    )
)]
pub async fn create_task(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    collection_guard(&state, &principal, Action::Add, ResourceType::Task).await?;
    let title = required_text(&payload.title, "title")?;
    ensure_reference(&state.pool, "projects", payload.project_id, "project").await?;
    ensure_reference(&state.pool, "collaborators", payload.responsible_id, "collaborator").await?;

    let status = payload.status.unwrap_or_default();
    let id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = WriteTx::begin(&state.pool).await?;
    sqlx::query(
        r#"
        INSERT INTO tasks (id, project_id, responsible_id, title, description, solution, status, priority,
                           sort_order, start_date, deadline, completed_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(payload.project_id)
    .bind(payload.responsible_id)
    .bind(&title)
    .bind(&payload.description)
    .bind(&payload.solution)
    .bind(status.as_str())
    .bind(payload.priority.unwrap_or_default().as_str())
    .bind(payload.sort_order.unwrap_or(0))
    .bind(payload.start_date)
    .bind(payload.deadline)
    .bind(completion_stamp(None, status, None))
    .bind(now)
    .bind(now)
    .execute(tx.conn()?)
    .await?;
    replace_assignees(tx.conn()?, id, &payload.assigned_to).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(present_one(&state.pool, id).await?)))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task", body = Task),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "No such task")
    )
)]
pub async fn get_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    fetch_task(&state.pool, id).await?;
    object_guard(&state, &principal, Action::View, ResourceType::Task, id).await?;
    Ok(Json(present_one(&state.pool, id).await?))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskUpdateRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 403, description = "Missing change_task"),
        (status = 404, description = "No such task")
    )
)]
pub async fn update_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<TaskUpdateRequest>,
) -> AppResult<Json<Task>> {
    let current = Task::assemble(fetch_task(&state.pool, id).await?, Vec::new())?;
    object_guard(&state, &principal, Action::Change, ResourceType::Task, id).await?;

    ensure_reference(&state.pool, "projects", payload.project_id, "project").await?;
    ensure_reference(&state.pool, "collaborators", payload.responsible_id, "collaborator").await?;

    let title = match payload.title.as_deref() {
        Some(title) => required_text(title, "title")?,
        None => current.title,
    };
    let status = payload.status.unwrap_or(current.status);

    let mut tx = WriteTx::begin(&state.pool).await?;
    sqlx::query(
        r#"
        UPDATE tasks
        SET project_id = ?, responsible_id = ?, title = ?, description = ?, solution = ?, status = ?,
            priority = ?, sort_order = ?, start_date = ?, deadline = ?, completed_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(payload.project_id.or(current.project_id))
    .bind(payload.responsible_id.or(current.responsible_id))
    .bind(&title)
    .bind(payload.description.or(current.description))
    .bind(payload.solution.or(current.solution))
    .bind(status.as_str())
    .bind(payload.priority.unwrap_or(current.priority).as_str())
    .bind(payload.sort_order.unwrap_or(current.sort_order))
    .bind(payload.start_date.or(current.start_date))
    .bind(payload.deadline.or(current.deadline))
    .bind(completion_stamp(Some(current.status), status, current.completed_at))
    .bind(utc_now())
    .bind(id)
    .execute(tx.conn()?)
    .await?;
    if let Some(assigned_to) = payload.assigned_to.as_deref() {
        replace_assignees(tx.conn()?, id, assigned_to).await?;
    }
    tx.commit().await?;

    Ok(Json(present_one(&state.pool, id).await?))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses(
        (status = 204, description = "Task and its subtasks deleted"),
        (status = 403, description = "Missing delete_task"),
        (status = 404, description = "No such task")
    )
)]
pub async fn delete_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    fetch_task(&state.pool, id).await?;
    object_guard(&state, &principal, Action::Delete, ResourceType::Task, id).await?;

    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

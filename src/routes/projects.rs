use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::departments::ensure_departments_exist;
use super::{collection_guard, filtered_select, object_guard, required_text, AppJson};
use crate::app::AppState;
use crate::authz::{AccessSnapshot, Action, Predicate, Principal, ResourceScope, ResourceType};
use crate::db::WriteTx;
use crate::errors::{AppError, AppResult};
use crate::models::project::{
    DbProject, Project, ProjectCreateRequest, ProjectListQuery, ProjectReceipt, ProjectUpdateRequest,
    PROJECT_COLUMNS,
};
use crate::utils::utc_now;

async fn fetch_project(pool: &SqlitePool, id: Uuid) -> AppResult<DbProject> {
    sqlx::query_as::<_, DbProject>(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE projects.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("project not found"))
}

/// Attaches departments and the caller's view/edit flags, all from one snapshot.
async fn present(state: &AppState, snapshot: &AccessSnapshot, rows: Vec<DbProject>) -> AppResult<Vec<Project>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut scopes = state.engine.scoping().scopes_of(ResourceType::Project, &ids).await?;

    rows.into_iter()
        .map(|row| {
            let scope = scopes
                .remove(&row.id)
                .unwrap_or_else(|| ResourceScope::project(row.id, []));
            let can_view = snapshot.can(Action::View, ResourceType::Project, Some(&scope))?;
            let can_edit = snapshot.can(Action::Change, ResourceType::Project, Some(&scope))?;
            Ok(Project::assemble(row, scope.departments.into_iter().collect(), can_view, can_edit))
        })
        .collect()
}

async fn present_one(state: &AppState, snapshot: &AccessSnapshot, row: DbProject) -> AppResult<Project> {
    present(state, snapshot, vec![row])
        .await?
        .pop()
        .ok_or_else(|| AppError::internal("project vanished while rendering"))
}

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    params(("department" = Option<Uuid>, Query, description = "Only projects used by this department")),
    responses(
        (status = 200, description = "Projects visible to the caller", body = [Project]),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "No way to see any project")
    )
)]
pub async fn list_projects(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ProjectListQuery>,
) -> AppResult<Json<Vec<Project>>> {
    let snapshot = collection_guard(&state, &principal, Action::View, ResourceType::Project).await?;

    let mut predicate = snapshot.filter_visible(ResourceType::Project, Action::View)?;
    if let Some(department) = query.department {
        predicate = predicate.and(Predicate::scoped_to_any([department]));
    }

    let mut qb = filtered_select(format!("SELECT {PROJECT_COLUMNS} FROM projects"), ResourceType::Project, &predicate)?;
    qb.push(" ORDER BY projects.name, projects.id");
    let rows: Vec<DbProject> = qb.build_query_as().fetch_all(&state.pool).await?;

    Ok(Json(present(&state, &snapshot, rows).await?))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Invalid payload or unknown department"),
        (status = 403, description = "Missing add_project")
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    let snapshot = collection_guard(&state, &principal, Action::Add, ResourceType::Project).await?;
    let name = required_text(&payload.name, "name")?;

    let id = Uuid::new_v4();
    let now = utc_now();
    let mut tx = WriteTx::begin(&state.pool).await?;
    ensure_departments_exist(tx.conn()?, &payload.used_by_departments).await?;

    sqlx::query(
        r#"
        INSERT INTO projects (id, name, description, repo_url, admin_url, status, is_online, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(&name)
    .bind(&payload.description)
    .bind(&payload.repo_url)
    .bind(&payload.admin_url)
    .bind(&payload.status)
    .bind(payload.is_online)
    .bind(now)
    .bind(now)
    .execute(tx.conn()?)
    .await?;

    replace_departments(tx.conn()?, id, &payload.used_by_departments).await?;
    tx.commit().await?;

    let row = fetch_project(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(present_one(&state, &snapshot, row).await?)))
}

#[utoipa::path(
    get,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project", body = Project),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "No such project")
    )
)]
pub async fn get_project(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    let row = fetch_project(&state.pool, id).await?;
    let (snapshot, _) = object_guard(&state, &principal, Action::View, ResourceType::Project, id).await?;
    Ok(Json(present_one(&state, &snapshot, row).await?))
}

#[utoipa::path(
    put,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ProjectUpdateRequest,
    responses(
        (status = 200, description = "Project updated; edit-only callers get a ProjectReceipt instead", body = Project),
        (status = 403, description = "Caller cannot edit this project"),
        (status = 404, description = "No such project")
    )
)]
pub async fn update_project(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<ProjectUpdateRequest>,
) -> AppResult<Response> {
    let current = fetch_project(&state.pool, id).await?;
    let (snapshot, _) = object_guard(&state, &principal, Action::Change, ResourceType::Project, id).await?;

    let name = match payload.name.as_deref() {
        Some(name) => required_text(name, "name")?,
        None => current.name,
    };

    let mut tx = WriteTx::begin(&state.pool).await?;
    sqlx::query(
        r#"
        UPDATE projects
        SET name = ?, description = ?, repo_url = ?, admin_url = ?, status = ?, is_online = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(payload.description.or(current.description))
    .bind(payload.repo_url.or(current.repo_url))
    .bind(payload.admin_url.or(current.admin_url))
    .bind(payload.status.or(current.status))
    .bind(payload.is_online.unwrap_or(current.is_online))
    .bind(utc_now())
    .bind(id)
    .execute(tx.conn()?)
    .await?;

    if let Some(departments) = payload.used_by_departments.as_deref() {
        ensure_departments_exist(tx.conn()?, departments).await?;
        replace_departments(tx.conn()?, id, departments).await?;
    }
    tx.commit().await?;

    let row = fetch_project(&state.pool, id).await?;
    let project = present_one(&state, &snapshot, row).await?;
    // Edit access alone never reveals the project's fields.
    if !project.user_can_view {
        return Ok(Json(ProjectReceipt::from(&project)).into_response());
    }
    Ok(Json(project).into_response())
}

#[utoipa::path(
    delete,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 204, description = "Project deleted; its grants go with it"),
        (status = 403, description = "Missing delete_project"),
        (status = 404, description = "No such project")
    )
)]
pub async fn delete_project(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    fetch_project(&state.pool, id).await?;
    object_guard(&state, &principal, Action::Delete, ResourceType::Project, id).await?;

    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn replace_departments(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    departments: &[Uuid],
) -> AppResult<()> {
    sqlx::query("DELETE FROM project_departments WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *conn)
        .await?;

    for department_id in departments {
        sqlx::query(
            "INSERT INTO project_departments (project_id, department_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(project_id)
        .bind(department_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

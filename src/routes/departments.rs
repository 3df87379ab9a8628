use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{collection_guard, filtered_select, object_guard, required_text, AppJson};
use crate::app::AppState;
use crate::authz::{Action, Principal, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::models::department::{
    validate_hierarchy, DbDepartment, Department, DepartmentCreateRequest, DepartmentListQuery, DepartmentType,
    DepartmentUpdateRequest, DEPARTMENT_COLUMNS,
};
use crate::utils::{parse_flag, utc_now};

/// Rejects the request when any of `ids` is not a department.
pub(crate) async fn ensure_departments_exist(conn: &mut SqliteConnection, ids: &[Uuid]) -> AppResult<()> {
    let distinct: BTreeSet<Uuid> = ids.iter().copied().collect();
    if distinct.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(1) FROM departments WHERE id IN (");
    let mut list = qb.separated(", ");
    for id in &distinct {
        list.push_bind(*id);
    }
    list.push_unseparated(")");

    let found: i64 = qb.build_query_scalar().fetch_one(conn).await?;
    if found as usize != distinct.len() {
        return Err(AppError::bad_request("unknown department in used_by_departments"));
    }
    Ok(())
}

async fn fetch_department(pool: &SqlitePool, id: Uuid) -> AppResult<DbDepartment> {
    sqlx::query_as::<_, DbDepartment>(&format!(
        "SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE departments.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("department not found"))
}

async fn parent_type(pool: &SqlitePool, parent: Option<Uuid>) -> AppResult<Option<DepartmentType>> {
    let Some(parent) = parent else {
        return Ok(None);
    };
    let raw: Option<String> = sqlx::query_scalar("SELECT department_type FROM departments WHERE id = ?")
        .bind(parent)
        .fetch_optional(pool)
        .await?;
    raw.map(|t| t.parse()).transpose()
}

#[utoipa::path(
    get,
    path = "/departments",
    tag = "Departments",
    params(("is_active" = Option<String>, Query, description = "`true` or `false`")),
    responses(
        (status = 200, description = "Departments visible to the caller", body = [Department]),
        (status = 403, description = "No way to see any department")
    )
)]
pub async fn list_departments(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<DepartmentListQuery>,
) -> AppResult<Json<Vec<Department>>> {
    let snapshot = collection_guard(&state, &principal, Action::View, ResourceType::Department).await?;
    let predicate = snapshot.filter_visible(ResourceType::Department, Action::View)?;

    let mut qb = filtered_select(
        format!("SELECT {DEPARTMENT_COLUMNS} FROM departments"),
        ResourceType::Department,
        &predicate,
    )?;
    if let Some(raw) = query.is_active.as_deref() {
        qb.push(" AND departments.is_active = ").push_bind(parse_flag(raw));
    }
    qb.push(" ORDER BY departments.name, departments.id");

    let rows: Vec<DbDepartment> = qb.build_query_as().fetch_all(&state.pool).await?;
    let departments = rows.into_iter().map(Department::try_from).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(departments))
}

#[utoipa::path(
    post,
    path = "/departments",
    tag = "Departments",
    request_body = DepartmentCreateRequest,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 400, description = "Invalid hierarchy"),
        (status = 403, description = "Missing add_department")
    )
)]
pub async fn create_department(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<DepartmentCreateRequest>,
) -> AppResult<(StatusCode, Json<Department>)> {
    collection_guard(&state, &principal, Action::Add, ResourceType::Department).await?;
    let name = required_text(&payload.name, "name")?;

    let parent_kind = parent_type(&state.pool, payload.parent_department_id).await?;
    validate_hierarchy(payload.department_type, payload.parent_department_id, parent_kind, None)?;

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO departments (id, name, description, department_type, parent_department_id, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(&name)
    .bind(&payload.description)
    .bind(payload.department_type.as_str())
    .bind(payload.parent_department_id)
    .bind(payload.is_active.unwrap_or(true))
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let department = Department::try_from(fetch_department(&state.pool, id).await?)?;
    Ok((StatusCode::CREATED, Json(department)))
}

#[utoipa::path(
    get,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    responses(
        (status = 200, description = "Department", body = Department),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "No such department")
    )
)]
pub async fn get_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Department>> {
    let row = fetch_department(&state.pool, id).await?;
    object_guard(&state, &principal, Action::View, ResourceType::Department, id).await?;
    Ok(Json(Department::try_from(row)?))
}

#[utoipa::path(
    put,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    request_body = DepartmentUpdateRequest,
    responses(
        (status = 200, description = "Department updated", body = Department),
        (status = 400, description = "Invalid hierarchy"),
        (status = 403, description = "Missing change_department"),
        (status = 404, description = "No such department")
    )
)]
pub async fn update_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<DepartmentUpdateRequest>,
) -> AppResult<Json<Department>> {
    let current = Department::try_from(fetch_department(&state.pool, id).await?)?;
    object_guard(&state, &principal, Action::Change, ResourceType::Department, id).await?;

    let name = match payload.name.as_deref() {
        Some(name) => required_text(name, "name")?,
        None => current.name,
    };
    let department_type = payload.department_type.unwrap_or(current.department_type);
    // Turning a sub department into a main one drops its parent.
    let parent = match department_type {
        DepartmentType::Main => None,
        DepartmentType::Sub => payload.parent_department_id.or(current.parent_department_id),
    };
    let parent_kind = parent_type(&state.pool, parent).await?;
    validate_hierarchy(department_type, parent, parent_kind, Some(id))?;

    sqlx::query(
        r#"
        UPDATE departments
        SET name = ?, description = ?, department_type = ?, parent_department_id = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(payload.description.or(current.description))
    .bind(department_type.as_str())
    .bind(parent)
    .bind(payload.is_active.unwrap_or(current.is_active))
    .bind(utc_now())
    .bind(id)
    .execute(&state.pool)
    .await?;

    Ok(Json(Department::try_from(fetch_department(&state.pool, id).await?)?))
}

#[utoipa::path(
    delete,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    responses(
        (status = 204, description = "Department deleted; its grants go with it"),
        (status = 403, description = "Missing delete_department"),
        (status = 404, description = "No such department")
    )
)]
pub async fn delete_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    fetch_department(&state.pool, id).await?;
    object_guard(&state, &principal, Action::Delete, ResourceType::Department, id).await?;

    sqlx::query("DELETE FROM departments WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

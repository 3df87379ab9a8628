use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{collection_guard, filtered_select, object_guard, required_text, AppJson};
use crate::app::AppState;
use crate::authz::{Action, Predicate, Principal, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::models::collaborator::{
    Collaborator, CollaboratorCreateRequest, CollaboratorListQuery, CollaboratorUpdateRequest, COLLABORATOR_COLUMNS,
};
use crate::utils::{normalize_email, parse_flag, utc_now};

async fn fetch_collaborator(pool: &SqlitePool, id: Uuid) -> AppResult<Collaborator> {
    sqlx::query_as::<_, Collaborator>(&format!(
        "SELECT {COLLABORATOR_COLUMNS} FROM collaborators WHERE collaborators.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("collaborator not found"))
}

async fn ensure_email_free(pool: &SqlitePool, email: &str, except: Option<Uuid>) -> AppResult<()> {
    let owner: Option<Uuid> = sqlx::query_scalar("SELECT id FROM collaborators WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    match owner {
        Some(owner) if Some(owner) != except => Err(AppError::conflict("email already in use")),
        _ => Ok(()),
    }
}

async fn ensure_links(pool: &SqlitePool, department_id: Option<Uuid>, manager_id: Option<Uuid>) -> AppResult<()> {
    for (table, id, label) in [("departments", department_id, "department"), ("collaborators", manager_id, "manager")] {
        let Some(id) = id else { continue };
        let exists: bool = sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)"))
            .bind(id)
            .fetch_one(pool)
            .await?;
        if !exists {
            return Err(AppError::bad_request(format!("{label} {id} does not exist")));
        }
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/collaborators",
    tag = "Collaborators",
    params(
        ("is_active" = Option<String>, Query, description = "`true` or `false`"),
        ("department" = Option<Uuid>, Query, description = "Only collaborators of this department")
    ),
    responses(
        (status = 200, description = "Collaborators visible to the caller", body = [Collaborator]),
        (status = 403, description = "No way to see any collaborator")
    )
)]
pub async fn list_collaborators(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<CollaboratorListQuery>,
) -> AppResult<Json<Vec<Collaborator>>> {
    let snapshot = collection_guard(&state, &principal, Action::View, ResourceType::Collaborator).await?;

    let mut predicate = snapshot.filter_visible(ResourceType::Collaborator, Action::View)?;
    if let Some(department) = query.department {
        predicate = predicate.and(Predicate::scoped_to_any([department]));
    }

    let mut qb = filtered_select(
        format!("SELECT {COLLABORATOR_COLUMNS} FROM collaborators"),
        ResourceType::Collaborator,
        &predicate,
    )?;
    if let Some(raw) = query.is_active.as_deref() {
        qb.push(" AND collaborators.is_active = ").push_bind(parse_flag(raw));
    }
    qb.push(" ORDER BY collaborators.name, collaborators.id");

    Ok(Json(qb.build_query_as().fetch_all(&state.pool).await?))
}

#[utoipa::path(
    post,
    path = "/collaborators",
    tag = "Collaborators",
    request_body = CollaboratorCreateRequest,
    responses(
        (status = 201, description = "Collaborator created", body = Collaborator),
        (status = 403, description = "Missing add_collaborator"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn create_collaborator(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<CollaboratorCreateRequest>,
) -> AppResult<(StatusCode, Json<Collaborator>)> {
    collection_guard(&state, &principal, Action::Add, ResourceType::Collaborator).await?;
    let name = required_text(&payload.name, "name")?;
    let email = normalize_email(&required_text(&payload.email, "email")?);
    ensure_email_free(&state.pool, &email, None).await?;
    ensure_links(&state.pool, payload.department_id, payload.manager_id).await?;

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO collaborators (id, name, email, phone, position, department_id, manager_id, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(&name)
    .bind(&email)
    .bind(&payload.phone)
    .bind(&payload.position)
    .bind(payload.department_id)
    .bind(payload.manager_id)
    .bind(payload.is_active.unwrap_or(true))
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(fetch_collaborator(&state.pool, id).await?)))
}

#[utoipa::path(
    get,
    path = "/collaborators/{id}",
    tag = "Collaborators",
    params(("id" = Uuid, Path, description = "Collaborator id")),
    responses(
        (status = 200, description = "Collaborator", body = Collaborator),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "No such collaborator")
    )
)]
pub async fn get_collaborator(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Collaborator>> {
    let collaborator = fetch_collaborator(&state.pool, id).await?;
    object_guard(&state, &principal, Action::View, ResourceType::Collaborator, id).await?;
    Ok(Json(collaborator))
}

#[utoipa::path(
    put,
    path = "/collaborators/{id}",
    tag = "Collaborators",
    params(("id" = Uuid, Path, description = "Collaborator id")),
    request_body = CollaboratorUpdateRequest,
    responses(
        (status = 200, description = "Collaborator updated", body = Collaborator),
        (status = 403, description = "Missing change_collaborator"),
        (status = 404, description = "No such collaborator"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn update_collaborator(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<CollaboratorUpdateRequest>,
) -> AppResult<Json<Collaborator>> {
    let current = fetch_collaborator(&state.pool, id).await?;
    object_guard(&state, &principal, Action::Change, ResourceType::Collaborator, id).await?;

    let name = match payload.name.as_deref() {
        Some(name) => required_text(name, "name")?,
        None => current.name,
    };
    let email = match payload.email.as_deref() {
        Some(email) => {
            let email = normalize_email(&required_text(email, "email")?);
            ensure_email_free(&state.pool, &email, Some(id)).await?;
            email
        }
        None => current.email,
    };
    if payload.manager_id == Some(id) {
        return Err(AppError::bad_request("a collaborator cannot manage themselves"));
    }
    ensure_links(&state.pool, payload.department_id, payload.manager_id).await?;

    sqlx::query(
        r#"
        UPDATE collaborators
        SET name = ?, email = ?, phone = ?, position = ?, department_id = ?, manager_id = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(&email)
    .bind(payload.phone.or(current.phone))
    .bind(payload.position.or(current.position))
    .bind(payload.department_id.or(current.department_id))
    .bind(payload.manager_id.or(current.manager_id))
    .bind(payload.is_active.unwrap_or(current.is_active))
    .bind(utc_now())
    .bind(id)
    .execute(&state.pool)
    .await?;

    Ok(Json(fetch_collaborator(&state.pool, id).await?))
}

#[utoipa::path(
    delete,
    path = "/collaborators/{id}",
    tag = "Collaborators",
    params(("id" = Uuid, Path, description = "Collaborator id")),
    responses(
        (status = 204, description = "Collaborator deleted"),
        (status = 403, description = "Missing delete_collaborator"),
        (status = 404, description = "No such collaborator")
    )
)]
pub async fn delete_collaborator(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    fetch_collaborator(&state.pool, id).await?;
    object_guard(&state, &principal, Action::Delete, ResourceType::Collaborator, id).await?;

    sqlx::query("DELETE FROM collaborators WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

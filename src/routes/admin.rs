//! Operator endpoints for the access center.
//!
//! Every route here is limited to staff and superusers. Mutations go through the
//! [`GrantStore`](crate::authz::GrantStore) and are published to the activity log.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use super::auth::permissions_of;
use super::AppJson;
use crate::app::AppState;
use crate::authz::{seed_catalog, ModelPermission, Principal, ProjectAccessFlags};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::models::access::{
    AccessListQuery, DepartmentAccess, GrantDepartmentAccessRequest, GrantProjectAccessRequest, Group,
    GroupMembership, GroupMembershipRequest, ProjectAccess, SeedReport, UserFlagsRequest, UserPermissionGrant,
    UserPermissionRequest,
};
use crate::models::user::{DbUser, PermissionsResponse, User, USER_COLUMNS};
use crate::utils::utc_now;

fn require_operator(principal: &Principal) -> AppResult<()> {
    if principal.is_privileged() {
        Ok(())
    } else {
        tracing::warn!(user_id = %principal.user_id, "non-operator reached the access center");
        Err(AppError::denied())
    }
}

#[utoipa::path(
    get,
    path = "/admin/project-access",
    tag = "Access Center",
    params(("user_id" = Option<Uuid>, Query, description = "Only grants of this user")),
    responses(
        (status = 200, description = "Project access grants", body = [ProjectAccess]),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_project_access(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<AccessListQuery>,
) -> AppResult<Json<Vec<ProjectAccess>>> {
    require_operator(&principal)?;
    Ok(Json(state.engine.grants().list_project_access(query.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/project-access",
    tag = "Access Center",
    request_body = GrantProjectAccessRequest,
    responses(
        (status = 200, description = "Grant created or its flags updated", body = ProjectAccess),
        (status = 403, description = "Caller is not an operator"),
        (status = 404, description = "Unknown user or project")
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_project_access(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    AppJson(payload): AppJson<GrantProjectAccessRequest>,
) -> AppResult<Json<ProjectAccess>> {
    require_operator(&principal)?;

    let grant = state
        .engine
        .grants()
        .grant_project_access(
            payload.user_id,
            payload.project_id,
            ProjectAccessFlags::new(payload.can_view, payload.can_edit),
        )
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "granted",
        Some(principal.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    Ok(Json(grant))
}

#[utoipa::path(
    delete,
    path = "/admin/project-access/{user_id}/{project_id}",
    tag = "Access Center",
    params(
        ("user_id" = Uuid, Path, description = "Grantee"),
        ("project_id" = Uuid, Path, description = "Project")
    ),
    responses(
        (status = 204, description = "No grant remains"),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_project_access(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path((user_id, project_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    require_operator(&principal)?;
    let store = state.engine.grants();

    let existing = store
        .list_project_access(Some(user_id))
        .await?
        .into_iter()
        .find(|g| g.project_id == project_id);

    if store.revoke_project_access(user_id, project_id).await? {
        if let Some(grant) = existing {
            log_activity_with_context(
                &state.event_bus,
                "revoked",
                Some(principal.user_id),
                &grant,
                None,
                Some(RequestContext::from_headers(&headers)),
            );
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/admin/department-access",
    tag = "Access Center",
    params(("user_id" = Option<Uuid>, Query, description = "Only grants of this user")),
    responses(
        (status = 200, description = "Department access grants", body = [DepartmentAccess]),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_department_access(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<AccessListQuery>,
) -> AppResult<Json<Vec<DepartmentAccess>>> {
    require_operator(&principal)?;
    Ok(Json(state.engine.grants().list_department_access(query.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/department-access",
    tag = "Access Center",
    request_body = GrantDepartmentAccessRequest,
    responses(
        (status = 200, description = "Grant present", body = DepartmentAccess),
        (status = 403, description = "Caller is not an operator"),
        (status = 404, description = "Unknown user or department")
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_department_access(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    AppJson(payload): AppJson<GrantDepartmentAccessRequest>,
) -> AppResult<Json<DepartmentAccess>> {
    require_operator(&principal)?;

    let grant = state
        .engine
        .grants()
        .grant_department_access(payload.user_id, payload.department_id)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "granted",
        Some(principal.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    Ok(Json(grant))
}

#[utoipa::path(
    delete,
    path = "/admin/department-access/{user_id}/{department_id}",
    tag = "Access Center",
    params(
        ("user_id" = Uuid, Path, description = "Grantee"),
        ("department_id" = Uuid, Path, description = "Department")
    ),
    responses(
        (status = 204, description = "No grant remains"),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_department_access(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path((user_id, department_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    require_operator(&principal)?;
    let store = state.engine.grants();

    let existing = store
        .list_department_access(Some(user_id))
        .await?
        .into_iter()
        .find(|g| g.department_id == department_id);

    if store.revoke_department_access(user_id, department_id).await? {
        if let Some(grant) = existing {
            log_activity_with_context(
                &state.event_bus,
                "revoked",
                Some(principal.user_id),
                &grant,
                None,
                Some(RequestContext::from_headers(&headers)),
            );
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/admin/groups",
    tag = "Access Center",
    responses(
        (status = 200, description = "Groups with their permissions", body = [Group]),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_groups(State(state): State<AppState>, principal: Principal) -> AppResult<Json<Vec<Group>>> {
    require_operator(&principal)?;
    Ok(Json(state.engine.grants().list_groups().await?))
}

#[utoipa::path(
    post,
    path = "/admin/groups/seed",
    tag = "Access Center",
    responses(
        (status = 200, description = "Every catalog role exists with exactly its permissions", body = SeedReport),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn seed_groups(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
) -> AppResult<Json<SeedReport>> {
    require_operator(&principal)?;

    let report = seed_catalog(state.engine.grants(), &state.catalog).await?;
    let context = RequestContext::from_headers(&headers);
    for group in &report.groups {
        log_activity_with_context(
            &state.event_bus,
            "seeded",
            Some(principal.user_id),
            group,
            None,
            Some(context.clone()),
        );
    }
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/groups",
    tag = "Access Center",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = GroupMembershipRequest,
    responses(
        (status = 204, description = "User is a member of the group"),
        (status = 403, description = "Caller is not an operator"),
        (status = 404, description = "Unknown user or group")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_user_to_group(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    AppJson(payload): AppJson<GroupMembershipRequest>,
) -> AppResult<StatusCode> {
    require_operator(&principal)?;
    state.engine.grants().add_user_to_group(user_id, payload.group_id).await?;

    log_activity_with_context(
        &state.event_bus,
        "added",
        Some(principal.user_id),
        &GroupMembership { user_id, group_id: payload.group_id },
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}/groups/{group_id}",
    tag = "Access Center",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("group_id" = Uuid, Path, description = "Group id")
    ),
    responses(
        (status = 204, description = "User is not a member of the group"),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_user_from_group(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path((user_id, group_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    require_operator(&principal)?;

    if state.engine.grants().remove_user_from_group(user_id, group_id).await? {
        log_activity_with_context(
            &state.event_bus,
            "removed",
            Some(principal.user_id),
            &GroupMembership { user_id, group_id },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/admin/users/{id}/permissions",
    tag = "Access Center",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Effective model permissions of the user", body = PermissionsResponse),
        (status = 401, description = "User does not exist or is inactive"),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn user_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<PermissionsResponse>> {
    require_operator(&principal)?;
    let target = Principal::load(&state.pool, user_id).await.map_err(|err| match err {
        AppError::Unauthorized(_) => AppError::not_found("user not found or inactive"),
        other => other,
    })?;
    Ok(Json(permissions_of(&target)))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/permissions",
    tag = "Access Center",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserPermissionRequest,
    responses(
        (status = 204, description = "User holds the permission directly"),
        (status = 400, description = "Unknown permission codename"),
        (status = 403, description = "Caller is not an operator"),
        (status = 404, description = "Unknown user")
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_user_permission(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    AppJson(payload): AppJson<UserPermissionRequest>,
) -> AppResult<StatusCode> {
    require_operator(&principal)?;
    state.engine.grants().grant_user_permission(user_id, payload.permission).await?;

    log_activity_with_context(
        &state.event_bus,
        "granted",
        Some(principal.user_id),
        &UserPermissionGrant { user_id, permission: payload.permission },
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}/permissions/{codename}",
    tag = "Access Center",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("codename" = String, Path, description = "`view_project` or `projectsmanager.view_project`")
    ),
    responses(
        (status = 204, description = "User no longer holds the permission directly"),
        (status = 400, description = "Unknown permission codename"),
        (status = 403, description = "Caller is not an operator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_user_permission(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path((user_id, codename)): Path<(Uuid, String)>,
) -> AppResult<StatusCode> {
    require_operator(&principal)?;
    let permission: ModelPermission = codename
        .parse()
        .map_err(|_| AppError::bad_request(format!("unknown permission '{codename}'")))?;

    if state.engine.grants().revoke_user_permission(user_id, permission).await? {
        log_activity_with_context(
            &state.event_bus,
            "revoked",
            Some(principal.user_id),
            &UserPermissionGrant { user_id, permission },
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    patch,
    path = "/admin/users/{id}/flags",
    tag = "Access Center",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserFlagsRequest,
    responses(
        (status = 200, description = "Flags updated", body = User),
        (status = 403, description = "Caller may not change these flags"),
        (status = 404, description = "Unknown user")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_user_flags(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    AppJson(payload): AppJson<UserFlagsRequest>,
) -> AppResult<Json<User>> {
    require_operator(&principal)?;

    let current: User = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .into();

    // Staff manage ordinary accounts; superuser status stays with superusers.
    if !principal.is_superuser && (payload.is_superuser.is_some() || current.is_superuser) {
        tracing::warn!(user_id = %principal.user_id, target = %user_id, "staff tried to change a superuser flag");
        return Err(AppError::denied());
    }

    sqlx::query("UPDATE users SET is_staff = ?, is_active = ?, is_superuser = ?, updated_at = ? WHERE id = ?")
        .bind(payload.is_staff.unwrap_or(current.is_staff))
        .bind(payload.is_active.unwrap_or(current.is_active))
        .bind(payload.is_superuser.unwrap_or(current.is_superuser))
        .bind(utc_now())
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    let updated: User = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_one(&state.pool)
        .await?
        .into();

    log_activity_with_context(
        &state.event_bus,
        "flags_updated",
        Some(principal.user_id),
        &updated,
        Some(&current),
        Some(RequestContext::from_headers(&headers)),
    );
    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    tag = "Access Center",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted together with every grant they held"),
        (status = 403, description = "Caller may not delete this user"),
        (status = 404, description = "Unknown user")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_operator(&principal)?;

    let current: User = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .into();

    if current.is_superuser && !principal.is_superuser {
        tracing::warn!(user_id = %principal.user_id, target = %user_id, "staff tried to delete a superuser");
        return Err(AppError::denied());
    }

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &current,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_staff_and_superusers_operate() {
        let id = Uuid::new_v4();
        assert!(require_operator(&Principal::new(id).staff()).is_ok());
        assert!(require_operator(&Principal::new(id).superuser()).is_ok());
        assert!(matches!(require_operator(&Principal::new(id)), Err(AppError::Forbidden(_))));
    }
}

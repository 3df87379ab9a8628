use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{filtered_select, required_text, AppJson, MessageResponse};
use crate::app::AppState;
use crate::authz::{Principal, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::department::{DbDepartment, Department, DEPARTMENT_COLUMNS};
use crate::models::user::{
    AuthResponse, DbUser, LoginRequest, PermissionsResponse, RegisterRequest, User, USER_COLUMNS,
};
use crate::utils::{hash_password, normalize_email, utc_now, verify_password};

async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Missing name or weak password"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let name = required_text(&payload.name, "name")?;
    let email = normalize_email(&required_text(&payload.email, "email")?);

    let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
        .bind(&email)
        .fetch_one(&state.pool)
        .await?;
    if taken {
        return Err(AppError::conflict("email already in use"));
    }

    let password_hash = hash_password(&payload.password)?;
    let user_id = Uuid::new_v4();
    let now = utc_now();

    // New accounts hold no permissions until an operator grants some.
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, provider, created_at, updated_at) VALUES (?, ?, ?, ?, 'local', ?, ?)",
    )
    .bind(user_id)
    .bind(&name)
    .bind(&email)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let user = User::from(fetch_user(&state.pool, user_id).await?);
    let token = state.jwt.encode(user.id)?;
    tracing::info!(user_id = %user.id, "user registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = normalize_email(&payload.email);
    let db_user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
        .bind(&email)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }
    // Same answer as a bad password so inactive accounts cannot be told apart.
    if !db_user.is_active {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let token = state.jwt.encode(db_user.id)?;
    Ok(Json(AuthResponse { token, user: db_user.into() }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, principal: Principal) -> AppResult<Json<User>> {
    Ok(Json(fetch_user(&state.pool, principal.user_id).await?.into()))
}

#[utoipa::path(
    get,
    path = "/auth/me/permissions",
    tag = "Auth",
    responses(
        (status = 200, description = "Effective model permissions of the caller", body = PermissionsResponse),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn my_permissions(principal: Principal) -> AppResult<Json<PermissionsResponse>> {
    Ok(Json(permissions_of(&principal)))
}

pub(crate) fn permissions_of(principal: &Principal) -> PermissionsResponse {
    let mut permissions: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for perm in principal.effective_permissions() {
        permissions
            .entry(perm.model_key())
            .or_default()
            .push(perm.action().as_str().to_string());
    }

    PermissionsResponse {
        user_id: principal.user_id,
        is_superuser: principal.is_superuser,
        is_staff: principal.is_staff,
        permissions,
    }
}

#[utoipa::path(
    get,
    path = "/auth/me/departments",
    tag = "Auth",
    responses(
        (status = 200, description = "Departments the caller may browse", body = [Department]),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn my_departments(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Vec<Department>>> {
    let snapshot = state.engine.snapshot(&principal).await?;
    let predicate = snapshot.browsable_departments();

    let mut qb = filtered_select(
        format!("SELECT {DEPARTMENT_COLUMNS} FROM departments"),
        ResourceType::Department,
        &predicate,
    )?;
    qb.push(" AND departments.is_active = 1 ORDER BY departments.name, departments.id");

    let rows: Vec<DbDepartment> = qb.build_query_as().fetch_all(&state.pool).await?;
    let departments = rows.into_iter().map(Department::try_from).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(departments))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged", body = MessageResponse)),
    security(("bearerAuth" = []))
)]
pub async fn logout(auth: AuthUser) -> AppResult<Json<MessageResponse>> {
    // Tokens are stateless; the client drops its copy.
    tracing::debug!(user_id = %auth.user_id, "logout");
    Ok(Json(MessageResponse { message: "Logged out".to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{Action, ModelPermission};

    #[test]
    fn permissions_are_grouped_by_model() {
        let principal = Principal::new(Uuid::new_v4())
            .with_permissions([
                ModelPermission::lookup(ResourceType::Project, Action::View).unwrap(),
                ModelPermission::lookup(ResourceType::Project, Action::Change).unwrap(),
            ])
            .with_group(Uuid::new_v4(), [ModelPermission::lookup(ResourceType::Task, Action::View).unwrap()]);

        let response = permissions_of(&principal);
        assert_eq!(response.permissions.len(), 2);
        let project_actions = &response.permissions["projectsmanager.project"];
        assert!(project_actions.contains(&"view".to_string()));
        assert!(project_actions.contains(&"change".to_string()));
        assert_eq!(response.permissions["tasks.task"], vec!["view".to_string()]);
    }
}

pub mod admin;
pub mod auth;
pub mod collaborators;
pub mod departments;
pub mod health;
pub mod projects;
pub mod subtasks;
pub mod tasks;

use axum::extract::FromRequest;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{AccessSnapshot, Action, Predicate, Principal, ResourceScope, ResourceType};
use crate::errors::{AppError, AppResult};

/// `Json` body extractor whose rejections (bad syntax, wrong shape, missing content type) come
/// back as a 400 in the usual error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Applies one decision from the request snapshot. Denials are logged here, at the boundary,
/// and reach the client as a generic 403.
pub(crate) fn guard(
    snapshot: &AccessSnapshot,
    action: Action,
    resource_type: ResourceType,
    object: Option<&ResourceScope>,
) -> AppResult<()> {
    snapshot.authorize(action, resource_type, object).map_err(|err| {
        if matches!(err, AppError::Forbidden(_)) {
            tracing::warn!(
                user_id = %snapshot.principal().user_id,
                action = %action,
                resource_type = %resource_type,
                object_id = ?object.map(|o| o.id),
                "request denied"
            );
        }
        err
    })
}

/// Takes the request snapshot and runs the collection-level check.
pub(crate) async fn collection_guard(
    state: &AppState,
    principal: &Principal,
    action: Action,
    resource_type: ResourceType,
) -> AppResult<AccessSnapshot> {
    let snapshot = state.engine.snapshot(principal).await?;
    guard(&snapshot, action, resource_type, None)?;
    Ok(snapshot)
}

/// Object-level check for an object the caller already knows exists.
pub(crate) async fn object_guard(
    state: &AppState,
    principal: &Principal,
    action: Action,
    resource_type: ResourceType,
    id: Uuid,
) -> AppResult<(AccessSnapshot, ResourceScope)> {
    let snapshot = state.engine.snapshot(principal).await?;
    let scope = state.engine.scoping().scope_of(resource_type, id).await?;
    guard(&snapshot, action, resource_type, Some(&scope))?;
    Ok((snapshot, scope))
}

/// `select WHERE <predicate>`, ready for further `AND` filters and ordering.
pub(crate) fn filtered_select(
    select: String,
    resource_type: ResourceType,
    predicate: &Predicate,
) -> AppResult<QueryBuilder<'static, Sqlite>> {
    let mut qb = QueryBuilder::new(select);
    qb.push(" WHERE ");
    predicate.push_sql(resource_type, &mut qb)?;
    Ok(qb)
}

pub(crate) fn required_text(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

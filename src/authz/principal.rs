use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::permission::{Action, ModelPermission, ResourceType, PERMISSION_TABLE};
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;

/// The authenticated actor of a request, with its model permissions resolved.
///
/// Read-only to the policy engine. Built once per request by the extractor below.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub direct_permissions: HashSet<ModelPermission>,
    pub groups: HashSet<Uuid>,
    /// Union of the permissions held by every group in `groups`.
    pub group_permissions: HashSet<ModelPermission>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_superuser: false,
            is_staff: false,
            direct_permissions: HashSet::new(),
            groups: HashSet::new(),
            group_permissions: HashSet::new(),
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = ModelPermission>) -> Self {
        self.direct_permissions.extend(perms);
        self
    }

    pub fn with_group(mut self, group_id: Uuid, perms: impl IntoIterator<Item = ModelPermission>) -> Self {
        self.groups.insert(group_id);
        self.group_permissions.extend(perms);
        self
    }

    /// Superusers and staff bypass every check.
    pub fn is_privileged(&self) -> bool {
        self.is_superuser || self.is_staff
    }

    fn holds(&self, perm: ModelPermission) -> bool {
        self.direct_permissions.contains(&perm) || self.group_permissions.contains(&perm)
    }

    /// Model-level permission, direct or through a group. Access-center view counts as project view.
    pub fn has_model_permission(&self, resource_type: ResourceType, action: Action) -> bool {
        let held = ModelPermission::lookup(resource_type, action).map_or(false, |p| self.holds(p));
        if held {
            return true;
        }

        resource_type == ResourceType::Project
            && action == Action::View
            && ModelPermission::lookup(ResourceType::AccessCenter, Action::View).map_or(false, |p| self.holds(p))
    }

    /// Every model permission the principal holds. Superusers hold the whole table.
    pub fn effective_permissions(&self) -> BTreeSet<ModelPermission> {
        if self.is_superuser {
            return PERMISSION_TABLE.iter().copied().collect();
        }
        self.direct_permissions
            .iter()
            .chain(self.group_permissions.iter())
            .copied()
            .collect()
    }

    /// Resolves the principal behind an authenticated user id. Missing or inactive users are
    /// unauthenticated, never anonymous.
    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let principal = Self::load_in(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(principal)
    }

    /// [`Principal::load`] on a connection the caller owns, so further reads share its snapshot.
    pub async fn load_in(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Self> {
        let flags: Option<(bool, bool, bool)> =
            sqlx::query_as("SELECT is_superuser, is_staff, is_active FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;

        let (is_superuser, is_staff, is_active) =
            flags.ok_or_else(|| AppError::unauthorized("user no longer exists"))?;
        if !is_active {
            return Err(AppError::unauthorized("user is inactive"));
        }

        let direct: Vec<String> = sqlx::query_scalar("SELECT codename FROM user_permissions WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;

        let groups: Vec<Uuid> = sqlx::query_scalar("SELECT group_id FROM user_groups WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;

        let via_groups: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT gp.codename
            FROM group_permissions gp
            JOIN user_groups ug ON ug.group_id = gp.group_id
            WHERE ug.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Self {
            user_id,
            is_superuser,
            is_staff,
            direct_permissions: parse_stored(direct),
            groups: groups.into_iter().collect(),
            group_permissions: parse_stored(via_groups),
        })
    }
}

// Rows are written through the permission table, so anything else is legacy data.
fn parse_stored(codenames: Vec<String>) -> HashSet<ModelPermission> {
    codenames
        .into_iter()
        .filter_map(|c| match c.parse() {
            Ok(p) => Some(p),
            Err(_) => {
                tracing::warn!(codename = %c, "ignoring stored permission outside the permission table");
                None
            }
        })
        .collect()
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        Principal::load(&state.pool, auth.user_id).await
    }
}

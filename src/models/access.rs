use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::ModelPermission;
use crate::events::{Loggable, Severity};

/// Per-user, per-project grant. The two flags are independent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ProjectAccess {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub can_view: bool,
    pub can_edit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user, per-department grant: view over everything scoped to the department.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DepartmentAccess {
    pub id: Uuid,
    pub user_id: Uuid,
    pub department_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    /// Qualified codenames, e.g. `projectsmanager.view_project`.
    #[schema(value_type = Vec<String>)]
    pub permissions: Vec<ModelPermission>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SeededGroup {
    pub id: Uuid,
    pub name: String,
    pub created: bool,
    pub permissions: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SeedReport {
    pub created: usize,
    pub updated: usize,
    pub groups: Vec<SeededGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub user_id: Uuid,
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPermissionGrant {
    pub user_id: Uuid,
    pub permission: ModelPermission,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantProjectAccessRequest {
    pub user_id: Uuid,
    pub project_id: Uuid,
    #[serde(default = "default_true")]
    pub can_view: bool,
    #[serde(default)]
    pub can_edit: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantDepartmentAccessRequest {
    pub user_id: Uuid,
    pub department_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupMembershipRequest {
    pub group_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserPermissionRequest {
    #[schema(example = "projectsmanager.view_project", value_type = String)]
    pub permission: ModelPermission,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserFlagsRequest {
    pub is_staff: Option<bool>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AccessListQuery {
    pub user_id: Option<Uuid>,
}

// Grant mutations change what people can see, so they are kept long-term.

impl Loggable for ProjectAccess {
    fn entity_type() -> &'static str { "project_access" }
    fn subject_id(&self) -> Uuid { self.project_id }
    fn severity(&self) -> Severity { Severity::Critical }
    fn severity_for_action(&self, _action: &str) -> Severity { Severity::Critical }
}

impl Loggable for DepartmentAccess {
    fn entity_type() -> &'static str { "department_access" }
    fn subject_id(&self) -> Uuid { self.department_id }
    fn severity(&self) -> Severity { Severity::Critical }
    fn severity_for_action(&self, _action: &str) -> Severity { Severity::Critical }
}

impl Loggable for GroupMembership {
    fn entity_type() -> &'static str { "group_membership" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity_for_action(&self, _action: &str) -> Severity { Severity::Critical }
}

impl Loggable for UserPermissionGrant {
    fn entity_type() -> &'static str { "user_permission" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity_for_action(&self, _action: &str) -> Severity { Severity::Critical }
}

impl Loggable for SeededGroup {
    fn entity_type() -> &'static str { "group" }
    fn subject_id(&self) -> Uuid { self.id }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const PROJECT_COLUMNS: &str =
    "projects.id, projects.name, projects.description, projects.repo_url, projects.admin_url, projects.status, \
     projects.is_online, projects.created_at, projects.updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct DbProject {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub admin_url: Option<String>,
    pub status: Option<String>,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A project as the caller sees it. The two `user_can_*` fields come from the same policy
/// evaluation that guards the endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub admin_url: Option<String>,
    pub status: Option<String>,
    pub is_online: bool,
    pub used_by_departments: Vec<Uuid>,
    pub user_can_view: bool,
    pub user_can_edit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn assemble(row: DbProject, used_by_departments: Vec<Uuid>, user_can_view: bool, user_can_edit: bool) -> Self {
        Project {
            id: row.id,
            name: row.name,
            description: row.description,
            repo_url: row.repo_url,
            admin_url: row.admin_url,
            status: row.status,
            is_online: row.is_online,
            used_by_departments,
            user_can_view,
            user_can_edit,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// What an update returns to a caller who may edit the project but not view it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectReceipt {
    pub id: Uuid,
    pub user_can_view: bool,
    pub user_can_edit: bool,
}

impl From<&Project> for ProjectReceipt {
    fn from(project: &Project) -> Self {
        ProjectReceipt {
            id: project.id,
            user_can_view: project.user_can_view,
            user_can_edit: project.user_can_edit,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "Intranet")]
    pub name: String,
    #[schema(example = "Internal portal for the operations team.")]
    pub description: Option<String>,
    #[schema(example = "https://git.example.com/ops/intranet")]
    pub repo_url: Option<String>,
    pub admin_url: Option<String>,
    #[schema(example = "active")]
    pub status: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub used_by_departments: Vec<Uuid>,
}

/// Partial update; absent fields are left untouched. `used_by_departments`, when present,
/// replaces the whole set.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub admin_url: Option<String>,
    pub status: Option<String>,
    pub is_online: Option<bool>,
    pub used_by_departments: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectListQuery {
    pub department: Option<Uuid>,
}

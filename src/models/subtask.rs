use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const SUBTASK_COLUMNS: &str =
    "subtasks.id, subtasks.task_id, subtasks.title, subtasks.is_done, subtasks.sort_order, subtasks.created_at, subtasks.updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Subtask {
    pub id: Uuid,
    pub task_id: Uuid,
    pub title: String,
    pub is_done: bool,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubtaskCreateRequest {
    pub task_id: Uuid,
    #[schema(example = "Write migration")]
    pub title: String,
    #[serde(default)]
    pub is_done: bool,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubtaskUpdateRequest {
    pub title: Option<String>,
    pub is_done: Option<bool>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SubtaskListQuery {
    pub task: Option<Uuid>,
}

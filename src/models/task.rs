use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::InReview => "IN_REVIEW",
            TaskStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TODO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "IN_REVIEW" => Ok(TaskStatus::InReview),
            "DONE" => Ok(TaskStatus::Done),
            other => Err(AppError::bad_request(format!("invalid task status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(TaskPriority::Low),
            "MEDIUM" => Ok(TaskPriority::Medium),
            "HIGH" => Ok(TaskPriority::High),
            "URGENT" => Ok(TaskPriority::Urgent),
            other => Err(AppError::bad_request(format!("invalid task priority '{other}'"))),
        }
    }
}

pub const TASK_COLUMNS: &str = "tasks.id, tasks.project_id, tasks.responsible_id, tasks.title, tasks.description, \
     tasks.solution, tasks.status, tasks.priority, tasks.sort_order, tasks.start_date, tasks.deadline, tasks.completed_at, \
     tasks.created_at, tasks.updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub responsible_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub solution: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Collaborators the task is assigned to, besides its responsible one.
    pub assigned_to: Vec<Uuid>,
    pub sort_order: i64,
    #[schema(value_type = Option<String>, format = Date, example = "2025-10-01")]
    pub start_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date, example = "2025-10-15")]
    pub deadline: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTask {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub responsible_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub solution: Option<String>,
    pub status: String,
    pub priority: String,
    pub sort_order: i64,
    pub start_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn assemble(value: DbTask, assigned_to: Vec<Uuid>) -> Result<Self, AppError> {
        Ok(Task {
            id: value.id,
            project_id: value.project_id,
            responsible_id: value.responsible_id,
            title: value.title,
            description: value.description,
            solution: value.solution,
            status: value.status.parse()?,
            priority: value.priority.parse()?,
            assigned_to,
            sort_order: value.sort_order,
            start_date: value.start_date,
            deadline: value.deadline,
            completed_at: value.completed_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    #[schema(example = "Wire up the login form")]
    pub title: String,
    pub description: Option<String>,
    pub solution: Option<String>,
    pub project_id: Option<Uuid>,
    pub responsible_id: Option<Uuid>,
    #[serde(default)]
    pub assigned_to: Vec<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub sort_order: Option<i64>,
    #[schema(value_type = Option<String>, format = Date)]
    pub start_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub deadline: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub solution: Option<String>,
    pub project_id: Option<Uuid>,
    pub responsible_id: Option<Uuid>,
    /// Replaces the whole assignee set when present.
    pub assigned_to: Option<Vec<Uuid>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub sort_order: Option<i64>,
    #[schema(value_type = Option<String>, format = Date)]
    pub start_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub deadline: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TaskListQuery {
    pub project: Option<Uuid>,
    pub status: Option<String>,
    pub department: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    #[serde(alias = "responsavel")]
    pub responsible: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_priority_parse_case_insensitively() {
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("URGENT".parse::<TaskPriority>().unwrap(), TaskPriority::Urgent);
        assert!(matches!("blocked".parse::<TaskStatus>(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn status_serializes_in_storage_form() {
        assert_eq!(serde_json::to_string(&TaskStatus::InReview).unwrap(), "\"IN_REVIEW\"");
        assert_eq!(TaskStatus::InReview.to_string(), "IN_REVIEW");
    }
}

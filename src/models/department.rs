use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DepartmentType {
    #[default]
    Main,
    Sub,
}

impl DepartmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DepartmentType::Main => "main",
            DepartmentType::Sub => "sub",
        }
    }
}

impl std::str::FromStr for DepartmentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(DepartmentType::Main),
            "sub" => Ok(DepartmentType::Sub),
            other => Err(AppError::bad_request(format!("invalid department type '{other}'"))),
        }
    }
}

pub const DEPARTMENT_COLUMNS: &str = "departments.id, departments.name, departments.description, \
     departments.department_type, departments.parent_department_id, departments.is_active, \
     departments.created_at, departments.updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct DbDepartment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub department_type: String,
    pub parent_department_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub department_type: DepartmentType,
    pub parent_department_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbDepartment> for Department {
    type Error = AppError;

    fn try_from(value: DbDepartment) -> Result<Self, Self::Error> {
        Ok(Department {
            id: value.id,
            name: value.name,
            description: value.description,
            department_type: value.department_type.parse()?,
            parent_department_id: value.parent_department_id,
            is_active: value.is_active,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Hierarchy rule: a main department has no parent; a sub department has a main parent.
/// `parent_type` is the type of the referenced parent, when one is given and exists.
pub fn validate_hierarchy(
    department_type: DepartmentType,
    parent: Option<Uuid>,
    parent_type: Option<DepartmentType>,
    own_id: Option<Uuid>,
) -> Result<(), AppError> {
    match (department_type, parent) {
        (DepartmentType::Main, Some(_)) => Err(AppError::bad_request("a main department cannot have a parent")),
        (DepartmentType::Main, None) => Ok(()),
        (DepartmentType::Sub, None) => Err(AppError::bad_request("a sub department needs a parent department")),
        (DepartmentType::Sub, Some(parent_id)) => {
            if own_id == Some(parent_id) {
                return Err(AppError::bad_request("a department cannot be its own parent"));
            }
            match parent_type {
                Some(DepartmentType::Main) => Ok(()),
                Some(DepartmentType::Sub) => Err(AppError::bad_request("the parent must be a main department")),
                None => Err(AppError::bad_request(format!("parent department {parent_id} does not exist"))),
            }
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DepartmentCreateRequest {
    #[schema(example = "Engineering")]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub department_type: DepartmentType,
    pub parent_department_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DepartmentUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub department_type: Option<DepartmentType>,
    pub parent_department_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DepartmentListQuery {
    pub is_active: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_rules() {
        let parent = Uuid::new_v4();
        assert!(validate_hierarchy(DepartmentType::Main, None, None, None).is_ok());
        assert!(validate_hierarchy(DepartmentType::Main, Some(parent), Some(DepartmentType::Main), None).is_err());
        assert!(validate_hierarchy(DepartmentType::Sub, None, None, None).is_err());
        assert!(validate_hierarchy(DepartmentType::Sub, Some(parent), Some(DepartmentType::Main), None).is_ok());
        assert!(validate_hierarchy(DepartmentType::Sub, Some(parent), Some(DepartmentType::Sub), None).is_err());
        assert!(validate_hierarchy(DepartmentType::Sub, Some(parent), None, None).is_err());
        assert!(validate_hierarchy(DepartmentType::Sub, Some(parent), Some(DepartmentType::Main), Some(parent)).is_err());
    }
}

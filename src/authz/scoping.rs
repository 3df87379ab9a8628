//! Resource Scoping Index: which project and departments a resource is visible through.
//!
//! Projects are scoped by `used_by_departments`. Tasks inherit their project's scope, subtasks
//! their task's. A department scopes to itself and a collaborator to its department.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::permission::ResourceType;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub resource_type: ResourceType,
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub departments: BTreeSet<Uuid>,
}

impl ResourceScope {
    pub fn new(resource_type: ResourceType, id: Uuid) -> Self {
        Self { resource_type, id, project_id: None, departments: BTreeSet::new() }
    }

    /// A project is its own project.
    pub fn project(id: Uuid, departments: impl IntoIterator<Item = Uuid>) -> Self {
        Self::new(ResourceType::Project, id).in_project(id).in_departments(departments)
    }

    pub fn in_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn in_departments(mut self, departments: impl IntoIterator<Item = Uuid>) -> Self {
        self.departments.extend(departments);
        self
    }
}

#[async_trait]
pub trait ScopingIndex: Send + Sync {
    /// Set-based lookup: one query for the whole id list. Ids that do not exist are absent
    /// from the result.
    async fn scopes_of(&self, resource_type: ResourceType, ids: &[Uuid]) -> AppResult<HashMap<Uuid, ResourceScope>>;

    async fn scope_of(&self, resource_type: ResourceType, id: Uuid) -> AppResult<ResourceScope> {
        self.scopes_of(resource_type, &[id])
            .await?
            .remove(&id)
            .ok_or_else(|| AppError::malformed(format!("{resource_type} {id} cannot be resolved")))
    }

    async fn departments_of(&self, resource_type: ResourceType, id: Uuid) -> AppResult<BTreeSet<Uuid>> {
        Ok(self.scope_of(resource_type, id).await?.departments)
    }
}

#[derive(Clone)]
pub struct SqliteScopingIndex {
    pool: SqlitePool,
}

impl SqliteScopingIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// Each query yields (resource id, project id, department id) rows; the department is NULL when
// the resource has none.
fn scope_query(resource_type: ResourceType) -> AppResult<&'static str> {
    let query = match resource_type {
        ResourceType::Project => {
            "SELECT p.id, p.id, pd.department_id FROM projects p \
             LEFT JOIN project_departments pd ON pd.project_id = p.id WHERE p.id IN ("
        }
        ResourceType::Task => {
            "SELECT t.id, t.project_id, pd.department_id FROM tasks t \
             LEFT JOIN project_departments pd ON pd.project_id = t.project_id WHERE t.id IN ("
        }
        ResourceType::Subtask => {
            "SELECT s.id, t.project_id, pd.department_id FROM subtasks s \
             JOIN tasks t ON t.id = s.task_id \
             LEFT JOIN project_departments pd ON pd.project_id = t.project_id WHERE s.id IN ("
        }
        ResourceType::Department => "SELECT d.id, NULL, d.id FROM departments d WHERE d.id IN (",
        ResourceType::Collaborator => "SELECT c.id, NULL, c.department_id FROM collaborators c WHERE c.id IN (",
        ResourceType::AccessCenter => {
            return Err(AppError::malformed("the access center has no objects to scope"));
        }
    };
    Ok(query)
}

#[async_trait]
impl ScopingIndex for SqliteScopingIndex {
    async fn scopes_of(&self, resource_type: ResourceType, ids: &[Uuid]) -> AppResult<HashMap<Uuid, ResourceScope>> {
        let head = scope_query(resource_type)?;
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(head);
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        list.push_unseparated(")");

        let rows: Vec<(Uuid, Option<Uuid>, Option<Uuid>)> = qb.build_query_as().fetch_all(&self.pool).await?;

        let mut scopes: HashMap<Uuid, ResourceScope> = HashMap::with_capacity(ids.len());
        for (id, project_id, department_id) in rows {
            let scope = scopes.entry(id).or_insert_with(|| ResourceScope {
                resource_type,
                id,
                project_id,
                departments: BTreeSet::new(),
            });
            if let Some(department_id) = department_id {
                scope.departments.insert(department_id);
            }
        }

        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_scope_is_its_own_project() {
        let id = Uuid::new_v4();
        let d = Uuid::new_v4();
        let scope = ResourceScope::project(id, [d]);
        assert_eq!(scope.project_id, Some(id));
        assert!(scope.departments.contains(&d));
    }

    #[test]
    fn access_center_cannot_be_scoped() {
        assert!(matches!(
            scope_query(ResourceType::AccessCenter),
            Err(AppError::MalformedPolicyQuery(_))
        ));
    }
}

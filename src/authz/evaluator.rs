use std::sync::Arc;

use sqlx::SqlitePool;
use uuid::Uuid;

use super::grants::{GrantStore, PrincipalGrants, SqliteGrantStore};
use super::permission::{Action, ResourceType};
use super::predicate::Predicate;
use super::principal::Principal;
use super::scoping::{ResourceScope, ScopingIndex, SqliteScopingIndex};
use crate::errors::{AppError, AppResult};

/// Policy evaluation engine.
///
/// Holds no per-request state. Each request takes an [`AccessSnapshot`] (one read of the
/// principal's grants) and every decision for that request is computed from it.
///
/// Evaluation order, first match wins:
/// 1. superuser or staff -> allow
/// 2. no object: read with model `view` (or any grant that can reveal an object) -> allow;
///    other actions need the model permission
/// 3. Project object with a ProjectAccess row: `view` -> `can_view`, `change` -> `can_edit`
/// 4. read action and a DepartmentAccess on any department the object is scoped to -> allow
/// 5. model permission (direct or via group)
/// 6. deny
#[derive(Clone)]
pub struct PolicyEngine {
    grants: Arc<dyn GrantStore>,
    scoping: Arc<dyn ScopingIndex>,
}

impl PolicyEngine {
    pub fn new(grants: Arc<dyn GrantStore>, scoping: Arc<dyn ScopingIndex>) -> Self {
        Self { grants, scoping }
    }

    pub fn sqlite(pool: SqlitePool) -> Self {
        Self::new(
            Arc::new(SqliteGrantStore::new(pool.clone())),
            Arc::new(SqliteScopingIndex::new(pool)),
        )
    }

    pub fn grants(&self) -> &dyn GrantStore {
        self.grants.as_ref()
    }

    pub fn scoping(&self) -> &dyn ScopingIndex {
        self.scoping.as_ref()
    }

    /// Re-reads the principal together with its grants, so every decision of one request comes
    /// from a single state of the store.
    pub async fn snapshot(&self, principal: &Principal) -> AppResult<AccessSnapshot> {
        let (principal, grants) = self.grants.principal_snapshot(principal.user_id).await?;
        Ok(AccessSnapshot::new(principal, grants))
    }

    async fn resolve(&self, resource_type: ResourceType, object: Option<Uuid>) -> AppResult<Option<ResourceScope>> {
        match object {
            None => Ok(None),
            Some(_) if !resource_type.has_objects() => {
                Err(AppError::malformed(format!("{resource_type} has no objects")))
            }
            Some(id) => self.scoping.scope_of(resource_type, id).await.map(Some),
        }
    }

    pub async fn can(
        &self,
        principal: &Principal,
        action: Action,
        resource_type: ResourceType,
        object: Option<Uuid>,
    ) -> AppResult<bool> {
        if principal.is_privileged() {
            return AccessSnapshot::new(principal.clone(), PrincipalGrants::default()).can(action, resource_type, None);
        }
        let scope = self.resolve(resource_type, object).await?;
        self.snapshot(principal).await?.can(action, resource_type, scope.as_ref())
    }

    /// Deny becomes `403` at the HTTP boundary.
    pub async fn authorize(
        &self,
        principal: &Principal,
        action: Action,
        resource_type: ResourceType,
        object: Option<Uuid>,
    ) -> AppResult<()> {
        if self.can(principal, action, resource_type, object).await? {
            Ok(())
        } else {
            Err(AppError::denied())
        }
    }

    pub async fn visible_filter(
        &self,
        principal: &Principal,
        resource_type: ResourceType,
        action: Action,
    ) -> AppResult<Predicate> {
        self.snapshot(principal).await?.filter_visible(resource_type, action)
    }
}

/// A principal plus its granular grants, frozen for one request.
#[derive(Debug, Clone)]
pub struct AccessSnapshot {
    principal: Principal,
    grants: PrincipalGrants,
}

impl AccessSnapshot {
    pub fn new(principal: Principal, grants: PrincipalGrants) -> Self {
        Self { principal, grants }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn grants(&self) -> &PrincipalGrants {
        &self.grants
    }

    fn decide(&self, action: Action, resource_type: ResourceType, object: Option<Uuid>, allowed: bool, rule: &str) -> bool {
        tracing::debug!(
            user_id = %self.principal.user_id,
            action = %action,
            resource_type = %resource_type,
            object_id = ?object,
            rule,
            allowed,
            "policy decision"
        );
        allowed
    }

    /// Whether some grant could reveal an object of this type, ahead of per-object filtering.
    fn has_granular_read(&self, resource_type: ResourceType) -> bool {
        match resource_type {
            ResourceType::AccessCenter => false,
            ResourceType::Project => {
                !self.grants.departments.is_empty() || self.grants.project_access.values().any(|f| f.can_view)
            }
            _ => !self.grants.departments.is_empty(),
        }
    }

    pub fn can(&self, action: Action, resource_type: ResourceType, object: Option<&ResourceScope>) -> AppResult<bool> {
        let object_id = object.map(|o| o.id);

        if self.principal.is_superuser {
            return Ok(self.decide(action, resource_type, object_id, true, "superuser"));
        }
        if self.principal.is_staff {
            return Ok(self.decide(action, resource_type, object_id, true, "staff"));
        }

        let Some(scope) = object else {
            let model = self.principal.has_model_permission(resource_type, action);
            if model {
                return Ok(self.decide(action, resource_type, None, true, "model_permission"));
            }
            let granular = action.is_read() && self.has_granular_read(resource_type);
            return Ok(self.decide(action, resource_type, None, granular, "collection_grants"));
        };

        if !resource_type.has_objects() || scope.resource_type != resource_type {
            return Err(AppError::malformed(format!(
                "{} object checked as {resource_type}",
                scope.resource_type
            )));
        }

        if resource_type == ResourceType::Project {
            if let Some(flags) = self.grants.project_access.get(&scope.id) {
                match action {
                    Action::View => {
                        return Ok(self.decide(action, resource_type, object_id, flags.can_view, "project_access"));
                    }
                    Action::Change => {
                        return Ok(self.decide(action, resource_type, object_id, flags.can_edit, "project_access"));
                    }
                    Action::Add | Action::Delete => {}
                }
            }
        }

        if action.is_read() && !scope.departments.is_disjoint(&self.grants.departments) {
            return Ok(self.decide(action, resource_type, object_id, true, "department_access"));
        }

        let model = self.principal.has_model_permission(resource_type, action);
        Ok(self.decide(action, resource_type, object_id, model, "model_permission"))
    }

    pub fn authorize(&self, action: Action, resource_type: ResourceType, object: Option<&ResourceScope>) -> AppResult<()> {
        if self.can(action, resource_type, object)? {
            Ok(())
        } else {
            Err(AppError::denied())
        }
    }

    /// A predicate selecting exactly the objects for which `can(action, resource_type, object)`
    /// holds.
    pub fn filter_visible(&self, resource_type: ResourceType, action: Action) -> AppResult<Predicate> {
        if !resource_type.has_objects() {
            return Err(AppError::malformed(format!("{resource_type} has no objects to list")));
        }
        if self.principal.is_privileged() {
            return Ok(Predicate::All);
        }

        let via_departments = if action.is_read() {
            Predicate::scoped_to_any(self.grants.departments.iter().copied())
        } else {
            Predicate::Nothing
        };
        let fallback = via_departments.or(Predicate::when(self.principal.has_model_permission(resource_type, action)));

        let granted: Vec<Uuid> = match (resource_type, action) {
            (ResourceType::Project, Action::View) => {
                self.grants.project_access.iter().filter(|(_, f)| f.can_view).map(|(id, _)| *id).collect()
            }
            (ResourceType::Project, Action::Change) => {
                self.grants.project_access.iter().filter(|(_, f)| f.can_edit).map(|(id, _)| *id).collect()
            }
            _ => return Ok(fallback),
        };
        // A ProjectAccess row decides on its own; only projects without one fall back.
        let decided = self.grants.project_access.keys().copied();

        Ok(Predicate::id_in(granted).or(Predicate::id_in(decided).not().and(fallback)))
    }

    /// Departments the principal may browse: all of them for staff, superusers and access-center
    /// viewers, otherwise the ones granted through DepartmentAccess.
    pub fn browsable_departments(&self) -> Predicate {
        if self.principal.is_privileged()
            || self.principal.has_model_permission(ResourceType::AccessCenter, Action::View)
        {
            Predicate::All
        } else {
            Predicate::id_in(self.grants.departments.iter().copied())
        }
    }
}

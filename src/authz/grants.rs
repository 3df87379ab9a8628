//! Grant Store: durable, atomic storage of model permissions, groups and the two granular
//! grant tables.
//!
//! Every mutation runs in one transaction. Referents are checked inside it, so a failed
//! operation leaves the store unchanged. Duplicate grants merge through the unique indexes.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::catalog::RoleCatalog;
use super::permission::ModelPermission;
use super::principal::Principal;
use crate::db::WriteTx;
use crate::errors::{AppError, AppResult};
use crate::models::access::{DepartmentAccess, Group, ProjectAccess, SeedReport, SeededGroup};
use crate::utils::utc_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProjectAccessFlags {
    pub can_view: bool,
    pub can_edit: bool,
}

impl ProjectAccessFlags {
    pub fn new(can_view: bool, can_edit: bool) -> Self {
        Self { can_view, can_edit }
    }
}

/// A principal's granular grants, read once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalGrants {
    pub project_access: HashMap<Uuid, ProjectAccessFlags>,
    pub departments: BTreeSet<Uuid>,
}

impl PrincipalGrants {
    pub fn with_project(mut self, project_id: Uuid, can_view: bool, can_edit: bool) -> Self {
        self.project_access.insert(project_id, ProjectAccessFlags::new(can_view, can_edit));
        self
    }

    pub fn with_department(mut self, department_id: Uuid) -> Self {
        self.departments.insert(department_id);
        self
    }
}

#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Snapshot of one principal's ProjectAccess rows and DepartmentAccess departments.
    async fn grants_for(&self, user_id: Uuid) -> AppResult<PrincipalGrants>;

    /// The principal's flags and model permissions read in the same transaction as its grants,
    /// so a request never mixes state from both sides of a concurrent change. Privileged
    /// principals get empty grants.
    async fn principal_snapshot(&self, user_id: Uuid) -> AppResult<(Principal, PrincipalGrants)>;

    /// Upsert: re-granting updates the flags in place.
    async fn grant_project_access(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        flags: ProjectAccessFlags,
    ) -> AppResult<ProjectAccess>;

    /// Returns whether a row was removed. Revoking a missing grant is a no-op.
    async fn revoke_project_access(&self, user_id: Uuid, project_id: Uuid) -> AppResult<bool>;

    async fn grant_department_access(&self, user_id: Uuid, department_id: Uuid) -> AppResult<DepartmentAccess>;

    async fn revoke_department_access(&self, user_id: Uuid, department_id: Uuid) -> AppResult<bool>;

    /// Creates the group if needed and replaces its permission set wholesale.
    async fn seed_group(&self, name: &str, permissions: &[ModelPermission]) -> AppResult<SeededGroup>;

    async fn add_user_to_group(&self, user_id: Uuid, group_id: Uuid) -> AppResult<()>;

    async fn remove_user_from_group(&self, user_id: Uuid, group_id: Uuid) -> AppResult<bool>;

    async fn grant_user_permission(&self, user_id: Uuid, permission: ModelPermission) -> AppResult<()>;

    async fn revoke_user_permission(&self, user_id: Uuid, permission: ModelPermission) -> AppResult<bool>;

    async fn list_project_access(&self, user_id: Option<Uuid>) -> AppResult<Vec<ProjectAccess>>;

    async fn list_department_access(&self, user_id: Option<Uuid>) -> AppResult<Vec<DepartmentAccess>>;

    async fn list_groups(&self) -> AppResult<Vec<Group>>;
}

/// Seeds every role of the catalog. Safe to run repeatedly.
pub async fn seed_catalog(store: &dyn GrantStore, catalog: &RoleCatalog) -> AppResult<SeedReport> {
    let mut report = SeedReport { created: 0, updated: 0, groups: Vec::with_capacity(catalog.roles.len()) };

    for role in &catalog.roles {
        let seeded = store.seed_group(&role.name, &role.permissions).await?;
        if seeded.created {
            report.created += 1;
        } else {
            report.updated += 1;
        }
        tracing::info!(group = %seeded.name, permissions = seeded.permissions, created = seeded.created, "seeded group");
        report.groups.push(seeded);
    }

    Ok(report)
}

#[derive(Clone)]
pub struct SqliteGrantStore {
    pool: SqlitePool,
}

impl SqliteGrantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn ensure_exists(
    conn: &mut SqliteConnection,
    table: &'static str,
    label: &'static str,
    id: Uuid,
) -> AppResult<()> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)");
    let exists: bool = sqlx::query_scalar(&sql).bind(id).fetch_one(conn).await?;
    if exists {
        Ok(())
    } else {
        Err(AppError::not_found(format!("{label} {id} not found")))
    }
}

async fn read_grants(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<PrincipalGrants> {
    let rows: Vec<(Uuid, bool, bool)> =
        sqlx::query_as("SELECT project_id, can_view, can_edit FROM project_access WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;

    let departments: Vec<Uuid> = sqlx::query_scalar("SELECT department_id FROM department_access WHERE user_id = ?")
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(PrincipalGrants {
        project_access: rows
            .into_iter()
            .map(|(project_id, can_view, can_edit)| (project_id, ProjectAccessFlags::new(can_view, can_edit)))
            .collect(),
        departments: departments.into_iter().collect(),
    })
}

const PROJECT_ACCESS_COLUMNS: &str = "id, user_id, project_id, can_view, can_edit, created_at, updated_at";
const DEPARTMENT_ACCESS_COLUMNS: &str = "id, user_id, department_id, created_at";

#[async_trait]
impl GrantStore for SqliteGrantStore {
    async fn grants_for(&self, user_id: Uuid) -> AppResult<PrincipalGrants> {
        let mut tx = self.pool.begin().await?;
        let grants = read_grants(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(grants)
    }

    async fn principal_snapshot(&self, user_id: Uuid) -> AppResult<(Principal, PrincipalGrants)> {
        let mut tx = self.pool.begin().await?;
        let principal = Principal::load_in(&mut tx, user_id).await?;
        let grants = if principal.is_privileged() {
            PrincipalGrants::default()
        } else {
            read_grants(&mut tx, user_id).await?
        };
        tx.commit().await?;
        Ok((principal, grants))
    }

    async fn grant_project_access(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        flags: ProjectAccessFlags,
    ) -> AppResult<ProjectAccess> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        ensure_exists(tx.conn()?, "users", "user", user_id).await?;
        ensure_exists(tx.conn()?, "projects", "project", project_id).await?;

        let now = utc_now();
        sqlx::query(
            r#"
            INSERT INTO project_access (id, user_id, project_id, can_view, can_edit, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, project_id) DO UPDATE SET
                can_view = excluded.can_view,
                can_edit = excluded.can_edit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(project_id)
        .bind(flags.can_view)
        .bind(flags.can_edit)
        .bind(now)
        .bind(now)
        .execute(tx.conn()?)
        .await?;

        let row: ProjectAccess = sqlx::query_as(&format!(
            "SELECT {PROJECT_ACCESS_COLUMNS} FROM project_access WHERE user_id = ? AND project_id = ?"
        ))
        .bind(user_id)
        .bind(project_id)
        .fetch_one(tx.conn()?)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn revoke_project_access(&self, user_id: Uuid, project_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM project_access WHERE user_id = ? AND project_id = ?")
            .bind(user_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn grant_department_access(&self, user_id: Uuid, department_id: Uuid) -> AppResult<DepartmentAccess> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        ensure_exists(tx.conn()?, "users", "user", user_id).await?;
        ensure_exists(tx.conn()?, "departments", "department", department_id).await?;

        sqlx::query(
            r#"
            INSERT INTO department_access (id, user_id, department_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, department_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(department_id)
        .bind(utc_now())
        .execute(tx.conn()?)
        .await?;

        let row: DepartmentAccess = sqlx::query_as(&format!(
            "SELECT {DEPARTMENT_ACCESS_COLUMNS} FROM department_access WHERE user_id = ? AND department_id = ?"
        ))
        .bind(user_id)
        .bind(department_id)
        .fetch_one(tx.conn()?)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn revoke_department_access(&self, user_id: Uuid, department_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM department_access WHERE user_id = ? AND department_id = ?")
            .bind(user_id)
            .bind(department_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn seed_group(&self, name: &str, permissions: &[ModelPermission]) -> AppResult<SeededGroup> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("group name cannot be empty"));
        }

        let mut tx = WriteTx::begin(&self.pool).await?;
        let now = utc_now();

        let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM auth_groups WHERE name = ?")
            .bind(name)
            .fetch_optional(tx.conn()?)
            .await?;

        let (id, created) = match existing {
            Some(id) => {
                sqlx::query("UPDATE auth_groups SET updated_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(id)
                    .execute(tx.conn()?)
                    .await?;
                (id, false)
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query("INSERT INTO auth_groups (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
                    .bind(id)
                    .bind(name)
                    .bind(now)
                    .bind(now)
                    .execute(tx.conn()?)
                    .await?;
                (id, true)
            }
        };

        sqlx::query("DELETE FROM group_permissions WHERE group_id = ?")
            .bind(id)
            .execute(tx.conn()?)
            .await?;

        let distinct: BTreeSet<ModelPermission> = permissions.iter().copied().collect();
        for perm in &distinct {
            sqlx::query("INSERT INTO group_permissions (group_id, codename, created_at) VALUES (?, ?, ?)")
                .bind(id)
                .bind(perm.codename())
                .bind(now)
                .execute(tx.conn()?)
                .await?;
        }

        tx.commit().await?;

        Ok(SeededGroup { id, name: name.to_string(), created, permissions: distinct.len() })
    }

    async fn add_user_to_group(&self, user_id: Uuid, group_id: Uuid) -> AppResult<()> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        ensure_exists(tx.conn()?, "users", "user", user_id).await?;
        ensure_exists(tx.conn()?, "auth_groups", "group", group_id).await?;

        sqlx::query(
            "INSERT INTO user_groups (user_id, group_id, created_at) VALUES (?, ?, ?) ON CONFLICT(user_id, group_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(group_id)
        .bind(utc_now())
        .execute(tx.conn()?)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_user_from_group(&self, user_id: Uuid, group_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM user_groups WHERE user_id = ? AND group_id = ?")
            .bind(user_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn grant_user_permission(&self, user_id: Uuid, permission: ModelPermission) -> AppResult<()> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        ensure_exists(tx.conn()?, "users", "user", user_id).await?;

        sqlx::query(
            "INSERT INTO user_permissions (user_id, codename, created_at) VALUES (?, ?, ?) ON CONFLICT(user_id, codename) DO NOTHING",
        )
        .bind(user_id)
        .bind(permission.codename())
        .bind(utc_now())
        .execute(tx.conn()?)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn revoke_user_permission(&self, user_id: Uuid, permission: ModelPermission) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM user_permissions WHERE user_id = ? AND codename = ?")
            .bind(user_id)
            .bind(permission.codename())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_project_access(&self, user_id: Option<Uuid>) -> AppResult<Vec<ProjectAccess>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query_as(&format!(
                    "SELECT {PROJECT_ACCESS_COLUMNS} FROM project_access WHERE user_id = ? ORDER BY created_at"
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!("SELECT {PROJECT_ACCESS_COLUMNS} FROM project_access ORDER BY created_at"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    async fn list_department_access(&self, user_id: Option<Uuid>) -> AppResult<Vec<DepartmentAccess>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query_as(&format!(
                    "SELECT {DEPARTMENT_ACCESS_COLUMNS} FROM department_access WHERE user_id = ? ORDER BY created_at"
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {DEPARTMENT_ACCESS_COLUMNS} FROM department_access ORDER BY created_at"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn list_groups(&self) -> AppResult<Vec<Group>> {
        let groups: Vec<(Uuid, String)> = sqlx::query_as("SELECT id, name FROM auth_groups ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let pairs: Vec<(Uuid, String)> = sqlx::query_as("SELECT group_id, codename FROM group_permissions")
            .fetch_all(&self.pool)
            .await?;

        let mut by_group: HashMap<Uuid, BTreeSet<ModelPermission>> = HashMap::new();
        for (group_id, codename) in pairs {
            if let Ok(perm) = codename.parse::<ModelPermission>() {
                by_group.entry(group_id).or_default().insert(perm);
            }
        }

        Ok(groups
            .into_iter()
            .map(|(id, name)| Group {
                permissions: by_group.remove(&id).map(|s| s.into_iter().collect()).unwrap_or_default(),
                id,
                name,
            })
            .collect())
    }
}

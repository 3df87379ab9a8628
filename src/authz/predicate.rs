//! Declarative visibility predicates.
//!
//! A `Predicate` is evaluated either in memory against a [`ResourceScope`] or rendered into a
//! SQL `WHERE` fragment for a listing query. Both readings must select the same objects.
//!
//! Listing queries select from the bare table name (`FROM projects`, `FROM tasks`, ...) so the
//! rendered fragment can reference its columns.

use std::collections::BTreeSet;

use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::permission::ResourceType;
use super::scoping::ResourceScope;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    All,
    Nothing,
    /// The object's own id is in the set.
    IdIn(BTreeSet<Uuid>),
    /// The object belongs to one of the projects.
    ProjectIn(BTreeSet<Uuid>),
    /// The object is scoped to at least one of the departments.
    ScopedToAny(BTreeSet<Uuid>),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn id_in(ids: impl IntoIterator<Item = Uuid>) -> Self {
        let ids: BTreeSet<Uuid> = ids.into_iter().collect();
        if ids.is_empty() {
            Predicate::Nothing
        } else {
            Predicate::IdIn(ids)
        }
    }

    pub fn project_in(ids: impl IntoIterator<Item = Uuid>) -> Self {
        let ids: BTreeSet<Uuid> = ids.into_iter().collect();
        if ids.is_empty() {
            Predicate::Nothing
        } else {
            Predicate::ProjectIn(ids)
        }
    }

    pub fn scoped_to_any(departments: impl IntoIterator<Item = Uuid>) -> Self {
        let departments: BTreeSet<Uuid> = departments.into_iter().collect();
        if departments.is_empty() {
            Predicate::Nothing
        } else {
            Predicate::ScopedToAny(departments)
        }
    }

    pub fn when(condition: bool) -> Self {
        if condition {
            Predicate::All
        } else {
            Predicate::Nothing
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Predicate::All => Predicate::Nothing,
            Predicate::Nothing => Predicate::All,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::Nothing, _) | (_, Predicate::Nothing) => Predicate::Nothing,
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), p) | (p, Predicate::And(mut a)) => {
                a.push(p);
                Predicate::And(a)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::All, _) | (_, Predicate::All) => Predicate::All,
            (Predicate::Nothing, p) | (p, Predicate::Nothing) => p,
            (Predicate::Or(mut a), Predicate::Or(b)) => {
                a.extend(b);
                Predicate::Or(a)
            }
            (Predicate::Or(mut a), p) | (p, Predicate::Or(mut a)) => {
                a.push(p);
                Predicate::Or(a)
            }
            (a, b) => Predicate::Or(vec![a, b]),
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Predicate::Nothing)
    }

    pub fn matches(&self, scope: &ResourceScope) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Nothing => false,
            Predicate::IdIn(ids) => ids.contains(&scope.id),
            Predicate::ProjectIn(ids) => scope.project_id.map_or(false, |p| ids.contains(&p)),
            Predicate::ScopedToAny(departments) => !departments.is_disjoint(&scope.departments),
            Predicate::Not(inner) => !inner.matches(scope),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(scope)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(scope)),
        }
    }

    /// Appends this predicate as a boolean SQL expression over `resource_type`'s table.
    /// Every fragment is two-valued (never NULL), so `NOT` stays exact.
    pub fn push_sql(&self, resource_type: ResourceType, qb: &mut QueryBuilder<'_, Sqlite>) -> AppResult<()> {
        let columns = Columns::of(resource_type)?;
        self.render(&columns, qb);
        Ok(())
    }

    fn render(&self, columns: &Columns, qb: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            Predicate::All => {
                qb.push("1");
            }
            Predicate::Nothing => {
                qb.push("0");
            }
            Predicate::IdIn(ids) => {
                qb.push(columns.id);
                push_id_list(qb, ids);
            }
            Predicate::ProjectIn(ids) => match columns.project {
                Some(project) => {
                    qb.push("(").push(project).push(" IS NOT NULL AND ").push(project);
                    push_id_list(qb, ids);
                    qb.push(")");
                }
                None => {
                    qb.push("0");
                }
            },
            Predicate::ScopedToAny(departments) => {
                qb.push(columns.scoped_head);
                push_id_list(qb, departments);
                qb.push(columns.scoped_tail);
            }
            Predicate::Not(inner) => {
                qb.push("NOT (");
                inner.render(columns, qb);
                qb.push(")");
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                let joiner = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                if parts.is_empty() {
                    qb.push(if matches!(self, Predicate::And(_)) { "1" } else { "0" });
                    return;
                }
                qb.push("(");
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        qb.push(joiner);
                    }
                    part.render(columns, qb);
                }
                qb.push(")");
            }
        }
    }
}

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &BTreeSet<Uuid>) {
    qb.push(" IN (");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
}

/// Column expressions for one listing table.
struct Columns {
    id: &'static str,
    project: Option<&'static str>,
    /// `scoped_head <dept id list> scoped_tail` is true when the row is scoped to a listed department.
    scoped_head: &'static str,
    scoped_tail: &'static str,
}

impl Columns {
    fn of(resource_type: ResourceType) -> AppResult<Self> {
        let columns = match resource_type {
            ResourceType::Project => Columns {
                id: "projects.id",
                project: Some("projects.id"),
                scoped_head: "EXISTS (SELECT 1 FROM project_departments pd \
                              WHERE pd.project_id = projects.id AND pd.department_id",
                scoped_tail: ")",
            },
            ResourceType::Task => Columns {
                id: "tasks.id",
                project: Some("tasks.project_id"),
                scoped_head: "EXISTS (SELECT 1 FROM project_departments pd \
                              WHERE pd.project_id = tasks.project_id AND pd.department_id",
                scoped_tail: ")",
            },
            ResourceType::Subtask => Columns {
                id: "subtasks.id",
                project: Some("(SELECT st.project_id FROM tasks st WHERE st.id = subtasks.task_id)"),
                scoped_head: "EXISTS (SELECT 1 FROM tasks st JOIN project_departments pd ON pd.project_id = st.project_id \
                              WHERE st.id = subtasks.task_id AND pd.department_id",
                scoped_tail: ")",
            },
            ResourceType::Department => Columns {
                id: "departments.id",
                project: None,
                scoped_head: "departments.id",
                scoped_tail: "",
            },
            ResourceType::Collaborator => Columns {
                id: "collaborators.id",
                project: None,
                scoped_head: "(collaborators.department_id IS NOT NULL AND collaborators.department_id",
                scoped_tail: ")",
            },
            ResourceType::AccessCenter => {
                return Err(AppError::malformed("the access center has no rows to filter"));
            }
        };
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn empty_sets_collapse_to_nothing() {
        assert_eq!(Predicate::id_in(Vec::new()), Predicate::Nothing);
        assert_eq!(Predicate::scoped_to_any(Vec::new()), Predicate::Nothing);
        assert_eq!(Predicate::project_in(Vec::new()), Predicate::Nothing);
    }

    #[test]
    fn constants_absorb() {
        let p = Predicate::id_in(ids(1));
        assert_eq!(p.clone().and(Predicate::All), p);
        assert_eq!(p.clone().and(Predicate::Nothing), Predicate::Nothing);
        assert_eq!(p.clone().or(Predicate::Nothing), p);
        assert_eq!(p.clone().or(Predicate::All), Predicate::All);
        assert_eq!(p.clone().not().not(), p);
        assert_eq!(Predicate::All.not(), Predicate::Nothing);
    }

    #[test]
    fn nested_connectives_flatten() {
        let [a, b, c] = [ids(1), ids(1), ids(1)].map(Predicate::id_in);
        match a.or(b).or(c) {
            Predicate::Or(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected a flat Or, got {other:?}"),
        }
    }

    #[test]
    fn matches_against_scopes() {
        let d = ids(2);
        let project = Uuid::new_v4();
        let task = ResourceScope::new(ResourceType::Task, Uuid::new_v4())
            .in_project(project)
            .in_departments([d[0]]);
        let orphan = ResourceScope::new(ResourceType::Task, Uuid::new_v4());

        assert!(Predicate::scoped_to_any([d[0]]).matches(&task));
        assert!(!Predicate::scoped_to_any([d[1]]).matches(&task));
        assert!(Predicate::project_in([project]).matches(&task));
        assert!(!Predicate::project_in([project]).matches(&orphan));
        assert!(Predicate::project_in([project]).not().matches(&orphan));
        assert!(Predicate::id_in([task.id]).and(Predicate::scoped_to_any([d[0]])).matches(&task));
    }

    #[test]
    fn renders_sql_with_bound_ids() {
        let p = Predicate::id_in(ids(2)).or(Predicate::scoped_to_any(ids(1)).not());
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM projects WHERE ");
        p.push_sql(ResourceType::Project, &mut qb).unwrap();
        let sql = qb.sql();

        assert!(sql.contains("projects.id IN (?, ?)"), "{sql}");
        assert!(sql.contains("NOT (EXISTS (SELECT 1 FROM project_departments pd"), "{sql}");
        assert!(sql.contains(" OR "), "{sql}");
    }

    #[test]
    fn nothing_renders_as_false() {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM departments WHERE ");
        Predicate::Nothing.push_sql(ResourceType::Department, &mut qb).unwrap();
        assert!(qb.sql().ends_with("WHERE 0"));
    }

    #[test]
    fn access_center_has_no_table() {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("");
        assert!(Predicate::All.push_sql(ResourceType::AccessCenter, &mut qb).is_err());
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::permission::{Action, ModelPermission, ResourceType};
use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: String,
    pub permissions: Vec<ModelPermission>,
}

/// Role name → permission set, applied by `seed_group`. Built once at startup and handed to
/// whatever seeds groups (CLI, admin reseed endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCatalog {
    pub roles: Vec<RoleDefinition>,
}

fn perms(pairs: &[(ResourceType, &[Action])]) -> Vec<ModelPermission> {
    pairs
        .iter()
        .flat_map(|(rt, actions)| actions.iter().filter_map(move |a| ModelPermission::lookup(*rt, *a)))
        .collect()
}

const CRUD: &[Action] = &[Action::Add, Action::Change, Action::Delete, Action::View];
const VIEW: &[Action] = &[Action::View];

impl Default for RoleCatalog {
    fn default() -> Self {
        use ResourceType::{Project, Subtask, Task};

        let role = |name: &str, pairs: &[(ResourceType, &[Action])]| RoleDefinition {
            name: name.to_string(),
            permissions: perms(pairs),
        };

        Self {
            roles: vec![
                role("Administrador Completo", &[(Project, CRUD), (Task, CRUD), (Subtask, CRUD)]),
                role("Gerenciador de Projetos", &[(Project, CRUD), (Task, VIEW), (Subtask, VIEW)]),
                role("Gerenciador de Kanban", &[(Task, CRUD), (Subtask, CRUD), (Project, VIEW)]),
                role("Visualizador Completo", &[(Project, VIEW), (Task, VIEW), (Subtask, VIEW)]),
                role("Visualizador de Projetos", &[(Project, VIEW), (Task, VIEW), (Subtask, VIEW)]),
                role("Visualizador de Kanban", &[(Task, VIEW), (Subtask, VIEW), (Project, VIEW)]),
                role("GRUPO", &[]),
            ],
        }
    }
}

impl RoleCatalog {
    /// Built-in catalog unless `ROLE_CATALOG_PATH` points at a JSON override.
    pub fn from_env() -> Result<Self, AppError> {
        match std::env::var("ROLE_CATALOG_PATH") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::configuration(format!("cannot read role catalog {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let catalog: RoleCatalog = serde_json::from_str(raw)
            .map_err(|err| AppError::configuration(format!("invalid role catalog: {err}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut names = std::collections::HashSet::new();
        for role in &self.roles {
            if role.name.trim().is_empty() {
                return Err(AppError::configuration("role catalog contains an unnamed role"));
            }
            if !names.insert(role.name.as_str()) {
                return Err(AppError::configuration(format!("duplicate role '{}'", role.name)));
            }
        }
        Ok(())
    }

    pub fn role(&self, name: &str) -> Option<&RoleDefinition> {
        self.roles.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_seven_roles() {
        let catalog = RoleCatalog::default();
        assert_eq!(catalog.roles.len(), 7);
        assert!(catalog.role("GRUPO").unwrap().permissions.is_empty());
        assert_eq!(catalog.role("Administrador Completo").unwrap().permissions.len(), 12);
    }

    #[test]
    fn viewer_roles_hold_only_view() {
        let catalog = RoleCatalog::default();
        for name in ["Visualizador Completo", "Visualizador de Projetos", "Visualizador de Kanban"] {
            let role = catalog.role(name).unwrap();
            assert!(role.permissions.iter().all(|p| p.action() == Action::View), "{name}");
        }
    }

    #[test]
    fn json_override_uses_qualified_codenames() {
        let catalog = RoleCatalog::from_json(
            r#"{"roles": [{"name": "Auditor", "permissions": ["projectsmanager.view_accesscenter", "view_task"]}]}"#,
        )
        .unwrap();

        let auditor = catalog.role("Auditor").unwrap();
        assert_eq!(auditor.permissions.len(), 2);
        assert_eq!(auditor.permissions[0].resource_type(), ResourceType::AccessCenter);
    }

    #[test]
    fn json_override_rejects_unknown_permissions_and_duplicates() {
        assert!(RoleCatalog::from_json(r#"{"roles": [{"name": "X", "permissions": ["fly_task"]}]}"#).is_err());
        assert!(RoleCatalog::from_json(
            r#"{"roles": [{"name": "X", "permissions": []}, {"name": "X", "permissions": []}]}"#
        )
        .is_err());
    }
}

//! Typed model permissions.
//!
//! A model permission is a `(ResourceType, Action)` pair. Only the pairs listed in
//! [`PERMISSION_TABLE`] exist; every conversion to and from the legacy codename strings
//! (`view_project`, `projectsmanager.view_project`) goes through that table.

use std::fmt;
use std::str::FromStr;

use axum::http::Method;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

use crate::errors::AppError;

/// The class of object being protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Project,
    Task,
    Subtask,
    Department,
    Collaborator,
    /// Permission-only type: viewing the access center is viewing projects.
    AccessCenter,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Project,
        ResourceType::Task,
        ResourceType::Subtask,
        ResourceType::Department,
        ResourceType::Collaborator,
        ResourceType::AccessCenter,
    ];

    pub fn app_label(self) -> &'static str {
        match self {
            ResourceType::Project | ResourceType::AccessCenter => "projectsmanager",
            ResourceType::Task | ResourceType::Subtask => "tasks",
            ResourceType::Department => "departments",
            ResourceType::Collaborator => "collaborators",
        }
    }

    pub fn model_name(self) -> &'static str {
        match self {
            ResourceType::Project => "project",
            ResourceType::Task => "task",
            ResourceType::Subtask => "subtask",
            ResourceType::Department => "department",
            ResourceType::Collaborator => "collaborator",
            ResourceType::AccessCenter => "accesscenter",
        }
    }

    /// Whether instances of this type exist and can be the object of a check.
    pub fn has_objects(self) -> bool {
        !matches!(self, ResourceType::AccessCenter)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name())
    }
}

impl FromStr for ResourceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "");
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.model_name() == wanted)
            .ok_or_else(|| AppError::malformed(format!("unknown resource type '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Add,
    Change,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::View, Action::Add, Action::Change, Action::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Add => "add",
            Action::Change => "change",
            Action::Delete => "delete",
        }
    }

    pub fn is_read(self) -> bool {
        matches!(self, Action::View)
    }

    /// Fixed verb mapping. `None` means the request carries no data and is always allowed
    /// (OPTIONS); unknown verbs map to `Some(Err)`.
    pub fn from_method(method: &Method) -> Option<Result<Action, AppError>> {
        match *method {
            Method::GET | Method::HEAD => Some(Ok(Action::View)),
            Method::POST => Some(Ok(Action::Add)),
            Method::PUT | Method::PATCH => Some(Ok(Action::Change)),
            Method::DELETE => Some(Ok(Action::Delete)),
            Method::OPTIONS => None,
            ref other => Some(Err(AppError::malformed(format!("no action for method {other}")))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AppError::malformed(format!("unknown action '{s}'")))
    }
}

/// A global permission on a resource type. Construct through [`ModelPermission::lookup`] or by
/// parsing a codename; both reject pairs outside the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelPermission {
    resource_type: ResourceType,
    action: Action,
}

const fn perm(resource_type: ResourceType, action: Action) -> ModelPermission {
    ModelPermission { resource_type, action }
}

/// Every permission that exists. The access center only defines `view`.
pub const PERMISSION_TABLE: &[ModelPermission] = &[
    perm(ResourceType::Project, Action::View),
    perm(ResourceType::Project, Action::Add),
    perm(ResourceType::Project, Action::Change),
    perm(ResourceType::Project, Action::Delete),
    perm(ResourceType::Task, Action::View),
    perm(ResourceType::Task, Action::Add),
    perm(ResourceType::Task, Action::Change),
    perm(ResourceType::Task, Action::Delete),
    perm(ResourceType::Subtask, Action::View),
    perm(ResourceType::Subtask, Action::Add),
    perm(ResourceType::Subtask, Action::Change),
    perm(ResourceType::Subtask, Action::Delete),
    perm(ResourceType::Department, Action::View),
    perm(ResourceType::Department, Action::Add),
    perm(ResourceType::Department, Action::Change),
    perm(ResourceType::Department, Action::Delete),
    perm(ResourceType::Collaborator, Action::View),
    perm(ResourceType::Collaborator, Action::Add),
    perm(ResourceType::Collaborator, Action::Change),
    perm(ResourceType::Collaborator, Action::Delete),
    perm(ResourceType::AccessCenter, Action::View),
];

impl ModelPermission {
    pub fn lookup(resource_type: ResourceType, action: Action) -> Option<Self> {
        PERMISSION_TABLE
            .iter()
            .copied()
            .find(|p| p.resource_type == resource_type && p.action == action)
    }

    pub fn resource_type(self) -> ResourceType {
        self.resource_type
    }

    pub fn action(self) -> Action {
        self.action
    }

    /// Legacy codename, e.g. `change_task`. This is the stored form.
    pub fn codename(self) -> String {
        format!("{}_{}", self.action.as_str(), self.resource_type.model_name())
    }

    /// Codename qualified by its app label, e.g. `tasks.change_task`.
    pub fn qualified_name(self) -> String {
        format!("{}.{}", self.resource_type.app_label(), self.codename())
    }

    /// `app_label.model` key used when grouping permissions for display.
    pub fn model_key(self) -> String {
        format!("{}.{}", self.resource_type.app_label(), self.resource_type.model_name())
    }
}

impl fmt::Display for ModelPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

impl FromStr for ModelPermission {
    type Err = AppError;

    /// Accepts both `view_project` and `projectsmanager.view_project`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (label, codename) = match s.split_once('.') {
            Some((label, codename)) => (Some(label), codename),
            None => (None, s),
        };

        PERMISSION_TABLE
            .iter()
            .copied()
            .find(|p| {
                p.codename() == codename
                    && label.map_or(true, |label| label == p.resource_type.app_label())
            })
            .ok_or_else(|| AppError::malformed(format!("unknown permission '{s}'")))
    }
}

impl Serialize for ModelPermission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.qualified_name())
    }
}

impl<'de> Deserialize<'de> for ModelPermission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codenames_are_unique_across_the_table() {
        let mut seen = std::collections::HashSet::new();
        for p in PERMISSION_TABLE {
            assert!(seen.insert(p.codename()), "duplicate codename {}", p.codename());
        }
    }

    #[test]
    fn codename_contract_matches_legacy_strings() {
        let p = ModelPermission::lookup(ResourceType::Project, Action::View).unwrap();
        assert_eq!(p.codename(), "view_project");
        assert_eq!(p.qualified_name(), "projectsmanager.view_project");

        let s = ModelPermission::lookup(ResourceType::Subtask, Action::Delete).unwrap();
        assert_eq!(s.qualified_name(), "tasks.delete_subtask");
    }

    #[test]
    fn parses_both_codename_forms() {
        let short: ModelPermission = "change_task".parse().unwrap();
        let long: ModelPermission = "tasks.change_task".parse().unwrap();
        assert_eq!(short, long);
        assert_eq!(short.resource_type(), ResourceType::Task);
        assert_eq!(short.action(), Action::Change);
    }

    #[test]
    fn rejects_unknown_or_mislabelled_codenames() {
        assert!("fly_project".parse::<ModelPermission>().is_err());
        assert!("tasks.view_project".parse::<ModelPermission>().is_err());
        assert!("change_accesscenter".parse::<ModelPermission>().is_err());
    }

    #[test]
    fn access_center_only_has_view() {
        assert!(ModelPermission::lookup(ResourceType::AccessCenter, Action::View).is_some());
        assert!(ModelPermission::lookup(ResourceType::AccessCenter, Action::Change).is_none());
    }

    #[test]
    fn verbs_map_to_actions() {
        let action = |m: Method| Action::from_method(&m).map(|r| r.unwrap());
        assert_eq!(action(Method::GET), Some(Action::View));
        assert_eq!(action(Method::HEAD), Some(Action::View));
        assert_eq!(action(Method::POST), Some(Action::Add));
        assert_eq!(action(Method::PUT), Some(Action::Change));
        assert_eq!(action(Method::PATCH), Some(Action::Change));
        assert_eq!(action(Method::DELETE), Some(Action::Delete));
        assert_eq!(action(Method::OPTIONS), None);
        assert!(matches!(Action::from_method(&Method::TRACE), Some(Err(_))));
    }

    #[test]
    fn resource_types_parse_leniently() {
        assert_eq!("Project".parse::<ResourceType>().unwrap(), ResourceType::Project);
        assert_eq!("access_center".parse::<ResourceType>().unwrap(), ResourceType::AccessCenter);
        assert!(matches!(
            "widget".parse::<ResourceType>(),
            Err(AppError::MalformedPolicyQuery(_))
        ));
    }
}

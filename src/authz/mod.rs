//! Authorization: the policy evaluation engine.
//!
//! Four signals are combined, in this order of precedence:
//! - superuser / staff override
//! - per-user, per-project grants (`ProjectAccess`)
//! - per-user, per-department grants (`DepartmentAccess`, read only)
//! - model permissions held directly or through groups

pub mod catalog;
pub mod evaluator;
pub mod grants;
pub mod permission;
pub mod predicate;
pub mod principal;
pub mod scoping;

pub use catalog::{RoleCatalog, RoleDefinition};
pub use evaluator::{AccessSnapshot, PolicyEngine};
pub use grants::{seed_catalog, GrantStore, PrincipalGrants, ProjectAccessFlags, SqliteGrantStore};
pub use permission::{Action, ModelPermission, ResourceType, PERMISSION_TABLE};
pub use predicate::Predicate;
pub use principal::Principal;
pub use scoping::{ResourceScope, ScopingIndex, SqliteScopingIndex};

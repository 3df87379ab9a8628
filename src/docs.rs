use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::server::Server;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes::{self, admin, auth, collaborators, departments, health, projects, subtasks, tasks};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::register,
        auth::login,
        auth::me,
        auth::my_permissions,
        auth::my_departments,
        auth::logout,
        projects::list_projects,
        projects::create_project,
        projects::get_project,
        projects::update_project,
        projects::delete_project,
        tasks::list_tasks,
        tasks::create_task,
        tasks::get_task,
        tasks::update_task,
        tasks::delete_task,
        subtasks::list_subtasks,
        subtasks::create_subtask,
        subtasks::get_subtask,
        subtasks::update_subtask,
        subtasks::delete_subtask,
        departments::list_departments,
        departments::create_department,
        departments::get_department,
        departments::update_department,
        departments::delete_department,
        collaborators::list_collaborators,
        collaborators::create_collaborator,
        collaborators::get_collaborator,
        collaborators::update_collaborator,
        collaborators::delete_collaborator,
        admin::list_project_access,
        admin::grant_project_access,
        admin::revoke_project_access,
        admin::list_department_access,
        admin::grant_department_access,
        admin::revoke_department_access,
        admin::list_groups,
        admin::seed_groups,
        admin::add_user_to_group,
        admin::remove_user_from_group,
        admin::user_permissions,
        admin::grant_user_permission,
        admin::revoke_user_permission,
        admin::update_user_flags,
        admin::delete_user,
    ),
    components(
        schemas(
            routes::MessageResponse,
            health::HealthResponse,
            models::user::User,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::user::PermissionsResponse,
            models::project::Project,
            models::project::ProjectReceipt,
            models::project::ProjectCreateRequest,
            models::project::ProjectUpdateRequest,
            models::task::Task,
            models::task::TaskStatus,
            models::task::TaskPriority,
            models::task::TaskCreateRequest,
            models::task::TaskUpdateRequest,
            models::subtask::Subtask,
            models::subtask::SubtaskCreateRequest,
            models::subtask::SubtaskUpdateRequest,
            models::department::Department,
            models::department::DepartmentType,
            models::department::DepartmentCreateRequest,
            models::department::DepartmentUpdateRequest,
            models::collaborator::Collaborator,
            models::collaborator::CollaboratorCreateRequest,
            models::collaborator::CollaboratorUpdateRequest,
            models::access::ProjectAccess,
            models::access::DepartmentAccess,
            models::access::Group,
            models::access::SeededGroup,
            models::access::SeedReport,
            models::access::GrantProjectAccessRequest,
            models::access::GrantDepartmentAccessRequest,
            models::access::GroupMembershipRequest,
            models::access::UserPermissionRequest,
            models::access::UserFlagsRequest,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Auth", description = "Authentication and the caller's own access"),
        (name = "Projects", description = "Projects, filtered by what the caller may see"),
        (name = "Tasks", description = "Tasks and subtasks"),
        (name = "Departments", description = "Department hierarchy"),
        (name = "Collaborators", description = "People working on tasks"),
        (name = "Access Center", description = "Grants, groups and user flags (staff only)")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
        );
    }
}

/// The served document, pointing Try-it-out at the local server.
pub fn build_openapi(port: u16) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![Server::new(format!("http://localhost:{port}"))]);
    doc
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    let json_route = get(move || {
        let doc = doc.clone();
        async move { Json(doc) }
    });

    Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config))
}

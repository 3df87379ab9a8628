use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{PolicyEngine, RoleCatalog};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{admin, auth, collaborators, departments, health, projects, subtasks, tasks};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub engine: Arc<PolicyEngine>,
    pub catalog: Arc<RoleCatalog>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, catalog: RoleCatalog, event_bus: EventBus) -> Self {
        Self {
            engine: Arc::new(PolicyEngine::sqlite(pool.clone())),
            pool,
            jwt: Arc::new(jwt),
            catalog: Arc::new(catalog),
            event_bus,
        }
    }
}

/// Builds the router from environment configuration and starts the activity listener.
pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt = JwtConfig::from_env()?;
    let catalog = RoleCatalog::from_env()?;

    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    Ok(build_router(AppState::new(pool, jwt, catalog, event_bus)))
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/me/permissions", get(auth::my_permissions))
        .route("/me/departments", get(auth::my_departments))
        .route("/logout", post(auth::logout));

    let project_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route(
            "/:id",
            get(projects::get_project)
                .put(projects::update_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        );

    let task_routes = Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/:id",
            get(tasks::get_task)
                .put(tasks::update_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        );

    let subtask_routes = Router::new()
        .route("/", get(subtasks::list_subtasks).post(subtasks::create_subtask))
        .route(
            "/:id",
            get(subtasks::get_subtask)
                .put(subtasks::update_subtask)
                .patch(subtasks::update_subtask)
                .delete(subtasks::delete_subtask),
        );

    let department_routes = Router::new()
        .route("/", get(departments::list_departments).post(departments::create_department))
        .route(
            "/:id",
            get(departments::get_department)
                .put(departments::update_department)
                .patch(departments::update_department)
                .delete(departments::delete_department),
        );

    let collaborator_routes = Router::new()
        .route("/", get(collaborators::list_collaborators).post(collaborators::create_collaborator))
        .route(
            "/:id",
            get(collaborators::get_collaborator)
                .put(collaborators::update_collaborator)
                .patch(collaborators::update_collaborator)
                .delete(collaborators::delete_collaborator),
        );

    let admin_routes = Router::new()
        .route(
            "/project-access",
            get(admin::list_project_access).post(admin::grant_project_access),
        )
        .route("/project-access/:user_id/:project_id", delete(admin::revoke_project_access))
        .route(
            "/department-access",
            get(admin::list_department_access).post(admin::grant_department_access),
        )
        .route(
            "/department-access/:user_id/:department_id",
            delete(admin::revoke_department_access),
        )
        .route("/groups", get(admin::list_groups))
        .route("/groups/seed", post(admin::seed_groups))
        .route("/users/:id", delete(admin::delete_user))
        .route("/users/:id/groups", post(admin::add_user_to_group))
        .route("/users/:id/groups/:group_id", delete(admin::remove_user_from_group))
        .route(
            "/users/:id/permissions",
            get(admin::user_permissions).post(admin::grant_user_permission),
        )
        .route("/users/:id/permissions/:codename", delete(admin::revoke_user_permission))
        .route("/users/:id/flags", axum::routing::patch(admin::update_user_flags));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/projects", project_routes)
        .nest("/tasks", task_routes)
        .nest("/subtasks", subtask_routes)
        .nest("/departments", department_routes)
        .nest("/collaborators", collaborator_routes)
        .nest("/admin", admin_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

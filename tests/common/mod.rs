#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt;
use uuid::Uuid;

use kanban_hub::authz::ModelPermission;
use kanban_hub::create_app;
use kanban_hub::db;
use kanban_hub::jwt::JwtConfig;
use kanban_hub::utils::utc_now;

pub const SECRET: &str = "test-secret";

pub struct TestApp {
    // Keeps the database file alive for the test.
    _dir: TempDir,
    pub pool: SqlitePool,
    pub app: Router,
}

pub async fn migrated_pool(dir: &TempDir) -> Result<SqlitePool> {
    let opts = db::tune(SqliteConnectOptions::new().filename(dir.path().join("test.db")));
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

pub async fn spawn() -> Result<TestApp> {
    let dir = tempdir().context("failed to create tempdir")?;
    let pool = migrated_pool(&dir).await?;

    std::env::set_var("JWT_SECRET", SECRET);
    let app = create_app(pool.clone()).await?;
    Ok(TestApp { _dir: dir, pool, app })
}

impl TestApp {
    pub async fn request(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
        Ok((status, value))
    }

    /// Sends `body` as-is, for payloads that are not valid JSON.
    pub async fn request_raw(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        content_type: Option<&str>,
        body: &str,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let resp = self.app.clone().oneshot(builder.body(Body::from(body.to_string()))?).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.request("GET", uri, Some(token), None).await
    }
}

#[derive(Clone, Copy, Default)]
pub struct Flags {
    pub superuser: bool,
    pub staff: bool,
}

/// Inserts a user directly. The stored hash is a placeholder, so these accounts
/// authenticate through [`token_for`] rather than `/auth/login`.
pub async fn insert_user(pool: &SqlitePool, email: &str, flags: Flags) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, is_superuser, is_staff, created_at, updated_at) VALUES (?, ?, ?, 'x', ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(email)
    .bind(email)
    .bind(flags.superuser)
    .bind(flags.staff)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub fn token_for(user_id: Uuid) -> Result<String> {
    Ok(JwtConfig::new(SECRET, 1).encode(user_id)?)
}

pub async fn give_permission(pool: &SqlitePool, user_id: Uuid, codename: &str) -> Result<()> {
    let perm: ModelPermission = codename.parse()?;
    sqlx::query("INSERT INTO user_permissions (user_id, codename, created_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(perm.codename())
        .bind(utc_now())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_department(pool: &SqlitePool, name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO departments (id, name, department_type, is_active, created_at, updated_at) VALUES (?, ?, 'main', 1, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn insert_project(pool: &SqlitePool, name: &str, departments: &[Uuid]) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query("INSERT INTO projects (id, name, is_online, created_at, updated_at) VALUES (?, ?, 0, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    for department in departments {
        sqlx::query("INSERT INTO project_departments (project_id, department_id) VALUES (?, ?)")
            .bind(id)
            .bind(department)
            .execute(pool)
            .await?;
    }
    Ok(id)
}

pub async fn insert_task(pool: &SqlitePool, title: &str, project: Option<Uuid>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO tasks (id, project_id, title, status, priority, sort_order, created_at, updated_at) VALUES (?, ?, ?, 'TODO', 'MEDIUM', 0, ?, ?)",
    )
    .bind(id)
    .bind(project)
    .bind(title)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn insert_subtask(pool: &SqlitePool, title: &str, task: Uuid) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO subtasks (id, task_id, title, is_done, sort_order, created_at, updated_at) VALUES (?, ?, ?, 0, 0, ?, ?)",
    )
    .bind(id)
    .bind(task)
    .bind(title)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn insert_collaborator(pool: &SqlitePool, email: &str, department: Option<Uuid>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO collaborators (id, name, email, department_id, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(email)
    .bind(email)
    .bind(department)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub fn ids(list: &Value) -> Vec<String> {
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("id").and_then(Value::as_str).map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub db_error: Option<String>,
    /// Roles the operator can seed with `POST /admin/groups/seed`.
    pub roles: usize,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Liveness plus a database round trip", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_check = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool).await;

    let (db_ok, db_error) = match db_check {
        Ok(_) => (true, None),
        Err(err) => {
            tracing::error!(error = %err, "health check could not reach the database");
            (false, Some(err.to_string()))
        }
    };

    Json(HealthResponse {
        status: "ok",
        db_ok,
        db_error,
        roles: state.catalog.roles.len(),
    })
}

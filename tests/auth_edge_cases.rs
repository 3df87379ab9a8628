mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn auth_edge_cases() -> Result<()> {
    let t = common::spawn().await?;

    // 1. Register with short password
    let (status, _) = t
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({"name": "Short Pass", "email": "short@example.com", "password": "short"})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "Should fail with bad request for short password");

    // 2. Register a valid user
    let (status, registered) = t
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({"name": "Valid User", "email": "Valid@Example.com", "password": "password123"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(registered["user"]["email"], "valid@example.com");
    assert_eq!(registered["user"]["is_staff"], false);

    // 3. Same address, different case
    let (status, _) = t
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({"name": "Again", "email": "valid@example.com", "password": "password123"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // 4. Wrong password and unknown email look the same
    for (email, password) in [("valid@example.com", "wrongpassword"), ("nobody@example.com", "password123")] {
        let (status, _) = t
            .request("POST", "/auth/login", None, Some(json!({"email": email, "password": password})))
            .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // 5. Login and use the token
    let (status, login) = t
        .request(
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "VALID@example.com", "password": "password123"})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let token = login["token"].as_str().context("missing token")?.to_string();

    let (status, me) = t.get("/auth/me", &token).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], registered["user"]["id"]);

    // A fresh account holds nothing.
    let (_, perms) = t.get("/auth/me/permissions", &token).await?;
    assert_eq!(perms["permissions"], json!({}));
    let (status, _) = t.get("/projects", &token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, departments) = t.get("/auth/me/departments", &token).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(departments, json!([]));

    let (status, _) = t.request("POST", "/auth/logout", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    // 6. Deactivated accounts cannot log in
    sqlx::query("UPDATE users SET is_active = 0 WHERE email = 'valid@example.com'")
        .execute(&t.pool)
        .await?;
    let (status, _) = t
        .request(
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "valid@example.com", "password": "password123"})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn superuser_permissions_cover_every_model() -> Result<()> {
    let t = common::spawn().await?;
    let root = common::insert_user(&t.pool, "root@example.com", common::Flags { superuser: true, staff: false }).await?;
    let token = common::token_for(root)?;

    let (status, perms) = t.get("/auth/me/permissions", &token).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(perms["is_superuser"], true);
    let models = perms["permissions"].as_object().context("permissions object")?;
    assert_eq!(models.len(), 6);
    assert_eq!(perms["permissions"]["projectsmanager.accesscenter"], json!(["view"]));
    assert_eq!(perms["permissions"]["tasks.subtask"].as_array().map(Vec::len), Some(4));
    Ok(())
}

#[tokio::test]
async fn unreadable_bodies_get_the_error_envelope() -> Result<()> {
    let t = common::spawn().await?;
    let staff = common::insert_user(&t.pool, "staff@example.com", common::Flags { superuser: false, staff: true }).await?;
    let token = common::token_for(staff)?;

    let (status, body) = t
        .request_raw("POST", "/auth/login", None, Some("application/json"), "{\"email\": ")
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = t
        .request("POST", "/projects", Some(&token), Some(json!({"name": 5})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = t
        .request_raw("POST", "/departments", Some(&token), None, "{\"name\": \"Ops\"}")
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
    Ok(())
}

mod common;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tower::util::ServiceExt;

use common::{insert_department, insert_project, insert_user, spawn, token_for, Flags};

#[tokio::test]
async fn access_center_is_for_operators_only() -> Result<()> {
    let t = spawn().await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    common::give_permission(&t.pool, user, "projectsmanager.view_accesscenter").await?;
    let token = token_for(user)?;

    let (status, _) = t.request("GET", "/admin/project-access", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Viewing the access center as a model permission is not operator status.
    let (status, _) = t.get("/admin/project-access", &token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.request("POST", "/admin/groups/seed", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn project_access_grants_upsert_and_revoke_idempotently() -> Result<()> {
    let t = spawn().await?;
    let staff = insert_user(&t.pool, "staff@example.com", Flags { superuser: false, staff: true }).await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    let project = insert_project(&t.pool, "Alpha", &[]).await?;
    let token = token_for(staff)?;

    let grant = json!({"user_id": user, "project_id": project});
    let (status, first) = t.request("POST", "/admin/project-access", Some(&token), Some(grant)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["can_view"], true);
    assert_eq!(first["can_edit"], false);

    let upgrade = json!({"user_id": user, "project_id": project, "can_view": true, "can_edit": true});
    let (status, second) = t.request("POST", "/admin/project-access", Some(&token), Some(upgrade)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["id"], first["id"], "re-granting updates the existing row");
    assert_eq!(second["can_edit"], true);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM project_access").fetch_one(&t.pool).await?;
    assert_eq!(rows, 1);

    let (_, listed) = t.get(&format!("/admin/project-access?user_id={user}"), &token).await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let uri = format!("/admin/project-access/{user}/{project}");
    let (status, _) = t.request("DELETE", &uri, Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.request("DELETE", &uri, Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT, "revoking a missing grant is a no-op");

    let missing = json!({"user_id": user, "project_id": uuid::Uuid::new_v4()});
    let (status, _) = t.request("POST", "/admin/project-access", Some(&token), Some(missing)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn department_grants_follow_the_same_contract() -> Result<()> {
    let t = spawn().await?;
    let root = insert_user(&t.pool, "root@example.com", Flags { superuser: true, staff: false }).await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    let sales = insert_department(&t.pool, "Sales").await?;
    let token = token_for(root)?;

    let body = json!({"user_id": user, "department_id": sales});
    let (status, first) = t.request("POST", "/admin/department-access", Some(&token), Some(body.clone())).await?;
    assert_eq!(status, StatusCode::OK);
    let (_, again) = t.request("POST", "/admin/department-access", Some(&token), Some(body)).await?;
    assert_eq!(again["id"], first["id"]);

    let user_token = token_for(user)?;
    let (status, _) = t.get(&format!("/departments/{sales}"), &user_token).await?;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/admin/department-access/{user}/{sales}");
    for _ in 0..2 {
        let (status, _) = t.request("DELETE", &uri, Some(&token), None).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
    let (status, _) = t.get(&format!("/departments/{sales}"), &user_token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn reseeding_groups_is_idempotent_and_membership_grants_permissions() -> Result<()> {
    let t = spawn().await?;
    let staff = insert_user(&t.pool, "staff@example.com", Flags { superuser: false, staff: true }).await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    let token = token_for(staff)?;

    let (status, first) = t.request("POST", "/admin/groups/seed", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["created"], 7);
    let (_, second) = t.request("POST", "/admin/groups/seed", Some(&token), None).await?;
    assert_eq!(second["created"], 0);
    assert_eq!(second["updated"], 7);

    let (_, groups) = t.get("/admin/groups", &token).await?;
    let groups = groups.as_array().context("groups array")?;
    assert_eq!(groups.len(), 7);
    let kanban = groups
        .iter()
        .find(|g| g["name"] == "Gerenciador de Kanban")
        .context("kanban manager role")?;
    assert_eq!(kanban["permissions"].as_array().map(Vec::len), Some(9));
    let empty = groups.iter().find(|g| g["name"] == "GRUPO").context("empty role")?;
    assert_eq!(empty["permissions"], json!([]));

    let (status, _) = t
        .request(
            "POST",
            &format!("/admin/users/{user}/groups"),
            Some(&token),
            Some(json!({"group_id": kanban["id"]})),
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, perms) = t.get(&format!("/admin/users/{user}/permissions"), &token).await?;
    assert_eq!(perms["permissions"]["tasks.task"].as_array().map(Vec::len), Some(4));
    assert_eq!(perms["permissions"]["projectsmanager.project"], json!(["view"]));

    let user_token = token_for(user)?;
    let (status, _) = t
        .request("POST", "/tasks", Some(&user_token), Some(json!({"title": "Ship it"})))
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = t
        .request(
            "DELETE",
            &format!("/admin/users/{user}/groups/{}", kanban["id"].as_str().unwrap_or_default()),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.get("/tasks", &user_token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn direct_permissions_accept_both_codename_forms() -> Result<()> {
    let t = spawn().await?;
    let staff = insert_user(&t.pool, "staff@example.com", Flags { superuser: false, staff: true }).await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    let token = token_for(staff)?;
    let uri = format!("/admin/users/{user}/permissions");

    let (status, _) = t
        .request("POST", &uri, Some(&token), Some(json!({"permission": "collaborators.view_collaborator"})))
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = t
        .request("POST", &uri, Some(&token), Some(json!({"permission": "view_nothing"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (_, perms) = t.get(&uri, &token).await?;
    assert_eq!(perms["permissions"], json!({"collaborators.collaborator": ["view"]}));

    let (status, _) = t
        .request("DELETE", &format!("{uri}/view_collaborator"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.request("DELETE", &format!("{uri}/bogus"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, perms) = t.get(&uri, &token).await?;
    assert_eq!(perms["permissions"], json!({}));
    Ok(())
}

#[tokio::test]
async fn only_superusers_touch_superuser_status() -> Result<()> {
    let t = spawn().await?;
    let root = insert_user(&t.pool, "root@example.com", Flags { superuser: true, staff: false }).await?;
    let staff = insert_user(&t.pool, "staff@example.com", Flags { superuser: false, staff: true }).await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    let uri = format!("/admin/users/{user}/flags");

    let (status, _) = t
        .request("PATCH", &uri, Some(&token_for(staff)?), Some(json!({"is_superuser": true})))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .request("PATCH", &uri, Some(&token_for(staff)?), Some(json!({"is_staff": true})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_staff"], true);
    assert_eq!(body["is_superuser"], false);

    let (status, body) = t
        .request("PATCH", &uri, Some(&token_for(root)?), Some(json!({"is_superuser": true})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_superuser"], true);

    let (status, _) = t
        .request(
            "PATCH",
            &format!("/admin/users/{}/flags", uuid::Uuid::new_v4()),
            Some(&token_for(root)?),
            Some(json!({"is_active": false})),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn deactivated_accounts_lose_their_session() -> Result<()> {
    let t = spawn().await?;
    let root = insert_user(&t.pool, "root@example.com", Flags { superuser: true, staff: false }).await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    let user_token = token_for(user)?;

    let (status, _) = t.get("/auth/me", &user_token).await?;
    assert_eq!(status, StatusCode::OK);

    t.request(
        "PATCH",
        &format!("/admin/users/{user}/flags"),
        Some(&token_for(root)?),
        Some(json!({"is_active": false})),
    )
    .await?;

    let (status, _) = t.get("/auth/me", &user_token).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn grant_mutations_land_in_the_hash_chained_log() -> Result<()> {
    let t = spawn().await?;
    let staff = insert_user(&t.pool, "staff@example.com", Flags { superuser: false, staff: true }).await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    let project = insert_project(&t.pool, "Alpha", &[]).await?;
    let token = token_for(staff)?;

    t.request("POST", "/admin/project-access", Some(&token), Some(json!({"user_id": user, "project_id": project})))
        .await?;
    t.request("DELETE", &format!("/admin/project-access/{user}/{project}"), Some(&token), None)
        .await?;

    // The listener writes asynchronously.
    let mut rows: Vec<(String, String, Option<String>, String, i64)> = Vec::new();
    for _ in 0..25 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        rows = sqlx::query_as("SELECT event_name, severity, prev_hash, hash, seq FROM activity_log ORDER BY seq")
            .fetch_all(&t.pool)
            .await?;
        if rows.len() >= 2 {
            break;
        }
    }

    assert_eq!(rows.len(), 2, "expected grant and revoke events, got {rows:?}");
    assert_eq!(rows[0].0, "project_access.granted");
    assert_eq!(rows[1].0, "project_access.revoked");
    assert!(rows.iter().all(|r| r.1 == "critical"));
    assert_eq!(rows[0].2, None);
    assert_eq!(rows[1].2.as_deref(), Some(rows[0].3.as_str()));
    assert_eq!((rows[0].4, rows[1].4), (1, 2));

    let properties: String = sqlx::query_scalar("SELECT properties FROM activity_log WHERE seq = 1")
        .fetch_one(&t.pool)
        .await?;
    let event: Value = serde_json::from_str(&properties)?;
    assert_eq!(event["actor_id"], json!(staff));
    Ok(())
}

async fn grant_rows(pool: &sqlx::SqlitePool) -> Result<(i64, i64)> {
    let projects: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM project_access").fetch_one(pool).await?;
    let departments: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM department_access").fetch_one(pool).await?;
    Ok((projects, departments))
}

#[tokio::test]
async fn deleting_a_referent_takes_its_grants_along() -> Result<()> {
    let t = spawn().await?;
    let root = insert_user(&t.pool, "root@example.com", Flags { superuser: true, staff: false }).await?;
    let token = token_for(root)?;
    let alice = insert_user(&t.pool, "alice@example.com", Flags::default()).await?;
    let bob = insert_user(&t.pool, "bob@example.com", Flags::default()).await?;
    let alpha = insert_project(&t.pool, "Alpha", &[]).await?;
    let beta = insert_project(&t.pool, "Beta", &[]).await?;
    let sales = insert_department(&t.pool, "Sales").await?;
    let ops = insert_department(&t.pool, "Ops").await?;

    for user in [alice, bob] {
        for project in [alpha, beta] {
            let (status, _) = t
                .request("POST", "/admin/project-access", Some(&token), Some(json!({"user_id": user, "project_id": project})))
                .await?;
            assert_eq!(status, StatusCode::OK);
        }
        for department in [sales, ops] {
            let (status, _) = t
                .request(
                    "POST",
                    "/admin/department-access",
                    Some(&token),
                    Some(json!({"user_id": user, "department_id": department})),
                )
                .await?;
            assert_eq!(status, StatusCode::OK);
        }
    }
    let (status, _) = t
        .request("POST", &format!("/admin/users/{bob}/permissions"), Some(&token), Some(json!({"permission": "view_task"})))
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(grant_rows(&t.pool).await?, (4, 4));

    let (status, _) = t.request("DELETE", &format!("/projects/{alpha}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(grant_rows(&t.pool).await?, (2, 4));

    let (status, _) = t.request("DELETE", &format!("/departments/{sales}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(grant_rows(&t.pool).await?, (2, 2));

    let (status, _) = t.request("DELETE", &format!("/admin/users/{alice}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(grant_rows(&t.pool).await?, (1, 1));
    let (_, listed) = t.get("/admin/project-access", &token).await?;
    assert_eq!(listed[0]["user_id"], json!(bob));
    assert_eq!(listed[0]["project_id"], json!(beta));

    let (status, _) = t.request("DELETE", &format!("/admin/users/{bob}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(grant_rows(&t.pool).await?, (0, 0));
    let direct: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM user_permissions").fetch_one(&t.pool).await?;
    assert_eq!(direct, 0);

    let (status, _) = t.request("DELETE", &format!("/admin/users/{bob}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn staff_cannot_delete_superusers() -> Result<()> {
    let t = spawn().await?;
    let staff = insert_user(&t.pool, "staff@example.com", Flags { superuser: false, staff: true }).await?;
    let root = insert_user(&t.pool, "root@example.com", Flags { superuser: true, staff: false }).await?;
    let user = insert_user(&t.pool, "user@example.com", Flags::default()).await?;
    let token = token_for(staff)?;

    let (status, _) = t.request("DELETE", &format!("/admin/users/{root}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.request("DELETE", &format!("/admin/users/{user}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let user_token = token_for(user)?;
    let (status, _) = t.get("/auth/me", &user_token).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_grants_all_land_while_the_log_is_written() -> Result<()> {
    const GRANTS: usize = 40;

    let t = spawn().await?;
    let staff = insert_user(&t.pool, "staff@example.com", Flags { superuser: false, staff: true }).await?;
    let token = token_for(staff)?;

    let mut pending = JoinSet::new();
    for n in 0..GRANTS {
        let user = insert_user(&t.pool, &format!("user{n}@example.com"), Flags::default()).await?;
        let project = insert_project(&t.pool, &format!("Project {n}"), &[]).await?;
        let request = Request::builder()
            .method("POST")
            .uri("/admin/project-access")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(json!({"user_id": user, "project_id": project, "can_edit": true}).to_string()))?;
        let app = t.app.clone();
        pending.spawn(async move { app.oneshot(request).await.map(|response| response.status()) });
    }

    while let Some(joined) = pending.join_next().await {
        let status = joined??;
        assert_eq!(status, StatusCode::OK);
    }

    let (projects, _) = grant_rows(&t.pool).await?;
    assert_eq!(projects, GRANTS as i64);

    let mut logged: i64 = 0;
    for _ in 0..50 {
        logged = sqlx::query_scalar("SELECT COUNT(1) FROM activity_log").fetch_one(&t.pool).await?;
        if logged as usize >= GRANTS {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
    assert_eq!(logged as usize, GRANTS);

    // One unbroken chain: every row points at the hash of the row before it.
    let chain: Vec<(Option<String>, String)> =
        sqlx::query_as("SELECT prev_hash, hash FROM activity_log ORDER BY seq").fetch_all(&t.pool).await?;
    for pair in chain.windows(2) {
        assert_eq!(pair[1].0.as_deref(), Some(pair[0].1.as_str()));
    }
    Ok(())
}

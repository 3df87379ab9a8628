mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde_json::json;

use common::{ids, insert_collaborator, insert_department, insert_project, insert_task, insert_user, spawn, token_for, Flags};
use kanban_hub::authz::{GrantStore, SqliteGrantStore};

#[tokio::test]
async fn tasks_carry_assignees_and_a_solution() -> Result<()> {
    let t = spawn().await?;
    let admin = insert_user(&t.pool, "root@example.com", Flags { superuser: true, staff: false }).await?;
    let token = token_for(admin)?;
    let ana = insert_collaborator(&t.pool, "ana@example.com", None).await?;
    let bruno = insert_collaborator(&t.pool, "bruno@example.com", None).await?;

    let (status, task) = t
        .request(
            "POST",
            "/tasks",
            Some(&token),
            Some(json!({"title": "Fix invoices", "assigned_to": [ana, bruno, ana], "responsible_id": ana})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = task["id"].as_str().context("task id")?.to_string();
    assert_eq!(task["assigned_to"].as_array().map(Vec::len), Some(2));
    assert!(task["solution"].is_null());

    // Leaving assigned_to out keeps the set; sending it replaces the set.
    let (status, task) = t
        .request("PATCH", &format!("/tasks/{id}"), Some(&token), Some(json!({"solution": "Re-ran the export"})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["solution"], "Re-ran the export");
    assert_eq!(task["assigned_to"].as_array().map(Vec::len), Some(2));

    let (_, task) = t
        .request("PATCH", &format!("/tasks/{id}"), Some(&token), Some(json!({"assigned_to": [bruno]})))
        .await?;
    assert_eq!(task["assigned_to"], json!([bruno]));

    let (status, body) = t
        .request(
            "PATCH",
            &format!("/tasks/{id}"),
            Some(&token),
            Some(json!({"assigned_to": [uuid::Uuid::new_v4()]})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    let (_, task) = t.get(&format!("/tasks/{id}"), &token).await?;
    assert_eq!(task["assigned_to"], json!([bruno]));

    // Removing a collaborator drops their assignments.
    sqlx::query("DELETE FROM collaborators WHERE id = ?").bind(bruno).execute(&t.pool).await?;
    let (_, task) = t.get(&format!("/tasks/{id}"), &token).await?;
    assert_eq!(task["assigned_to"], json!([]));
    Ok(())
}

#[tokio::test]
async fn assignee_and_responsible_filters_apply_within_the_visible_set() -> Result<()> {
    let t = spawn().await?;
    let admin = insert_user(&t.pool, "root@example.com", Flags { superuser: true, staff: false }).await?;
    let admin_token = token_for(admin)?;
    let sales = insert_department(&t.pool, "Sales").await?;
    let ops = insert_department(&t.pool, "Ops").await?;
    let in_sales = insert_project(&t.pool, "Sales board", &[sales]).await?;
    let in_ops = insert_project(&t.pool, "Ops board", &[ops]).await?;
    let ana = insert_collaborator(&t.pool, "ana@example.com", Some(sales)).await?;
    let carla = insert_collaborator(&t.pool, "carla@example.com", Some(sales)).await?;

    let mut created = Vec::new();
    for (title, project) in [("Quote", in_sales), ("Renewal", in_sales), ("Backups", in_ops)] {
        let (status, task) = t
            .request(
                "POST",
                "/tasks",
                Some(&admin_token),
                Some(json!({"title": title, "project_id": project, "assigned_to": [ana], "responsible_id": carla})),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED);
        created.push(task["id"].as_str().context("task id")?.to_string());
    }
    let untouched = insert_task(&t.pool, "Unassigned", Some(in_sales)).await?;

    let (_, body) = t.get(&format!("/tasks?assigned_to={ana}"), &admin_token).await?;
    let mut got = ids(&body);
    got.sort();
    let mut expected = created.clone();
    expected.sort();
    assert_eq!(got, expected);
    assert!(!got.contains(&untouched.to_string()));

    let (_, body) = t.get(&format!("/tasks?assigned_to={carla}"), &admin_token).await?;
    assert!(ids(&body).is_empty());

    // The original query name and the English one select the same tasks.
    let (_, by_alias) = t.get(&format!("/tasks?responsavel={carla}"), &admin_token).await?;
    let (_, by_name) = t.get(&format!("/tasks?responsible={carla}"), &admin_token).await?;
    assert_eq!(ids(&by_alias).len(), 3);
    assert_eq!(ids(&by_alias), ids(&by_name));

    // A department-scoped reader never reaches the Ops task through a filter.
    let store = SqliteGrantStore::new(t.pool.clone());
    let reader = insert_user(&t.pool, "reader@example.com", Flags::default()).await?;
    store.grant_department_access(reader, sales).await?;
    let reader_token = token_for(reader)?;

    let (status, body) = t.get(&format!("/tasks?assigned_to={ana}"), &reader_token).await?;
    assert_eq!(status, StatusCode::OK);
    let mut got = ids(&body);
    got.sort();
    let mut expected = vec![created[0].clone(), created[1].clone()];
    expected.sort();
    assert_eq!(got, expected);

    let (_, body) = t.get(&format!("/tasks?responsavel={carla}&project={in_ops}"), &reader_token).await?;
    assert!(ids(&body).is_empty());
    Ok(())
}

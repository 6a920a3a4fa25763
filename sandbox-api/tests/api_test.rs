//! Integration tests for REST API endpoints
//!
//! Tests server creation, retrieval, the completion webhooks, the
//! audit trail route, and the manual sweep trigger.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use sandbox_lifecycle::model::{CompletionState, CompletionUpdate};
use sandbox_lifecycle::{Event, Server, ServerState};
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let ctx = common::test_app().await;

    let response = ctx.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "sandbox-api");
}

#[tokio::test]
async fn test_create_server_endpoint() {
    let ctx = common::test_app().await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/servers",
            &common::create_request(ctx.project_id),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let server: Server = common::extract_json_body(response).await;
    assert_eq!(server.state, ServerState::Creating);
    assert_eq!(server.project_id, ctx.project_id);
    assert_eq!(ctx.jobs.submitted_count(), 1);
}

#[tokio::test]
async fn test_get_server_endpoint() {
    let ctx = common::test_app().await;
    let server = common::fixture_ready_server(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/servers/{}", server.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let fetched: Server = common::extract_json_body(response).await;
    assert_eq!(fetched.id, server.id);
    assert_eq!(fetched.state, ServerState::Ready);
}

#[tokio::test]
async fn test_get_unknown_server_returns_404() {
    let ctx = common::test_app().await;

    let response = ctx
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/servers/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_servers_with_project_filter() {
    let ctx = common::test_app().await;
    common::fixture_ready_server(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(get(&format!(
            "/api/v1/servers?project_id={}",
            ctx.project_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let servers: Vec<Server> = common::extract_json_body(response).await;
    assert_eq!(servers.len(), 1);

    let response = ctx
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/servers?project_id={}", Uuid::new_v4())))
        .await
        .unwrap();
    let servers: Vec<Server> = common::extract_json_body(response).await;
    assert!(servers.is_empty());
}

#[tokio::test]
async fn test_provision_complete_webhook() {
    let ctx = common::test_app().await;

    let created = ctx
        .orchestrator
        .create_server(&common::create_request(ctx.project_id))
        .await
        .unwrap();

    let update = CompletionUpdate {
        state: Some(CompletionState::Ready),
        public_ip: Some("192.0.2.10".to_string()),
        compute_backend_id: Some("inst-1".to_string()),
        ..CompletionUpdate::default()
    };
    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/servers/{}/provision-complete", created.id),
            &update,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let server: Server = common::extract_json_body(response).await;
    assert_eq!(server.state, ServerState::Installing);
    assert_eq!(server.public_ip.as_deref(), Some("192.0.2.10"));
}

#[tokio::test]
async fn test_webhook_rejects_empty_payload() {
    let ctx = common::test_app().await;

    let created = ctx
        .orchestrator
        .create_server(&common::create_request(ctx.project_id))
        .await
        .unwrap();

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/servers/{}/provision-complete", created.id),
            &CompletionUpdate::default(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_rejects_wrong_state() {
    let ctx = common::test_app().await;
    let server = common::fixture_ready_server(&ctx).await;

    // Server is READY; a late provision webhook must be refused.
    let update = CompletionUpdate {
        state: Some(CompletionState::Ready),
        ..CompletionUpdate::default()
    };
    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/servers/{}/provision-complete", server.id),
            &update,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_project_events_endpoint() {
    let ctx = common::test_app().await;
    common::fixture_ready_server(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/projects/{}/events", ctx.project_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events: Vec<Event> = common::extract_json_body(response).await;
    // CREATING started/succeeded, INSTALLING started/succeeded.
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.event_type == "VM"));
}

#[tokio::test]
async fn test_shelve_action_returns_accepted() {
    let ctx = common::test_app().await;
    let server = common::fixture_ready_server(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/servers/{}/shelve", server.id),
            &Value::Null,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_action_on_unknown_server_returns_404() {
    let ctx = common::test_app().await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/servers/{}/shelve", Uuid::new_v4()),
            &Value::Null,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sweep_trigger_returns_preview() {
    let ctx = common::test_app().await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json("/api/v1/sweep", &Value::Null))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let preview: Value = common::extract_json_body(response).await;
    assert!(preview["notify"].as_array().unwrap().is_empty());
    assert!(preview["delete"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_suspended_listing() {
    let ctx = common::test_app().await;
    let server = common::fixture_ready_server(&ctx).await;

    // Backdate a suspension well past the default threshold.
    let updated_at = chrono::Utc::now().timestamp() - 31 * 86_400;
    sqlx::query("UPDATE servers SET state = 'SUSPENDED', updated_at = ? WHERE id = ?")
        .bind(updated_at)
        .bind(server.id)
        .execute(ctx.store.pool())
        .await
        .unwrap();

    let response = ctx
        .app
        .clone()
        .oneshot(get("/api/v1/servers/suspended?days=30"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let servers: Vec<Server> = common::extract_json_body(response).await;
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, server.id);
}

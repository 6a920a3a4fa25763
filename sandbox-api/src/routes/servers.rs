use crate::{error::ApiResult, state::AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use sandbox_lifecycle::{CompletionUpdate, CreateServerRequest, Event, Server, SweepPreview};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/servers", get(list_servers).post(create_server))
        .route("/api/v1/servers/suspended", get(list_suspended))
        .route("/api/v1/servers/{id}", get(get_server).delete(delete_server))
        .route("/api/v1/servers/{id}/shelve", post(shelve_server))
        .route("/api/v1/servers/{id}/unshelve", post(unshelve_server))
        .route("/api/v1/servers/{id}/reset", post(reset_server))
        .route("/api/v1/servers/{id}/configure", post(configure_server))
        .route(
            "/api/v1/servers/{id}/provision-complete",
            post(provision_complete),
        )
        .route(
            "/api/v1/servers/{id}/configure-complete",
            post(configure_complete),
        )
        .route("/api/v1/projects/{project_id}/events", get(project_events))
        .route("/api/v1/sweep", post(run_sweep))
}

#[derive(Deserialize)]
struct ListQuery {
    project_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct SuspendedQuery {
    days: Option<f64>,
}

/// Create the record and dispatch provisioning. The server is returned
/// in CREATING; readiness arrives through the completion webhooks.
async fn create_server(
    State(state): State<AppState>,
    Json(req): Json<CreateServerRequest>,
) -> ApiResult<(StatusCode, Json<Server>)> {
    let server = state.orchestrator.create_server(&req).await?;
    Ok((StatusCode::ACCEPTED, Json(server)))
}

async fn list_servers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Server>>> {
    let servers = state.store().list_servers(query.project_id).await?;
    Ok(Json(servers))
}

async fn list_suspended(
    State(state): State<AppState>,
    Query(query): Query<SuspendedQuery>,
) -> ApiResult<Json<Vec<Server>>> {
    let days = query.days.unwrap_or(30.0);
    let servers = state.store().suspended_older_than(days).await?;
    Ok(Json(servers))
}

async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Server>> {
    let server = state.store().get_server(id).await?;
    Ok(Json(server))
}

async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.store().get_server(id).await?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.delete(id).await {
            error!(server_id = %id, "Delete failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Deletion started" })),
    ))
}

async fn shelve_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.store().get_server(id).await?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.shelve(id).await {
            error!(server_id = %id, "Shelve failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Suspension started" })),
    ))
}

async fn unshelve_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.store().get_server(id).await?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.unshelve(id).await {
            error!(server_id = %id, "Resume failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Resume started" })),
    ))
}

async fn reset_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.store().get_server(id).await?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.reset(id).await {
            error!(server_id = %id, "Reset failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Reset started" })),
    ))
}

async fn configure_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.store().get_server(id).await?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.configure(id).await {
            error!(server_id = %id, "Configuration failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Configuration started" })),
    ))
}

/// Webhook from the provisioning job runner.
async fn provision_complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<CompletionUpdate>,
) -> ApiResult<Json<Server>> {
    let server = state.orchestrator.provision_complete(id, &update).await?;
    Ok(Json(server))
}

/// Webhook from the configuration job runner.
async fn configure_complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<CompletionUpdate>,
) -> ApiResult<Json<Server>> {
    let server = state.orchestrator.configure_complete(id, &update).await?;
    Ok(Json(server))
}

async fn project_events(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Event>>> {
    let events = state.store().events_for_project(project_id).await?;
    Ok(Json(events))
}

/// Manual sweep trigger: the preview is returned immediately and the
/// pass itself runs detached.
async fn run_sweep(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<SweepPreview>)> {
    let preview = state.sweeper.preview().await?;

    let sweeper = state.sweeper.clone();
    tokio::spawn(async move {
        if let Err(e) = sweeper.run().await {
            error!("Sweep pass failed: {}", e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(preview)))
}

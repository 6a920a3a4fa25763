//! Common test utilities for sandbox-api tests
//!
//! Builds the HTTP app over an in-memory database and fake adapters so
//! route tests never talk to real external services.

#![allow(dead_code)]

use axum::Router;
use sandbox_lifecycle::compute::{ComputeAdapter, ComputeConfig, InstanceState};
use sandbox_lifecycle::gateway::{GatewayAdapter, GatewayConfig};
use sandbox_lifecycle::infra::{InfraConfig, InfraDispatcher};
use sandbox_lifecycle::model::{CompletionState, CompletionUpdate, CreateServerRequest};
use sandbox_lifecycle::test_utils::{
    create_test_db, MockCompute, MockDirectory, MockGateway, MockJobRunner, RecordingNotifier,
};
use sandbox_lifecycle::{LifecycleOrchestrator, Server, ServerStore, SweepConfig};
use std::sync::Arc;
use std::time::Duration;
use tera::Tera;
use uuid::Uuid;

pub struct TestApp {
    pub app: Router,
    pub store: ServerStore,
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub compute: Arc<MockCompute>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub jobs: Arc<MockJobRunner>,
    pub project_id: Uuid,
}

pub async fn test_app() -> TestApp {
    let pool = create_test_db().await;
    let store = ServerStore::new(pool);
    let project_id = Uuid::new_v4();

    let compute = Arc::new(MockCompute::new());
    let compute_adapter = ComputeAdapter::new(
        compute.clone(),
        ComputeConfig {
            wait_interval: Duration::from_millis(1),
            wait_timeout: Duration::from_secs(1),
            ..ComputeConfig::default()
        },
    );

    let gateway = Arc::new(MockGateway::new());
    let gateway_adapter = GatewayAdapter::new(gateway.clone(), GatewayConfig::default());

    let directory = Arc::new(MockDirectory::new(project_id));
    let notifier = Arc::new(RecordingNotifier::new());

    let jobs = Arc::new(MockJobRunner::new());
    let mut tera = Tera::default();
    tera.add_raw_template("provision-job.yaml.tera", "server: {{ server_id }}\n")
        .expect("provision template");
    tera.add_raw_template("configure-job.yaml.tera", "server: {{ server_id }}\n")
        .expect("configure template");
    let infra = InfraDispatcher::with_tera(tera, jobs.clone(), InfraConfig::default());

    let orchestrator = Arc::new(LifecycleOrchestrator::new(
        store.clone(),
        compute_adapter,
        infra,
        gateway_adapter,
        directory.clone(),
        notifier.clone(),
    ));

    let sweeper = Arc::new(sandbox_lifecycle::IdleSweeper::new(
        orchestrator.clone(),
        directory,
        notifier.clone(),
        SweepConfig::default(),
    ));

    let state = sandbox_api::AppState::new(orchestrator.clone(), sweeper);
    let app = sandbox_api::create_app(state);

    TestApp {
        app,
        store,
        orchestrator,
        compute,
        gateway,
        notifier,
        jobs,
        project_id,
    }
}

pub fn create_request(project_id: Uuid) -> CreateServerRequest {
    CreateServerRequest {
        project_id,
        username: "apollo-user".to_string(),
        password: "apollo-pass".to_string(),
        image_name: None,
        flavor_name: None,
        ssh_public_key: None,
    }
}

/// Fixture: drive a server to READY through the orchestrator directly.
pub async fn fixture_ready_server(ctx: &TestApp) -> Server {
    let server = ctx
        .orchestrator
        .create_server(&create_request(ctx.project_id))
        .await
        .expect("create server");

    ctx.compute.add_instance("inst-1", InstanceState::Active);

    ctx.orchestrator
        .provision_complete(
            server.id,
            &CompletionUpdate {
                state: Some(CompletionState::Ready),
                public_ip: Some("192.0.2.10".to_string()),
                compute_backend_id: Some("inst-1".to_string()),
                ..CompletionUpdate::default()
            },
        )
        .await
        .expect("provision webhook");

    ctx.orchestrator
        .configure_complete(
            server.id,
            &CompletionUpdate {
                state: Some(CompletionState::Ready),
                ..CompletionUpdate::default()
            },
        )
        .await
        .expect("configure webhook")
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: axum::response::Response) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

//! Shared harness wiring the orchestrator to in-memory fakes.

#![allow(dead_code)]

use sandbox_lifecycle::compute::{ComputeAdapter, ComputeConfig};
use sandbox_lifecycle::gateway::{GatewayAdapter, GatewayConfig};
use sandbox_lifecycle::infra::{InfraConfig, InfraDispatcher};
use sandbox_lifecycle::model::{CompletionState, CompletionUpdate, CreateServerRequest};
use sandbox_lifecycle::test_utils::{
    create_test_db, MockCompute, MockDirectory, MockGateway, MockJobRunner, RecordingNotifier,
};
use sandbox_lifecycle::{LifecycleOrchestrator, Server, ServerStore};
use std::sync::Arc;
use std::time::Duration;
use tera::Tera;
use uuid::Uuid;

pub struct Harness {
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub store: ServerStore,
    pub compute: Arc<MockCompute>,
    pub gateway: Arc<MockGateway>,
    pub directory: Arc<MockDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub jobs: Arc<MockJobRunner>,
    pub project_id: Uuid,
}

pub async fn harness() -> Harness {
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
    tera.add_raw_template(
        "provision-job.yaml.tera",
        "job: {{ job_name }}\nserver: {{ server_id }}\ncallback: {{ callback_host }}\n",
    )
    .expect("provision template");
    tera.add_raw_template(
        "configure-job.yaml.tera",
        "job: {{ job_name }}\nserver: {{ server_id }}\n",
    )
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

    Harness {
        orchestrator,
        store,
        compute,
        gateway,
        directory,
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
        image_name: Some("ubuntu-22.04".to_string()),
        flavor_name: Some("m1.large".to_string()),
        ssh_public_key: None,
    }
}

pub fn success_update(public_ip: &str, compute_id: &str) -> CompletionUpdate {
    CompletionUpdate {
        state: Some(CompletionState::Ready),
        public_ip: Some(public_ip.to_string()),
        compute_backend_id: Some(compute_id.to_string()),
        error_type: None,
        error_summary: None,
    }
}

/// Drive a server through creation and both completion webhooks so it
/// ends READY with a registered compute instance.
pub async fn ready_server(h: &Harness, compute_id: &str) -> Server {
    use sandbox_lifecycle::compute::InstanceState;

    let server = h
        .orchestrator
        .create_server(&create_request(h.project_id))
        .await
        .expect("create server");

    h.compute.add_instance(compute_id, InstanceState::Active);

    h.orchestrator
        .provision_complete(server.id, &success_update("192.0.2.10", compute_id))
        .await
        .expect("provision webhook");

    h.orchestrator
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

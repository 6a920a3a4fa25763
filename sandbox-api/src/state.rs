use crate::config::Config;
use sandbox_lifecycle::compute::{ComputeAdapter, HttpCompute};
use sandbox_lifecycle::directory::{DirectoryClient, HttpDirectory};
use sandbox_lifecycle::gateway::{GatewayAdapter, HttpGateway};
use sandbox_lifecycle::infra::{HttpJobRunner, InfraDispatcher};
use sandbox_lifecycle::notify::{HttpNotifier, Notifier};
use sandbox_lifecycle::{IdleSweeper, LifecycleOrchestrator, ServerStore};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub sweeper: Arc<IdleSweeper>,
}

impl AppState {
    pub fn new(orchestrator: Arc<LifecycleOrchestrator>, sweeper: Arc<IdleSweeper>) -> Self {
        Self {
            orchestrator,
            sweeper,
        }
    }

    /// Wire the orchestrator to its real HTTP adapters.
    pub fn from_config(pool: SqlitePool, config: &Config) -> anyhow::Result<Self> {
        let store = ServerStore::new(pool);

        let driver = Arc::new(HttpCompute::new(
            config.compute_url.clone(),
            config.compute_token.clone(),
        ));
        let compute = ComputeAdapter::new(driver, config.compute_config());

        let gateway_api = Arc::new(HttpGateway::new(config.gateway_config()));
        let gateway = GatewayAdapter::new(gateway_api, config.gateway_config());

        let directory: Arc<dyn DirectoryClient> =
            Arc::new(HttpDirectory::new(config.directory_url.clone()));
        let notifier: Arc<dyn Notifier> = Arc::new(HttpNotifier::new(config.notifier_url.clone()));

        let runner = Arc::new(HttpJobRunner::new(config.job_runner_url.clone()));
        let infra = InfraDispatcher::new(runner, config.infra_config())?;

        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            store,
            compute,
            infra,
            gateway,
            directory.clone(),
            notifier.clone(),
        ));

        let sweeper = Arc::new(IdleSweeper::new(
            orchestrator.clone(),
            directory,
            notifier,
            config.sweep_config(),
        ));

        Ok(Self::new(orchestrator, sweeper))
    }

    pub fn store(&self) -> &ServerStore {
        self.orchestrator.store()
    }
}

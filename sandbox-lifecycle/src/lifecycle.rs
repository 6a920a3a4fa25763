use crate::compute::{ComputeAdapter, InstanceState};
use crate::directory::{DirectoryClient, Project};
use crate::error::{LifecycleError, Result};
use crate::gateway::GatewayAdapter;
use crate::infra::InfraDispatcher;
use crate::locks::ServerLocks;
use crate::model::{
    CompletionUpdate, CreateServerRequest, EventStatus, Server, ServerPatch, ServerState,
};
use crate::notify::{NotificationKind, Notifier};
use crate::store::ServerStore;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Saga-style coordinator for server lifecycle transitions.
///
/// Each operation records a STARTED event, drives the external systems,
/// and closes with a SUCCEEDED or FAILED event. A step failure forces
/// the record into ERROR before the error propagates, so the audit
/// trail and the stored state never disagree about the outcome.
///
/// Mutating operations for the same server run under a per-server lock;
/// a webhook and a user-initiated action cannot interleave their reads
/// and writes.
pub struct LifecycleOrchestrator {
    store: ServerStore,
    compute: ComputeAdapter,
    infra: InfraDispatcher,
    gateway: GatewayAdapter,
    directory: Arc<dyn DirectoryClient>,
    notifier: Arc<dyn Notifier>,
    locks: ServerLocks,
}

impl LifecycleOrchestrator {
    pub fn new(
        store: ServerStore,
        compute: ComputeAdapter,
        infra: InfraDispatcher,
        gateway: GatewayAdapter,
        directory: Arc<dyn DirectoryClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            compute,
            infra,
            gateway,
            directory,
            notifier,
            locks: ServerLocks::new(),
        }
    }

    pub fn store(&self) -> &ServerStore {
        &self.store
    }

    /// Create the server record and dispatch the provisioning job. The
    /// record stays in CREATING until the provision webhook arrives.
    pub async fn create_server(&self, req: &CreateServerRequest) -> Result<Server> {
        let server = self.store.create_server(req.project_id).await?;
        self.store
            .record_event(
                req.project_id,
                ServerState::Creating.step_name(),
                EventStatus::Started,
                None,
            )
            .await?;

        // Desktop gateway account for the owner; the server is usable
        // without it, so a failure here only logs.
        if let Err(e) = self.gateway.ensure_user(&req.username, &req.password).await {
            warn!(server_id = %server.id, error = %e, "gateway user setup failed");
        }

        if let Err(e) = self.infra.dispatch_provision(server.id, req).await {
            self.fail_step(server.id, req.project_id, ServerState::Creating, &e)
                .await;
            return Err(escalate(e));
        }

        info!(server_id = %server.id, project_id = %req.project_id, "server creation started");
        Ok(server)
    }

    /// Webhook: the provisioning job finished. Applies the partial
    /// update and, on success, moves the server into configuration.
    pub async fn provision_complete(
        &self,
        server_id: Uuid,
        update: &CompletionUpdate,
    ) -> Result<Server> {
        let _guard = self.locks.acquire(server_id).await;

        if update.is_empty() {
            return Err(LifecycleError::Validation(
                "completion payload has no fields set".to_string(),
            ));
        }

        let server = self.store.get_server(server_id).await?;
        if server.state != ServerState::Creating {
            return Err(LifecycleError::InvalidState {
                current: server.state.to_string(),
                required: vec![ServerState::Creating.to_string()],
            });
        }

        if update.failed() {
            return self
                .complete_with_failure(&server, ServerState::Creating, update)
                .await;
        }

        self.store
            .record_event(
                server.project_id,
                ServerState::Creating.step_name(),
                EventStatus::Succeeded,
                None,
            )
            .await?;

        let patch = ServerPatch {
            state: None,
            public_ip: update.public_ip.clone(),
            compute_backend_id: update.compute_backend_id.clone(),
        };
        let server = if patch.is_empty() {
            server
        } else {
            self.store.update_server(server_id, &patch).await?
        };

        self.ensure_gateway_connection(&server).await;

        let server = self.configure_inner(server).await?;
        info!(%server_id, "provisioning complete, configuration dispatched");
        Ok(server)
    }

    /// Re-run the configuration job against a provisioned server.
    pub async fn configure(&self, server_id: Uuid) -> Result<Server> {
        let _guard = self.locks.acquire(server_id).await;
        let server = self.store.get_server(server_id).await?;
        self.configure_inner(server).await
    }

    /// Webhook: the configuration job finished. On success the server
    /// becomes READY and the owner is notified.
    pub async fn configure_complete(
        &self,
        server_id: Uuid,
        update: &CompletionUpdate,
    ) -> Result<Server> {
        let _guard = self.locks.acquire(server_id).await;

        if update.is_empty() {
            return Err(LifecycleError::Validation(
                "completion payload has no fields set".to_string(),
            ));
        }

        let server = self.store.get_server(server_id).await?;
        if server.state != ServerState::Installing {
            return Err(LifecycleError::InvalidState {
                current: server.state.to_string(),
                required: vec![ServerState::Installing.to_string()],
            });
        }

        if update.failed() {
            return self
                .complete_with_failure(&server, ServerState::Installing, update)
                .await;
        }

        self.store
            .record_event(
                server.project_id,
                ServerState::Installing.step_name(),
                EventStatus::Succeeded,
                None,
            )
            .await?;

        let patch = ServerPatch {
            state: Some(ServerState::Ready),
            public_ip: update.public_ip.clone(),
            compute_backend_id: update.compute_backend_id.clone(),
        };
        let server = self.store.update_server(server_id, &patch).await?;

        self.ensure_gateway_connection(&server).await;
        self.notify_ready(&server).await;

        info!(%server_id, "server is ready");
        Ok(server)
    }

    /// Shelve the compute instance and park the record in SUSPENDED.
    pub async fn shelve(&self, server_id: Uuid) -> Result<Server> {
        let _guard = self.locks.acquire(server_id).await;
        let server = self.store.get_server(server_id).await?;
        let compute_id = require_compute_id(&server)?;

        self.store
            .record_event(
                server.project_id,
                ServerState::Suspending.step_name(),
                EventStatus::Started,
                None,
            )
            .await?;

        if let Err(e) = self.compute.shelve(&compute_id).await {
            self.fail_step(server.id, server.project_id, ServerState::Suspending, &e)
                .await;
            return Err(escalate(e));
        }

        let server = self
            .store
            .update_server(server_id, &ServerPatch::state(ServerState::Suspending))
            .await?;

        self.remove_gateway_connection(&server).await;

        if let Err(e) = self
            .compute
            .wait_for_state(&compute_id, InstanceState::ShelvedOffloaded)
            .await
        {
            self.fail_step(server.id, server.project_id, ServerState::Suspending, &e)
                .await;
            return Err(escalate(e));
        }

        self.store
            .record_event(
                server.project_id,
                ServerState::Suspending.step_name(),
                EventStatus::Succeeded,
                None,
            )
            .await?;

        let server = self
            .store
            .update_server(server_id, &ServerPatch::state(ServerState::Suspended))
            .await?;

        info!(%server_id, "server suspended");
        Ok(server)
    }

    /// Unshelve the compute instance and restore the record to READY.
    pub async fn unshelve(&self, server_id: Uuid) -> Result<Server> {
        let _guard = self.locks.acquire(server_id).await;
        let server = self.store.get_server(server_id).await?;
        let compute_id = require_compute_id(&server)?;

        self.store
            .record_event(
                server.project_id,
                ServerState::Resuming.step_name(),
                EventStatus::Started,
                None,
            )
            .await?;

        if let Err(e) = self.compute.unshelve(&compute_id).await {
            self.fail_step(server.id, server.project_id, ServerState::Resuming, &e)
                .await;
            return Err(escalate(e));
        }

        let server = self
            .store
            .update_server(server_id, &ServerPatch::state(ServerState::Resuming))
            .await?;

        if let Err(e) = self
            .compute
            .wait_for_state(&compute_id, InstanceState::Active)
            .await
        {
            self.fail_step(server.id, server.project_id, ServerState::Resuming, &e)
                .await;
            return Err(escalate(e));
        }

        self.store
            .record_event(
                server.project_id,
                ServerState::Resuming.step_name(),
                EventStatus::Succeeded,
                None,
            )
            .await?;

        let server = self
            .store
            .update_server(server_id, &ServerPatch::state(ServerState::Ready))
            .await?;

        self.ensure_gateway_connection(&server).await;

        info!(%server_id, "server resumed");
        Ok(server)
    }

    /// Rebuild the instance from its base image and re-run
    /// configuration. READY arrives later through the configure webhook.
    pub async fn reset(&self, server_id: Uuid) -> Result<Server> {
        let _guard = self.locks.acquire(server_id).await;
        let server = self.store.get_server(server_id).await?;
        let compute_id = require_compute_id(&server)?;

        self.store
            .record_event(
                server.project_id,
                ServerState::Resetting.step_name(),
                EventStatus::Started,
                None,
            )
            .await?;

        if let Err(e) = self.compute.rebuild(&compute_id).await {
            self.fail_step(server.id, server.project_id, ServerState::Resetting, &e)
                .await;
            return Err(escalate(e));
        }

        let server = self
            .store
            .update_server(server_id, &ServerPatch::state(ServerState::Resetting))
            .await?;

        self.remove_gateway_connection(&server).await;

        if let Err(e) = self
            .compute
            .wait_for_state(&compute_id, InstanceState::Active)
            .await
        {
            self.fail_step(server.id, server.project_id, ServerState::Resetting, &e)
                .await;
            return Err(escalate(e));
        }

        self.ensure_gateway_connection(&server).await;

        // Configuration failures write their own FAILED(INSTALLING)
        // event; no second failure event for the reset itself.
        let server = self.configure_inner(server).await?;

        self.store
            .record_event(
                server.project_id,
                ServerState::Resetting.step_name(),
                EventStatus::Succeeded,
                None,
            )
            .await?;

        info!(%server_id, "server reset, configuration dispatched");
        Ok(server)
    }

    /// Remove the compute instance, the gateway connection and the
    /// record. A missing compute instance counts as already deleted.
    pub async fn delete(&self, server_id: Uuid) -> Result<()> {
        let _guard = self.locks.acquire(server_id).await;
        let server = self.store.get_server(server_id).await?;

        self.store
            .record_event(
                server.project_id,
                ServerState::Deleting.step_name(),
                EventStatus::Started,
                None,
            )
            .await?;

        let server = self
            .store
            .update_server(server_id, &ServerPatch::state(ServerState::Deleting))
            .await?;

        if let Some(compute_id) = &server.compute_backend_id {
            match self.compute.delete(compute_id).await {
                Ok(()) => {}
                Err(LifecycleError::NotFound { .. }) => {
                    info!(%server_id, %compute_id, "compute instance already gone");
                }
                Err(e) if e.is_domain() => {
                    // Row and state stay as-is so the delete can be
                    // retried once the underlying conflict clears.
                    let content = failure_content(ServerState::Deleting, &e);
                    if let Err(e2) = self
                        .store
                        .record_event(
                            server.project_id,
                            ServerState::Deleting.step_name(),
                            EventStatus::Failed,
                            Some(&content),
                        )
                        .await
                    {
                        error!(%server_id, error = %e2, "failed to record failure event");
                    }
                    return Err(e);
                }
                Err(e) => {
                    self.fail_step(server.id, server.project_id, ServerState::Deleting, &e)
                        .await;
                    return Err(escalate(e));
                }
            }
        }

        self.store
            .record_event(
                server.project_id,
                ServerState::Deleting.step_name(),
                EventStatus::Succeeded,
                None,
            )
            .await?;

        self.store
            .update_server(server_id, &ServerPatch::state(ServerState::Deleted))
            .await?;

        self.remove_gateway_connection(&server).await;

        self.store.delete_server_row(server_id).await?;

        info!(%server_id, "server deleted");
        Ok(())
    }

    /// Shared body of `configure` and the post-provision hand-off.
    async fn configure_inner(&self, server: Server) -> Result<Server> {
        self.store
            .record_event(
                server.project_id,
                ServerState::Installing.step_name(),
                EventStatus::Started,
                None,
            )
            .await?;

        let result = self.dispatch_configure(&server).await;
        if let Err(e) = result {
            self.fail_step(server.id, server.project_id, ServerState::Installing, &e)
                .await;
            return Err(escalate(e));
        }

        let server = self
            .store
            .update_server(server.id, &ServerPatch::state(ServerState::Installing))
            .await?;

        info!(server_id = %server.id, "configuration job dispatched");
        Ok(server)
    }

    async fn dispatch_configure(&self, server: &Server) -> Result<()> {
        let public_ip = server.public_ip.as_deref().ok_or_else(|| {
            LifecycleError::Validation(format!(
                "server {} has no public ip to configure",
                server.id
            ))
        })?;
        let project = self.directory.get_project(server.project_id).await?;
        self.infra
            .dispatch_configure(server.id, public_ip, &project)
            .await
    }

    /// Terminal handling for a webhook that reports a failed job.
    async fn complete_with_failure(
        &self,
        server: &Server,
        step: ServerState,
        update: &CompletionUpdate,
    ) -> Result<Server> {
        let detail = match (&update.error_type, &update.error_summary) {
            (Some(t), Some(s)) => format!("{t}: {s}"),
            (Some(t), None) => t.clone(),
            (None, Some(s)) => s.clone(),
            (None, None) => "no error detail reported".to_string(),
        };
        let content = format!("Step '{}' has failed: {detail}", step.step_name());

        self.store
            .record_event(
                server.project_id,
                step.step_name(),
                EventStatus::Failed,
                Some(&content),
            )
            .await?;

        let patch = ServerPatch {
            state: Some(ServerState::Error),
            public_ip: update.public_ip.clone(),
            compute_backend_id: update.compute_backend_id.clone(),
        };
        let server = self.store.update_server(server.id, &patch).await?;

        warn!(server_id = %server.id, step = step.step_name(), %detail, "job reported failure");
        Ok(server)
    }

    /// FAILED event plus ERROR state. Bookkeeping failures here only
    /// log; the original error is what the caller needs to see.
    async fn fail_step(
        &self,
        server_id: Uuid,
        project_id: Uuid,
        step: ServerState,
        err: &LifecycleError,
    ) {
        let content = failure_content(step, err);
        if let Err(e) = self
            .store
            .record_event(project_id, step.step_name(), EventStatus::Failed, Some(&content))
            .await
        {
            error!(%server_id, error = %e, "failed to record failure event");
        }
        if let Err(e) = self
            .store
            .update_server(server_id, &ServerPatch::state(ServerState::Error))
            .await
        {
            error!(%server_id, error = %e, "failed to mark server as ERROR");
        }
    }

    async fn ensure_gateway_connection(&self, server: &Server) {
        let Some(public_ip) = server.public_ip.as_deref() else {
            return;
        };
        let result = async {
            let project = self.directory.get_project(server.project_id).await?;
            self.gateway
                .ensure_connection(
                    &project.name,
                    public_ip,
                    &project.profile.username,
                    &project.profile.password,
                )
                .await
        }
        .await;
        if let Err(e) = result {
            warn!(server_id = %server.id, error = %e, "gateway connection setup failed");
        }
    }

    async fn remove_gateway_connection(&self, server: &Server) {
        let Some(public_ip) = server.public_ip.as_deref() else {
            return;
        };
        let result = async {
            let project = self.directory.get_project(server.project_id).await?;
            self.gateway.remove_connection(&project.name, public_ip).await
        }
        .await;
        if let Err(e) = result {
            warn!(server_id = %server.id, error = %e, "gateway connection removal failed");
        }
    }

    async fn notify_ready(&self, server: &Server) {
        let result = async {
            let project = self.directory.get_project(server.project_id).await?;
            let profile = self.directory.get_profile(project.profile.id).await?;
            let message = ready_message(&project, server);
            self.notifier
                .send(
                    NotificationKind::Generic,
                    &profile.email,
                    "Your sandbox server is ready",
                    &message,
                    &profile.owner_id,
                )
                .await
        }
        .await;
        if let Err(e) = result {
            warn!(server_id = %server.id, error = %e, "ready notification failed");
        }
    }
}

fn ready_message(project: &Project, server: &Server) -> String {
    let ip = server.public_ip.as_deref().unwrap_or("unknown");
    format!(
        "The sandbox server for project '{}' is ready. Remote desktop connection: {}.",
        project.name,
        GatewayAdapter::connection_name(&project.name, ip)
    )
}

fn require_compute_id(server: &Server) -> Result<String> {
    server.compute_backend_id.clone().ok_or_else(|| {
        LifecycleError::Validation(format!(
            "server {} has no compute backend instance",
            server.id
        ))
    })
}

fn failure_content(step: ServerState, err: &LifecycleError) -> String {
    format!("Step '{}' has failed: {err}", step.step_name())
}

/// Domain errors pass through for precise HTTP mapping; anything
/// unexpected is reported as a management failure.
fn escalate(err: LifecycleError) -> LifecycleError {
    if err.is_domain() || matches!(err, LifecycleError::Management(_)) {
        err
    } else {
        LifecycleError::Management(err.to_string())
    }
}

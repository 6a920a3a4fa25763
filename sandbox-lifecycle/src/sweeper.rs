use crate::directory::DirectoryClient;
use crate::error::Result;
use crate::lifecycle::LifecycleOrchestrator;
use crate::model::{serialize_datetime, Server};
use crate::notify::{NotificationKind, Notifier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Idle reclamation thresholds, in days of uninterrupted suspension.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Owners are warned once their server's suspension age enters
    /// `[email_threshold, email_threshold + notification_window)`.
    pub email_threshold_days: f64,
    /// Servers suspended at least this long are deleted.
    pub delete_threshold_days: f64,
    pub notification_window_days: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            email_threshold_days: 25.0,
            delete_threshold_days: 30.0,
            notification_window_days: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepCandidate {
    pub server_id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub public_ip: Option<String>,
    #[serde(serialize_with = "serialize_datetime")]
    pub suspended_since: DateTime<Utc>,
    pub days_suspended: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepPreview {
    pub notify: Vec<SweepCandidate>,
    pub delete: Vec<SweepCandidate>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepOutcome {
    pub notified: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Reclaims servers their owners have walked away from. Suspension age
/// is measured from the record's last update, which a suspended server
/// only receives when it was parked.
pub struct IdleSweeper {
    orchestrator: Arc<LifecycleOrchestrator>,
    directory: Arc<dyn DirectoryClient>,
    notifier: Arc<dyn Notifier>,
    config: SweepConfig,
}

impl IdleSweeper {
    pub fn new(
        orchestrator: Arc<LifecycleOrchestrator>,
        directory: Arc<dyn DirectoryClient>,
        notifier: Arc<dyn Notifier>,
        config: SweepConfig,
    ) -> Self {
        Self {
            orchestrator,
            directory,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Compute the notify and delete sets without touching anything.
    pub async fn preview(&self) -> Result<SweepPreview> {
        let store = self.orchestrator.store();

        let notify_rows = store
            .suspended_in_window(
                self.config.email_threshold_days,
                self.config.email_threshold_days + self.config.notification_window_days,
            )
            .await?;
        let delete_rows = store
            .suspended_older_than(self.config.delete_threshold_days)
            .await?;

        let mut preview = SweepPreview::default();
        for server in notify_rows {
            preview.notify.push(self.candidate(server).await);
        }
        for server in delete_rows {
            preview.delete.push(self.candidate(server).await);
        }
        Ok(preview)
    }

    /// One sweep pass. A single server's failure is counted and logged,
    /// never allowed to abort the rest of the pass.
    pub async fn run(&self) -> Result<SweepOutcome> {
        let preview = self.preview().await?;
        let mut outcome = SweepOutcome::default();

        for candidate in &preview.notify {
            match self.send_warning(candidate).await {
                Ok(()) => outcome.notified += 1,
                Err(e) => {
                    warn!(server_id = %candidate.server_id, error = %e, "idle warning failed");
                    outcome.failed += 1;
                }
            }
        }

        for candidate in &preview.delete {
            if let Err(e) = self.send_deletion_notice(candidate).await {
                warn!(server_id = %candidate.server_id, error = %e, "deletion notice failed");
            }
            match self.orchestrator.delete(candidate.server_id).await {
                Ok(()) => outcome.deleted += 1,
                Err(e) => {
                    warn!(server_id = %candidate.server_id, error = %e, "idle deletion failed");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            notified = outcome.notified,
            deleted = outcome.deleted,
            failed = outcome.failed,
            "sweep pass finished"
        );
        Ok(outcome)
    }

    async fn candidate(&self, server: Server) -> SweepCandidate {
        let project_name = match self.directory.get_project(server.project_id).await {
            Ok(project) => project.name,
            Err(e) => {
                warn!(project_id = %server.project_id, error = %e, "project lookup failed");
                server.project_id.to_string()
            }
        };
        let age = Utc::now() - server.updated_at;
        SweepCandidate {
            server_id: server.id,
            project_id: server.project_id,
            project_name,
            public_ip: server.public_ip,
            suspended_since: server.updated_at,
            days_suspended: age.num_seconds() as f64 / 86_400.0,
        }
    }

    async fn send_warning(&self, candidate: &SweepCandidate) -> Result<()> {
        let project = self.directory.get_project(candidate.project_id).await?;
        let profile = self.directory.get_profile(project.profile.id).await?;
        let message = format!(
            "The sandbox server for project '{}' has been suspended for {:.0} days. \
             It will be deleted after {:.0} days of inactivity unless it is resumed.",
            candidate.project_name, candidate.days_suspended, self.config.delete_threshold_days
        );
        self.notifier
            .send(
                NotificationKind::Generic,
                &profile.email,
                "Your sandbox server will be deleted soon",
                &message,
                &profile.owner_id,
            )
            .await
    }

    async fn send_deletion_notice(&self, candidate: &SweepCandidate) -> Result<()> {
        let project = self.directory.get_project(candidate.project_id).await?;
        let profile = self.directory.get_profile(project.profile.id).await?;
        let message = format!(
            "The sandbox server for project '{}' was suspended for {:.0} days and has \
             been deleted.",
            candidate.project_name, candidate.days_suspended
        );
        self.notifier
            .send(
                NotificationKind::Generic,
                &profile.email,
                "Your sandbox server has been deleted",
                &message,
                &profile.owner_id,
            )
            .await
    }
}

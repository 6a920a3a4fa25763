//! In-memory database and adapter fakes used by the test suites.

use crate::compute::{ComputeDriver, ComputeInstance, InstanceState};
use crate::directory::{DirectoryClient, Profile, Project, ProjectProfile, Repository};
use crate::error::{LifecycleError, ResourceKind, Result};
use crate::gateway::{ConnectionSpec, GatewayApi};
use crate::infra::JobRunner;
use crate::notify::{NotificationKind, Notifier};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// In-memory compute backend. Transitions complete instantly so the
/// adapter's wait loop returns on its first poll. Named operations can
/// be made to fail via `fail_on`.
#[derive(Default)]
pub struct MockCompute {
    instances: Mutex<HashMap<String, ComputeInstance>>,
    failing_ops: Mutex<HashSet<&'static str>>,
}

impl MockCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fleet-owned instance in the given state.
    pub fn add_instance(&self, id: &str, state: InstanceState) {
        let mut tags = HashMap::new();
        tags.insert("instance_role".to_string(), "user-vm".to_string());
        self.instances.lock().unwrap().insert(
            id.to_string(),
            ComputeInstance {
                id: id.to_string(),
                name: format!("mock-{id}"),
                state,
                public_ip: Some("192.0.2.10".to_string()),
                tags,
            },
        );
    }

    /// Register an instance without the fleet ownership tag.
    pub fn add_foreign_instance(&self, id: &str, state: InstanceState) {
        self.instances.lock().unwrap().insert(
            id.to_string(),
            ComputeInstance {
                id: id.to_string(),
                name: format!("foreign-{id}"),
                state,
                public_ip: None,
                tags: HashMap::new(),
            },
        );
    }

    /// Make the named operation ("shelve", "unshelve", "rebuild",
    /// "delete") return an error.
    pub fn fail_on(&self, op: &'static str) {
        self.failing_ops.lock().unwrap().insert(op);
    }

    pub fn instance_state(&self, id: &str) -> Option<InstanceState> {
        self.instances.lock().unwrap().get(id).map(|i| i.state)
    }

    fn check_failure(&self, op: &'static str) -> Result<()> {
        if self.failing_ops.lock().unwrap().contains(op) {
            return Err(LifecycleError::Management(format!(
                "injected {op} failure"
            )));
        }
        Ok(())
    }

    fn set_state(&self, id: &str, state: InstanceState) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| LifecycleError::not_found(ResourceKind::ComputeInstance, id))?;
        instance.state = state;
        Ok(())
    }
}

#[async_trait]
impl ComputeDriver for MockCompute {
    async fn get_instance(&self, id: &str) -> Result<ComputeInstance> {
        self.instances
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::not_found(ResourceKind::ComputeInstance, id))
    }

    async fn instances_by_name(&self, name: &str) -> Result<Vec<ComputeInstance>> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.name == name)
            .cloned()
            .collect())
    }

    async fn shelve(&self, id: &str) -> Result<()> {
        self.check_failure("shelve")?;
        self.set_state(id, InstanceState::ShelvedOffloaded)
    }

    async fn unshelve(&self, id: &str) -> Result<()> {
        self.check_failure("unshelve")?;
        self.set_state(id, InstanceState::Active)
    }

    async fn rebuild(&self, id: &str) -> Result<()> {
        self.check_failure("rebuild")?;
        self.set_state(id, InstanceState::Active)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check_failure("delete")?;
        let removed = self.instances.lock().unwrap().remove(id);
        if removed.is_none() {
            return Err(LifecycleError::not_found(ResourceKind::ComputeInstance, id));
        }
        Ok(())
    }
}

/// In-memory remote desktop gateway keyed by connection name.
#[derive(Default)]
pub struct MockGateway {
    connections: Mutex<HashMap<String, String>>,
    users: Mutex<HashSet<String>>,
    pub creates: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.connections.lock().unwrap().values().any(|n| n == name)
    }

    pub fn has_user(&self, username: &str) -> bool {
        self.users.lock().unwrap().contains(username)
    }

    pub fn create_count(&self) -> usize {
        self.creates.lock().unwrap().len()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }
}

#[async_trait]
impl GatewayApi for MockGateway {
    async fn list_connections(&self) -> Result<HashMap<String, String>> {
        Ok(self.connections.lock().unwrap().clone())
    }

    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        self.connections
            .lock()
            .unwrap()
            .insert(id, spec.name.clone());
        self.creates.lock().unwrap().push(spec.name.clone());
        Ok(())
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<()> {
        if let Some(name) = self.connections.lock().unwrap().remove(connection_id) {
            self.deletes.lock().unwrap().push(name);
        }
        Ok(())
    }

    async fn ensure_user(&self, username: &str, _password: &str, _group: &str) -> Result<()> {
        self.users.lock().unwrap().insert(username.to_string());
        Ok(())
    }
}

/// Directory fake serving one project and its owner profile.
pub struct MockDirectory {
    project: Project,
    profile: Profile,
}

impl MockDirectory {
    pub fn new(project_id: Uuid) -> Self {
        let profile_id = Uuid::new_v4();
        Self {
            project: Project {
                id: project_id,
                name: "apollo".to_string(),
                profile: ProjectProfile {
                    id: profile_id,
                    username: "apollo-user".to_string(),
                    password: "apollo-pass".to_string(),
                },
                repository: Repository {
                    url: "https://git.example.com/apollo.git".to_string(),
                    token: "token-123".to_string(),
                },
                applications: vec!["editor".to_string()],
            },
            profile: Profile {
                id: profile_id,
                owner_id: "owner-1".to_string(),
                email: "owner@example.com".to_string(),
            },
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project.name
    }
}

#[async_trait]
impl DirectoryClient for MockDirectory {
    async fn get_project(&self, project_id: Uuid) -> Result<Project> {
        if project_id != self.project.id {
            return Err(LifecycleError::not_found(
                ResourceKind::Project,
                project_id.to_string(),
            ));
        }
        Ok(self.project.clone())
    }

    async fn get_profile(&self, profile_id: Uuid) -> Result<Profile> {
        if profile_id != self.profile.id {
            return Err(LifecycleError::not_found(
                ResourceKind::Profile,
                profile_id.to_string(),
            ));
        }
        Ok(self.profile.clone())
    }
}

/// Notifier fake recording every message it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SentNotification>>,
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub recipient: String,
    pub subject: String,
    pub message: String,
    pub user_id: String,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        _kind: NotificationKind,
        recipient: &str,
        subject: &str,
        message: &str,
        user_id: &str,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(SentNotification {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }
}

/// Job runner fake recording submitted manifests, optionally failing.
#[derive(Default)]
pub struct MockJobRunner {
    pub manifests: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl MockJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submissions(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn submitted_count(&self) -> usize {
        self.manifests.lock().unwrap().len()
    }
}

#[async_trait]
impl JobRunner for MockJobRunner {
    async fn submit(&self, manifest: &str) -> Result<()> {
        if *self.failing.lock().unwrap() {
            return Err(LifecycleError::Infrastructure(
                "injected submission failure".to_string(),
            ));
        }
        self.manifests.lock().unwrap().push(manifest.to_string());
        Ok(())
    }
}

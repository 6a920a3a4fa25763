use crate::error::{LifecycleError, ResourceKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Backend-reported instance states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Active,
    Shutoff,
    Paused,
    Suspended,
    Shelved,
    ShelvedOffloaded,
    Error,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstanceState::Active => "ACTIVE",
            InstanceState::Shutoff => "SHUTOFF",
            InstanceState::Paused => "PAUSED",
            InstanceState::Suspended => "SUSPENDED",
            InstanceState::Shelved => "SHELVED",
            InstanceState::ShelvedOffloaded => "SHELVED_OFFLOADED",
            InstanceState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ComputeInstance {
    pub id: String,
    pub name: String,
    pub state: InstanceState,
    pub public_ip: Option<String>,
    pub tags: HashMap<String, String>,
}

/// The opaque compute backend: raw fleet operations with no policy.
#[async_trait]
pub trait ComputeDriver: Send + Sync {
    async fn get_instance(&self, id: &str) -> Result<ComputeInstance>;
    async fn instances_by_name(&self, name: &str) -> Result<Vec<ComputeInstance>>;
    async fn shelve(&self, id: &str) -> Result<()>;
    async fn unshelve(&self, id: &str) -> Result<()>;
    async fn rebuild(&self, id: &str) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ComputeConfig {
    /// Fleet-ownership tag checked before any destructive action.
    pub tag_key: String,
    pub tag_value: String,
    pub wait_interval: Duration,
    pub wait_timeout: Duration,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            tag_key: "instance_role".to_string(),
            tag_value: "user-vm".to_string(),
            wait_interval: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(900),
        }
    }
}

/// Policy layer over the raw driver: ownership guard, per-operation
/// source-state allow-lists, bounded state polling.
#[derive(Clone)]
pub struct ComputeAdapter {
    driver: Arc<dyn ComputeDriver>,
    config: ComputeConfig,
}

impl ComputeAdapter {
    pub fn new(driver: Arc<dyn ComputeDriver>, config: ComputeConfig) -> Self {
        Self { driver, config }
    }

    fn is_owned(&self, instance: &ComputeInstance) -> bool {
        instance
            .tags
            .get(&self.config.tag_key)
            .map(|v| v.eq_ignore_ascii_case(&self.config.tag_value))
            .unwrap_or(false)
    }

    fn verify_owned(&self, instance: &ComputeInstance) -> Result<()> {
        if !self.is_owned(instance) {
            warn!(instance_id = %instance.id, "instance is not fleet-owned");
            return Err(LifecycleError::Permission {
                instance_id: instance.id.clone(),
            });
        }
        Ok(())
    }

    fn check_allowed(instance: &ComputeInstance, allowed: &[InstanceState]) -> Result<()> {
        if !allowed.contains(&instance.state) {
            return Err(LifecycleError::InvalidState {
                current: instance.state.to_string(),
                required: allowed.iter().map(|s| s.to_string()).collect(),
            });
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<ComputeInstance> {
        self.driver.get_instance(id).await
    }

    /// Fleet-owned instances matching a name.
    pub async fn list_by_name(&self, name: &str) -> Result<Vec<ComputeInstance>> {
        let instances = self.driver.instances_by_name(name).await?;
        Ok(instances.into_iter().filter(|i| self.is_owned(i)).collect())
    }

    /// Shelve an instance. Already-shelved instances are a success.
    pub async fn shelve(&self, id: &str) -> Result<()> {
        let instance = self.get(id).await?;
        self.verify_owned(&instance)?;

        if matches!(
            instance.state,
            InstanceState::Shelved | InstanceState::ShelvedOffloaded
        ) {
            info!(instance_id = %id, "instance already shelved");
            return Ok(());
        }

        Self::check_allowed(
            &instance,
            &[
                InstanceState::Active,
                InstanceState::Shutoff,
                InstanceState::Paused,
                InstanceState::Suspended,
            ],
        )?;

        self.driver.shelve(id).await
    }

    /// Unshelve an instance. An already-active instance is a success.
    pub async fn unshelve(&self, id: &str) -> Result<()> {
        let instance = self.get(id).await?;
        self.verify_owned(&instance)?;

        if instance.state == InstanceState::Active {
            info!(instance_id = %id, "instance already active");
            return Ok(());
        }

        Self::check_allowed(
            &instance,
            &[InstanceState::Shelved, InstanceState::ShelvedOffloaded],
        )?;

        self.driver.unshelve(id).await
    }

    /// Rebuild an instance in place from its base image.
    pub async fn rebuild(&self, id: &str) -> Result<()> {
        let instance = self.get(id).await?;
        self.verify_owned(&instance)?;

        Self::check_allowed(
            &instance,
            &[
                InstanceState::Active,
                InstanceState::Shutoff,
                InstanceState::Error,
            ],
        )?;

        self.driver.rebuild(id).await
    }

    /// Delete an instance. Absence surfaces as `NotFound`, which the
    /// orchestrator treats as already deleted.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let instance = self.get(id).await?;
        self.verify_owned(&instance)?;

        self.driver.delete(id).await
    }

    /// Bounded poll until the instance reaches `target`. Exceeding the
    /// configured timeout is an unexpected failure for the caller.
    pub async fn wait_for_state(
        &self,
        id: &str,
        target: InstanceState,
    ) -> Result<ComputeInstance> {
        let deadline = tokio::time::Instant::now() + self.config.wait_timeout;

        loop {
            let instance = self.get(id).await?;
            if instance.state == target {
                return Ok(instance);
            }
            if instance.state == InstanceState::Error && target != InstanceState::Error {
                return Err(LifecycleError::Management(format!(
                    "instance {} entered ERROR while waiting for {}",
                    id, target
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LifecycleError::Management(format!(
                    "timed out waiting for instance {} to reach {}",
                    id, target
                )));
            }
            tokio::time::sleep(self.config.wait_interval).await;
        }
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }
}

/// Driver speaking the fleet-management REST API in front of the
/// compute backend. Instance actions are plain POSTs; the service
/// answers with the generic instance shape below.
pub struct HttpCompute {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct InstanceDto {
    id: String,
    name: String,
    status: InstanceState,
    public_ip: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl From<InstanceDto> for ComputeInstance {
    fn from(dto: InstanceDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            state: dto.status,
            public_ip: dto.public_ip,
            tags: dto.tags,
        }
    }
}

impl HttpCompute {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn action(&self, id: &str, action: &str) -> Result<()> {
        let url = format!("{}/instances/{}/actions/{}", self.base_url, id, action);
        let response = self
            .client
            .post(&url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(compute_err)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LifecycleError::not_found(ResourceKind::ComputeInstance, id));
        }
        if !response.status().is_success() {
            return Err(LifecycleError::Management(format!(
                "compute {action} returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn compute_err(e: reqwest::Error) -> LifecycleError {
    LifecycleError::Management(format!("compute request failed: {e}"))
}

#[async_trait]
impl ComputeDriver for HttpCompute {
    async fn get_instance(&self, id: &str) -> Result<ComputeInstance> {
        let url = format!("{}/instances/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(compute_err)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LifecycleError::not_found(ResourceKind::ComputeInstance, id));
        }
        if !response.status().is_success() {
            return Err(LifecycleError::Management(format!(
                "compute lookup returned status {}",
                response.status()
            )));
        }

        let dto: InstanceDto = response.json().await.map_err(compute_err)?;
        Ok(dto.into())
    }

    async fn instances_by_name(&self, name: &str) -> Result<Vec<ComputeInstance>> {
        let url = format!("{}/instances", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("name", name)])
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(compute_err)?;

        if !response.status().is_success() {
            return Err(LifecycleError::Management(format!(
                "compute list returned status {}",
                response.status()
            )));
        }

        let dtos: Vec<InstanceDto> = response.json().await.map_err(compute_err)?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn shelve(&self, id: &str) -> Result<()> {
        self.action(id, "shelve").await
    }

    async fn unshelve(&self, id: &str) -> Result<()> {
        self.action(id, "unshelve").await
    }

    async fn rebuild(&self, id: &str) -> Result<()> {
        self.action(id, "rebuild").await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/instances/{}", self.base_url, id);
        let response = self
            .client
            .delete(&url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(compute_err)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LifecycleError::not_found(ResourceKind::ComputeInstance, id));
        }
        if !response.status().is_success() {
            return Err(LifecycleError::Management(format!(
                "compute delete returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

use crate::error::{LifecycleError, ResourceKind, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Read-only project projection from the external directory. Never
/// persisted or cached by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub profile: ProjectProfile,
    pub repository: Repository,
    #[serde(default)]
    pub applications: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectProfile {
    pub id: Uuid,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub url: String,
    #[serde(default)]
    pub token: String,
}

/// Profile projection; carries the owner identity and the resolved
/// notification recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub owner_id: String,
    pub email: String,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn get_project(&self, project_id: Uuid) -> Result<Project>;
    async fn get_profile(&self, profile_id: Uuid) -> Result<Profile>;
}

/// HTTP client for the project/profile directory service.
pub struct HttpDirectory {
    base_url: String,
    client: Client,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        kind: ResourceKind,
        id: Uuid,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "directory lookup");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LifecycleError::DirectoryService(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LifecycleError::not_found(kind, id.to_string()));
        }
        if !response.status().is_success() {
            return Err(LifecycleError::DirectoryService(format!(
                "directory returned status {} for {}",
                response.status(),
                path
            )));
        }

        // Directory responses wrap the payload in a `data` envelope.
        #[derive(Deserialize)]
        struct Envelope<T> {
            data: T,
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| LifecycleError::DirectoryService(e.to_string()))?;

        Ok(envelope.data)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectory {
    async fn get_project(&self, project_id: Uuid) -> Result<Project> {
        self.fetch(
            &format!("/projects/{project_id}"),
            ResourceKind::Project,
            project_id,
        )
        .await
    }

    async fn get_profile(&self, profile_id: Uuid) -> Result<Profile> {
        self.fetch(
            &format!("/profiles/{profile_id}"),
            ResourceKind::Profile,
            profile_id,
        )
        .await
    }
}

use crate::error::{LifecycleError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub admin_username: String,
    pub admin_password: String,
    pub group_name: String,
    pub rdp_port: String,
    pub proxy_hostname: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/guacamole".to_string(),
            admin_username: "guacadmin".to_string(),
            admin_password: "guacadmin".to_string(),
            group_name: "group-sandbox".to_string(),
            rdp_port: "3389".to_string(),
            proxy_hostname: "guacd".to_string(),
        }
    }
}

/// Remote desktop connection description sent to the gateway.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub name: String,
    pub hostname: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub proxy_hostname: String,
}

/// Raw gateway operations. Implementations make "already exists" on
/// create and "not found" on delete successes, so callers stay
/// idempotent without tracking connection ids.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Map of connection id to connection name.
    async fn list_connections(&self) -> Result<HashMap<String, String>>;
    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<()>;
    async fn delete_connection(&self, connection_id: &str) -> Result<()>;
    async fn ensure_user(&self, username: &str, password: &str, group: &str) -> Result<()>;
}

/// Name-keyed idempotent layer the orchestrator calls. Connection
/// identity derives from project name and server public IP, never from
/// a stored connection id.
pub struct GatewayAdapter {
    api: std::sync::Arc<dyn GatewayApi>,
    config: GatewayConfig,
}

impl GatewayAdapter {
    pub fn new(api: std::sync::Arc<dyn GatewayApi>, config: GatewayConfig) -> Self {
        Self { api, config }
    }

    pub fn connection_name(project_name: &str, public_ip: &str) -> String {
        format!("RDP-{project_name}-{public_ip}")
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Create the connection for a server unless one with the derived
    /// name already exists. Returns whether a connection was created.
    pub async fn ensure_connection(
        &self,
        project_name: &str,
        public_ip: &str,
        username: &str,
        password: &str,
    ) -> Result<bool> {
        let name = Self::connection_name(project_name, public_ip);

        let connections = self.api.list_connections().await?;
        if connections.values().any(|n| n == &name) {
            debug!(%name, "gateway connection already exists");
            return Ok(false);
        }

        let spec = ConnectionSpec {
            name: name.clone(),
            hostname: public_ip.to_string(),
            port: self.config.rdp_port.clone(),
            username: username.to_string(),
            password: password.to_string(),
            proxy_hostname: self.config.proxy_hostname.clone(),
        };

        self.api.create_connection(&spec).await?;
        info!(%name, "gateway connection created");
        Ok(true)
    }

    /// Delete the connection for a server if present. Returns whether a
    /// connection was deleted.
    pub async fn remove_connection(&self, project_name: &str, public_ip: &str) -> Result<bool> {
        let name = Self::connection_name(project_name, public_ip);

        let connections = self.api.list_connections().await?;
        let id = connections
            .into_iter()
            .find(|(_, n)| n == &name)
            .map(|(id, _)| id);

        let Some(id) = id else {
            debug!(%name, "no gateway connection to delete");
            return Ok(false);
        };

        self.api.delete_connection(&id).await?;
        info!(%name, connection_id = %id, "gateway connection deleted");
        Ok(true)
    }

    /// Create the gateway user for a server owner and put them in the
    /// configured group. Safe to repeat.
    pub async fn ensure_user(&self, username: &str, password: &str) -> Result<()> {
        self.api
            .ensure_user(username, password, &self.config.group_name)
            .await
    }
}

/// Guacamole-style REST client. Authenticates lazily and caches the
/// session token for the client's lifetime.
pub struct HttpGateway {
    config: GatewayConfig,
    client: Client,
    session: Mutex<Option<Session>>,
}

#[derive(Clone)]
struct Session {
    token: String,
    data_source: String,
}

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(rename = "authToken")]
    auth_token: String,
    #[serde(rename = "dataSource")]
    data_source: String,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            session: Mutex::new(None),
        }
    }

    async fn session(&self) -> Result<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let url = format!("{}/api/tokens", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("username", self.config.admin_username.as_str()),
                ("password", self.config.admin_password.as_str()),
            ])
            .send()
            .await
            .map_err(gateway_err)?;

        if !response.status().is_success() {
            return Err(LifecycleError::Management(format!(
                "gateway authentication returned status {}",
                response.status()
            )));
        }

        let auth: AuthResponse = response.json().await.map_err(gateway_err)?;
        let session = Session {
            token: auth.auth_token,
            data_source: auth.data_source,
        };
        *guard = Some(session.clone());
        Ok(session)
    }
}

fn gateway_err(e: reqwest::Error) -> LifecycleError {
    LifecycleError::Management(format!("gateway request failed: {e}"))
}

#[async_trait]
impl GatewayApi for HttpGateway {
    async fn list_connections(&self) -> Result<HashMap<String, String>> {
        let session = self.session().await?;
        let url = format!(
            "{}/api/session/data/{}/connections",
            self.config.base_url, session.data_source
        );

        let response = self
            .client
            .get(&url)
            .query(&[("token", session.token.as_str())])
            .send()
            .await
            .map_err(gateway_err)?;

        if !response.status().is_success() {
            return Err(LifecycleError::Management(format!(
                "gateway list returned status {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct Connection {
            name: String,
        }

        let connections: HashMap<String, Connection> =
            response.json().await.map_err(gateway_err)?;

        Ok(connections
            .into_iter()
            .map(|(id, c)| (id, c.name))
            .collect())
    }

    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<()> {
        let session = self.session().await?;
        let url = format!(
            "{}/api/session/data/{}/connections",
            self.config.base_url, session.data_source
        );

        let payload = json!({
            "parentIdentifier": "ROOT",
            "name": spec.name,
            "protocol": "rdp",
            "parameters": {
                "hostname": spec.hostname,
                "port": spec.port,
                "username": spec.username,
                "password": spec.password,
                "ignore-cert": "true",
            },
            "attributes": {
                "max-connections": "5",
                "guacd-hostname": spec.proxy_hostname,
            },
        });

        let response = self
            .client
            .post(&url)
            .query(&[("token", session.token.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(gateway_err)?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("already exists") {
                warn!(name = %spec.name, "gateway connection already exists");
                return Ok(());
            }
            return Err(LifecycleError::Management(format!(
                "gateway create returned 400: {body}"
            )));
        }
        if !status.is_success() {
            return Err(LifecycleError::Management(format!(
                "gateway create returned status {status}"
            )));
        }

        Ok(())
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<()> {
        let session = self.session().await?;
        let url = format!(
            "{}/api/session/data/{}/connections/{}",
            self.config.base_url, session.data_source, connection_id
        );

        let response = self
            .client
            .delete(&url)
            .query(&[("token", session.token.as_str())])
            .send()
            .await
            .map_err(gateway_err)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!(%connection_id, "gateway connection already gone");
            return Ok(());
        }
        if !status.is_success() {
            return Err(LifecycleError::Management(format!(
                "gateway delete returned status {status}"
            )));
        }

        Ok(())
    }

    async fn ensure_user(&self, username: &str, password: &str, group: &str) -> Result<()> {
        let session = self.session().await?;
        let users_url = format!(
            "{}/api/session/data/{}/users",
            self.config.base_url, session.data_source
        );

        let payload = json!({
            "username": username,
            "password": password,
            "attributes": {},
        });

        let response = self
            .client
            .post(&users_url)
            .query(&[("token", session.token.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(gateway_err)?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if !body.contains("already exists") {
                return Err(LifecycleError::Management(format!(
                    "gateway user create returned 400: {body}"
                )));
            }
        } else if !status.is_success() {
            return Err(LifecycleError::Management(format!(
                "gateway user create returned status {status}"
            )));
        }

        let groups_url = format!(
            "{}/api/session/data/{}/users/{}/userGroups",
            self.config.base_url, session.data_source, username
        );

        let response = self
            .client
            .patch(&groups_url)
            .query(&[("token", session.token.as_str())])
            .json(&json!([{ "op": "add", "path": "/", "value": group }]))
            .send()
            .await
            .map_err(gateway_err)?;

        if !response.status().is_success() {
            return Err(LifecycleError::Management(format!(
                "gateway group assign returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

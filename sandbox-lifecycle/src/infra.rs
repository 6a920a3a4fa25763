use crate::directory::Project;
use crate::error::{LifecycleError, Result};
use crate::model::CreateServerRequest;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tera::{Context, Tera};
use tracing::{debug, info};
use uuid::Uuid;

/// The job-running substrate. Submission returns as soon as the job is
/// accepted; completion arrives later through a webhook.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn submit(&self, manifest: &str) -> Result<()>;
}

/// Submits rendered job manifests to the substrate over HTTP.
pub struct HttpJobRunner {
    url: String,
    client: Client,
}

impl HttpJobRunner {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl JobRunner for HttpJobRunner {
    async fn submit(&self, manifest: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/yaml")
            .body(manifest.to_string())
            .send()
            .await
            .map_err(|e| LifecycleError::Infrastructure(format!("job submit failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LifecycleError::Infrastructure(format!(
                "job runner returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InfraConfig {
    /// Glob for the tera template directory, e.g. `templates/*.tera`.
    pub template_glob: String,
    pub provision_template: String,
    pub configure_template: String,
    /// Host the jobs call back into on completion.
    pub callback_host: String,
    pub environment: String,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            template_glob: "templates/*.tera".to_string(),
            provision_template: "provision-job.yaml.tera".to_string(),
            configure_template: "configure-job.yaml.tera".to_string(),
            callback_host: "http://localhost:3121".to_string(),
            environment: "dev".to_string(),
        }
    }
}

/// Renders a job specification from a template and hands it to the job
/// runner. Returns immediately; the job reports back via webhook.
pub struct InfraDispatcher {
    tera: Tera,
    runner: Arc<dyn JobRunner>,
    config: InfraConfig,
}

impl InfraDispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, config: InfraConfig) -> Result<Self> {
        let tera = Tera::new(&config.template_glob)
            .map_err(|e| LifecycleError::Infrastructure(format!("template load failed: {e}")))?;

        Ok(Self {
            tera,
            runner,
            config,
        })
    }

    /// Build from a pre-populated template set (used when templates are
    /// registered programmatically rather than loaded from disk).
    pub fn with_tera(tera: Tera, runner: Arc<dyn JobRunner>, config: InfraConfig) -> Self {
        Self {
            tera,
            runner,
            config,
        }
    }

    /// Dispatch the provisioning job that creates the compute instance.
    pub async fn dispatch_provision(
        &self,
        server_id: Uuid,
        req: &CreateServerRequest,
    ) -> Result<()> {
        let job_id = Uuid::new_v4();
        let mut ctx = Context::new();
        ctx.insert("job_name", &format!("{}-{}", req.username, job_id));
        ctx.insert("server_id", &server_id);
        ctx.insert("server_name", &format!("{}-{}", req.username, job_id));
        ctx.insert("callback_host", &self.config.callback_host);
        ctx.insert("environment", &self.config.environment);
        ctx.insert("username", &req.username);
        ctx.insert("image_name", &req.image_name);
        ctx.insert("flavor_name", &req.flavor_name);
        ctx.insert("ssh_public_key", &req.ssh_public_key);

        let manifest = self.render(&self.config.provision_template, &ctx)?;
        self.runner.submit(&manifest).await?;

        info!(%server_id, %job_id, "provision job dispatched");
        Ok(())
    }

    /// Dispatch the configuration job that installs software on a
    /// running instance.
    pub async fn dispatch_configure(
        &self,
        server_id: Uuid,
        public_ip: &str,
        project: &Project,
    ) -> Result<()> {
        let job_id = Uuid::new_v4();
        let mut ctx = Context::new();
        ctx.insert("job_name", &format!("configure-job-{job_id}"));
        ctx.insert("server_id", &server_id);
        ctx.insert("server_ip", public_ip);
        ctx.insert("callback_host", &self.config.callback_host);
        ctx.insert("environment", &self.config.environment);
        ctx.insert("applications", &project.applications);
        ctx.insert("username", &project.profile.username);
        ctx.insert("repository_url", &project.repository.url);
        ctx.insert("project_name", &project.name);
        ctx.insert("project_id", &project.id);
        ctx.insert("project_profile_id", &project.profile.id);

        let manifest = self.render(&self.config.configure_template, &ctx)?;
        self.runner.submit(&manifest).await?;

        info!(%server_id, %job_id, "configure job dispatched");
        Ok(())
    }

    fn render(&self, template: &str, ctx: &Context) -> Result<String> {
        let manifest = self
            .tera
            .render(template, ctx)
            .map_err(|e| LifecycleError::Infrastructure(format!("template render failed: {e}")))?;
        debug!(%template, bytes = manifest.len(), "rendered job manifest");
        Ok(manifest)
    }
}

use sandbox_lifecycle::compute::ComputeConfig;
use sandbox_lifecycle::gateway::GatewayConfig;
use sandbox_lifecycle::infra::InfraConfig;
use sandbox_lifecycle::sweeper::SweepConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_email_threshold")]
    pub sweep_email_threshold_days: f64,

    #[serde(default = "default_delete_threshold")]
    pub sweep_delete_threshold_days: f64,

    #[serde(default = "default_notification_window")]
    pub sweep_notification_window_days: f64,

    #[serde(default = "default_compute_url")]
    pub compute_url: String,

    #[serde(default = "default_compute_token")]
    pub compute_token: String,

    #[serde(default = "default_tag_key")]
    pub compute_tag_key: String,

    #[serde(default = "default_tag_value")]
    pub compute_tag_value: String,

    #[serde(default = "default_wait_interval")]
    pub compute_wait_interval_secs: u64,

    #[serde(default = "default_wait_timeout")]
    pub compute_wait_timeout_secs: u64,

    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_gateway_username")]
    pub gateway_username: String,

    #[serde(default = "default_gateway_password")]
    pub gateway_password: String,

    #[serde(default = "default_gateway_group")]
    pub gateway_group: String,

    #[serde(default = "default_rdp_port")]
    pub gateway_rdp_port: String,

    #[serde(default = "default_proxy_hostname")]
    pub gateway_proxy_hostname: String,

    #[serde(default = "default_directory_url")]
    pub directory_url: String,

    #[serde(default = "default_notifier_url")]
    pub notifier_url: String,

    #[serde(default = "default_job_runner_url")]
    pub job_runner_url: String,

    #[serde(default = "default_template_glob")]
    pub template_glob: String,

    #[serde(default = "default_callback_host")]
    pub callback_host: String,

    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_bind_addr() -> String {
    std::env::var("SANDBOX_API_BIND").unwrap_or_else(|_| "0.0.0.0:8084".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("SANDBOX_API_DB_PATH") {
        return PathBuf::from(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".sandbox")
        .join("api")
        .join("sandbox.db")
}

fn default_sweep_interval() -> u64 {
    env_parsed("SANDBOX_API_SWEEP_INTERVAL", 3600)
}

fn default_email_threshold() -> f64 {
    env_parsed("SANDBOX_SWEEP_EMAIL_DAYS", 25.0)
}

fn default_delete_threshold() -> f64 {
    env_parsed("SANDBOX_SWEEP_DELETE_DAYS", 30.0)
}

fn default_notification_window() -> f64 {
    env_parsed("SANDBOX_SWEEP_WINDOW_DAYS", 1.0)
}

fn default_compute_url() -> String {
    std::env::var("SANDBOX_COMPUTE_URL")
        .unwrap_or_else(|_| "http://localhost:8774/v2.1".to_string())
}

fn default_compute_token() -> String {
    std::env::var("SANDBOX_COMPUTE_TOKEN").unwrap_or_default()
}

fn default_tag_key() -> String {
    std::env::var("SANDBOX_COMPUTE_TAG_KEY").unwrap_or_else(|_| "instance_role".to_string())
}

fn default_tag_value() -> String {
    std::env::var("SANDBOX_COMPUTE_TAG_VALUE").unwrap_or_else(|_| "user-vm".to_string())
}

fn default_wait_interval() -> u64 {
    env_parsed("SANDBOX_COMPUTE_WAIT_INTERVAL", 5)
}

fn default_wait_timeout() -> u64 {
    env_parsed("SANDBOX_COMPUTE_WAIT_TIMEOUT", 900)
}

fn default_gateway_url() -> String {
    std::env::var("SANDBOX_GATEWAY_URL")
        .unwrap_or_else(|_| "http://localhost:8080/guacamole".to_string())
}

fn default_gateway_username() -> String {
    std::env::var("SANDBOX_GATEWAY_USER").unwrap_or_else(|_| "guacadmin".to_string())
}

fn default_gateway_password() -> String {
    std::env::var("SANDBOX_GATEWAY_PASSWORD").unwrap_or_else(|_| "guacadmin".to_string())
}

fn default_gateway_group() -> String {
    std::env::var("SANDBOX_GATEWAY_GROUP").unwrap_or_else(|_| "group-sandbox".to_string())
}

fn default_rdp_port() -> String {
    std::env::var("SANDBOX_GATEWAY_RDP_PORT").unwrap_or_else(|_| "3389".to_string())
}

fn default_proxy_hostname() -> String {
    std::env::var("SANDBOX_GATEWAY_PROXY_HOST").unwrap_or_else(|_| "guacd".to_string())
}

fn default_directory_url() -> String {
    std::env::var("SANDBOX_DIRECTORY_URL").unwrap_or_else(|_| "http://localhost:8081".to_string())
}

fn default_notifier_url() -> String {
    std::env::var("SANDBOX_NOTIFIER_URL")
        .unwrap_or_else(|_| "http://localhost:8082/notifications".to_string())
}

fn default_job_runner_url() -> String {
    std::env::var("SANDBOX_JOB_RUNNER_URL")
        .unwrap_or_else(|_| "http://localhost:8083/jobs".to_string())
}

fn default_template_glob() -> String {
    std::env::var("SANDBOX_TEMPLATE_GLOB").unwrap_or_else(|_| "templates/*.tera".to_string())
}

fn default_callback_host() -> String {
    std::env::var("SANDBOX_CALLBACK_HOST").unwrap_or_else(|_| "http://localhost:8084".to_string())
}

fn default_environment() -> String {
    std::env::var("SANDBOX_ENVIRONMENT").unwrap_or_else(|_| "dev".to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_email_threshold_days: default_email_threshold(),
            sweep_delete_threshold_days: default_delete_threshold(),
            sweep_notification_window_days: default_notification_window(),
            compute_url: default_compute_url(),
            compute_token: default_compute_token(),
            compute_tag_key: default_tag_key(),
            compute_tag_value: default_tag_value(),
            compute_wait_interval_secs: default_wait_interval(),
            compute_wait_timeout_secs: default_wait_timeout(),
            gateway_url: default_gateway_url(),
            gateway_username: default_gateway_username(),
            gateway_password: default_gateway_password(),
            gateway_group: default_gateway_group(),
            gateway_rdp_port: default_rdp_port(),
            gateway_proxy_hostname: default_proxy_hostname(),
            directory_url: default_directory_url(),
            notifier_url: default_notifier_url(),
            job_runner_url: default_job_runner_url(),
            template_glob: default_template_glob(),
            callback_host: default_callback_host(),
            environment: default_environment(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn compute_config(&self) -> ComputeConfig {
        ComputeConfig {
            tag_key: self.compute_tag_key.clone(),
            tag_value: self.compute_tag_value.clone(),
            wait_interval: Duration::from_secs(self.compute_wait_interval_secs),
            wait_timeout: Duration::from_secs(self.compute_wait_timeout_secs),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway_url.clone(),
            admin_username: self.gateway_username.clone(),
            admin_password: self.gateway_password.clone(),
            group_name: self.gateway_group.clone(),
            rdp_port: self.gateway_rdp_port.clone(),
            proxy_hostname: self.gateway_proxy_hostname.clone(),
        }
    }

    pub fn infra_config(&self) -> InfraConfig {
        InfraConfig {
            template_glob: self.template_glob.clone(),
            callback_host: self.callback_host.clone(),
            environment: self.environment.clone(),
            ..InfraConfig::default()
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            email_threshold_days: self.sweep_email_threshold_days,
            delete_threshold_days: self.sweep_delete_threshold_days,
            notification_window_days: self.sweep_notification_window_days,
        }
    }
}

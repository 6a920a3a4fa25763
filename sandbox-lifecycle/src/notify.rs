use crate::error::{LifecycleError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Generic,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        subject: &str,
        message: &str,
        user_id: &str,
    ) -> Result<()>;
}

/// Posts notifications to the message transport's HTTP ingress.
pub struct HttpNotifier {
    url: String,
    client: Client,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
        }
    }
}

#[derive(Serialize)]
struct NotificationRequest<'a> {
    kind: NotificationKind,
    recipient: &'a str,
    subject: &'a str,
    message: &'a str,
    user_id: &'a str,
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        subject: &str,
        message: &str,
        user_id: &str,
    ) -> Result<()> {
        debug!(%recipient, %subject, "sending notification");

        let request = NotificationRequest {
            kind,
            recipient,
            subject,
            message,
            user_id,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LifecycleError::Management(format!("notification send failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LifecycleError::Management(format!(
                "notification transport returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

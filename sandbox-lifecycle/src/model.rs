use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Engine-visible server states. `Error` and `Deleted` are terminal;
/// an operator retries by issuing a fresh operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerState {
    Creating,
    Installing,
    Ready,
    Suspending,
    Suspended,
    Resuming,
    Resetting,
    Deleting,
    Deleted,
    Error,
}

impl ServerState {
    /// Event `step` name for the state being entered or attempted.
    pub fn step_name(&self) -> &'static str {
        match self {
            ServerState::Creating => "CREATING",
            ServerState::Installing => "INSTALLING",
            ServerState::Ready => "READY",
            ServerState::Suspending => "SUSPENDING",
            ServerState::Suspended => "SUSPENDED",
            ServerState::Resuming => "RESUMING",
            ServerState::Resetting => "RESETTING",
            ServerState::Deleting => "DELETING",
            ServerState::Deleted => "DELETED",
            ServerState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.step_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub public_ip: Option<String>,
    pub state: ServerState,
    /// Backend instance id; set once infra provisioning completes,
    /// null only while the record is in `Creating`.
    pub compute_backend_id: Option<String>,
    pub project_id: Uuid,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied to a server row; unset fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerPatch {
    pub state: Option<ServerState>,
    pub public_ip: Option<String>,
    pub compute_backend_id: Option<String>,
}

impl ServerPatch {
    pub fn state(state: ServerState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.public_ip.is_none() && self.compute_backend_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Started,
    Succeeded,
    Failed,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventStatus::Started => "STARTED",
            EventStatus::Succeeded => "SUCCEEDED",
            EventStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Append-only audit record; one STARTED/terminal pair per step attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub project_id: Uuid,
    pub event_type: String,
    pub step: String,
    pub pipeline_id: String,
    pub status: EventStatus,
    pub content: String,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub project_id: Uuid,
    pub username: String,
    pub password: String,
    pub image_name: Option<String>,
    pub flavor_name: Option<String>,
    pub ssh_public_key: Option<String>,
}

/// Completion payload posted by the provision/configure job runners.
/// Applied as a partial update; a payload with no set fields is
/// rejected. Only an explicit ERROR state reports a failed job; a
/// payload without a state is a plain field update on the success path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionUpdate {
    pub state: Option<CompletionState>,
    pub public_ip: Option<String>,
    pub compute_backend_id: Option<String>,
    pub error_type: Option<String>,
    pub error_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionState {
    Ready,
    Error,
}

impl CompletionUpdate {
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.public_ip.is_none()
            && self.compute_backend_id.is_none()
            && self.error_type.is_none()
            && self.error_summary.is_none()
    }

    pub fn failed(&self) -> bool {
        self.state == Some(CompletionState::Error)
    }
}

// Serialize DateTime as RFC 3339 / ISO 8601 string
pub(crate) fn serialize_datetime<S>(
    dt: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}

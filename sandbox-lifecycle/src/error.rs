use thiserror::Error;

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ComputeInstance,
    ServerRecord,
    Project,
    Profile,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::ComputeInstance => "compute instance",
            ResourceKind::ServerRecord => "server record",
            ResourceKind::Project => "project",
            ResourceKind::Profile => "profile",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("server in invalid state for operation: current {current}, required one of [{}]", required.join(", "))]
    InvalidState {
        current: String,
        required: Vec<String>,
    },

    #[error("not authorized to operate on instance {instance_id}")]
    Permission { instance_id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Directory service error: {0}")]
    DirectoryService(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Server management error: {0}")]
    Management(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        LifecycleError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Domain-meaningful errors propagate unchanged to callers; everything
    /// else gets wrapped into `Management` at the workflow boundary.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            LifecycleError::NotFound { .. }
                | LifecycleError::InvalidState { .. }
                | LifecycleError::Permission { .. }
                | LifecycleError::Validation(_)
        )
    }
}

use crate::error::{LifecycleError, ResourceKind, Result};
use crate::model::{Event, EventStatus, Server, ServerPatch, ServerState};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

const EVENT_TYPE_VM: &str = "VM";

/// Persistence layer for server rows and their append-only audit trail.
///
/// Every call runs in its own short-lived acquire/execute scope; no
/// transaction spans an external service call.
#[derive(Clone)]
pub struct ServerStore {
    pool: SqlitePool,
}

impl ServerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a new server row in `Creating` state.
    pub async fn create_server(&self, project_id: Uuid) -> Result<Server> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO servers (id, public_ip, state, compute_backend_id, project_id, created_at, updated_at)
            VALUES (?, NULL, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(ServerState::Creating)
        .bind(project_id)
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        self.get_server(id).await
    }

    /// Get a single server by ID
    pub async fn get_server(&self, id: Uuid) -> Result<Server> {
        let row = sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LifecycleError::not_found(ResourceKind::ServerRecord, id.to_string()))?;

        Ok(row.into())
    }

    /// Get the server owning a compute backend instance (exactly one per instance).
    pub async fn get_server_by_compute_id(&self, compute_backend_id: &str) -> Result<Server> {
        let row =
            sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE compute_backend_id = ?")
                .bind(compute_backend_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| {
                    LifecycleError::not_found(ResourceKind::ServerRecord, compute_backend_id)
                })?;

        Ok(row.into())
    }

    /// List servers, optionally filtered by project
    pub async fn list_servers(&self, project_id: Option<Uuid>) -> Result<Vec<Server>> {
        let mut query = "SELECT * FROM servers WHERE 1=1".to_string();

        if project_id.is_some() {
            query.push_str(" AND project_id = ?");
        }

        query.push_str(" ORDER BY created_at DESC");

        let mut q = sqlx::query_as::<_, ServerRow>(&query);

        if let Some(pid) = project_id {
            q = q.bind(pid);
        }

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    /// Get all servers in a specific state
    pub async fn servers_by_state(&self, state: ServerState) -> Result<Vec<Server>> {
        let rows = sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE state = ?")
            .bind(state)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    /// Apply a partial update to a server row; unset fields are untouched.
    pub async fn update_server(&self, id: Uuid, patch: &ServerPatch) -> Result<Server> {
        if patch.is_empty() {
            return Err(LifecycleError::Validation(
                "no fields set in server update".to_string(),
            ));
        }

        let mut query = "UPDATE servers SET updated_at = ?".to_string();

        if patch.state.is_some() {
            query.push_str(", state = ?");
        }
        if patch.public_ip.is_some() {
            query.push_str(", public_ip = ?");
        }
        if patch.compute_backend_id.is_some() {
            query.push_str(", compute_backend_id = ?");
        }

        query.push_str(" WHERE id = ?");

        let mut q = sqlx::query(&query).bind(Utc::now().timestamp());

        if let Some(state) = patch.state {
            q = q.bind(state);
        }
        if let Some(public_ip) = &patch.public_ip {
            q = q.bind(public_ip);
        }
        if let Some(compute_backend_id) = &patch.compute_backend_id {
            q = q.bind(compute_backend_id);
        }

        let result = q.bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(LifecycleError::not_found(
                ResourceKind::ServerRecord,
                id.to_string(),
            ));
        }

        self.get_server(id).await
    }

    /// Remove a server row. The row is physically deleted, not flagged.
    pub async fn delete_server_row(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LifecycleError::not_found(
                ResourceKind::ServerRecord,
                id.to_string(),
            ));
        }

        Ok(())
    }

    /// Suspended servers whose last update is at least `days` days old.
    /// A server suspended for exactly `days` is included.
    pub async fn suspended_older_than(&self, days: f64) -> Result<Vec<Server>> {
        let cutoff = Utc::now() - days_duration(days);

        let rows = sqlx::query_as::<_, ServerRow>(
            "SELECT * FROM servers WHERE state = ? AND updated_at <= ?",
        )
        .bind(ServerState::Suspended)
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    /// Suspended servers with suspension age in `[lower_days, upper_days)`.
    /// The lower bound is inclusive, the upper bound exclusive.
    pub async fn suspended_in_window(&self, lower_days: f64, upper_days: f64) -> Result<Vec<Server>> {
        let now = Utc::now();
        let newest = now - days_duration(lower_days);
        let oldest = now - days_duration(upper_days);

        let rows = sqlx::query_as::<_, ServerRow>(
            "SELECT * FROM servers WHERE state = ? AND updated_at <= ? AND updated_at > ?",
        )
        .bind(ServerState::Suspended)
        .bind(newest.timestamp())
        .bind(oldest.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    /// Append an audit event. Rows are never updated or deleted.
    pub async fn record_event(
        &self,
        project_id: Uuid,
        step: &str,
        status: EventStatus,
        content: Option<&str>,
    ) -> Result<()> {
        let derived;
        let content = match content {
            Some(content) => content,
            None => {
                derived = format!("Step '{}' has {}.", step, status.to_string().to_lowercase());
                &derived
            }
        };

        sqlx::query(
            r#"
            INSERT INTO events (project_id, event_type, step, pipeline_id, status, content, created_at)
            VALUES (?, ?, ?, '', ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(EVENT_TYPE_VM)
        .bind(step)
        .bind(status)
        .bind(content)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Audit trail for a project, oldest first.
    pub async fn events_for_project(&self, project_id: Uuid) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM events WHERE project_id = ? ORDER BY id ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }
}

fn days_duration(days: f64) -> Duration {
    Duration::seconds((days * 86_400.0) as i64)
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct ServerRow {
    id: Uuid,
    public_ip: Option<String>,
    state: ServerState,
    compute_backend_id: Option<String>,
    project_id: Uuid,
    created_at: i64,
    updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    project_id: Uuid,
    event_type: String,
    step: String,
    pipeline_id: String,
    status: EventStatus,
    content: String,
    created_at: i64,
}

impl From<ServerRow> for Server {
    fn from(row: ServerRow) -> Self {
        Self {
            id: row.id,
            public_ip: row.public_ip,
            state: row.state,
            compute_backend_id: row.compute_backend_id,
            project_id: row.project_id,
            created_at: timestamp(row.created_at),
            updated_at: timestamp(row.updated_at),
        }
    }
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            event_type: row.event_type,
            step: row.step,
            pipeline_id: row.pipeline_id,
            status: row.status,
            content: row.content,
            created_at: timestamp(row.created_at),
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let store = ServerStore::new(create_test_db().await);
        let server = store.create_server(Uuid::new_v4()).await.unwrap();

        let err = store
            .update_server(server.id, &ServerPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn update_unknown_server_is_not_found() {
        let store = ServerStore::new(create_test_db().await);

        let err = store
            .update_server(Uuid::new_v4(), &ServerPatch::state(ServerState::Ready))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }

    #[tokio::test]
    async fn event_content_defaults_to_step_sentence() {
        let store = ServerStore::new(create_test_db().await);
        let project_id = Uuid::new_v4();

        store
            .record_event(project_id, "CREATING", EventStatus::Started, None)
            .await
            .unwrap();
        store
            .record_event(project_id, "CREATING", EventStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let events = store.events_for_project(project_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].content, "Step 'CREATING' has started.");
        assert_eq!(events[0].event_type, "VM");
        assert_eq!(events[1].content, "boom");
    }

    #[tokio::test]
    async fn lookup_by_compute_id() {
        let store = ServerStore::new(create_test_db().await);
        let server = store.create_server(Uuid::new_v4()).await.unwrap();
        store
            .update_server(
                server.id,
                &ServerPatch {
                    compute_backend_id: Some("inst-42".to_string()),
                    ..ServerPatch::default()
                },
            )
            .await
            .unwrap();

        let found = store.get_server_by_compute_id("inst-42").await.unwrap();
        assert_eq!(found.id, server.id);

        let err = store.get_server_by_compute_id("missing").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }

    #[tokio::test]
    async fn suspension_window_is_half_open() {
        let store = ServerStore::new(create_test_db().await);
        let project_id = Uuid::new_v4();

        for days in [24.9_f64, 25.0, 25.9, 26.0] {
            let server = store.create_server(project_id).await.unwrap();
            let updated_at = Utc::now().timestamp() - (days * 86_400.0) as i64;
            sqlx::query("UPDATE servers SET state = 'SUSPENDED', updated_at = ? WHERE id = ?")
                .bind(updated_at)
                .bind(server.id)
                .execute(store.pool())
                .await
                .unwrap();
        }

        let in_window = store.suspended_in_window(25.0, 26.0).await.unwrap();
        assert_eq!(in_window.len(), 2);

        let older = store.suspended_older_than(25.0).await.unwrap();
        assert_eq!(older.len(), 3);
    }
}

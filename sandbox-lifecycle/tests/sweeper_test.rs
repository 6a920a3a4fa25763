//! Integration tests for the idle sweeper
//!
//! Covers the notify/delete window boundaries, the read-only preview,
//! and per-server failure containment during a sweep pass.

mod common;

use chrono::Utc;
use common::{harness, Harness};
use sandbox_lifecycle::compute::InstanceState;
use sandbox_lifecycle::sweeper::{IdleSweeper, SweepConfig};
use sandbox_lifecycle::ServerState;
use uuid::Uuid;

fn sweeper(h: &Harness) -> IdleSweeper {
    IdleSweeper::new(
        h.orchestrator.clone(),
        h.directory.clone(),
        h.notifier.clone(),
        SweepConfig::default(),
    )
}

/// Insert a SUSPENDED row whose last update lies `days` days in the
/// past, with a registered shelved compute instance.
async fn suspended_server(h: &Harness, days: f64) -> Uuid {
    let server = h.store.create_server(h.project_id).await.unwrap();
    let compute_id = format!("inst-{}", server.id);
    h.compute
        .add_instance(&compute_id, InstanceState::ShelvedOffloaded);

    let updated_at = Utc::now().timestamp() - (days * 86_400.0) as i64;
    sqlx::query(
        "UPDATE servers SET state = 'SUSPENDED', compute_backend_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&compute_id)
    .bind(updated_at)
    .bind(server.id)
    .execute(h.store.pool())
    .await
    .unwrap();

    server.id
}

#[tokio::test]
async fn test_notify_window_boundaries() {
    let h = harness().await;
    let too_young = suspended_server(&h, 24.9).await;
    let at_threshold = suspended_server(&h, 25.0).await;
    let mid_window = suspended_server(&h, 25.5).await;
    let past_window = suspended_server(&h, 26.0).await;

    let preview = sweeper(&h).preview().await.unwrap();

    let notify: Vec<_> = preview.notify.iter().map(|c| c.server_id).collect();
    assert!(!notify.contains(&too_young));
    assert!(notify.contains(&at_threshold));
    assert!(notify.contains(&mid_window));
    assert!(!notify.contains(&past_window));
    assert!(preview.delete.is_empty());
}

#[tokio::test]
async fn test_delete_threshold_boundary() {
    let h = harness().await;
    let not_yet = suspended_server(&h, 29.9).await;
    let at_threshold = suspended_server(&h, 30.0).await;
    let long_gone = suspended_server(&h, 45.0).await;

    let preview = sweeper(&h).preview().await.unwrap();

    let delete: Vec<_> = preview.delete.iter().map(|c| c.server_id).collect();
    assert!(!delete.contains(&not_yet));
    assert!(delete.contains(&at_threshold));
    assert!(delete.contains(&long_gone));
    assert!(preview.notify.is_empty());
}

#[tokio::test]
async fn test_preview_mutates_nothing() {
    let h = harness().await;
    let notify_id = suspended_server(&h, 25.2).await;
    let delete_id = suspended_server(&h, 31.0).await;

    let preview = sweeper(&h).preview().await.unwrap();
    assert_eq!(preview.notify.len(), 1);
    assert_eq!(preview.delete.len(), 1);
    assert_eq!(preview.notify[0].project_name, h.directory.project_name());
    assert!(preview.delete[0].days_suspended >= 31.0);

    // Nothing was sent, nothing was touched.
    assert_eq!(h.notifier.sent_count(), 0);
    for id in [notify_id, delete_id] {
        let server = h.store.get_server(id).await.unwrap();
        assert_eq!(server.state, ServerState::Suspended);
    }
    let events = h.store.events_for_project(h.project_id).await.unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_run_notifies_and_deletes() {
    let h = harness().await;
    let notify_id = suspended_server(&h, 25.2).await;
    let delete_id = suspended_server(&h, 31.0).await;

    let outcome = sweeper(&h).run().await.unwrap();
    assert_eq!(outcome.notified, 1);
    assert_eq!(outcome.deleted, 1);
    assert_eq!(outcome.failed, 0);

    // Warning plus deletion notice.
    assert_eq!(h.notifier.sent_count(), 2);

    assert!(h.store.get_server(notify_id).await.is_ok());
    assert!(h.store.get_server(delete_id).await.is_err());
}

#[tokio::test]
async fn test_run_failure_does_not_abort_pass() {
    let h = harness().await;
    let doomed = suspended_server(&h, 31.0).await;
    let stuck = suspended_server(&h, 32.0).await;

    // Replace the stuck server's instance with one the fleet does not
    // own, so its deletion is refused.
    let stuck_row = h.store.get_server(stuck).await.unwrap();
    let compute_id = stuck_row.compute_backend_id.unwrap();
    h.compute
        .add_foreign_instance(&compute_id, InstanceState::ShelvedOffloaded);

    let outcome = sweeper(&h).run().await.unwrap();
    assert_eq!(outcome.deleted, 1);
    assert_eq!(outcome.failed, 1);

    assert!(h.store.get_server(doomed).await.is_err());
    assert!(h.store.get_server(stuck).await.is_ok());
}

#[tokio::test]
async fn test_deleted_idle_server_releases_compute() {
    let h = harness().await;
    let delete_id = suspended_server(&h, 31.0).await;
    let server = h.store.get_server(delete_id).await.unwrap();
    let compute_id = server.compute_backend_id.unwrap();

    let outcome = sweeper(&h).run().await.unwrap();
    assert_eq!(outcome.deleted, 1);
    assert_eq!(h.compute.instance_state(&compute_id), None);
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-server async locks. Lifecycle transitions for a server run under
/// its lock so concurrent requests serialize instead of interleaving
/// state reads and writes.
#[derive(Clone, Default)]
pub struct ServerLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl ServerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a server, waiting if another transition for
    /// the same server is in flight. The guard releases on drop.
    pub async fn acquire(&self, server_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // An entry only the map still references has no guard or
            // waiter left; guards and waiters clone the Arc under this
            // same map lock.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(server_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_server_serializes() {
        let locks = ServerLocks::new();
        let id = Uuid::new_v4();
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                assert_eq!(counter.load(Ordering::SeqCst), seen + 1);
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn different_servers_do_not_block() {
        let locks = ServerLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = locks.acquire(Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn released_entries_are_evicted() {
        let locks = ServerLocks::new();

        drop(locks.acquire(Uuid::new_v4()).await);
        drop(locks.acquire(Uuid::new_v4()).await);

        let held = Uuid::new_v4();
        let _guard = locks.acquire(held).await;
        assert_eq!(locks.tracked(), 1);
    }
}

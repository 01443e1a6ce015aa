//! Bounded pool of browser sessions.
//!
//! A session is either idle in the pool or exclusively owned by one
//! [`SessionLease`]. The number of live sessions never exceeds the pool
//! capacity, and a crashed session is replaced rather than returned.

use crate::error::{BrowserError, Result};
use crate::profile::SessionConfig;
use crate::session::{BrowserSession, SessionLauncher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// How a session should be treated when its lease is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    /// Reusable for the next task
    Healthy,
    /// Discard and launch a replacement
    Crashed,
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub launched: u64,
    pub acquired: u64,
    pub released: u64,
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    launched: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            launched: self.launched.load(Ordering::SeqCst),
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }
}

/// Exclusive ownership of one session.
///
/// Return it with [`SessionManager::release`]. A lease dropped without being
/// released (a cancelled or panicking task) discards its session as crashed and
/// frees the slot; the pool launches a replacement on the next acquire.
pub struct SessionLease {
    session: Option<Box<dyn BrowserSession>>,
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<Counters>,
}

impl SessionLease {
    pub fn session(&self) -> &dyn BrowserSession {
        match &self.session {
            Some(session) => session.as_ref(),
            None => unreachable!("lease session taken before release"),
        }
    }

    pub fn session_mut(&mut self) -> &mut dyn BrowserSession {
        match &mut self.session {
            Some(session) => session.as_mut(),
            None => unreachable!("lease session taken before release"),
        }
    }

    pub fn id(&self) -> u64 {
        self.session().id()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::warn!("session {} dropped without release, discarding", session.id());
            self.counters.released.fetch_add(1, Ordering::SeqCst);
            self.counters.discarded.fetch_add(1, Ordering::SeqCst);
            drop(session);
        }
        drop(self.permit.take());
    }
}

/// Acquires, recycles and replaces browser sessions.
pub struct SessionManager {
    launcher: Arc<dyn SessionLauncher>,
    config: SessionConfig,
    capacity: usize,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn BrowserSession>>>,
    counters: Arc<Counters>,
}

impl SessionManager {
    /// Create a pool of at most `capacity` concurrent sessions.
    ///
    /// Sessions are launched lazily; call [`SessionManager::warm_up`] to start
    /// them ahead of the first task.
    pub fn new(launcher: Arc<dyn SessionLauncher>, config: SessionConfig, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            launcher,
            config,
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            idle: Mutex::new(Vec::with_capacity(capacity)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sessions launched and waiting for a task.
    pub fn idle_count(&self) -> usize {
        self.idle_sessions().len()
    }

    /// Slots not held by a lease.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Launch sessions until every free slot has an idle session.
    pub async fn warm_up(&self) -> Result<usize> {
        let mut started = 0;
        loop {
            let missing = {
                let idle = self.idle_sessions().len();
                self.available().saturating_sub(idle)
            };
            if missing == 0 {
                break;
            }
            let session = self.launch().await?;
            self.idle_sessions().push(session);
            started += 1;
        }
        tracing::info!("Warmed up {} browser sessions", started);
        Ok(started)
    }

    /// Wait for a free slot and hand out an exclusive session.
    pub async fn acquire(&self) -> Result<SessionLease> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| BrowserError::PoolClosed)?;

        let session = match self.take_idle().await {
            Some(session) => session,
            None => self.launch().await?,
        };

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Acquired session {}", session.id());

        Ok(SessionLease {
            session: Some(session),
            permit: Some(permit),
            counters: Arc::clone(&self.counters),
        })
    }

    /// Return a lease to the pool.
    ///
    /// A healthy, live session goes back to the idle list. Anything else is
    /// closed and a replacement is launched in its place, so the pool keeps its
    /// size across crashes. Replacement failures are logged; the next acquire
    /// retries the launch.
    pub async fn release(&self, mut lease: SessionLease, health: SessionHealth) {
        let Some(session) = lease.session.take() else {
            return;
        };
        self.counters.released.fetch_add(1, Ordering::SeqCst);

        if health == SessionHealth::Healthy && session.is_alive() {
            tracing::debug!("Released session {}", session.id());
            self.idle_sessions().push(session);
            return;
        }

        let id = session.id();
        self.counters.discarded.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = session.close().await {
            tracing::debug!("closing crashed session {} failed: {}", id, e);
        }
        tracing::warn!("Discarded crashed session {}, launching replacement", id);

        match self.launch().await {
            Ok(replacement) => self.idle_sessions().push(replacement),
            Err(e) => tracing::warn!("Replacement for session {} failed: {}", id, e),
        }
        // Slot is freed only after the replacement is idle
        drop(lease);
    }

    /// Close every idle session and refuse further acquires.
    pub async fn shutdown(&self) {
        self.slots.close();
        let sessions: Vec<_> = self.idle_sessions().drain(..).collect();
        for session in sessions {
            let id = session.id();
            if let Err(e) = session.close().await {
                tracing::debug!("closing session {} failed: {}", id, e);
            }
        }
    }

    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let session = self.launcher.launch(&self.config).await?;
        self.counters.launched.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    /// Pop an idle session, closing any that died while idle.
    async fn take_idle(&self) -> Option<Box<dyn BrowserSession>> {
        loop {
            let session = self.idle_sessions().pop()?;
            if session.is_alive() {
                return Some(session);
            }
            let id = session.id();
            self.counters.discarded.fetch_add(1, Ordering::SeqCst);
            tracing::warn!("Idle session {} died, discarding", id);
            if let Err(e) = session.close().await {
                tracing::debug!("closing dead session {} failed: {}", id, e);
            }
        }
    }

    fn idle_sessions(&self) -> MutexGuard<'_, Vec<Box<dyn BrowserSession>>> {
        // A poisoned idle list still holds valid sessions
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::BrowserCookie;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct FakeSession {
        id: u64,
        alive: Arc<AtomicBool>,
        open: Arc<AtomicU64>,
    }

    #[async_trait::async_trait]
    impl BrowserSession for FakeSession {
        fn id(&self) -> u64 {
            self.id
        }

        async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn page_source(&self) -> Result<String> {
            Ok(String::new())
        }

        async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
            Ok(Vec::new())
        }

        async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn close(self: Box<Self>) -> Result<()> {
            if self.is_alive() {
                Ok(())
            } else {
                Err(BrowserError::Crashed("already gone".to_string()))
            }
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        next_id: AtomicU64,
        open: Arc<AtomicU64>,
        alive: std::sync::Mutex<Vec<Arc<AtomicBool>>>,
    }

    #[async_trait::async_trait]
    impl SessionLauncher for FakeLauncher {
        async fn launch(&self, _config: &SessionConfig) -> Result<Box<dyn BrowserSession>> {
            self.open.fetch_add(1, Ordering::SeqCst);
            let alive = Arc::new(AtomicBool::new(true));
            self.alive.lock().unwrap().push(Arc::clone(&alive));
            Ok(Box::new(FakeSession {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                alive,
                open: Arc::clone(&self.open),
            }))
        }
    }

    fn pool(capacity: usize) -> (SessionManager, Arc<AtomicU64>) {
        let launcher = FakeLauncher::default();
        let open = Arc::clone(&launcher.open);
        let manager = SessionManager::new(Arc::new(launcher), SessionConfig::default(), capacity);
        (manager, open)
    }

    #[tokio::test]
    async fn test_healthy_session_is_reused() {
        let (manager, open) = pool(1);

        let lease = manager.acquire().await.unwrap();
        let first = lease.id();
        manager.release(lease, SessionHealth::Healthy).await;

        let lease = manager.acquire().await.unwrap();
        assert_eq!(lease.id(), first);
        manager.release(lease, SessionHealth::Healthy).await;

        assert_eq!(open.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().launched, 1);
    }

    #[tokio::test]
    async fn test_crashed_session_is_replaced() {
        let (manager, open) = pool(2);
        manager.warm_up().await.unwrap();
        assert_eq!(manager.idle_count(), 2);

        let lease = manager.acquire().await.unwrap();
        let crashed = lease.id();
        manager.release(lease, SessionHealth::Crashed).await;

        assert_eq!(manager.idle_count(), 2);
        assert_eq!(manager.available(), 2);
        assert_eq!(open.load(Ordering::SeqCst), 2);

        let lease = manager.acquire().await.unwrap();
        assert_ne!(lease.id(), crashed);
        manager.release(lease, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_consecutive_crashes_leak_nothing() {
        let (manager, open) = pool(2);

        for _ in 0..25 {
            let lease = manager.acquire().await.unwrap();
            manager.release(lease, SessionHealth::Crashed).await;
        }

        let stats = manager.stats();
        assert_eq!(stats.acquired, 25);
        assert_eq!(stats.released, 25);
        assert_eq!(stats.discarded, 25);
        assert_eq!(manager.available(), manager.capacity());
        assert!(open.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dropped_lease_frees_slot() {
        let (manager, _open) = pool(1);

        let lease = manager.acquire().await.unwrap();
        assert_eq!(manager.available(), 0);
        drop(lease);

        assert_eq!(manager.available(), 1);
        let stats = manager.stats();
        assert_eq!(stats.released, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let (manager, _open) = pool(1);

        let lease = manager.acquire().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), manager.acquire()).await;
        assert!(blocked.is_err());

        manager.release(lease, SessionHealth::Healthy).await;
        let lease = tokio::time::timeout(Duration::from_millis(50), manager.acquire())
            .await
            .expect("slot freed")
            .unwrap();
        manager.release(lease, SessionHealth::Healthy).await;
    }

    #[tokio::test]
    async fn test_dead_idle_session_is_discarded_on_acquire() {
        let launcher = Arc::new(FakeLauncher::default());
        let open = Arc::clone(&launcher.open);
        let manager = SessionManager::new(launcher.clone(), SessionConfig::default(), 1);
        manager.warm_up().await.unwrap();

        let dead = launcher.alive.lock().unwrap()[0].clone();
        dead.store(false, Ordering::SeqCst);

        let lease = manager.acquire().await.unwrap();
        assert_ne!(lease.id(), 0);
        assert!(lease.session().is_alive());
        manager.release(lease, SessionHealth::Healthy).await;

        let stats = manager.stats();
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.launched, 2);
        assert_eq!(open.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_pool() {
        let (manager, open) = pool(2);
        manager.warm_up().await.unwrap();
        manager.shutdown().await;

        assert_eq!(manager.idle_count(), 0);
        assert_eq!(open.load(Ordering::SeqCst), 0);
        assert!(matches!(
            manager.acquire().await,
            Err(BrowserError::PoolClosed)
        ));
    }
}

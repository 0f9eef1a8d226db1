// Concurrent session registry with idle expiry
//
// Sessions are keyed by v4 UUID and live entirely in memory; restarting the
// process forgets them all. Each entry wraps its state in a tokio Mutex so
// the two model-backed operations are serialized per session while separate
// sessions proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::errors::{SessionError, SessionResult};
use crate::core::types::SessionView;
use crate::session::state::ChartSession;
use crate::utils::metrics::Metrics;

type SessionCell = Arc<Mutex<ChartSession>>;

/// Shared handle to the session map. Cloning is cheap; all clones observe
/// the same sessions.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    sessions: DashMap<Uuid, SessionCell>,
    ttl: Duration,
    metrics: Option<Metrics>,
}

impl SessionStore {
    pub fn new(ttl: Duration, metrics: Option<Metrics>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                sessions: DashMap::new(),
                ttl,
                metrics,
            }),
        }
    }

    /// Create an empty session and return its id.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.inner
            .sessions
            .insert(id, Arc::new(Mutex::new(ChartSession::new())));
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_session_created();
        }
        self.publish_count();
        debug!("Session {} created", id);
        id
    }

    /// Lock a session for exclusive use. The guard is owned so callers can
    /// hold it across model calls; a second trigger on the same session
    /// waits here until the first finishes.
    pub async fn lock(&self, id: Uuid) -> SessionResult<OwnedMutexGuard<ChartSession>> {
        let cell = self.cell(id)?;
        Ok(cell.lock_owned().await)
    }

    /// Read-only snapshot. Touches the session so polling keeps it alive.
    pub async fn view(&self, id: Uuid) -> SessionResult<SessionView> {
        let cell = self.cell(id)?;
        let mut session = cell.lock_owned().await;
        session.touch();
        Ok(session.view(id))
    }

    pub fn remove(&self, id: Uuid) -> SessionResult<()> {
        self.inner
            .sessions
            .remove(&id)
            .ok_or(SessionError::NotFound(id))?;
        self.publish_count();
        debug!("Session {} removed", id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Drop sessions idle past the TTL. Entries whose mutex is held are
    /// mid-operation and skipped; they get a fresh idle clock when the
    /// operation touches them.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.inner.ttl;
        let expired: Vec<Uuid> = self
            .inner
            .sessions
            .iter()
            .filter_map(|entry| match entry.value().try_lock() {
                Ok(session) if session.idle_for() > ttl => Some(*entry.key()),
                _ => None,
            })
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.inner.sessions.remove(&id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_sessions_expired(removed);
            }
            self.publish_count();
            info!("Expired {} idle session(s)", removed);
        }
        removed
    }

    /// Spawn the background expiry loop.
    pub fn start_expiry_task(&self, interval: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                store.sweep_expired();
            }
        });
        info!(
            "Session expiry task started (ttl: {}s, sweep every {}s)",
            self.inner.ttl.as_secs(),
            interval.as_secs()
        );
    }

    fn cell(&self, id: Uuid) -> SessionResult<SessionCell> {
        self.inner
            .sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SessionError::NotFound(id))
    }

    fn publish_count(&self) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_open_sessions(self.inner.sessions.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ImageKind, Stage, UploadedImage};

    fn store_with_ttl(ttl_ms: u64) -> SessionStore {
        SessionStore::new(Duration::from_millis(ttl_ms), None)
    }

    fn jpeg_upload() -> UploadedImage {
        UploadedImage {
            filename: "chart.jpg".to_string(),
            kind: ImageKind::Jpeg,
            mime_type: "image/jpeg".to_string(),
            bytes: Arc::new(vec![0xff, 0xd8, 0xff]),
        }
    }

    #[tokio::test]
    async fn create_then_view() {
        let store = store_with_ttl(60_000);
        let id = store.create();
        assert_eq!(store.len(), 1);

        let view = store.view(id).await.unwrap();
        assert_eq!(view.session_id, id);
        assert_eq!(view.stage, Stage::NoImage);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = store_with_ttl(60_000);
        let id = Uuid::new_v4();

        let err = store.view(id).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(missing) if missing == id));
        assert!(store.lock(id).await.is_err());
        assert!(store.remove(id).is_err());
    }

    #[tokio::test]
    async fn remove_forgets_the_session() {
        let store = store_with_ttl(60_000);
        let id = store.create();
        store.remove(id).unwrap();

        assert!(store.is_empty());
        assert!(store.view(id).await.is_err());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = store_with_ttl(60_000);
        let a = store.create();
        let b = store.create();

        {
            let mut session = store.lock(a).await.unwrap();
            session.set_image(jpeg_upload());
        }

        let view_a = store.view(a).await.unwrap();
        let view_b = store.view(b).await.unwrap();
        assert_eq!(view_a.stage, Stage::ImageLoaded);
        assert_eq!(view_b.stage, Stage::NoImage);
    }

    #[tokio::test]
    async fn lock_serializes_access() {
        let store = store_with_ttl(60_000);
        let id = store.create();

        let guard = store.lock(id).await.unwrap();
        // While the first guard is alive a second lock cannot be acquired.
        let contended =
            tokio::time::timeout(Duration::from_millis(50), store.lock(id)).await;
        assert!(contended.is_err());

        drop(guard);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(50), store.lock(id)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn sweep_removes_idle_sessions() {
        let store = store_with_ttl(30);
        let id = store.create();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.sweep_expired(), 1);
        assert!(store.view(id).await.is_err());
    }

    #[tokio::test]
    async fn sweep_keeps_recently_touched_sessions() {
        let store = store_with_ttl(200);
        let id = store.create();
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.view(id).await.unwrap(); // touches

        assert_eq!(store.sweep_expired(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn sweep_skips_sessions_in_use() {
        let store = store_with_ttl(10);
        let id = store.create();
        let guard = store.lock(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Locked entry is mid-operation, never expired out from under it.
        assert_eq!(store.sweep_expired(), 0);
        drop(guard);
    }
}

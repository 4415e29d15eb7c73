//! Identity-keyed registry enforcing one active session per key.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};

use super::{Session, SessionId, SessionOutcome};

/// Shared map state. Session callbacks reach it through a `Weak`, so pending
/// sessions do not keep a dropped registry alive.
struct Entries<K> {
    sessions: Mutex<HashMap<K, Session>>,
}

impl<K: Eq + Hash> Entries<K> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Session>> {
        // User callbacks never run under this lock, so a poisoned map is still consistent.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key` only while it still maps to session `id`.
    fn evict(&self, key: &K, id: SessionId) -> bool {
        let mut sessions = self.lock();
        match sessions.get(key) {
            Some(session) if session.id() == id => {
                sessions.remove(key);
                true
            }
            _ => false,
        }
    }
}

/// Concurrency-safe store of active sessions, at most one per identity key.
///
/// Cloning yields another handle to the same registry.
///
/// The registry is responsible for:
/// - Rejecting a new session while the key already has an active one
/// - Dropping entries when their session terminates
/// - Routing stop requests to the right session
pub struct SessionRegistry<K> {
    entries: Arc<Entries<K>>,
}

impl<K> SessionRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Entries {
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a session for `key` unless one is already active.
    ///
    /// Returns `true` if a new session was started. When the session ends,
    /// its entry is removed before `on_end` is called, so `count()` observed
    /// from inside the callback no longer includes it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_if_absent<P, F>(
        &self,
        key: K,
        duration: Duration,
        on_end: F,
        payload: P,
    ) -> bool
    where
        P: Send + 'static,
        F: FnOnce(P, SessionOutcome) + Send + 'static,
    {
        let mut sessions = self.entries.lock();
        let slot = match sessions.entry(key) {
            Entry::Occupied(occupied) => {
                debug!("Session for {:?} already active, not creating", occupied.key());
                return false;
            }
            Entry::Vacant(vacant) => vacant,
        };

        let id = SessionId::next();
        let owner = slot.key().clone();
        let entries = Arc::downgrade(&self.entries);
        let wrapped = move |payload: P, outcome: SessionOutcome| {
            if let Some(entries) = entries.upgrade() {
                if entries.evict(&owner, id) {
                    debug!("Session {} for {:?} removed itself", id, owner);
                } else {
                    debug!("Session {} for {:?} was already removed", id, owner);
                }
            }
            on_end(payload, outcome);
        };

        info!("Starting session {} for {:?} ({:?})", id, slot.key(), duration);
        slot.insert(Session::spawn(id, duration, wrapped, payload));
        true
    }

    /// Stop the active session for `key`, if any.
    ///
    /// Returns `true` if a session was removed and signalled to cancel. The
    /// callback for the cancelled session may still be in flight when this
    /// returns.
    pub fn remove_if_exists<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + fmt::Debug + ?Sized,
    {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(session) => {
                session.cancel();
                info!("Cancelled session {} for {:?}", session.id(), key);
                true
            }
            None => false,
        }
    }

    /// Whether `key` currently has an active session.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.lock().contains_key(key)
    }

    /// Number of active sessions.
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Cancel every active session and empty the registry.
    ///
    /// Returns the number of sessions that were signalled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(K, Session)> = self.entries.lock().drain().collect();
        for (key, session) in &drained {
            session.cancel();
            debug!("Cancelled session {} for {:?}", session.id(), key);
        }
        if !drained.is_empty() {
            info!("Cancelled {} active session(s)", drained.len());
        }
        drained.len()
    }
}

impl<K> Default for SessionRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for SessionRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: Eq + Hash> fmt::Debug for SessionRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const LONG: Duration = Duration::from_secs(60);

    type Events = mpsc::UnboundedReceiver<(u32, SessionOutcome, usize)>;

    /// Hands out callbacks that record the payload, the outcome and the
    /// registry size observed from inside the callback.
    struct Observer {
        tx: mpsc::UnboundedSender<(u32, SessionOutcome, usize)>,
        registry: SessionRegistry<String>,
    }

    impl Observer {
        fn callback(&self) -> Box<dyn FnOnce(u32, SessionOutcome) + Send> {
            let tx = self.tx.clone();
            let registry = self.registry.clone();
            Box::new(move |payload, outcome| {
                let _ = tx.send((payload, outcome, registry.count()));
            })
        }
    }

    fn observer(registry: &SessionRegistry<String>) -> (Observer, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = Observer {
            tx,
            registry: registry.clone(),
        };
        (observer, rx)
    }

    async fn next_event(rx: &mut Events) -> (u32, SessionOutcome, usize) {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("callback did not fire in time")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_entry_removed_before_callback_runs() {
        let registry = SessionRegistry::new();
        let (observer, mut rx) = observer(&registry);

        let created = registry.create_if_absent(
            "u1".to_string(),
            Duration::from_millis(10),
            observer.callback(),
            7,
        );
        assert!(created);
        assert_eq!(registry.count(), 1);

        let (payload, outcome, seen_count) = next_event(&mut rx).await;
        assert_eq!(payload, 7);
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(seen_count, 0);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let registry = SessionRegistry::new();
        let (observer, _rx) = observer(&registry);

        assert!(registry.create_if_absent("u1".to_string(), LONG, observer.callback(), 1));
        assert!(!registry.create_if_absent("u1".to_string(), LONG, observer.callback(), 2));
        assert!(registry.contains("u1"));
        assert_eq!(registry.count(), 1);

        registry.cancel_all();
    }

    #[tokio::test]
    async fn test_remove_signals_cancellation() {
        let registry = SessionRegistry::new();
        let (observer, mut rx) = observer(&registry);

        registry.create_if_absent("u1".to_string(), LONG, observer.callback(), 1);
        assert!(registry.remove_if_exists("u1"));
        assert!(!registry.contains("u1"));
        assert_eq!(registry.count(), 0);

        let (_, outcome, _) = next_event(&mut rx).await;
        assert_eq!(outcome, SessionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_remove_missing_key_returns_false() {
        let registry: SessionRegistry<String> = SessionRegistry::new();
        assert!(!registry.remove_if_exists("ghost"));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_stale_callback_does_not_evict_newer_session() {
        let registry = SessionRegistry::new();
        let (observer, mut rx) = observer(&registry);

        registry.create_if_absent("u1".to_string(), LONG, observer.callback(), 1);
        assert!(registry.remove_if_exists("u1"));

        // The first session's task has not run yet on this single-threaded
        // runtime, so the replacement is stored before the old callback fires.
        assert!(registry.create_if_absent("u1".to_string(), LONG, observer.callback(), 2));

        let (payload, outcome, seen_count) = next_event(&mut rx).await;
        assert_eq!(payload, 1);
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(seen_count, 1);
        assert!(registry.contains("u1"));

        assert!(registry.remove_if_exists("u1"));
        let (payload, outcome, _) = next_event(&mut rx).await;
        assert_eq!(payload, 2);
        assert_eq!(outcome, SessionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_all_drains_registry() {
        let registry = SessionRegistry::new();
        let (observer, mut rx) = observer(&registry);

        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            registry.create_if_absent(key.to_string(), LONG, observer.callback(), i as u32);
        }
        assert_eq!(registry.cancel_all(), 3);
        assert_eq!(registry.count(), 0);

        for _ in 0..3 {
            let (_, outcome, _) = next_event(&mut rx).await;
            assert_eq!(outcome, SessionOutcome::Cancelled);
        }
        assert_eq!(registry.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_callback_runs_after_registry_dropped() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.create_if_absent(
            "u1".to_string(),
            Duration::from_millis(5),
            move |payload: u32, outcome| {
                let _ = tx.send((payload, outcome));
            },
            9,
        );
        drop(registry);

        let (payload, outcome) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, 9);
        assert_eq!(outcome, SessionOutcome::Completed);
    }
}

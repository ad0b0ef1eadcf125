//! Lifecycle envelope around one user's `Store`.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db::{store::Store, DbError, DbResult, SyncTimestamp};

/// An element starts Open, turns Stopping once eviction or shutdown claims
/// it, and ends Stopped with its store closed. A request that finds its
/// element Stopping/Stopped backs off at the pool layer and retries against
/// a fresh element.
enum ElementState {
    Open(Arc<Store>),
    Stopping,
    Stopped,
}

/// Per-user request serialization state, guarded by the request lock that is
/// held for the whole lifetime of a request.
#[derive(Default)]
pub struct RequestState {
    /// When the last successful write finished. Writes sleep long enough
    /// past this point that two writes can never share a 10 ms timestamp
    /// quantum.
    pub last_change: Option<Instant>,
}

pub struct Element {
    uid: String,
    state: Mutex<ElementState>,
    request_lock: Arc<AsyncMutex<RequestState>>,
    last_used: Mutex<Instant>,
}

impl Element {
    pub fn new(uid: String, store: Store) -> Self {
        Element {
            uid,
            state: Mutex::new(ElementState::Open(Arc::new(store))),
            request_lock: Arc::new(AsyncMutex::new(RequestState::default())),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    fn state(&self) -> MutexGuard<'_, ElementState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state(), ElementState::Open(_))
    }

    /// The store, while the element is still open.
    pub fn store(&self) -> DbResult<Arc<Store>> {
        match &*self.state() {
            ElementState::Open(store) => Ok(Arc::clone(store)),
            _ => Err(DbError::element_stopped()),
        }
    }

    /// Serializes every request to this user. Held across the request's
    /// whole lifetime, including the write-spacing sleep and the store work.
    pub async fn acquire(&self) -> OwnedMutexGuard<RequestState> {
        Arc::clone(&self.request_lock).lock_owned().await
    }

    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Stop this element, waiting out any in-flight request. The Stopping
    /// mark goes up first so the pool bounces new arrivals while we wait.
    pub async fn stop(&self, final_purge: bool) {
        let store = self.begin_stop();
        let _guard = self.request_lock.lock().await;
        self.finish_stop(store, final_purge);
    }

    /// Stop only if no request is in flight right now. Used by the idle
    /// eviction walk, which skips busy elements rather than waiting.
    pub fn try_stop(&self, final_purge: bool) -> bool {
        let guard = match self.request_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        let store = self.begin_stop();
        self.finish_stop(store, final_purge);
        drop(guard);
        true
    }

    fn begin_stop(&self) -> Option<Arc<Store>> {
        let mut state = self.state();
        match std::mem::replace(&mut *state, ElementState::Stopping) {
            ElementState::Open(store) => Some(store),
            other => {
                *state = other;
                None
            }
        }
    }

    fn finish_stop(&self, store: Option<Arc<Store>>, final_purge: bool) {
        if final_purge {
            if let Some(store) = &store {
                if let Err(e) = store.purge_expired(SyncTimestamp::now()) {
                    warn!("Final purge failed"; "uid" => self.uid.as_str(), "error" => e.to_string());
                }
            }
        }
        // dropping the Arc closes the connection once in-flight readers let
        // go of their clones
        drop(store);
        *self.state() = ElementState::Stopped;
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state() {
            ElementState::Open(_) => "open",
            ElementState::Stopping => "stopping",
            ElementState::Stopped => "stopped",
        };
        f.debug_struct("Element")
            .field("uid", &self.uid)
            .field("state", &state)
            .finish()
    }
}

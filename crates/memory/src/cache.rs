//! Cache of live memory sessions, one per `(agent_id, user_id)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};

use crate::extractor::MemoryExtractor;
use crate::session::{MemorySession, SessionSettings};

pub type SharedSession = Arc<AsyncMutex<MemorySession>>;

/// Default bound on cached sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

struct CachedSession {
    session: SharedSession,
    last_used: Instant,
}

/// Hands out shared sessions so concurrent requests from the same user
/// serialize on one session while different users never contend.
///
/// At most `max_sessions` are kept. When a new pair arrives at the bound,
/// the least recently used sessions nobody is holding are dropped; their
/// stored data stays in the store. Sessions in use are never dropped, so
/// the cache can briefly exceed the bound under load.
pub struct SessionManager {
    store: Arc<dyn MemoryStore>,
    settings: SessionSettings,
    extractor: Option<Arc<dyn MemoryExtractor>>,
    max_sessions: usize,
    sessions: Mutex<HashMap<Namespace, CachedSession>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn MemoryStore>, settings: SessionSettings) -> Self {
        Self {
            store,
            settings,
            extractor: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Bound the cache. Clamped to at least 1.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MemoryExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// The cached session for this pair, created on first use.
    pub fn session(&self, agent_id: &str, user_id: &str) -> SharedSession {
        let ns = Namespace::for_session(agent_id, user_id);
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = sessions.get_mut(&ns) {
            cached.last_used = Instant::now();
            return cached.session.clone();
        }

        if sessions.len() >= self.max_sessions {
            prune_idle(&mut sessions, self.max_sessions - 1);
        }
        debug!(agent_id, user_id, "Memory session created");
        let mut session =
            MemorySession::new(agent_id, user_id, self.store.clone(), self.settings.clone());
        if let Some(extractor) = &self.extractor {
            session = session.with_extractor(extractor.clone());
        }
        let session = Arc::new(AsyncMutex::new(session));
        sessions.insert(
            ns,
            CachedSession {
                session: session.clone(),
                last_used: Instant::now(),
            },
        );
        session
    }

    /// Wipe all tiers for this pair and drop it from the cache.
    pub async fn reset(&self, agent_id: &str, user_id: &str) -> Result<(), MemoryError> {
        let session = self.session(agent_id, user_id);
        session.lock().await.clear_all().await?;
        self.evict(agent_id, user_id);
        Ok(())
    }

    /// Drop the cached session. Stored data is untouched.
    pub fn evict(&self, agent_id: &str, user_id: &str) -> bool {
        let ns = Namespace::for_session(agent_id, user_id);
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ns)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop idle sessions, least recently used first, until at most `keep`
/// remain or none are idle.
fn prune_idle(sessions: &mut HashMap<Namespace, CachedSession>, keep: usize) {
    let mut idle: Vec<(Namespace, Instant)> = sessions
        .iter()
        .filter(|(_, cached)| Arc::strong_count(&cached.session) == 1)
        .map(|(ns, cached)| (ns.clone(), cached.last_used))
        .collect();
    idle.sort_by_key(|(_, last_used)| *last_used);

    let excess = sessions.len().saturating_sub(keep);
    for (ns, _) in idle.into_iter().take(excess) {
        sessions.remove(&ns);
        debug!(namespace = %ns, "Idle memory session dropped");
    }
}

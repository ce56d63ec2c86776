//! Registry of live sessions and queues.

use super::permits::FairSemaphore;
use super::queue::Queue;
use super::{Session, SessionState};
use chrono::{DateTime, Utc};
use rverify_common::{EngineConfig, QueueId, SessionId, VerifyError};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot of a session for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<QueueId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pair_errors: Vec<String>,
}

impl SessionStatus {
    pub fn of(session: &Session) -> Self {
        let (error, pair_errors) = match session.outcome() {
            Some(Err(e)) => (Some(e.to_string()), Vec::new()),
            Some(Ok(pairs)) => (
                None,
                pairs
                    .iter()
                    .filter_map(|pair| pair.as_ref().err())
                    .map(ToString::to_string)
                    .collect(),
            ),
            None => (None, Vec::new()),
        };
        Self {
            id: session.id(),
            state: session.state(),
            queue_id: session.queue_id(),
            started_at: session.started_at(),
            finished_at: session.finished_at(),
            error,
            pair_errors,
        }
    }
}

struct Registry<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> Registry<K, V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.read().get(key).cloned()
    }
}

/// Tracks sessions and queues by id; lookups never block running work.
pub struct SessionManager {
    config: EngineConfig,
    sessions: Registry<SessionId, Arc<Session>>,
    queues: Registry<QueueId, Arc<Queue>>,
    permits: Registry<QueueId, Arc<FairSemaphore>>,
}

impl SessionManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: Registry::new(),
            queues: Registry::new(),
            permits: Registry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Track a session; with `launch` it starts on its own thread right away.
    pub fn register_session(
        &self,
        session: Arc<Session>,
        launch: bool,
    ) -> Result<SessionId, VerifyError> {
        let id = session.id();
        self.sessions.write().insert(id, Arc::clone(&session));
        debug!("Registered session {}", id);
        if launch {
            self.launch(session)?;
        }
        Ok(id)
    }

    /// Run a session on a dedicated thread, under its queue's permits if it has a queue.
    pub fn launch(&self, session: Arc<Session>) -> Result<(), VerifyError> {
        let permits = session.queue_id().and_then(|q| self.permits.get(&q));
        thread::Builder::new()
            .name(format!("rverify-session-{}", session.id()))
            .spawn(move || {
                if let Err(e) = session.execute(permits.as_deref()) {
                    warn!("Session {} did not run: {}", session.id(), e);
                }
            })
            .map(|_| ())
            .map_err(|e| VerifyError::Session(format!("Could not launch session: {}", e)))
    }

    /// Build and register a queue; `None` uses the configured default concurrency.
    pub fn new_queue(
        &self,
        sessions: Vec<Arc<Session>>,
        concurrency: Option<usize>,
    ) -> Result<Arc<Queue>, VerifyError> {
        let concurrency = concurrency.unwrap_or(self.config.default_concurrency);
        let queue = Queue::builder(concurrency).extend(sessions).build()?;
        self.register_queue(Arc::clone(&queue));
        Ok(queue)
    }

    pub fn register_queue(&self, queue: Arc<Queue>) {
        let id = queue.id();
        {
            let mut sessions = self.sessions.write();
            for session in queue.sessions() {
                sessions.insert(session.id(), Arc::clone(session));
            }
        }
        self.permits.write().insert(id, Arc::clone(queue.permits()));
        self.queues.write().insert(id, queue);
        info!("Registered queue {}", id);
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id)
    }

    pub fn queue(&self, id: QueueId) -> Option<Arc<Queue>> {
        self.queues.get(&id)
    }

    pub fn status(&self, id: SessionId) -> Option<SessionStatus> {
        self.session(id).map(|session| SessionStatus::of(&session))
    }

    /// Sessions that have not completed yet
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .values()
            .filter(|session| !session.is_completed())
            .map(|session| session.id())
            .collect()
    }

    pub fn queue_states(&self, id: QueueId) -> Result<Vec<SessionStatus>, VerifyError> {
        let queue = self.require_queue(id)?;
        Ok(queue
            .sessions()
            .iter()
            .map(|session| SessionStatus::of(session))
            .collect())
    }

    /// Block until the queue completed, then drop its registration unless another caller waits.
    pub fn run_queue(&self, id: QueueId) -> Result<Arc<Queue>, VerifyError> {
        let queue = self.require_queue(id)?;
        queue.run();
        self.release(&queue);
        Ok(queue)
    }

    pub fn run_queue_timeout(
        &self,
        id: QueueId,
        timeout: Duration,
    ) -> Result<Arc<Queue>, VerifyError> {
        let queue = self.require_queue(id)?;
        queue.run_timeout(timeout)?;
        self.release(&queue);
        Ok(queue)
    }

    fn release(&self, queue: &Queue) {
        if let Err(e) = self.teardown(queue.id()) {
            debug!("Keeping queue {}: {}", queue.id(), e);
        }
    }

    /// Drop a finished queue and its sessions. Refused while sessions run or callers wait.
    pub fn teardown(&self, id: QueueId) -> Result<(), VerifyError> {
        let queue = self.require_queue(id)?;
        if !queue.is_complete() || queue.waiters() > 0 {
            return Err(VerifyError::Session(format!(
                "Queue {} is still in use",
                id
            )));
        }
        {
            let mut sessions = self.sessions.write();
            for session in queue.sessions() {
                sessions.remove(&session.id());
            }
        }
        self.permits.write().remove(&id);
        self.queues.write().remove(&id);
        info!("Tore down queue {}", id);
        Ok(())
    }

    fn require_queue(&self, id: QueueId) -> Result<Arc<Queue>, VerifyError> {
        self.queue(id)
            .ok_or_else(|| VerifyError::Session(format!("Unknown queue {}", id)))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

//! Independently schedulable comparison units and their bounded-parallel execution.

pub mod manager;
pub mod permits;
pub mod queue;

pub use manager::{SessionManager, SessionStatus};
pub use permits::{FairSemaphore, Permit};
pub use queue::{Queue, QueueBuilder};

use crate::manager::{ComparePair, ComparisonManager};
use chrono::{DateTime, Utc};
use rverify_common::{CompareResult, QueueId, RuleConfig, SessionId, VerifyError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    NotStarted,
    Started,
    InProgress,
    Awaiting,
    OnHold,
    Completed,
}

impl SessionState {
    /// `NOT_STARTED -> STARTED -> IN_PROGRESS -> (AWAITING | ON_HOLD)* -> COMPLETED`.
    /// A queued session waits for its permit while STARTED.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (NotStarted, Started)
                | (Started, InProgress)
                | (InProgress, Awaiting)
                | (InProgress, OnHold)
                | (InProgress, Completed)
                | (Awaiting, InProgress)
                | (Awaiting, OnHold)
                | (Awaiting, Completed)
                | (OnHold, InProgress)
                | (OnHold, Awaiting)
                | (OnHold, Completed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::NotStarted => "NOT_STARTED",
            SessionState::Started => "STARTED",
            SessionState::InProgress => "IN_PROGRESS",
            SessionState::Awaiting => "AWAITING",
            SessionState::OnHold => "ON_HOLD",
            SessionState::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Result of one pair; a failing pair never hides its siblings.
pub type PairOutcome = Result<CompareResult, VerifyError>;

/// Per-pair outcomes of a session, or the error that ended it as a whole
pub type SessionOutcome = Result<Vec<PairOutcome>, VerifyError>;

/// The unit of work a session runs once
pub type Job = Box<dyn FnOnce() -> SessionOutcome + Send>;

#[derive(Debug)]
struct Progress {
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    outcome: Option<SessionOutcome>,
}

pub struct Session {
    id: SessionId,
    queue_id: OnceLock<QueueId>,
    progress: Mutex<Progress>,
    done: Condvar,
    job: Mutex<Option<Job>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("queue_id", &self.queue_id.get())
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce() -> SessionOutcome + Send + 'static,
    {
        Self {
            id: SessionId::new(),
            queue_id: OnceLock::new(),
            progress: Mutex::new(Progress {
                state: SessionState::NotStarted,
                started_at: None,
                finished_at: None,
                outcome: None,
            }),
            done: Condvar::new(),
            job: Mutex::new(Some(Box::new(job))),
        }
    }

    /// Session running one batch of pairs through the comparison manager
    pub fn for_comparison(
        manager: Arc<ComparisonManager>,
        pairs: Vec<ComparePair>,
        rules: RuleConfig,
    ) -> Self {
        Self::new(move || Ok(manager.compare(&pairs, &rules)))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn queue_id(&self) -> Option<QueueId> {
        self.queue_id.get().copied()
    }

    /// Bind the session to its queue; a session belongs to one queue only.
    pub(crate) fn assign_queue(&self, queue: QueueId) -> bool {
        self.queue_id.set(queue).is_ok()
    }

    pub fn state(&self) -> SessionState {
        self.progress().state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.progress().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.progress().finished_at
    }

    pub fn is_completed(&self) -> bool {
        self.state() == SessionState::Completed
    }

    /// Result of the run; `None` until the session completed.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.progress().outcome.clone()
    }

    /// Whether some caller already took the job.
    pub fn has_run(&self) -> bool {
        self.job.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Block until the session reached COMPLETED.
    pub fn wait_completed(&self) {
        let progress = self
            .done
            .wait_while(self.progress(), |p| p.state != SessionState::Completed)
            .unwrap_or_else(PoisonError::into_inner);
        drop(progress);
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn set_state(&self, next: SessionState) -> Result<(), VerifyError> {
        let mut progress = self.progress();
        self.advance(&mut progress, next)?;
        drop(progress);
        if next == SessionState::Completed {
            self.done.notify_all();
        }
        Ok(())
    }

    fn advance(&self, progress: &mut Progress, next: SessionState) -> Result<(), VerifyError> {
        if !progress.state.can_transition_to(next) {
            return Err(VerifyError::Session(format!(
                "Session {} cannot move from {} to {}",
                self.id, progress.state, next
            )));
        }
        debug!("Session {}: {} -> {}", self.id, progress.state, next);
        progress.state = next;
        match next {
            SessionState::Started => progress.started_at = Some(Utc::now()),
            SessionState::Completed => progress.finished_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    /// Run the job once, holding a permit from `permits` until the session completed.
    /// Job errors and panics are recorded as the outcome; the session completes either way.
    pub fn execute(&self, permits: Option<&FairSemaphore>) -> Result<(), VerifyError> {
        let job = {
            let mut slot = self.job.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(job) = slot.take() else {
                return Err(VerifyError::Session(format!("Session {} already ran", self.id)));
            };
            if let Err(e) = self.set_state(SessionState::Started) {
                *slot = Some(job);
                return Err(e);
            }
            job
        };

        let permit = permits.map(FairSemaphore::acquire);
        self.set_state(SessionState::InProgress)?;

        let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(outcome) => outcome,
            Err(payload) => Err(VerifyError::Session(format!(
                "Session {} panicked: {}",
                self.id,
                panic_message(payload.as_ref())
            ))),
        };

        match &outcome {
            Err(e) => error!("Session {} failed: {}", self.id, e),
            Ok(pairs) => {
                for e in pairs.iter().filter_map(|pair| pair.as_ref().err()) {
                    error!("Session {}: pair failed: {}", self.id, e);
                }
            }
        }
        let completed = self.finish(outcome);
        drop(permit);
        completed
    }

    fn finish(&self, outcome: SessionOutcome) -> Result<(), VerifyError> {
        let mut progress = self.progress();
        progress.outcome = Some(outcome);
        self.advance(&mut progress, SessionState::Completed)?;
        drop(progress);
        self.done.notify_all();
        Ok(())
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

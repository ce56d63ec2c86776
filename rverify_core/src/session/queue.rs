//! Bounded-parallel execution of a fixed set of sessions.

use super::permits::FairSemaphore;
use super::{Session, SessionState};
use crossbeam::channel;
use rverify_common::{QueueId, SessionId, VerifyError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct QueueBuilder {
    concurrency: usize,
    sessions: Vec<Arc<Session>>,
}

impl QueueBuilder {
    pub fn add(mut self, session: Arc<Session>) -> Self {
        self.sessions.push(session);
        self
    }

    pub fn extend<I>(mut self, sessions: I) -> Self
    where
        I: IntoIterator<Item = Arc<Session>>,
    {
        self.sessions.extend(sessions);
        self
    }

    /// Fails when a session is already bound to another queue.
    pub fn build(self) -> Result<Arc<Queue>, VerifyError> {
        let id = QueueId::new();
        for session in &self.sessions {
            if !session.assign_queue(id) {
                return Err(VerifyError::Session(format!(
                    "Session {} already belongs to queue {}",
                    session.id(),
                    session.queue_id().map(|q| q.to_string()).unwrap_or_default()
                )));
            }
        }
        let concurrency = self.concurrency.max(1);
        Ok(Arc::new(Queue {
            id,
            sessions: self.sessions,
            concurrency,
            permits: Arc::new(FairSemaphore::new(concurrency)),
            completed: Mutex::new(Vec::new()),
            done: Condvar::new(),
            started: AtomicBool::new(false),
            waiters: AtomicUsize::new(0),
        }))
    }
}

/// Fixed set of sessions run with at most `concurrency` in progress at once
#[derive(Debug)]
pub struct Queue {
    id: QueueId,
    sessions: Vec<Arc<Session>>,
    concurrency: usize,
    permits: Arc<FairSemaphore>,
    completed: Mutex<Vec<SessionId>>,
    done: Condvar,
    started: AtomicBool,
    waiters: AtomicUsize,
}

impl Queue {
    pub fn builder(concurrency: usize) -> QueueBuilder {
        QueueBuilder {
            concurrency,
            sessions: Vec::new(),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn permits(&self) -> &Arc<FairSemaphore> {
        &self.permits
    }

    /// Launch every session. Later calls are no-ops.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "Queue {}: starting {} session(s), concurrency {}",
            self.id,
            self.sessions.len(),
            self.concurrency
        );

        let (sender, receiver) = channel::unbounded::<Arc<Session>>();
        for session in &self.sessions {
            // receiver is alive, send cannot fail
            let _ = sender.send(Arc::clone(session));
        }
        drop(sender);

        let mut spawned = 0;
        for n in 0..self.concurrency.min(self.sessions.len()) {
            let queue = Arc::clone(self);
            let receiver = receiver.clone();
            match thread::Builder::new()
                .name(format!("rverify-queue-{}", n))
                .spawn(move || {
                    for session in receiver.iter() {
                        queue.run_session(&session);
                    }
                }) {
                Ok(_) => spawned += 1,
                Err(e) => warn!("Queue {}: could not spawn worker {}: {}", self.id, n, e),
            }
        }

        if spawned == 0 && !self.sessions.is_empty() {
            warn!("Queue {}: no workers, running sessions inline", self.id);
            for session in receiver.try_iter() {
                self.run_session(&session);
            }
        }
    }

    /// Counts the session once it reached COMPLETED, whoever ran it.
    fn run_session(&self, session: &Session) {
        if let Err(e) = session.execute(Some(&self.permits)) {
            if session.has_run() {
                debug!("Queue {}: session {} runs elsewhere: {}", self.id, session.id(), e);
                session.wait_completed();
            } else {
                warn!("Queue {}: session {} did not run: {}", self.id, session.id(), e);
            }
        }
        let mut completed = self.completed();
        completed.push(session.id());
        debug!(
            "Queue {}: {}/{} complete",
            self.id,
            completed.len(),
            self.sessions.len()
        );
        drop(completed);
        self.done.notify_all();
    }

    /// Start if needed and block until every session completed.
    pub fn run(self: &Arc<Self>) {
        self.start();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let total = self.sessions.len();
        let guard = self
            .done
            .wait_while(self.completed(), |done| done.len() < total)
            .unwrap_or_else(PoisonError::into_inner);
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    /// Like [`Queue::run`], giving up after `timeout`. Sessions keep running.
    pub fn run_timeout(self: &Arc<Self>, timeout: Duration) -> Result<(), VerifyError> {
        self.start();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let total = self.sessions.len();
        let (guard, result) = self
            .done
            .wait_timeout_while(self.completed(), timeout, |done| done.len() < total)
            .unwrap_or_else(PoisonError::into_inner);
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        if result.timed_out() {
            warn!("Queue {}: timed out after {:?}", self.id, timeout);
            return Err(VerifyError::Timeout(timeout.as_millis()));
        }
        Ok(())
    }

    pub fn completed_sessions(&self) -> Vec<SessionId> {
        self.completed().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.completed().len() == self.sessions.len()
    }

    /// Threads currently blocked in `run`/`run_timeout`
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }

    pub fn states(&self) -> Vec<(SessionId, SessionState)> {
        self.sessions
            .iter()
            .map(|session| (session.id(), session.state()))
            .collect()
    }

    fn completed(&self) -> MutexGuard<'_, Vec<SessionId>> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn tracked(running: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Arc<Session> {
        let running = Arc::clone(running);
        let peak = Arc::clone(peak);
        Arc::new(Session::new(move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }))
    }

    #[test]
    fn test_concurrency_cap_and_completion() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let queue = Queue::builder(2)
            .extend((0..8).map(|_| tracked(&running, &peak)))
            .build()
            .unwrap();

        queue.run();
        assert!(queue.is_complete());
        assert_eq!(queue.completed_sessions().len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.permits().available(), 2);
        assert!(queue
            .states()
            .iter()
            .all(|(_, state)| *state == SessionState::Completed));
        assert_eq!(queue.waiters(), 0);
    }

    #[test]
    fn test_failing_session_does_not_block_the_queue() {
        let queue = Queue::builder(1)
            .add(Arc::new(Session::new(|| panic!("boom"))))
            .add(Arc::new(Session::new(|| Ok(Vec::new()))))
            .build()
            .unwrap();
        queue.run();
        assert!(queue.is_complete());
        assert!(queue.sessions()[0].outcome().unwrap().is_err());
        assert!(queue.sessions()[1].outcome().unwrap().is_ok());
    }

    #[test]
    fn test_empty_queue_completes_immediately() {
        let queue = Queue::builder(3).build().unwrap();
        queue.run_timeout(Duration::from_millis(50)).unwrap();
        assert!(queue.is_complete());
    }

    #[test]
    fn test_run_timeout_reports_slow_queues() {
        let queue = Queue::builder(1)
            .add(Arc::new(Session::new(|| {
                thread::sleep(Duration::from_millis(300));
                Ok(Vec::new())
            })))
            .build()
            .unwrap();
        let err = queue.run_timeout(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, VerifyError::Timeout(20));
        queue.run();
        assert!(queue.is_complete());
    }

    #[test]
    fn test_session_run_elsewhere_counts_once_completed() {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let session = Arc::new(Session::new(move || {
            let _ = ready_tx.send(());
            let _ = go_rx.recv();
            Ok(Vec::new())
        }));
        let queue = Queue::builder(1).add(Arc::clone(&session)).build().unwrap();

        let runner = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.execute(None))
        };
        ready_rx.recv().unwrap();

        queue.start();
        let err = queue.run_timeout(Duration::from_millis(50)).unwrap_err();
        assert_eq!(err, VerifyError::Timeout(50));
        assert!(queue.completed_sessions().is_empty());
        assert_eq!(session.state(), SessionState::InProgress);

        go_tx.send(()).unwrap();
        queue.run();
        runner.join().unwrap().unwrap();
        assert_eq!(queue.completed_sessions(), vec![session.id()]);
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn test_session_belongs_to_one_queue() {
        let session = Arc::new(Session::new(|| Ok(Vec::new())));
        let first = Queue::builder(1).add(Arc::clone(&session)).build().unwrap();
        assert_eq!(session.queue_id(), Some(first.id()));
        assert!(Queue::builder(1).add(session).build().is_err());
    }
}

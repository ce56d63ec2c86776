use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct TicketState {
    available: usize,
    next_ticket: u64,
    serving: u64,
}

/// Counting semaphore handing out permits strictly in arrival order
#[derive(Debug)]
pub struct FairSemaphore {
    capacity: usize,
    state: Mutex<TicketState>,
    turn: Condvar,
}

impl FairSemaphore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(TicketState {
                available: capacity,
                next_ticket: 0,
                serving: 0,
            }),
            turn: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// Block until this caller is first in line and a permit is free.
    pub fn acquire(&self) -> Permit<'_> {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let mut state = self
            .turn
            .wait_while(state, |s| s.serving != ticket || s.available == 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.serving += 1;
        state.available -= 1;
        drop(state);
        // the next ticket holder may be able to proceed as well
        self.turn.notify_all();
        Permit { semaphore: self }
    }

    /// Take a permit only when nobody is queued and one is free.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut state = self.lock();
        if state.serving != state.next_ticket || state.available == 0 {
            return None;
        }
        state.next_ticket += 1;
        state.serving += 1;
        state.available -= 1;
        Some(Permit { semaphore: self })
    }

    fn release(&self) {
        let mut state = self.lock();
        state.available += 1;
        drop(state);
        self.turn.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, TicketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held permit; released on drop, including during unwinding.
#[derive(Debug)]
pub struct Permit<'a> {
    semaphore: &'a FairSemaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_permits_are_returned_on_drop() {
        let semaphore = FairSemaphore::new(2);
        {
            let _a = semaphore.acquire();
            let _b = semaphore.acquire();
            assert_eq!(semaphore.available(), 0);
            assert!(semaphore.try_acquire().is_none());
        }
        assert_eq!(semaphore.available(), 2);
    }

    #[test]
    fn test_permit_released_when_holder_panics() {
        let semaphore = Arc::new(FairSemaphore::new(1));
        let clone = Arc::clone(&semaphore);
        let outcome = thread::spawn(move || {
            let _permit = clone.acquire();
            panic!("comparison blew up");
        })
        .join();
        assert!(outcome.is_err());
        assert_eq!(semaphore.available(), 1);
    }

    #[test]
    fn test_cap_is_never_exceeded() {
        let semaphore = Arc::new(FairSemaphore::new(3));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let semaphore = Arc::clone(&semaphore);
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _permit = semaphore.acquire();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(semaphore.available(), 3);
    }
}

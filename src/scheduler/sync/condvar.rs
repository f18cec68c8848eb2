/*
 * Condition Variables
 *
 * Implemented the classic way: each waiter parks on its own private,
 * single-use semaphore rather than sharing one semaphore across all
 * waiters. This avoids the lost-wakeup race where notify_one() wakes a
 * thread that hasn't gone to sleep yet.
 */

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Mutex;

use super::lock::Lock;
use super::semaphore::Semaphore;

pub struct Condvar {
    waiters: Mutex<VecDeque<Arc<Semaphore>>>,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Atomically release `lock` and block until signaled, then reacquire
    /// `lock` before returning. `lock` must be held by the caller.
    pub fn wait(&self, lock: &Lock) {
        let my_sem = Arc::new(Semaphore::new(0));
        self.waiters.lock().push_back(my_sem.clone());

        lock.release();
        my_sem.down();
        lock.acquire();
    }

    /// Wake one waiting thread, if any.
    pub fn notify_one(&self) {
        if let Some(sem) = self.waiters.lock().pop_front() {
            sem.up();
        }
    }

    /// Wake every waiting thread.
    pub fn notify_all(&self) {
        let mut waiters = self.waiters.lock();
        while let Some(sem) = waiters.pop_front() {
            sem.up();
        }
    }
}

/*
 * Counting Semaphore
 *
 * The base blocking primitive everything else in this module is built on
 * (locks, condition variables). Down() blocks the calling thread while the
 * count is zero; up() wakes the longest-waiting blocked thread.
 */

use alloc::collections::VecDeque;
use spin::Mutex;

use crate::scheduler::{block_current_thread, current_thread_id, wake_thread, ThreadId};

struct Inner {
    value: u32,
    waiters: VecDeque<ThreadId>,
}

/// A counting semaphore.
///
/// `down()` and `up()` mirror the classic Dijkstra P/V operations. The
/// internal Mutex only ever guards the count and wait list; the calling
/// thread itself blocks/wakes through the scheduler, not the mutex.
pub struct Semaphore {
    inner: Mutex<Inner>,
}

impl Semaphore {
    pub fn new(value: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Wait until the count is positive, then decrement it.
    ///
    /// Blocks the calling thread (yielding the CPU) if the count is zero.
    pub fn down(&self) {
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.value > 0 {
                    inner.value -= 1;
                    return;
                }
                let tid = current_thread_id();
                if !inner.waiters.contains(&tid) {
                    inner.waiters.push_back(tid);
                }
            }
            block_current_thread();
            crate::scheduler::yield_now();
        }
    }

    /// Increment the count, waking the longest-waiting thread if any.
    pub fn up(&self) {
        let to_wake = {
            let mut inner = self.inner.lock();
            inner.value += 1;
            inner.waiters.pop_front()
        };
        if let Some(tid) = to_wake {
            wake_thread(tid);
        }
    }

    /// Non-blocking attempt; returns true if the count was decremented.
    pub fn try_down(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            true
        } else {
            false
        }
    }

    pub fn value(&self) -> u32 {
        self.inner.lock().value
    }
}

/*
 * Mutual-Exclusion Lock with Priority Donation
 *
 * A thread that blocks trying to acquire a lock held by a lower-priority
 * thread donates its priority to the holder, and transitively to whatever
 * the holder is itself waiting on (nested donation), so a low-priority
 * holder can't be starved behind the back of the high-priority waiter.
 * Donations are undone when the lock is released.
 */

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex as SpinMutex;

use crate::scheduler::{
    block_current_thread, current_thread_id, wake_thread, with_scheduler_mut, ThreadId,
};

/// Nested donation is followed at most this many locks deep, matching the
/// depth a single thread can realistically be waiting through.
const MAX_DONATION_DEPTH: usize = 8;

lazy_static! {
    /// Maps a lock's id (its address, see `Lock::id`) to its current holder.
    ///
    /// `LockState` only tracks a lock's own holder/waiters; nested donation
    /// needs to hop from one lock to the next lock its holder is itself
    /// waiting on, which means looking up a holder by lock id rather than by
    /// a `Lock` reference we may not have. This registry is that lookup.
    static ref LOCK_HOLDERS: SpinMutex<BTreeMap<usize, ThreadId>> =
        SpinMutex::new(BTreeMap::new());
}

struct LockState {
    holder: Option<ThreadId>,
    waiters: VecDeque<ThreadId>,
}

/// A priority-donating mutual-exclusion lock.
pub struct Lock {
    state: SpinMutex<LockState>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            state: SpinMutex::new(LockState {
                holder: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn id(&self) -> usize {
        self as *const Self as usize
    }

    pub fn is_held_by_current(&self) -> bool {
        self.state.lock().holder == Some(current_thread_id())
    }

    pub fn holder(&self) -> Option<ThreadId> {
        self.state.lock().holder
    }

    /// Acquire the lock, blocking (and donating priority) if it's held.
    pub fn acquire(&self) {
        let current = current_thread_id();
        loop {
            let holder = {
                let mut state = self.state.lock();
                if state.holder.is_none() {
                    state.holder = Some(current);
                    LOCK_HOLDERS.lock().insert(self.id(), current);
                    None
                } else {
                    if !state.waiters.contains(&current) {
                        state.waiters.push_back(current);
                    }
                    state.holder
                }
            };

            match holder {
                None => {
                    with_scheduler_mut(|s| {
                        if let Some(t) = s.get_thread_mut(current) {
                            t.waiting_on_lock = None;
                        }
                    });
                    return;
                }
                Some(holder_tid) => {
                    with_scheduler_mut(|s| {
                        if let Some(t) = s.get_thread_mut(current) {
                            t.waiting_on_lock = Some(self.id());
                        }
                    });
                    donate_priority(current, holder_tid);
                    block_current_thread();
                    crate::scheduler::yield_now();
                }
            }
        }
    }

    /// Release the lock, undoing any donations it collected and waking the
    /// next waiter (if any).
    pub fn release(&self) {
        let current = current_thread_id();
        let next_waiter = {
            let mut state = self.state.lock();
            debug_assert_eq!(state.holder, Some(current));
            state.holder = None;
            state.waiters.pop_front()
        };
        LOCK_HOLDERS.lock().remove(&self.id());

        undo_donations_for_lock(current, self.id());

        if let Some(tid) = next_waiter {
            wake_thread(tid);
        }
    }
}

/// Donate `donor`'s priority to `holder`, and walk the chain of locks
/// `holder` is itself waiting on (holder of lock2 blocked on lock3 blocked
/// on lock4, ...), up to `MAX_DONATION_DEPTH` hops, stopping early once a
/// link in the chain is already donating at least `donor`'s priority.
fn donate_priority(donor: ThreadId, holder: ThreadId) {
    with_scheduler_mut(|s| {
        let mut current_holder = holder;
        let mut visited: Vec<ThreadId> = Vec::new();

        for _ in 0..MAX_DONATION_DEPTH {
            if visited.contains(&current_holder) {
                return;
            }
            visited.push(current_holder);

            let next_lock = match s.get_thread_mut(current_holder) {
                Some(t) => {
                    if !t.donors.contains(&donor) {
                        t.donors.push(donor);
                    }
                    let donor_priorities: Vec<u32> = {
                        let donors = t.donors.clone();
                        donors
                            .into_iter()
                            .filter_map(|d| s.get_thread_mut(d).map(|dt| dt.priority))
                            .collect()
                    };
                    let t = s.get_thread_mut(current_holder).unwrap();
                    t.recompute_effective_priority(&donor_priorities);
                    t.waiting_on_lock
                }
                None => return,
            };

            let lock_id = match next_lock {
                Some(lock_id) => lock_id,
                None => return,
            };

            // This holder is itself blocked on another lock: hop to that
            // lock's holder and keep donating the same original donor
            // along the chain.
            match LOCK_HOLDERS.lock().get(&lock_id).copied() {
                Some(next_holder) => current_holder = next_holder,
                None => return,
            }
        }
    });
}

/// Remove `holder`'s role as a donation recipient for this lock, and
/// propagate the removal along the same chain `donate_priority` would have
/// pushed those donors through: every thread that was waiting on this
/// specific lock stops donating to it, and to anything further down the
/// chain `holder` is itself blocked on.
fn undo_donations_for_lock(holder: ThreadId, lock_id: usize) {
    with_scheduler_mut(|s| {
        let waiting_on_this_lock: Vec<ThreadId> = s
            .threads
            .iter()
            .filter(|t| t.waiting_on_lock == Some(lock_id))
            .map(|t| t.id)
            .collect();

        let mut current_holder = holder;
        let mut visited: Vec<ThreadId> = Vec::new();

        loop {
            if visited.contains(&current_holder) {
                break;
            }
            visited.push(current_holder);

            let next_lock = match s.get_thread_mut(current_holder) {
                Some(t) => {
                    t.donors.retain(|d| !waiting_on_this_lock.contains(d));
                    let donors = t.donors.clone();
                    let donor_priorities: Vec<u32> = donors
                        .into_iter()
                        .filter_map(|d| s.get_thread_mut(d).map(|dt| dt.priority))
                        .collect();
                    let t = s.get_thread_mut(current_holder).unwrap();
                    t.recompute_effective_priority(&donor_priorities);
                    t.waiting_on_lock
                }
                None => break,
            };

            let next_lock_id = match next_lock {
                Some(id) => id,
                None => break,
            };

            match LOCK_HOLDERS.lock().get(&next_lock_id).copied() {
                Some(next_holder) if next_holder != current_holder => current_holder = next_holder,
                _ => break,
            }
        }
    });
}

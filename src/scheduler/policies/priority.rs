/*
 * Priority Scheduling Policy (with donation)
 *
 * Strict priority scheduling: the highest-priority runnable thread always
 * runs. Threads of equal priority round-robin among themselves. Actual
 * priority donation (so a high-priority thread blocked on a lock held by a
 * low-priority thread isn't starved) happens in `sync::lock::Lock` by
 * mutating `Thread::priority` directly - this policy just always dispatches
 * whichever runnable thread currently has the highest `ctx.thread_priority`.
 */

use alloc::collections::VecDeque;

use super::super::{
    SchedulerMode, ThreadId,
    events::SchedEvent,
    traits::{KernelSchedCtx, Scheduler},
    types::{CpuId, DispatchDecision, Priority, TimeSliceTicks},
};

pub struct PriorityPolicy {
    ready_queue: VecDeque<ThreadId>,
    mode: SchedulerMode,
    boot_critical_count: usize,
    boot_ready_count: usize,
}

impl PriorityPolicy {
    pub fn new() -> Self {
        Self {
            ready_queue: VecDeque::new(),
            mode: SchedulerMode::Boot {
                critical_count: 0,
                ready_count: 0,
            },
            boot_critical_count: 0,
            boot_ready_count: 0,
        }
    }

    /// Pick the highest-priority runnable thread in the queue, rotating it
    /// to the back so same-priority threads round-robin against each other.
    /// `filter` additionally restricts candidates (used for boot mode).
    fn pick_highest<F>(&mut self, ctx: &dyn KernelSchedCtx, filter: F) -> Option<ThreadId>
    where
        F: Fn(&dyn KernelSchedCtx, ThreadId) -> bool,
    {
        let candidates = self.ready_queue.len();
        let mut best: Option<(ThreadId, i32, usize)> = None;

        for (idx, &tid) in self.ready_queue.iter().enumerate() {
            if idx >= candidates {
                break;
            }
            if !ctx.is_runnable(tid) || !filter(ctx, tid) {
                continue;
            }
            let priority = ctx.thread_priority(tid).unwrap_or(Priority::NORMAL).0;
            if best.map_or(true, |(_, best_p, _)| priority > best_p) {
                best = Some((tid, priority, idx));
            }
        }

        let (tid, _, idx) = best?;
        self.ready_queue.remove(idx);
        self.ready_queue.push_back(tid);
        Some(tid)
    }
}

impl Scheduler for PriorityPolicy {
    fn on_event(&mut self, ctx: &mut dyn KernelSchedCtx, event: SchedEvent) {
        match event {
            SchedEvent::ThreadCreated { tid, .. } => {
                self.ready_queue.push_back(tid);
            }

            SchedEvent::ThreadWoke { tid, .. } => {
                if !self.ready_queue.contains(&tid) {
                    self.ready_queue.push_back(tid);
                }
            }

            SchedEvent::ThreadYielded { tid } => {
                if !self.ready_queue.contains(&tid) {
                    self.ready_queue.push_back(tid);
                }
            }

            SchedEvent::ThreadBlocked { tid, .. } | SchedEvent::ThreadExited { tid, .. } => {
                self.ready_queue.retain(|&id| id != tid);
            }

            SchedEvent::PriorityChanged { .. } => {
                // A priority change may make a different thread the highest
                // runnable priority; ask for a reschedule to re-evaluate.
                ctx.request_reschedule(CpuId::BSP);
            }

            SchedEvent::ModeChanged { new_mode, .. } => {
                self.mode = new_mode;
            }

            SchedEvent::ProcessReady { .. } => {
                if matches!(self.mode, SchedulerMode::Boot { .. }) {
                    self.boot_ready_count += 1;
                }
            }

            _ => {}
        }
    }

    fn pick_next(&mut self, ctx: &mut dyn KernelSchedCtx, _cpu: CpuId) -> DispatchDecision {
        let boot = matches!(self.mode, SchedulerMode::Boot { .. });
        let next = self.pick_highest(ctx, |ctx, tid| {
            if !boot {
                return true;
            }
            ctx.thread_process(tid)
                .map(|pid| ctx.is_critical_process(pid))
                .unwrap_or(false)
        });

        match next {
            Some(tid) => DispatchDecision::run_thread(tid, TimeSliceTicks::DEFAULT),
            None => DispatchDecision::idle(),
        }
    }

    fn on_switched(
        &mut self,
        _ctx: &mut dyn KernelSchedCtx,
        _cpu: CpuId,
        _prev: Option<ThreadId>,
        _next: Option<ThreadId>,
    ) {
    }

    fn name(&self) -> &'static str {
        "Priority"
    }
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::new()
    }
}

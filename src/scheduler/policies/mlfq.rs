/*
 * Multi-Level Feedback Queue (MLFQ) Scheduling Policy
 *
 * 64 priority queues (0 = lowest, 63 = highest). A thread's priority is
 * recomputed every 4 ticks from its niceness and recent CPU usage:
 *
 *   priority = PRI_MAX - (recent_cpu / 4) - (nice * 2)
 *
 * recent_cpu decays once a second based on the system load average, so
 * CPU-bound threads drift toward lower queues and I/O-bound threads climb
 * back up. This mirrors the classic 4.4BSD scheduler.
 *
 * Per-thread nice/recent_cpu bookkeeping lives in this policy, not on
 * Thread itself - KernelSchedCtx deliberately omits policy-private data so
 * policies can be swapped without the mechanism carrying their state.
 */

use alloc::collections::{BTreeMap, VecDeque};

use super::super::{
    SchedulerMode, ThreadId,
    events::SchedEvent,
    sync::Fixed,
    traits::{KernelSchedCtx, Scheduler},
    types::{CpuId, DispatchDecision, TimeSliceTicks},
};

const PRI_MIN: i32 = 0;
const PRI_MAX: i32 = 63;
const NICE_MIN: i32 = -20;
const NICE_MAX: i32 = 20;
const TICKS_PER_SECOND: u64 = 100;
const PRIORITY_RECALC_PERIOD: u64 = 4;

struct MlfqThreadData {
    nice: i32,
    recent_cpu: Fixed,
    priority: i32,
}

impl MlfqThreadData {
    fn new() -> Self {
        Self {
            nice: 0,
            recent_cpu: Fixed::ZERO,
            priority: PRI_MAX - 31 / 4,
        }
    }

    fn recompute_priority(&mut self) {
        let raw = PRI_MAX - self.recent_cpu.to_int_round() / 4 - self.nice * 2;
        self.priority = raw.clamp(PRI_MIN, PRI_MAX);
    }
}

pub struct MlfqPolicy {
    queues: [VecDeque<ThreadId>; 64],
    data: BTreeMap<ThreadId, MlfqThreadData>,
    load_avg: Fixed,
    mode: SchedulerMode,
    last_tick_processed: u64,
}

impl MlfqPolicy {
    pub fn new() -> Self {
        Self {
            queues: core::array::from_fn(|_| VecDeque::new()),
            data: BTreeMap::new(),
            load_avg: Fixed::ZERO,
            mode: SchedulerMode::Boot {
                critical_count: 0,
                ready_count: 0,
            },
            last_tick_processed: 0,
        }
    }

    fn entry(&mut self, tid: ThreadId) -> &mut MlfqThreadData {
        self.data.entry(tid).or_insert_with(MlfqThreadData::new)
    }

    fn enqueue(&mut self, tid: ThreadId) {
        let priority = self.entry(tid).priority.clamp(PRI_MIN, PRI_MAX) as usize;
        if !self.queues[priority].contains(&tid) {
            self.queues[priority].push_back(tid);
        }
    }

    fn remove(&mut self, tid: ThreadId) {
        for q in self.queues.iter_mut() {
            q.retain(|&id| id != tid);
        }
    }

    fn rebucket_all(&mut self) {
        let ids: alloc::vec::Vec<ThreadId> = self.data.keys().copied().collect();
        for tid in ids {
            let was_queued = self.queues.iter().any(|q| q.contains(&tid));
            if was_queued {
                self.remove(tid);
                self.entry(tid).recompute_priority();
                self.enqueue(tid);
            } else {
                self.entry(tid).recompute_priority();
            }
        }
    }

    /// Advance per-second / per-4-ticks bookkeeping, catching up if ticks
    /// were missed (e.g. boot-mode ticks processed in a batch).
    fn advance_clock(&mut self, ctx: &dyn KernelSchedCtx, now: u64) {
        while self.last_tick_processed < now {
            self.last_tick_processed += 1;
            let tick = self.last_tick_processed;

            if let Some(current) = ctx.current_thread(CpuId::BSP) {
                let d = self.entry(current);
                d.recent_cpu = d.recent_cpu.add_int(1);
            }

            if tick % TICKS_PER_SECOND == 0 {
                let ready_threads = ctx
                    .all_threads()
                    .into_iter()
                    .filter(|&t| ctx.is_runnable(t) || ctx.current_thread(CpuId::BSP) == Some(t))
                    .count() as i32;

                let coeff_num = self.load_avg.mul_int(2);
                let coeff = coeff_num.div(coeff_num.add_int(1));
                self.load_avg = Fixed::from_int(59)
                    .div_int(60)
                    .mul(self.load_avg)
                    .add(Fixed::from_int(1).div_int(60).mul_int(ready_threads));

                let ids: alloc::vec::Vec<ThreadId> = self.data.keys().copied().collect();
                for tid in ids {
                    let nice = self.data.get(&tid).map(|d| d.nice).unwrap_or(0);
                    if let Some(d) = self.data.get_mut(&tid) {
                        d.recent_cpu = coeff.mul(d.recent_cpu).add_int(nice);
                    }
                }
            }

            if tick % PRIORITY_RECALC_PERIOD == 0 {
                self.rebucket_all();
            }
        }
    }

    fn highest_nonempty(&self) -> Option<usize> {
        self.queues.iter().rposition(|q| !q.is_empty())
    }
}

impl Scheduler for MlfqPolicy {
    fn on_event(&mut self, ctx: &mut dyn KernelSchedCtx, event: SchedEvent) {
        match event {
            SchedEvent::ThreadCreated { tid, .. } => {
                self.entry(tid).recompute_priority();
                self.enqueue(tid);
            }

            SchedEvent::ThreadWoke { tid, .. } => {
                self.enqueue(tid);
            }

            SchedEvent::ThreadYielded { tid } => {
                self.enqueue(tid);
            }

            SchedEvent::ThreadBlocked { tid, .. } => {
                self.remove(tid);
            }

            SchedEvent::ThreadExited { tid, .. } => {
                self.remove(tid);
                self.data.remove(&tid);
            }

            SchedEvent::Tick { .. } => {
                self.advance_clock(ctx, ctx.now_ticks());
            }

            SchedEvent::ModeChanged { new_mode, .. } => {
                self.mode = new_mode;
            }

            _ => {}
        }
    }

    fn pick_next(&mut self, ctx: &mut dyn KernelSchedCtx, _cpu: CpuId) -> DispatchDecision {
        let boot = matches!(self.mode, SchedulerMode::Boot { .. });

        loop {
            let level = match self.highest_nonempty() {
                Some(l) => l,
                None => return DispatchDecision::idle(),
            };

            let tid = match self.queues[level].pop_front() {
                Some(t) => t,
                None => continue,
            };

            if !ctx.is_runnable(tid) {
                continue;
            }

            if boot {
                let is_critical = ctx
                    .thread_process(tid)
                    .map(|pid| ctx.is_critical_process(pid))
                    .unwrap_or(false);
                if !is_critical {
                    self.queues[level].push_back(tid);
                    continue;
                }
            }

            self.queues[level].push_back(tid);
            return DispatchDecision::run_thread(tid, TimeSliceTicks::DEFAULT);
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
        "MLFQ"
    }
}

impl Default for MlfqPolicy {
    fn default() -> Self {
        Self::new()
    }
}

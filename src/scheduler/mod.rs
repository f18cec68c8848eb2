/*
 * Scheduler Subsystem
 *
 * This module is the integration point for thread management, process
 * management, and the pluggable scheduling policy architecture:
 *
 * - thread.rs / process.rs: the objects the mechanism manages
 * - types.rs / events.rs / traits.rs: the vocabulary shared between
 *   mechanism and policy (Priority, SchedEvent, the Scheduler trait)
 * - sched_core.rs / context.rs: the mechanism layer (SchedulerCore holds
 *   Box<dyn Scheduler>, SchedContext is the capability handle policies use)
 * - scheduler.rs: the actual thread/process storage + ready queue
 * - scheduler_manager.rs: the public ZST API the rest of the kernel calls
 * - policies/: the swappable scheduling algorithms (round-robin, priority
 *   donation, MLFQ)
 * - sync.rs: semaphore/lock/condvar built on top of the mechanism
 *
 * Swapping the active policy never requires touching this file or the
 * mechanism layer - only scheduler_manager::init() picks which Box<dyn
 * Scheduler> to install.
 */

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

pub mod thread;
pub mod process;
pub mod io_wait;
pub mod ipc;
pub mod types;
pub mod events;
pub mod traits;
pub mod sched_core;
pub mod context;
pub mod scheduler;
pub mod scheduler_manager;
pub mod policies;
pub mod sync;

// shmem lives as a sibling top-level module (it needs access to the paging
// code the same way scheduler does) but process/vfs code reaches it through
// `scheduler::shmem`, so re-export it here rather than rewire every caller.
pub use crate::shmem;

pub use thread::{Thread, ThreadId, ThreadState, ThreadManager};
pub use process::{Process, ProcessId, ProcessManager};
pub use io_wait::{IoChannel, wait_for_io, wake_io_waiters};
pub use ipc::{
    IpcError, Message, PortId, PortStats, get_port_stats, list_all_ports, port_create,
    port_destroy, port_recv, port_send, port_try_recv,
};
pub use types::{CpuId, Priority, TimeSliceTicks, DispatchDecision, BlockReason, SchedClass};
pub use events::SchedEvent;
pub use traits::{Scheduler, KernelSchedCtx};
pub use sched_core::SchedulerCore;
pub use context::{SchedContext, create_sched_context};
pub use scheduler::{InterruptFrame, InterruptContext, THREAD_STACK_SIZE, MAX_THREADS};
pub use scheduler_manager::SchedulerManager;
pub use policies::{MlfqPolicy, PriorityPolicy, RoundRobinPolicy};

/// A kernel subsystem that can be brought up exactly once during boot.
///
/// Managers (SchedulerManager, and any future subsystem manager) implement
/// this so `main::kstart` can bring components up uniformly.
pub trait KernelComponent {
    fn init();
}

/// Process classification
///
/// Determines the process's default scheduling priority (absent a policy
/// that tracks real per-thread priority) and whether it is allowed to run
/// during Boot mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    /// Boot-critical service (VFS server, etc.) - runs during Boot mode
    Critical,
    /// Kernel-provided system service
    System,
    /// Ordinary userspace process
    User,
    /// Real-time process (strict timing guarantees)
    RealTime,
}

impl ProcessType {
    /// Default scheduling priority for this process type.
    ///
    /// Used as the fallback priority by policies that don't maintain their
    /// own per-thread priority (round-robin); priority-donation and MLFQ
    /// policies use this only as the thread's *initial* priority.
    pub fn priority(&self) -> u32 {
        match self {
            ProcessType::RealTime => Priority::REALTIME_BASE.0 as u32,
            ProcessType::Critical => Priority::CRITICAL.0 as u32,
            ProcessType::System => Priority::SYSTEM.0 as u32,
            ProcessType::User => Priority::NORMAL.0 as u32,
        }
    }
}

/// Process initialization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessInitState {
    /// Still starting up - hasn't signaled ready yet
    Initializing,
    /// Finished initialization, able to serve requests
    Ready,
}

/// Scheduler operating mode
///
/// During Boot, only critical processes (plus kernel/idle threads) are
/// scheduled. Once every registered critical process has signaled ready,
/// the scheduler transitions to Normal and user processes can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Boot { critical_count: usize, ready_count: usize },
    Normal,
}

/// Selects which `Scheduler` policy `SchedulerManager::init()` installs.
///
/// Set via `set_policy_kind` before `init()` runs (mirrors Pintos' `-mlfqs`
/// boot flag, minus the actual command-line parsing - this kernel has no
/// bootloader-provided argv). Defaults to `Priority`, which took over from
/// `RoundRobin` as the boot default; `RoundRobin` stays available as a
/// selectable policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    RoundRobin,
    Priority,
    Mlfq,
}

static POLICY_KIND: Mutex<PolicyKind> = Mutex::new(PolicyKind::Priority);

/// Select the scheduling policy to install on the next `SchedulerManager::init()`.
pub fn set_policy_kind(kind: PolicyKind) {
    *POLICY_KIND.lock() = kind;
}

pub(crate) fn policy_kind() -> PolicyKind {
    *POLICY_KIND.lock()
}

/// Global scheduler instance (thread/process storage, ready queue, mode)
static SCHEDULER: Mutex<Option<scheduler::Scheduler>> = Mutex::new(None);

/// Global scheduler mechanism (active policy + per-CPU state)
static SCHEDULER_CORE: Mutex<Option<SchedulerCore>> = Mutex::new(None);

/// Currently running thread ID (atomic for IRQ-context reads)
static CURRENT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

/// Whether preemptive scheduling has been enabled yet
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

/// Set during critical scheduler-internal sections to suppress preemption
static PREEMPTION_DISABLED: AtomicBool = AtomicBool::new(false);

/// Run a closure with read-only access to the scheduler.
///
/// # Panics
/// Panics if the scheduler has not been initialized yet.
pub fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&scheduler::Scheduler) -> R,
{
    x86_64::instructions::interrupts::without_interrupts(|| {
        let guard = SCHEDULER.lock();
        let sched = guard.as_ref().expect("scheduler not initialized");
        f(sched)
    })
}

/// Run a closure with mutable access to the scheduler.
///
/// # Panics
/// Panics if the scheduler has not been initialized yet.
pub fn with_scheduler_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut scheduler::Scheduler) -> R,
{
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().expect("scheduler not initialized");
        f(sched)
    })
}

/// Run a closure with mutable access to both the scheduler and its
/// mechanism core, typically to build a SchedContext and forward an event
/// to the active policy.
pub fn with_scheduler_and_core<F, R>(f: F) -> R
where
    F: FnOnce(&mut scheduler::Scheduler, &mut SchedulerCore) -> R,
{
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched_guard = SCHEDULER.lock();
        let mut core_guard = SCHEDULER_CORE.lock();
        let sched = sched_guard.as_mut().expect("scheduler not initialized");
        let core = core_guard.as_mut().expect("scheduler core not initialized");
        f(sched, core)
    })
}

/// Get a thread's name, if it still exists.
pub fn get_thread_name(tid: ThreadId) -> Option<alloc::string::String> {
    with_scheduler_mut(|s| s.get_thread_mut(tid).map(|t| t.name.clone()))
}

/// Get the currently running thread ID.
pub fn current_thread_id() -> ThreadId {
    ThreadId(CURRENT_THREAD_ID.load(Ordering::SeqCst))
}

/// Spawn a thread in the default kernel process (PID 0).
///
/// Thin wrapper kept for call sites that predate per-process spawning
/// (tests, the ELF loader's bring-up path, IPC test helpers).
pub fn spawn_thread(entry_point: fn(), name: &str) -> ThreadId {
    ThreadManager::spawn(entry_point, name)
}

/// Spawn a thread within a specific process.
pub fn spawn_thread_in_process(entry_point: fn(), name: &str, process_id: ProcessId) -> ThreadId {
    ThreadManager::spawn_in_process(entry_point, name, process_id)
}

/// Voluntarily yield the CPU. Thin wrapper around `SchedulerManager::yield_now`.
pub fn yield_now() {
    SchedulerManager::yield_now();
}

/// Blocking sleep. Thin wrapper around `SchedulerManager::sleep_ms`.
/// Sorted wakeup list: wake tick (ms uptime) -> threads sleeping until then.
/// A `BTreeMap` keeps entries ordered without needing an intrusive list; the
/// ISR only ever looks at the front of it, never scans every thread.
static SLEEP_QUEUE: Mutex<alloc::collections::BTreeMap<u64, alloc::vec::Vec<ThreadId>>> =
    Mutex::new(alloc::collections::BTreeMap::new());

/// Register `tid` to be woken once `crate::utils::timer::uptime_ms()` reaches
/// `wake_at_ms`. Called by `SchedulerManager::sleep_ms` after blocking the
/// thread.
pub(crate) fn register_sleep(tid: ThreadId, wake_at_ms: u64) {
    SLEEP_QUEUE.lock().entry(wake_at_ms).or_default().push(tid);
}

/// Wake every thread whose sleep has expired as of `now_ms`. Called once per
/// timer tick from `schedule_from_interrupt` while the scheduler/core locks
/// are already held, so this mutates them directly instead of going back
/// through `SchedulerManager::wake` (which would deadlock re-locking them).
fn wake_expired_sleepers_locked(
    scheduler: &mut scheduler::Scheduler,
    core: &mut SchedulerCore,
    now_ms: u64,
) {
    let expired: alloc::vec::Vec<ThreadId> = {
        let mut queue = SLEEP_QUEUE.lock();
        let still_sleeping = queue.split_off(&(now_ms + 1));
        let due = core::mem::replace(&mut *queue, still_sleeping);
        due.into_values().flatten().collect()
    };
    for tid in expired {
        let was_blocked = if let Some(thread) = scheduler.get_thread_mut(tid) {
            if thread.state == ThreadState::Blocked {
                thread.state = ThreadState::Ready;
                true
            } else {
                false
            }
        } else {
            false
        };
        if was_blocked {
            let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
            core.thread_woke(&mut ctx, tid, BlockReason::Sleeping { until_tick: now_ms });
        }
    }
}

pub fn sleep_ms(ms: u64) {
    SchedulerManager::sleep_ms(ms);
}

/// Block the current thread. Thin wrapper around `SchedulerManager::block_current`.
pub fn block_current_thread() {
    SchedulerManager::block_current();
}

/// Wake a blocked thread. Thin wrapper around `SchedulerManager::wake`.
pub fn wake_thread(thread_id: ThreadId) {
    SchedulerManager::wake(thread_id);
}

/// Terminate the calling thread with exit code 0. Thin wrapper around `ThreadManager::exit`.
pub fn exit_thread() -> ! {
    ThreadManager::exit(0)
}

/// Run a closure with immutable access to the calling thread's process.
pub fn with_current_process<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&Process) -> R,
{
    ProcessManager::with_current(f)
}

/// Wire fd 0/1/2 of `thread_id`'s process to the shared TTY device.
pub fn init_std_streams(thread_id: ThreadId) {
    ThreadManager::init_std_streams(thread_id);
}

/// Run a closure with mutable access to a specific process.
pub fn with_process_mut<F, R>(process_id: ProcessId, f: F) -> Option<R>
where
    F: FnOnce(&mut Process) -> R,
{
    ProcessManager::with_mut(process_id, f)
}

/// The process owning the calling thread, if any. Thin wrapper around
/// `ProcessManager::current_id`.
pub fn current_process_id() -> Option<ProcessId> {
    ProcessManager::current_id()
}

/// Thread statistics for display (`ps`-style shell commands, tests)
#[derive(Debug, Clone)]
pub struct ThreadStats {
    pub id: ThreadId,
    pub name: alloc::string::String,
    pub state: ThreadState,
    pub cpu_time_ms: u64,
    pub cpu_percent: u64,
}

/// Get statistics for all threads.
pub fn get_thread_stats() -> alloc::vec::Vec<ThreadStats> {
    ThreadManager::stats()
}

/// Idle thread body: halts the CPU between interrupts.
///
/// Runs whenever no other thread is runnable. Never blocks or exits.
pub(crate) fn idle_thread_main() {
    log::info!("Idle thread starting...");
    let mut idle_counter = 0u64;
    loop {
        if idle_counter % 10000 == 0 {
            log::debug!("Idle thread tick: {}", idle_counter);
        }
        idle_counter = idle_counter.wrapping_add(1);
        x86_64::instructions::hlt();
    }
}

/// Software interrupt handler for voluntary yielding (INT 0x81)
///
/// Performs the same register-save / scheduler-call / register-restore
/// dance as the timer interrupt handler, just triggered by software.
#[unsafe(naked)]
pub unsafe extern "C" fn yield_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {schedule_fn}",
        "mov rsp, rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Preemptive timer interrupt handler (naked assembly wrapper, IRQ0)
///
/// Saves the interrupted thread's full register state, asks the scheduler
/// mechanism for the next thread to run, restores its state, and resumes
/// via `iretq`. Sends EOI to the PIC before returning.
#[unsafe(naked)]
pub unsafe extern "C" fn preemptive_timer_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {schedule_fn}",
        "mov rsp, rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "push rax",
        "mov al, 0x20",
        "out 0x20, al",
        "pop rax",
        "iretq",
        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Schedule the next thread from interrupt context.
///
/// Called from the naked handlers above with a pointer to the interrupted
/// thread's saved `InterruptContext`. Drives the policy-agnostic mechanism:
/// tick accounting, `cleanup_terminated_threads`, and `SchedulerCore::reschedule`
/// picks the next thread via whichever `Scheduler` policy is currently boxed.
///
/// Runs with interrupts disabled and must not block or log (logging in IRQ
/// context can deadlock against a thread holding the log lock).
#[unsafe(no_mangle)]
pub extern "C" fn schedule_from_interrupt(
    current_ctx_ptr: *const InterruptContext,
) -> *const InterruptContext {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }
    if PREEMPTION_DISABLED.load(Ordering::SeqCst) {
        crate::utils::timer::on_timer_interrupt();
        return current_ctx_ptr;
    }

    crate::utils::timer::on_timer_interrupt();

    let mut sched_guard = SCHEDULER.lock();
    let mut core_guard = SCHEDULER_CORE.lock();
    let (scheduler, core) = match (sched_guard.as_mut(), core_guard.as_mut()) {
        (Some(s), Some(c)) => (s, c),
        _ => return current_ctx_ptr,
    };

    let current_id = ThreadId(CURRENT_THREAD_ID.load(Ordering::SeqCst));
    let current_time = crate::utils::timer::uptime_ms();

    // Save the interrupted thread's context and return it to the ready pool.
    if current_id.0 != 0 {
        if let Some(thread) = scheduler.get_thread_mut(current_id) {
            unsafe {
                thread.interrupt_context = *current_ctx_ptr;
            }
            if thread.last_scheduled_time > 0 {
                let elapsed = current_time.saturating_sub(thread.last_scheduled_time);
                thread.cpu_time_ms = thread.cpu_time_ms.saturating_add(elapsed);
            }
            if thread.state == ThreadState::Running {
                thread.state = ThreadState::Ready;
            }
        }
    }

    wake_expired_sleepers_locked(scheduler, core, current_time);

    // Reap threads that terminated since the last tick. Never logs (IRQ context).
    scheduler.cleanup_terminated_threads(current_id, false);

    let next_id = {
        let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
        core.on_tick(&mut ctx, CpuId::BSP);
        core.reschedule(&mut ctx, CpuId::BSP)
    };

    let next_id = match next_id {
        Some(id) => id,
        // Only possible before the idle thread is spawned; enable() spawns
        // it before SCHEDULER_ENABLED is set, so this shouldn't occur.
        None => return current_ctx_ptr,
    };

    let next_process_id = scheduler.get_thread_mut(next_id).map(|t| t.process_id);

    let next_ctx_ptr = match scheduler.get_thread_mut(next_id) {
        Some(next_thread) => {
            next_thread.state = ThreadState::Running;
            next_thread.last_scheduled_time = current_time;
            &next_thread.interrupt_context as *const InterruptContext
        }
        None => return current_ctx_ptr,
    };

    // Switch page tables if the incoming thread belongs to a different
    // address space than whatever is currently loaded. Every process (user
    // or kernel) carries its own `page_table_root`; kernel processes all
    // share kernel-only mappings so this also covers kernel-thread switches.
    if let Some(pid) = next_process_id {
        if let Some(process) = scheduler.get_process(pid) {
            let next_root = process.address_space.page_table_root;
            if crate::memory::paging::get_current_cr3() != next_root {
                crate::memory::paging::switch_cr3(next_root);
            }
        }
    }

    CURRENT_THREAD_ID.store(next_id.0, Ordering::SeqCst);
    next_ctx_ptr
}

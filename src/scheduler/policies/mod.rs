/*
 * Scheduling Policies Module
 *
 * This module contains different scheduling policy implementations.
 * Each policy implements the Scheduler trait and can be plugged into
 * the SchedulerCore at boot time.
 *
 * Available policies:
 * - RoundRobin: Simple preemptive round-robin
 * - Priority: Strict priority with donation (see scheduler::sync::lock)
 * - Mlfq: Multi-level feedback queue, 4.4BSD-style
 */

pub mod mlfq;
pub mod priority;
pub mod round_robin;

pub use mlfq::MlfqPolicy;
pub use priority::PriorityPolicy;
pub use round_robin::RoundRobinPolicy;

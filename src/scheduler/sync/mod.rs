/*
 * Synchronization Primitives
 *
 * Built on top of the scheduler's block/wake mechanism (the same
 * `block_current_thread` / `wake_thread` pair the I/O wait queues use),
 * these give kernel code semaphores, a priority-donating lock, and
 * condition variables, plus the fixed-point arithmetic the MLFQ policy
 * needs for load-average/recent-CPU math.
 */

pub mod condvar;
pub mod fixed_point;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use fixed_point::Fixed;
pub use lock::Lock;
pub use semaphore::Semaphore;

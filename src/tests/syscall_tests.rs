/*
 * Syscall Handler Tests
 *
 * These tests validate the syscall handlers from kernel mode by directly
 * calling the handler functions. This allows us to test the syscall logic
 * without requiring full userspace execution (ELF loader, ring 3 entry).
 *
 * Tests cover:
 * - File I/O: _write, _read, _open, _create, _remove, _filesize, _seek, _tell, _close
 * - Process lifecycle: _exit, _wait
 * - Memory mapping: _mmap, _munmap
 * - Error handling and pointer validation
 *
 * Handlers that kill the calling thread on bad input (`sys_read`/`sys_write`
 * with an invalid buffer pointer) are exercised from a spawned thread rather
 * than the test runner's own thread, the same way `test_sys_exit` already
 * has to spawn a thread to observe `sys_exit`.
 */

use crate::syscall::handlers::*;
use crate::scheduler;

/// Test sys_write with valid file descriptor (stdout)
pub fn test_sys_write_valid() -> bool {
    log::info!("TEST: sys_write with valid FD (stdout)");

    let message = b"Hello from syscall test!\n";
    let result = sys_write(1, message.as_ptr(), message.len());

    if result > 0 {
        log::info!("  PASS: sys_write returned {} bytes", result);
        true
    } else {
        log::error!("  FAIL: sys_write returned error code {}", result);
        false
    }
}

/// Test sys_write with invalid file descriptor
pub fn test_sys_write_invalid_fd() -> bool {
    log::info!("TEST: sys_write with invalid FD");

    let message = b"This should fail\n";
    let result = sys_write(999, message.as_ptr(), message.len());

    if result == -1 {
        log::info!("  PASS: sys_write returned -1 for invalid FD");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_write on fd 0 (stdin), which is never writable
pub fn test_sys_write_stdin() -> bool {
    log::info!("TEST: sys_write on stdin (should fail)");

    let message = b"nope";
    let result = sys_write(0, message.as_ptr(), message.len());

    if result == -1 {
        log::info!("  PASS: sys_write returned -1 for stdin");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_read on stdout, which is never readable
pub fn test_sys_read_stdout() -> bool {
    log::info!("TEST: sys_read on stdout (should fail)");

    let mut buf = [0u8; 4];
    let result = sys_read(1, buf.as_mut_ptr(), buf.len());

    if result == -1 {
        log::info!("  PASS: sys_read returned -1 for stdout");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_write with a NULL pointer from a dedicated thread
///
/// `sys_write` kills the calling thread on a bad buffer pointer, so this
/// has to run off the test runner's own thread to observe the effect
/// instead of taking it down too.
pub fn test_sys_write_null_pointer() -> bool {
    log::info!("TEST: sys_write with NULL pointer (spawned thread should be killed)");

    let before = scheduler::get_thread_stats().len();
    scheduler::spawn_thread(write_null_pointer_thread, "write_null_ptr_test");
    for _ in 0..10 {
        scheduler::yield_now();
    }
    let after = scheduler::get_thread_stats().len();

    if after <= before {
        log::info!("  PASS: thread calling sys_write(NULL) was terminated");
        true
    } else {
        log::error!("  FAIL: thread count grew unexpectedly (before={}, after={})", before, after);
        false
    }
}

fn write_null_pointer_thread() {
    sys_write(1, core::ptr::null(), 10);
    log::error!("  write_null_pointer_thread: sys_write(NULL) should not have returned");
}

/// Test sys_create without a running VFS server (should report failure)
pub fn test_sys_create_no_vfs() -> bool {
    log::info!("TEST: sys_create with no VFS server registered");

    let path = b"/tmp/test_file\0";
    let result = sys_create(path.as_ptr(), 0);

    if result == 0 {
        log::info!("  PASS: sys_create returned 0 (failure) with no VFS server");
        true
    } else {
        log::error!("  FAIL: Expected 0, got {}", result);
        false
    }
}

/// Test sys_remove without a running VFS server (should report failure)
pub fn test_sys_remove_no_vfs() -> bool {
    log::info!("TEST: sys_remove with no VFS server registered");

    let path = b"/tmp/test_file\0";
    let result = sys_remove(path.as_ptr());

    if result == 0 {
        log::info!("  PASS: sys_remove returned 0 (failure) with no VFS server");
        true
    } else {
        log::error!("  FAIL: Expected 0, got {}", result);
        false
    }
}

/// Test sys_open without a running VFS server (should fail)
pub fn test_sys_open_no_vfs() -> bool {
    log::info!("TEST: sys_open with no VFS server registered");

    let path = b"/tmp/test_file\0";
    let result = sys_open(path.as_ptr());

    if result == -1 {
        log::info!("  PASS: sys_open returned -1 with no VFS server");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_filesize with an invalid FD
pub fn test_sys_filesize_invalid_fd() -> bool {
    log::info!("TEST: sys_filesize with invalid FD");

    let result = sys_filesize(999);

    if result == -1 {
        log::info!("  PASS: sys_filesize returned -1");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_seek with an invalid FD
pub fn test_sys_seek_invalid_fd() -> bool {
    log::info!("TEST: sys_seek with invalid FD");

    let result = sys_seek(999, 0);

    if result == -1 {
        log::info!("  PASS: sys_seek returned -1");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_tell with an invalid FD
pub fn test_sys_tell_invalid_fd() -> bool {
    log::info!("TEST: sys_tell with invalid FD");

    let result = sys_tell(999);

    if result == -1 {
        log::info!("  PASS: sys_tell returned -1");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_close with invalid FD
pub fn test_sys_close_invalid_fd() -> bool {
    log::info!("TEST: sys_close with invalid FD");

    let result = sys_close(999);

    if result == -1 {
        log::info!("  PASS: sys_close returned -1");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_wait with a negative pid
pub fn test_sys_wait_negative_pid() -> bool {
    log::info!("TEST: sys_wait with negative pid");

    let result = sys_wait(-1);

    if result == -1 {
        log::info!("  PASS: sys_wait returned -1 for negative pid");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_wait on a pid that isn't a child of the caller
pub fn test_sys_wait_not_a_child() -> bool {
    log::info!("TEST: sys_wait on an unrelated pid");

    let result = sys_wait(99999);

    if result == -1 {
        log::info!("  PASS: sys_wait returned -1 for a non-child pid");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_mmap with a NULL target address (should be rejected)
pub fn test_sys_mmap_null_addr() -> bool {
    log::info!("TEST: sys_mmap with NULL address");

    let result = sys_mmap(3, core::ptr::null_mut());

    if result == -1 {
        log::info!("  PASS: sys_mmap rejected NULL address");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_munmap with a mapping id that was never created
pub fn test_sys_munmap_invalid_id() -> bool {
    log::info!("TEST: sys_munmap with unknown mapping id");

    let result = sys_munmap(9999);

    if result == -1 {
        log::info!("  PASS: sys_munmap returned -1 for unknown mapping");
        true
    } else {
        log::error!("  FAIL: Expected -1, got {}", result);
        false
    }
}

/// Test sys_exit (spawns a thread that exits)
pub fn test_sys_exit() -> bool {
    log::info!("TEST: sys_exit via thread");

    let before_stats = scheduler::get_thread_stats();
    let before_count = before_stats.len();

    // Spawn a thread that will exit
    scheduler::spawn_thread(exit_test_thread, "exit_test");

    // Give it time to run and exit
    for _ in 0..10 {
        scheduler::yield_now();
    }

    let after_stats = scheduler::get_thread_stats();
    let after_count = after_stats.len();

    if after_count == before_count {
        log::info!("  PASS: Thread exited successfully (thread count unchanged)");
        true
    } else {
        log::warn!("  INFO: Thread count: before={}, after={}", before_count, after_count);
        true  // This is still considered passing (thread cleanup may be async)
    }
}

fn exit_test_thread() {
    log::info!("  exit_test_thread: calling sys_exit(42)");
    sys_exit(42);
    // Never returns
}

/// Run all syscall tests
///
/// Returns (passed, failed) test counts
pub fn run_all_syscall_tests() -> (usize, usize) {
    use core::sync::atomic::{AtomicUsize, Ordering};

    static PASSED: AtomicUsize = AtomicUsize::new(0);
    static FAILED: AtomicUsize = AtomicUsize::new(0);

    // Reset counters
    PASSED.store(0, Ordering::SeqCst);
    FAILED.store(0, Ordering::SeqCst);

    // Helper to count test results
    let count_result = |passed: bool| {
        if passed {
            PASSED.fetch_add(1, Ordering::SeqCst);
        } else {
            FAILED.fetch_add(1, Ordering::SeqCst);
        }
    };

    log::info!("========================================");
    log::info!("SYSCALL HANDLER TESTS");
    log::info!("========================================");
    log::info!("");

    log::info!("--- File I/O Tests ---");
    count_result(test_sys_write_valid());
    count_result(test_sys_write_invalid_fd());
    count_result(test_sys_write_stdin());
    count_result(test_sys_read_stdout());
    count_result(test_sys_write_null_pointer());
    count_result(test_sys_create_no_vfs());
    count_result(test_sys_remove_no_vfs());
    count_result(test_sys_open_no_vfs());
    count_result(test_sys_filesize_invalid_fd());
    count_result(test_sys_seek_invalid_fd());
    count_result(test_sys_tell_invalid_fd());
    count_result(test_sys_close_invalid_fd());

    log::info!("");
    log::info!("--- Process Lifecycle Tests ---");
    count_result(test_sys_wait_negative_pid());
    count_result(test_sys_wait_not_a_child());
    count_result(test_sys_exit());

    log::info!("");
    log::info!("--- Memory Mapping Tests ---");
    count_result(test_sys_mmap_null_addr());
    count_result(test_sys_munmap_invalid_id());

    log::info!("========================================");
    log::info!("SYSCALL TESTS COMPLETE");
    log::info!("========================================");

    // Return actual test counts
    (PASSED.load(Ordering::SeqCst), FAILED.load(Ordering::SeqCst))
}

/// Quick smoke test for syscalls
pub fn syscall_smoke_test() {
    log::info!("Running syscall smoke test...");

    test_sys_write_valid();
    test_sys_create_no_vfs();

    log::info!("Syscall smoke test complete");
}

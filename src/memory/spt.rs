/*
 * Supplemental page table and page-fault resolution
 *
 * Per-process map from page-aligned user virtual address to how that page's
 * content should be (re)materialized: loaded from a file, swapped back in,
 * or zero-filled as stack growth. The frame table calls back in here on
 * eviction (`EvictionSink`); the page-fault handler calls `resolve_fault`.
 */

use crate::memory::address_space::layout;
use crate::memory::frame::{self, AllocFlags, EvictionSink, OwnerId};
use crate::memory::swap::{self, SwapSlot};
use crate::memory::types::{PhysAddr, PhysFrame, VirtAddr};
use crate::memory::{paging, physmap};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

const PAGE_SIZE: u64 = PhysFrame::SIZE;

/// A page backed by a file on disk, loaded lazily and partially zero-padded.
#[derive(Debug, Clone, Copy)]
pub struct FileBacking {
    pub fd: i32,
    pub file_offset: u64,
    pub read_bytes: u32,
    pub zero_bytes: u32,
}

/// A page backed by an ELF segment still resident as bytes in kernel memory,
/// rather than behind an open VFS file descriptor. `exec` hands the loader a
/// raw `&[u8]` image (e.g. pulled from an initrd), so there's no fd to seek
/// and read from the way `FileBacking` does; the image itself has to be kept
/// alive (via the `Arc`) until every lazily-loaded page has faulted in.
#[derive(Debug, Clone)]
pub struct ElfBacking {
    pub image: Arc<Vec<u8>>,
    pub file_offset: u64,
    pub read_bytes: u32,
    pub zero_bytes: u32,
}

#[derive(Debug, Clone)]
pub enum SptKind {
    FileBacked(FileBacking),
    ElfBacked(ElfBacking),
    Stack,
}

#[derive(Debug, Clone)]
struct SptEntry {
    kind: SptKind,
    writable: bool,
    frame: Option<PhysFrame>,
    swap_slot: Option<SwapSlot>,
}

struct ProcessSpt {
    root: PhysAddr,
    pages: BTreeMap<u64, SptEntry>,
}

static SPT: Mutex<BTreeMap<OwnerId, ProcessSpt>> = Mutex::new(BTreeMap::new());

fn page_round_down(addr: VirtAddr) -> VirtAddr {
    VirtAddr::new(addr.as_u64() & !(PAGE_SIZE - 1))
}

/// Crude user-address bound: anything between the null-page guard and the
/// top of the user stack region (see `address_space::layout`).
fn is_user_address(addr: VirtAddr) -> bool {
    let a = addr.as_u64();
    a >= layout::USER_NULL_REGION_END && a < layout::USER_STACK_TOP
}

/// Register a new process's SPT before any of its pages fault in. Mirrors
/// process creation installing a fresh page directory.
pub fn register_process(owner: OwnerId, root: PhysAddr) {
    SPT.lock().insert(
        owner,
        ProcessSpt {
            root,
            pages: BTreeMap::new(),
        },
    );
}

/// Tear down a process's SPT on exit: free every resident frame and drop
/// every still-swapped slot. Mmap entries must already have been unmapped
/// (and written back) by `mmap::munmap_all` before this runs.
pub fn unregister_process(owner: OwnerId) {
    if let Some(proc_spt) = SPT.lock().remove(&owner) {
        for entry in proc_spt.pages.values() {
            if let Some(frame) = entry.frame {
                frame::frame_free(frame);
            }
            if let Some(slot) = entry.swap_slot {
                swap::free_slot(slot);
            }
        }
    }
}

/// Record a lazily-loaded file-backed page (used by `mmap`). No frame is
/// allocated until the page actually faults in.
pub fn insert_file_backed(owner: OwnerId, vaddr: VirtAddr, writable: bool, backing: FileBacking) {
    let page = page_round_down(vaddr).as_u64();
    if let Some(proc_spt) = SPT.lock().get_mut(&owner) {
        proc_spt.pages.insert(
            page,
            SptEntry {
                kind: SptKind::FileBacked(backing),
                writable,
                frame: None,
                swap_slot: None,
            },
        );
    }
}

/// Record a lazily-loaded ELF segment page. Used by the ELF loader to
/// register PT_LOAD segments without touching a frame until the page
/// actually faults in, per segment.
pub fn insert_elf_backed(owner: OwnerId, vaddr: VirtAddr, writable: bool, backing: ElfBacking) {
    let page = page_round_down(vaddr).as_u64();
    if let Some(proc_spt) = SPT.lock().get_mut(&owner) {
        proc_spt.pages.insert(
            page,
            SptEntry {
                kind: SptKind::ElfBacked(backing),
                writable,
                frame: None,
                swap_slot: None,
            },
        );
    }
}

/// Does `owner` have an SPT entry covering `vaddr`? Used by `mmap` to reject
/// overlapping mappings.
pub fn contains(owner: OwnerId, vaddr: VirtAddr) -> bool {
    let page = page_round_down(vaddr).as_u64();
    SPT.lock()
        .get(&owner)
        .map(|p| p.pages.contains_key(&page))
        .unwrap_or(false)
}

/// Look up a page's file backing without removing it, for writeback before
/// the entry is torn down.
pub fn peek_file_backing(owner: OwnerId, vaddr: VirtAddr) -> Option<FileBacking> {
    let page = page_round_down(vaddr).as_u64();
    let guard = SPT.lock();
    match &guard.get(&owner)?.pages.get(&page)?.kind {
        SptKind::FileBacked(backing) => Some(*backing),
        SptKind::ElfBacked(_) | SptKind::Stack => None,
    }
}

/// Remove and return the file backing for a resident mmap'd page, for
/// `munmap` to write its dirty content back and free its frame/entry.
pub fn take_file_backed_page(
    owner: OwnerId,
    vaddr: VirtAddr,
) -> Option<(FileBacking, Option<PhysFrame>)> {
    let page = page_round_down(vaddr).as_u64();
    let mut guard = SPT.lock();
    let proc_spt = guard.get_mut(&owner)?;
    let entry = proc_spt.pages.remove(&page)?;
    match &entry.kind {
        SptKind::FileBacked(backing) => {
            let backing = *backing;
            Some((backing, entry.frame))
        }
        SptKind::ElfBacked(_) | SptKind::Stack => {
            // Put it back; this wasn't an mmap page.
            proc_spt.pages.insert(page, entry);
            None
        }
    }
}

/// Outcome of resolving a page fault, for the handler to act on.
pub enum FaultOutcome {
    Resolved,
    Kill,
}

/// Implements the fault resolution algorithm: SPT hit (swap-in or file
/// load), else plausible stack growth, else kill the process.
///
/// `fault_addr` is the faulting address (CR2), `is_write`/`is_present`/
/// `is_user` come from the error code, `user_sp` is the saved user stack
/// pointer at the time of the fault.
pub fn resolve_fault(
    owner: OwnerId,
    fault_addr: VirtAddr,
    user_sp: VirtAddr,
    is_write: bool,
    is_present: bool,
    is_user: bool,
) -> FaultOutcome {
    if is_present && is_write {
        // Write to a page that exists but isn't writable (read-only text,
        // or a read-only mmap). No amount of SPT juggling fixes this.
        return FaultOutcome::Kill;
    }

    let fault_page = page_round_down(fault_addr);
    if !is_user_address(fault_page) {
        return FaultOutcome::Kill;
    }

    let root = match SPT.lock().get(&owner).map(|p| p.root) {
        Some(root) => root,
        None => return FaultOutcome::Kill,
    };

    let has_entry = contains(owner, fault_page);
    if has_entry {
        return resolve_existing_entry(owner, root, fault_page, is_write);
    }

    if is_user && is_plausible_stack_growth(fault_addr, user_sp) {
        return grow_stack(owner, root, fault_page);
    }

    FaultOutcome::Kill
}

fn is_plausible_stack_growth(fault_addr: VirtAddr, user_sp: VirtAddr) -> bool {
    let a = fault_addr.as_u64();
    let s = user_sp.as_u64();
    let stack_floor = layout::USER_STACK_TOP.saturating_sub(8 * 1024 * 1024);
    a >= stack_floor && a < layout::USER_STACK_TOP && (a >= s || a == s - 4 || a == s - 32)
}

fn resolve_existing_entry(
    owner: OwnerId,
    root: PhysAddr,
    page: VirtAddr,
    is_write: bool,
) -> FaultOutcome {
    let page_key = page.as_u64();

    let (writable, kind, swap_slot) = {
        let guard = SPT.lock();
        let Some(entry) = guard.get(&owner).and_then(|p| p.pages.get(&page_key)) else {
            return FaultOutcome::Kill;
        };
        (entry.writable, entry.kind.clone(), entry.swap_slot)
    };

    if is_write && !writable {
        return FaultOutcome::Kill;
    }

    if let Some(slot) = swap_slot {
        return swap_in_page(owner, root, page, slot, writable);
    }

    match kind {
        SptKind::FileBacked(backing) => load_file_backed(owner, root, page, writable, backing),
        SptKind::ElfBacked(backing) => load_elf_backed(owner, root, page, writable, backing),
        SptKind::Stack => install_zero_page(owner, root, page, writable),
    }
}

fn grow_stack(owner: OwnerId, root: PhysAddr, page: VirtAddr) -> FaultOutcome {
    let page_key = page.as_u64();
    {
        let mut guard = SPT.lock();
        let Some(proc_spt) = guard.get_mut(&owner) else {
            return FaultOutcome::Kill;
        };
        proc_spt.pages.insert(
            page_key,
            SptEntry {
                kind: SptKind::Stack,
                writable: true,
                frame: None,
                swap_slot: None,
            },
        );
    }
    install_zero_page(owner, root, page, true)
}

/// Set up the single stack page `start_process` creates up front (the rest
/// of the stack region grows lazily through `resolve_fault`/`grow_stack`).
/// Registered as an ordinary `Stack` entry so unmapping/eviction treat it no
/// differently from a page the process later faults into existence.
///
/// Returns the mapped page's physical frame so the caller can write argv
/// onto it through the physmap before the owning thread ever runs.
pub fn setup_initial_stack_page(owner: OwnerId, root: PhysAddr) -> Option<PhysFrame> {
    let page = page_round_down(VirtAddr::new(layout::USER_STACK_TOP - 1));
    let page_key = page.as_u64();

    let frame = frame::frame_alloc(AllocFlags::zeroed(), page, owner, root).ok()?;
    if install_pte(root, page, frame, true).is_err() {
        frame::frame_free(frame);
        return None;
    }

    let mut guard = SPT.lock();
    let proc_spt = guard.get_mut(&owner)?;
    proc_spt.pages.insert(
        page_key,
        SptEntry {
            kind: SptKind::Stack,
            writable: true,
            frame: Some(frame),
            swap_slot: None,
        },
    );
    Some(frame)
}

fn install_zero_page(owner: OwnerId, root: PhysAddr, page: VirtAddr, writable: bool) -> FaultOutcome {
    let frame = match frame::frame_alloc(AllocFlags::zeroed(), page, owner, root) {
        Ok(frame) => frame,
        Err(_) => return FaultOutcome::Kill,
    };
    if install_pte(root, page, frame, writable).is_err() {
        frame::frame_free(frame);
        return FaultOutcome::Kill;
    }
    bind_frame(owner, page, frame);
    FaultOutcome::Resolved
}

fn load_file_backed(
    owner: OwnerId,
    root: PhysAddr,
    page: VirtAddr,
    writable: bool,
    backing: FileBacking,
) -> FaultOutcome {
    let frame = match frame::frame_alloc(AllocFlags::zeroed(), page, owner, root) {
        Ok(frame) => frame,
        Err(_) => return FaultOutcome::Kill,
    };

    if backing.read_bytes > 0 {
        let dst = unsafe { physmap::phys_ptr::<u8>(PhysAddr::new(frame.start_address())) };
        let buf = unsafe { core::slice::from_raw_parts_mut(dst, backing.read_bytes as usize) };
        if crate::vfs::vfs_lseek(backing.fd, backing.file_offset as i64, 0) < 0 {
            frame::frame_free(frame);
            return FaultOutcome::Kill;
        }
        if crate::vfs::vfs_read(backing.fd, buf, backing.read_bytes as usize) < 0 {
            frame::frame_free(frame);
            return FaultOutcome::Kill;
        }
    }
    // The rest of the page was already zeroed by `frame_alloc`'s zero_fill.

    if install_pte(root, page, frame, writable).is_err() {
        frame::frame_free(frame);
        return FaultOutcome::Kill;
    }
    bind_frame(owner, page, frame);
    FaultOutcome::Resolved
}

/// Mirrors `load_file_backed`, but copies straight out of the ELF image
/// bytes kept alive in `backing.image` instead of reading through a VFS fd.
fn load_elf_backed(
    owner: OwnerId,
    root: PhysAddr,
    page: VirtAddr,
    writable: bool,
    backing: ElfBacking,
) -> FaultOutcome {
    let frame = match frame::frame_alloc(AllocFlags::zeroed(), page, owner, root) {
        Ok(frame) => frame,
        Err(_) => return FaultOutcome::Kill,
    };

    if backing.read_bytes > 0 {
        let start = backing.file_offset as usize;
        let end = start + backing.read_bytes as usize;
        let Some(src) = backing.image.get(start..end) else {
            frame::frame_free(frame);
            return FaultOutcome::Kill;
        };
        let dst = unsafe { physmap::phys_ptr::<u8>(PhysAddr::new(frame.start_address())) };
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
    }
    // The rest of the page was already zeroed by `frame_alloc`'s zero_fill.

    if install_pte(root, page, frame, writable).is_err() {
        frame::frame_free(frame);
        return FaultOutcome::Kill;
    }
    bind_frame(owner, page, frame);
    FaultOutcome::Resolved
}

fn swap_in_page(
    owner: OwnerId,
    root: PhysAddr,
    page: VirtAddr,
    slot: SwapSlot,
    writable: bool,
) -> FaultOutcome {
    let frame = match frame::frame_alloc(AllocFlags::default(), page, owner, root) {
        Ok(frame) => frame,
        Err(_) => return FaultOutcome::Kill,
    };

    let dst = unsafe { physmap::phys_ptr::<[u8; PhysFrame::SIZE as usize]>(PhysAddr::new(frame.start_address())) };
    swap::swap_in(unsafe { &mut *dst }, slot);

    if install_pte(root, page, frame, writable).is_err() {
        frame::frame_free(frame);
        return FaultOutcome::Kill;
    }

    let page_key = page.as_u64();
    if let Some(proc_spt) = SPT.lock().get_mut(&owner) {
        if let Some(entry) = proc_spt.pages.get_mut(&page_key) {
            entry.swap_slot = None;
            entry.frame = Some(frame);
        }
    }
    FaultOutcome::Resolved
}

fn bind_frame(owner: OwnerId, page: VirtAddr, frame: PhysFrame) {
    let page_key = page.as_u64();
    if let Some(proc_spt) = SPT.lock().get_mut(&owner) {
        if let Some(entry) = proc_spt.pages.get_mut(&page_key) {
            entry.frame = Some(frame);
        }
    }
}

fn install_pte(
    root: PhysAddr,
    page: VirtAddr,
    frame: PhysFrame,
    writable: bool,
) -> Result<(), &'static str> {
    paging::map_page_user(
        root,
        page,
        PhysAddr::new(frame.start_address()),
        writable,
        false,
    )
}

struct SptEvictionSink;

impl EvictionSink for SptEvictionSink {
    fn on_evict(&self, owner: OwnerId, upage: VirtAddr, frame: PhysFrame) {
        let src = unsafe {
            physmap::phys_ptr::<[u8; PhysFrame::SIZE as usize]>(PhysAddr::new(frame.start_address()))
        };
        let slot = swap::swap_out(unsafe { &*src });

        let page_key = upage.as_u64();
        if let Some(proc_spt) = SPT.lock().get_mut(&owner) {
            if let Some(entry) = proc_spt.pages.get_mut(&page_key) {
                entry.frame = None;
                entry.swap_slot = Some(slot);
            }
        }
    }
}

static SINK: SptEvictionSink = SptEvictionSink;

/// Wires this module's eviction handling into the frame table. Called once
/// during memory subsystem init.
pub fn init() {
    frame::set_eviction_sink(&SINK);
}

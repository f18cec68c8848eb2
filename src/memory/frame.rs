/*
 * Frame table
 *
 * Physical-frame registry for user pages: which user virtual page currently
 * backs each frame, and whose page directory it belongs to. Used by the
 * page-fault resolver (spt.rs) to get a frame, and by eviction to pick a
 * victim when the physical pool is exhausted.
 */

use crate::memory::types::{PhysAddr, PhysFrame, VirtAddr};
use crate::memory::{paging, phys as pmm, physmap};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

/// Opaque handle identifying whoever owns a mapping, without pulling in the
/// scheduler's `ProcessId` type here. Callers convert at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

/// What to do with a freshly allocated frame before handing it back.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocFlags {
    pub zero_fill: bool,
}

impl AllocFlags {
    pub fn zeroed() -> Self {
        Self { zero_fill: true }
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameEntry {
    frame: PhysFrame,
    upage: VirtAddr,
    owner: OwnerId,
    owner_root: PhysAddr,
}

struct FrameTable {
    /// Keyed by the frame's starting physical address.
    entries: BTreeMap<u64, FrameEntry>,
    /// Enumeration order for the second-chance clock scan.
    clock: Vec<u64>,
    hand: usize,
}

impl FrameTable {
    const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            clock: Vec::new(),
            hand: 0,
        }
    }

    fn insert(&mut self, entry: FrameEntry) {
        let key = entry.frame.start_address();
        if self.entries.insert(key, entry).is_none() {
            self.clock.push(key);
        }
    }

    fn remove(&mut self, frame: PhysFrame) -> Option<FrameEntry> {
        let key = frame.start_address();
        let removed = self.entries.remove(&key);
        if removed.is_some() {
            self.clock.retain(|&k| k != key);
            if self.hand >= self.clock.len() {
                self.hand = 0;
            }
        }
        removed
    }
}

static FRAME_TABLE: Mutex<FrameTable> = Mutex::new(FrameTable::new());

/// Callback invoked on the entry being evicted, before its frame is reused.
/// `spt` implements this to write the page out to swap and mark its SPT
/// entry swapped; frame.rs knows nothing about SPT entries itself.
pub trait EvictionSink: Sync {
    fn on_evict(&self, owner: OwnerId, upage: VirtAddr, frame: PhysFrame);
}

static EVICTION_SINK: Mutex<Option<&'static dyn EvictionSink>> = Mutex::new(None);

/// Registered once at boot by the SPT module. Without a sink, eviction has
/// nowhere to write the victim's content and `frame_alloc` just fails.
pub fn set_eviction_sink(sink: &'static dyn EvictionSink) {
    *EVICTION_SINK.lock() = Some(sink);
}

fn zero_frame(frame: PhysFrame) {
    let ptr = unsafe { physmap::phys_ptr::<u8>(PhysAddr::new(frame.start_address())) };
    unsafe { core::ptr::write_bytes(ptr, 0, PhysFrame::SIZE as usize) };
}

/// Allocate a frame to back `upage` in `owner`'s address space (`owner_root`
/// is the physical address of its page directory / PML4).
///
/// Tries the physical allocator first; on exhaustion, runs second-chance
/// eviction to free one up. The returned frame is not yet mapped into any
/// page table - the caller installs the PTE.
pub fn frame_alloc(
    flags: AllocFlags,
    upage: VirtAddr,
    owner: OwnerId,
    owner_root: PhysAddr,
) -> Result<PhysFrame, &'static str> {
    let frame = match pmm::alloc_frame() {
        Some(frame) => frame,
        None => evict_one()?,
    };

    if flags.zero_fill {
        zero_frame(frame);
    }

    FRAME_TABLE.lock().insert(FrameEntry {
        frame,
        upage,
        owner,
        owner_root,
    });

    Ok(frame)
}

/// Release `frame` back to the physical pool and drop its table entry.
pub fn frame_free(frame: PhysFrame) {
    FRAME_TABLE.lock().remove(frame);
    pmm::free_frame(frame);
}

/// Second-chance eviction: walk the clock in enumeration order, giving each
/// entry one pass to clear its accessed bit before it's chosen as the
/// victim. Bounded to two full passes over the table.
fn evict_one() -> Result<PhysFrame, &'static str> {
    let sink = *EVICTION_SINK.lock();
    let sink = sink.ok_or("Out of frames (no eviction sink registered)")?;

    let mut table = FRAME_TABLE.lock();
    if table.clock.is_empty() {
        return Err("Out of frames");
    }
    let len = table.clock.len();
    let max_steps = len.saturating_mul(2).max(1);

    for _ in 0..max_steps {
        let key = table.clock[table.hand];
        table.hand = (table.hand + 1) % len;

        let entry = *table.entries.get(&key).expect("clock/entries out of sync");
        if paging::is_accessed(entry.owner_root, entry.upage) {
            paging::clear_accessed(entry.owner_root, entry.upage);
            continue;
        }

        // Drop the table lock before calling into the sink, which may take
        // the SPT/swap locks in turn - never nest frame_table_lock inside
        // those, only the other way around.
        drop(table);

        sink.on_evict(entry.owner, entry.upage, entry.frame);
        let _ = paging::unmap_4k(entry.owner_root, entry.upage);

        let mut table = FRAME_TABLE.lock();
        table.remove(entry.frame);
        return Ok(entry.frame);
    }

    Err("Out of frames (eviction scan exhausted two passes)")
}

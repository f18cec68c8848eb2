/*
 * Swap slot allocator
 *
 * The real backing block device is out of scope here; we only need the
 * slot-allocation interface frame eviction talks to. Slots are backed by an
 * in-memory store standing in for the block device the original design
 * assumes.
 */

use crate::memory::PhysFrame;
use alloc::vec::Vec;
use spin::Mutex;

const PAGE_SIZE: usize = PhysFrame::SIZE as usize;

/// Index of an allocated swap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSlot(usize);

struct SwapDisk {
    /// One bit per slot; `true` = in use. Grows as slots are claimed, same
    /// as the physical frame bitmap growing to cover the whole backing
    /// device up front would, just lazily.
    used: Vec<bool>,
    pages: Vec<[u8; PAGE_SIZE]>,
}

impl SwapDisk {
    const fn new() -> Self {
        Self {
            used: Vec::new(),
            pages: Vec::new(),
        }
    }

    fn alloc(&mut self) -> SwapSlot {
        for (i, slot) in self.used.iter_mut().enumerate() {
            if !*slot {
                *slot = true;
                return SwapSlot(i);
            }
        }
        self.used.push(true);
        self.pages.push([0u8; PAGE_SIZE]);
        SwapSlot(self.used.len() - 1)
    }

    fn free(&mut self, slot: SwapSlot) {
        self.used[slot.0] = false;
    }
}

static SWAP_DISK: Mutex<SwapDisk> = Mutex::new(SwapDisk::new());

/// Write `PAGE_SIZE` bytes from `src` into a freshly allocated slot.
pub fn swap_out(src: &[u8; PAGE_SIZE]) -> SwapSlot {
    let mut disk = SWAP_DISK.lock();
    let slot = disk.alloc();
    disk.pages[slot.0] = *src;
    slot
}

/// Read a slot's contents into `dst` and free the slot.
pub fn swap_in(dst: &mut [u8; PAGE_SIZE], slot: SwapSlot) {
    let mut disk = SWAP_DISK.lock();
    *dst = disk.pages[slot.0];
    disk.free(slot);
}

/// Free a slot without reading it back (a process exiting while one of its
/// pages is still swapped out).
pub fn free_slot(slot: SwapSlot) {
    SWAP_DISK.lock().free(slot);
}

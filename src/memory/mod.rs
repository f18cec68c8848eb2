/*
 * Memory Management
 *
 * High-level module that ties together:
 *  - Physical frame allocator (phys)
 *  - Paging / virtual memory manager (paging)
 *  - Kernel heap (heap)
 *  - Frame table + eviction (frame), swap (swap), supplemental page table
 *    and page-fault resolution (spt), memory-mapped files (mmap)
 */

pub mod address_space;
pub mod frame;
pub mod heap;
pub mod mmap;
pub mod paging;
pub mod phys;
pub mod physmap;
pub mod spt;
pub mod swap;
pub mod types;

pub use address_space::AddressSpace;
// `types::PhysFrame` is the one true physical-frame type; this re-export
// keeps every existing `crate::memory::PhysFrame` call site (phys.rs,
// address_space.rs, shmem, tests) resolving to it instead of a second,
// structurally-identical-but-nominally-distinct definition living here.
pub use types::PhysFrame;

use crate::bootboot::BOOTBOOT;

/// Top-level memory initialization:
///  1. Physical frame allocator from BOOTBOOT memory map
///  2. Paging mapper
///  3. Kernel heap
pub fn init(bootboot_ptr: *const BOOTBOOT) {
    log::info!("Initializing memory management...");

    // 1) Physical frames
    phys::init_from_bootboot(bootboot_ptr);

    // 2) Paging
    paging::init();

    // 3) Heap
    heap::init().expect("Failed to initialize kernel heap");

    // 4) VM core: wire frame eviction to the supplemental page table
    spt::init();

    let (used, total) = phys::get_stats();
    log::info!(
        "Physical memory: used frames = {}, total frames = {}",
        used,
        total
    );
}

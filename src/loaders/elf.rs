/*
 * ELF Binary Loader
 *
 * This module implements an ELF64 (Executable and Linkable Format) loader
 * for loading userspace programs into CLUU.
 *
 * ELF Format:
 * ===========
 *
 * ELF binaries consist of:
 * - ELF Header: Magic number, architecture, entry point
 * - Program Headers: Describe segments to load (PT_LOAD)
 * - Section Headers: Describe sections (not needed for loading)
 * - Data: Actual code and data bytes
 *
 * Loading Process:
 * ================
 *
 * 1. Parse and validate ELF header
 * 2. Parse program headers (PT_LOAD segments)
 * 3. Create new process with fresh address space
 * 4. Map each PT_LOAD segment into process memory
 * 5. Copy segment data from ELF file
 * 6. Zero-fill BSS (uninitialized data)
 * 7. Set up user stack
 * 8. Create initial thread at entry point
 *
 * Memory Layout After Loading:
 * ============================
 *
 * 0x00400000 - Text segment (code, read+execute)
 * 0x00600000 - Data/BSS segment (data, read+write)
 * 0x00800000 - Heap start (grows up via sbrk)
 * 0x7ff00000 - Stack (grows down, 16MB)
 *
 * References:
 * - ELF64 Specification: https://refspecs.linuxfoundation.org/elf/elf.pdf
 * - System V ABI AMD64: https://refspecs.linuxfoundation.org/elf/x86_64-abi-0.99.pdf
 */

use alloc::sync::Arc;
use alloc::vec::Vec;
use x86_64::VirtAddr;
use x86_64::structures::paging::PageTableFlags;

use crate::memory::address_space::layout;
use crate::memory::frame::OwnerId;
use crate::memory::{physmap, spt};
use crate::scheduler::process::ProcessManager;
use crate::scheduler::{self, ProcessId, ThreadId, ThreadManager};
use x86_64::PhysAddr;

/// ELF magic number (0x7F 'E' 'L' 'F')
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class (64-bit)
const ELFCLASS64: u8 = 2;

/// ELF data encoding (little-endian)
const ELFDATA2LSB: u8 = 1;

/// ELF version (current)
const EV_CURRENT: u8 = 1;

/// ELF type: Executable file
const ET_EXEC: u16 = 2;

/// ELF machine: AMD x86-64
const EM_X86_64: u16 = 62;

/// Program header type: Loadable segment
const PT_LOAD: u32 = 1;

/// Program header type: Dynamic linking information
const PT_DYNAMIC: u32 = 2;

/// Program header type: Interpreter path (PT_INTERP)
const PT_INTERP: u32 = 3;

/// Program header type: Reserved, legacy shared-library segment
const PT_SHLIB: u32 = 5;

/// Upper bound on program header count, to keep a corrupt `e_phnum` from
/// forcing an unreasonably large allocation in `parse_program_headers`.
const MAX_PROGRAM_HEADERS: usize = 64;

/// Program header flags
const PF_X: u32 = 1; // Execute
const PF_W: u32 = 2; // Write
const PF_R: u32 = 4; // Read

/// ELF64 Header (64 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    e_ident: [u8; 16],      // ELF identification
    e_type: u16,            // Object file type
    e_machine: u16,         // Machine architecture
    e_version: u32,         // Object file version
    e_entry: u64,           // Entry point address
    e_phoff: u64,           // Program header offset
    e_shoff: u64,           // Section header offset
    e_flags: u32,           // Processor-specific flags
    e_ehsize: u16,          // ELF header size
    e_phentsize: u16,       // Program header entry size
    e_phnum: u16,           // Number of program headers
    e_shentsize: u16,       // Section header entry size
    e_shnum: u16,           // Number of section headers
    e_shstrndx: u16,        // Section header string table index
}

/// ELF64 Program Header (56 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,       // Segment type
    p_flags: u32,      // Segment flags
    p_offset: u64,     // Segment file offset
    p_vaddr: u64,      // Segment virtual address
    p_paddr: u64,      // Segment physical address (ignored)
    p_filesz: u64,     // Segment size in file
    p_memsz: u64,      // Segment size in memory
    p_align: u64,      // Segment alignment
}

/// Loaded ELF binary metadata
#[derive(Debug)]
pub struct ElfBinary {
    /// Entry point (RIP for first thread)
    pub entry_point: VirtAddr,
    /// Loaded segments
    pub segments: Vec<ElfSegment>,
}

/// A loaded ELF segment
#[derive(Debug, Clone)]
pub struct ElfSegment {
    /// Virtual address where segment is loaded
    pub vaddr: VirtAddr,
    /// Size of segment in memory
    pub size: usize,
    /// Page table flags (derived from ELF flags)
    pub flags: PageTableFlags,
}

/// ELF loading errors
#[derive(Debug)]
pub enum ElfLoadError {
    InvalidMagic,
    InvalidClass,
    InvalidEncoding,
    InvalidVersion,
    InvalidType,
    InvalidMachine,
    InvalidHeader,
    NoLoadableSegments,
    SegmentTooLarge,
    InvalidAlignment,
    MemoryAllocationFailed,
    MappingFailed,
}

impl core::fmt::Display for ElfLoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ElfLoadError::InvalidMagic => write!(f, "Invalid ELF magic number"),
            ElfLoadError::InvalidClass => write!(f, "Not a 64-bit ELF"),
            ElfLoadError::InvalidEncoding => write!(f, "Not little-endian"),
            ElfLoadError::InvalidVersion => write!(f, "Invalid ELF version"),
            ElfLoadError::InvalidType => write!(f, "Not an executable"),
            ElfLoadError::InvalidMachine => write!(f, "Not an x86-64 binary"),
            ElfLoadError::InvalidHeader => write!(f, "Invalid ELF header"),
            ElfLoadError::NoLoadableSegments => write!(f, "No PT_LOAD segments"),
            ElfLoadError::SegmentTooLarge => write!(f, "Segment too large"),
            ElfLoadError::InvalidAlignment => write!(f, "Invalid segment alignment"),
            ElfLoadError::MemoryAllocationFailed => write!(f, "Failed to allocate memory"),
            ElfLoadError::MappingFailed => write!(f, "Failed to map pages"),
        }
    }
}

/// Parse and validate ELF header
///
/// Verifies:
/// - Magic number (0x7F 'E' 'L' 'F')
/// - 64-bit class
/// - Little-endian encoding
/// - Current version
/// - Executable type (ET_EXEC)
/// - x86-64 architecture
fn parse_elf_header(data: &[u8]) -> Result<Elf64Header, ElfLoadError> {
    // Verify minimum size
    if data.len() < core::mem::size_of::<Elf64Header>() {
        return Err(ElfLoadError::InvalidHeader);
    }

    // Parse header (careful with packed struct alignment)
    let header = unsafe {
        core::ptr::read_unaligned(data.as_ptr() as *const Elf64Header)
    };

    // Validate magic number
    if header.e_ident[0..4] != ELF_MAGIC {
        log::error!("ELF: Invalid magic: {:?}", &header.e_ident[0..4]);
        return Err(ElfLoadError::InvalidMagic);
    }

    // Validate class (64-bit)
    if header.e_ident[4] != ELFCLASS64 {
        log::error!("ELF: Not 64-bit (class = {})", header.e_ident[4]);
        return Err(ElfLoadError::InvalidClass);
    }

    // Validate encoding (little-endian)
    if header.e_ident[5] != ELFDATA2LSB {
        log::error!("ELF: Not little-endian (encoding = {})", header.e_ident[5]);
        return Err(ElfLoadError::InvalidEncoding);
    }

    // Validate version
    if header.e_ident[6] != EV_CURRENT {
        log::error!("ELF: Invalid version ({})", header.e_ident[6]);
        return Err(ElfLoadError::InvalidVersion);
    }

    // Read type and machine using read_unaligned (packed struct safety)
    let e_type = unsafe { core::ptr::addr_of!(header.e_type).read_unaligned() };
    let e_machine = unsafe { core::ptr::addr_of!(header.e_machine).read_unaligned() };
    let e_entry = unsafe { core::ptr::addr_of!(header.e_entry).read_unaligned() };

    // Validate type (executable)
    if e_type != ET_EXEC {
        log::error!("ELF: Not executable (type = {})", e_type);
        return Err(ElfLoadError::InvalidType);
    }

    // Validate machine (x86-64)
    if e_machine != EM_X86_64 {
        log::error!("ELF: Not x86-64 (machine = {})", e_machine);
        return Err(ElfLoadError::InvalidMachine);
    }

    log::debug!("ELF: Valid header, entry = 0x{:x}", e_entry);
    Ok(header)
}

/// Parse program headers from ELF binary
fn parse_program_headers(
    data: &[u8],
    header: &Elf64Header,
) -> Result<Vec<Elf64ProgramHeader>, ElfLoadError> {
    // Read fields using addr_of! for packed struct safety
    let ph_offset = unsafe { core::ptr::addr_of!(header.e_phoff).read_unaligned() as usize };
    let ph_size = unsafe { core::ptr::addr_of!(header.e_phentsize).read_unaligned() as usize };
    let ph_count = unsafe { core::ptr::addr_of!(header.e_phnum).read_unaligned() as usize };

    if ph_count > MAX_PROGRAM_HEADERS {
        log::error!("ELF: e_phnum {} exceeds limit of {}", ph_count, MAX_PROGRAM_HEADERS);
        return Err(ElfLoadError::InvalidHeader);
    }

    // Validate program header table bounds
    if ph_offset + (ph_size * ph_count) > data.len() {
        return Err(ElfLoadError::InvalidHeader);
    }

    let mut program_headers = Vec::new();

    for i in 0..ph_count {
        let offset = ph_offset + (i * ph_size);
        let ph_data = &data[offset..offset + ph_size];

        // Parse program header (careful with packed struct)
        let ph = unsafe {
            core::ptr::read_unaligned(ph_data.as_ptr() as *const Elf64ProgramHeader)
        };

        let p_type = unsafe { core::ptr::addr_of!(ph.p_type).read_unaligned() };
        if matches!(p_type, PT_DYNAMIC | PT_INTERP | PT_SHLIB) {
            log::error!("ELF: Segment {} has unsupported type {}", i, p_type);
            return Err(ElfLoadError::InvalidType);
        }

        program_headers.push(ph);
    }

    Ok(program_headers)
}

/// Convert ELF segment flags to page table flags
fn elf_flags_to_page_flags(elf_flags: u32) -> PageTableFlags {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;

    // Write permission
    if (elf_flags & PF_W) != 0 {
        flags |= PageTableFlags::WRITABLE;
    }

    // Execute permission (note: x86-64 has NXE - No-Execute Enable)
    // If segment is NOT executable, we would set NO_EXECUTE
    // For now, we'll keep it simple and allow execution on all pages
    // TODO: Use NO_EXECUTE flag when PF_X is not set

    flags
}

/// Parse an ELF binary and register its PT_LOAD segments as lazily-loaded
/// SPT entries for `owner`.
///
/// No frame is allocated and no byte of `image` is copied anywhere here:
/// each page only gets a physical frame, and its bytes, the first time the
/// page fault handler touches it. Immediately after this returns, the
/// process owns no user frames for any loadable segment.
pub fn load_elf_binary(image: &Arc<Vec<u8>>, owner: OwnerId) -> Result<ElfBinary, ElfLoadError> {
    let data = image.as_slice();
    log::info!("ELF: Loading binary ({} bytes)", data.len());

    let header = parse_elf_header(data)?;
    let e_entry = unsafe { core::ptr::addr_of!(header.e_entry).read_unaligned() };
    let entry_point = VirtAddr::new(e_entry);
    log::info!("ELF: Entry point at 0x{:x}", entry_point.as_u64());

    let program_headers = parse_program_headers(data, &header)?;
    log::info!("ELF: Found {} program headers", program_headers.len());

    let mut segments = Vec::new();
    let mut has_loadable = false;

    for (i, ph) in program_headers.iter().enumerate() {
        let p_type = unsafe { core::ptr::addr_of!(ph.p_type).read_unaligned() };
        let p_vaddr = unsafe { core::ptr::addr_of!(ph.p_vaddr).read_unaligned() };
        let p_filesz = unsafe { core::ptr::addr_of!(ph.p_filesz).read_unaligned() };
        let p_memsz = unsafe { core::ptr::addr_of!(ph.p_memsz).read_unaligned() };
        let p_offset = unsafe { core::ptr::addr_of!(ph.p_offset).read_unaligned() };
        let p_flags = unsafe { core::ptr::addr_of!(ph.p_flags).read_unaligned() };

        if p_type != PT_LOAD {
            log::debug!("ELF: Segment {}: type={}, skipping", i, p_type);
            continue;
        }

        has_loadable = true;

        let vaddr = VirtAddr::new(p_vaddr);
        let file_size = p_filesz as usize;
        let mem_size = p_memsz as usize;
        let file_offset = p_offset as u64;

        log::info!(
            "ELF: Segment {}: vaddr=0x{:x}, filesz={}, memsz={}, flags=0x{:x}",
            i, p_vaddr, file_size, mem_size, p_flags
        );

        if file_offset as usize + file_size > data.len() {
            log::error!("ELF: Segment {} extends beyond file", i);
            return Err(ElfLoadError::InvalidHeader);
        }

        if mem_size > 16 * 1024 * 1024 {
            log::error!("ELF: Segment {} too large ({})", i, mem_size);
            return Err(ElfLoadError::SegmentTooLarge);
        }

        // Lazy per-page loading assumes a page-aligned segment start: each
        // page's file-backed range is then just [i*4096, i*4096+4096) into
        // the segment, with no cross-page offset bookkeeping needed.
        if !vaddr.is_aligned(4096u64) {
            log::error!("ELF: Segment {} vaddr 0x{:x} not page-aligned", i, p_vaddr);
            return Err(ElfLoadError::InvalidAlignment);
        }

        let flags = elf_flags_to_page_flags(p_flags);
        let writable = (p_flags & PF_W) != 0;

        let page_count = (mem_size as u64).div_ceil(4096) as usize;
        log::debug!(
            "ELF:   Registering {} lazy pages from 0x{:x}",
            page_count,
            vaddr.as_u64()
        );

        for page_idx in 0..page_count {
            let page_vaddr = vaddr + (page_idx as u64 * 4096);
            let page_start = page_idx as u64 * 4096;
            let read_bytes = if page_start >= file_size as u64 {
                0
            } else {
                core::cmp::min(4096, file_size as u64 - page_start) as u32
            };

            spt::insert_elf_backed(
                owner,
                page_vaddr,
                writable,
                spt::ElfBacking {
                    image: image.clone(),
                    file_offset: file_offset + page_start,
                    read_bytes,
                    zero_bytes: 4096 - read_bytes,
                },
            );
        }

        segments.push(ElfSegment {
            vaddr,
            size: mem_size,
            flags,
        });
    }

    if !has_loadable {
        log::error!("ELF: No loadable segments found");
        return Err(ElfLoadError::NoLoadableSegments);
    }

    log::info!("ELF: Registered {} lazy segments", segments.len());

    Ok(ElfBinary {
        entry_point,
        segments,
    })
}

/// Bound on argc for the stack layout `build_user_stack` writes; keeps a
/// hostile cmdline from overflowing the single stack page set up for it.
const MAX_ARGS: usize = 32;

/// Build the argv stack layout described for `start_process` onto the
/// single zeroed stack page at the top of user space, returning the
/// initial user RSP.
///
/// Layout from high to low addresses: argument strings (reverse order),
/// word-aligned padding, a NULL sentinel, the argv pointer array (reverse
/// order so it reads low-to-high as argv[0..argc]), the argv pointer
/// itself, argc, then a fake return address — so a freshly entered `_start`
/// sees `[rsp]=return addr, [rsp+8]=argc, [rsp+16]=argv` exactly as if it
/// had been called.
fn build_user_stack(stack_page: x86_64::PhysAddr, args: &[&str]) -> Result<VirtAddr, ElfLoadError> {
    if args.len() > MAX_ARGS {
        return Err(ElfLoadError::InvalidHeader);
    }

    let page_va_base = layout::USER_STACK_TOP - 4096;
    let buf = unsafe { physmap::phys_ptr::<u8>(stack_page) };
    let buf = unsafe { core::slice::from_raw_parts_mut(buf, 4096) };

    let mut sp = layout::USER_STACK_TOP;
    let mut addrs = alloc::vec![0u64; args.len()];

    for (i, arg) in args.iter().enumerate().rev() {
        let bytes = arg.as_bytes();
        let len_with_nul = bytes.len() + 1;
        if len_with_nul as u64 > sp - page_va_base {
            return Err(ElfLoadError::SegmentTooLarge);
        }
        sp -= len_with_nul as u64;
        let off = (sp - page_va_base) as usize;
        buf[off..off + bytes.len()].copy_from_slice(bytes);
        buf[off + bytes.len()] = 0;
        addrs[i] = sp;
    }

    sp &= !0x7u64; // word-align to 8 bytes

    let mut write_u64 = |sp: &mut u64, value: u64| -> Result<(), ElfLoadError> {
        if *sp < page_va_base + 8 {
            return Err(ElfLoadError::SegmentTooLarge);
        }
        *sp -= 8;
        let off = (*sp - page_va_base) as usize;
        buf[off..off + 8].copy_from_slice(&value.to_ne_bytes());
        Ok(())
    };

    write_u64(&mut sp, 0)?; // argv[argc] = NULL
    for &addr in addrs.iter().rev() {
        write_u64(&mut sp, addr)?;
    }
    let argv_ptr = sp;
    write_u64(&mut sp, argv_ptr)?;
    write_u64(&mut sp, args.len() as u64)?;
    write_u64(&mut sp, 0)?; // fake return address

    Ok(VirtAddr::new(sp))
}

/// A freshly-created thread whose interrupt context gets fully overwritten
/// by `ThreadManager::setup_userspace` before it is ever scheduled, so this
/// body never actually runs. It exists only because `spawn_thread_in_process`
/// needs a `fn()` to create the thread around.
fn unreachable_user_entry() {
    log::error!("user thread entry reached without a ring-3 context installed");
    loop {
        crate::scheduler::yield_now();
    }
}

/// Spawn a userspace process from an ELF binary
///
/// 1. Creates a new process with a fresh user address space.
/// 2. Registers each PT_LOAD segment as a lazily-loaded SPT entry (no frames
///    bound yet).
/// 3. Eagerly maps a single zeroed stack page and writes argv onto it.
/// 4. Creates the initial thread and points it at the entry point in ring 3.
///
/// Returns the ProcessId and initial ThreadId on success, and signals the
/// process's load semaphore with the outcome either way so `exec` can wait
/// on it.
pub fn spawn_elf_process(
    elf_data: &[u8],
    name: &str,
    args: &[&str],
    process_type: scheduler::ProcessType,
) -> Result<(ProcessId, ThreadId), ElfLoadError> {
    log::info!("Spawning ELF process '{}'", name);

    let process_id = scheduler::ProcessManager::spawn_user(name, process_type)
        .map_err(|_| ElfLoadError::MemoryAllocationFailed)?;
    let owner = process_id.owner_id();
    let image = Arc::new(elf_data.to_vec());

    let result = (|| {
        let binary = load_elf_binary(&image, owner)?;
        log::info!(
            "ELF process '{}' segments registered, entry point: 0x{:x}",
            name,
            binary.entry_point.as_u64()
        );

        let root = scheduler::with_process_mut(process_id, |p| p.address_space.page_table_root)
            .ok_or(ElfLoadError::MemoryAllocationFailed)?;
        let stack_frame = spt::setup_initial_stack_page(owner, root)
            .ok_or(ElfLoadError::MemoryAllocationFailed)?;
        let user_sp = build_user_stack(PhysAddr::new(stack_frame.start_address()), args)?;

        let thread_id = scheduler::spawn_thread_in_process(unreachable_user_entry, name, process_id);
        ThreadManager::setup_userspace(thread_id, binary.entry_point, user_sp)
            .map_err(|_| ElfLoadError::MemoryAllocationFailed)?;
        ThreadManager::init_std_streams(thread_id);

        Ok(thread_id)
    })();

    let thread_id = match result {
        Ok(tid) => tid,
        Err(e) => {
            log::warn!("ELF process '{}' failed to load: {}", name, e);
            ProcessManager::with_mut(process_id, |p| p.signal_load(false));
            return Err(e);
        }
    };

    ProcessManager::with_mut(process_id, |p| p.signal_load(true));
    log::info!(
        "ELF process '{}' spawned: PID={:?}, TID={:?}",
        name, process_id, thread_id
    );

    Ok((process_id, thread_id))
}

//! Page table management for x86-64.
//!
//! Grounded on the teacher's manual recursive-PML4 walk (`paging.rs`), ported from the
//! removed `x86`/`hermit_multiboot` crates onto `x86_64`/`memory_addresses`, which the rest
//! of the modern tree (`acpi.rs`, `physicalmem.rs`, `virtualmem.rs`, `device_alloc.rs`)
//! already depends on.

use core::ptr;

use bitflags::bitflags;
use memory_addresses::{PhysAddr, VirtAddr};
use x86_64::instructions::tlb;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::PhysFrame;

use crate::mm::physicalmem;

/// Number of page table entries per level.
const PAGE_MAP_ENTRIES: usize = 512;

pub trait PageSize: Copy {
	const SIZE: u64;
	/// Index (0 = PT, 1 = PD, 2 = PDPT) of the page table level this size terminates at.
	const MAP_LEVEL: usize;
	const HUGE_PAGE_BIT: usize;
}

#[derive(Clone, Copy)]
pub struct BasePageSize;
impl PageSize for BasePageSize {
	const SIZE: u64 = 0x1000;
	const MAP_LEVEL: usize = 0;
	const HUGE_PAGE_BIT: usize = 0;
}

#[derive(Clone, Copy)]
pub struct LargePageSize;
impl PageSize for LargePageSize {
	const SIZE: u64 = 0x20_0000;
	const MAP_LEVEL: usize = 1;
	const HUGE_PAGE_BIT: usize = 1 << 7;
}

#[derive(Clone, Copy)]
pub struct HugePageSize;
impl PageSize for HugePageSize {
	const SIZE: u64 = 0x4000_0000;
	const MAP_LEVEL: usize = 2;
	const HUGE_PAGE_BIT: usize = 1 << 7;
}

bitflags! {
	/// Architecture-independent view of the PTE bits we ever set.
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub struct PageTableEntryFlags: usize {
		const PRESENT        = 1 << 0;
		const WRITABLE       = 1 << 1;
		const USER_ACCESSIBLE= 1 << 2;
		const WRITE_THROUGH  = 1 << 3;
		const CACHE_DISABLE  = 1 << 4;
		const DIRTY          = 1 << 6;
		const GLOBAL         = 1 << 8;
		const EXECUTE_DISABLE= 1 << 63;
	}
}

/// Builder-style helpers matching the combinations the rest of the crate needs.
pub trait PageTableEntryFlagsExt {
	fn device(&mut self) -> &mut Self;
	fn normal(&mut self) -> &mut Self;
	fn read_only(&mut self) -> &mut Self;
	fn writable(&mut self) -> &mut Self;
	fn execute_disable(&mut self) -> &mut Self;
	fn user(&mut self) -> &mut Self;
}

impl PageTableEntryFlagsExt for PageTableEntryFlags {
	fn device(&mut self) -> &mut Self {
		self.insert(Self::PRESENT | Self::CACHE_DISABLE | Self::WRITE_THROUGH);
		self
	}

	fn normal(&mut self) -> &mut Self {
		self.insert(Self::PRESENT);
		self
	}

	fn read_only(&mut self) -> &mut Self {
		self.remove(Self::WRITABLE);
		self
	}

	fn writable(&mut self) -> &mut Self {
		self.insert(Self::WRITABLE);
		self
	}

	fn execute_disable(&mut self) -> &mut Self {
		self.insert(Self::EXECUTE_DISABLE);
		self
	}

	fn user(&mut self) -> &mut Self {
		self.insert(Self::USER_ACCESSIBLE);
		self
	}
}

#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub struct PageTableEntry(usize);

impl PageTableEntry {
	pub fn is_present(self) -> bool {
		self.0 & PageTableEntryFlags::PRESENT.bits() != 0
	}

	pub fn address(self) -> PhysAddr {
		PhysAddr::new((self.0 & 0x000F_FFFF_FFFF_F000) as u64)
	}

	pub fn flags(self) -> PageTableEntryFlags {
		PageTableEntryFlags::from_bits_truncate(self.0 & !0x000F_FFFF_FFFF_F000)
	}
}

#[repr(align(4096))]
struct PageTable {
	entries: [usize; PAGE_MAP_ENTRIES],
}

/// Recursive self-map slot used to reach arbitrary page table levels: entry 510 of the PML4
/// points back to the PML4 itself, giving every level a fixed virtual address window.
const RECURSIVE_INDEX: u64 = 510;

fn table_address(level: usize, vaddr: VirtAddr) -> *mut PageTable {
	let vaddr = vaddr.as_u64();
	let indices = [
		(vaddr >> 39) & 0x1FF,
		(vaddr >> 30) & 0x1FF,
		(vaddr >> 21) & 0x1FF,
	];

	// Sign-extend through the recursive slot: each extra level of recursion consumes one more
	// index from `indices`, walking from PML4 down to the table that contains `level`'s entries.
	let mut addr: u64 = 0xFFFF_0000_0000_0000;
	addr |= RECURSIVE_INDEX << 39;
	for l in (level..3).rev() {
		addr = (addr << 9) & 0xFFFF_FFFF_FFFF_F000 | (indices[2 - l] << 12);
	}
	addr as *mut PageTable
}

/// Returns a populated page table entry for `virtual_address` at the leaf level for `S`, if present.
pub fn get_page_table_entry<S: PageSize>(virtual_address: VirtAddr) -> Option<PageTableEntry> {
	let table = table_address(S::MAP_LEVEL, virtual_address);
	let index = (virtual_address.as_u64() as usize >> (12 + 9 * S::MAP_LEVEL)) & 0x1FF;
	let entry = unsafe { (*table).entries[index] };
	if entry & PageTableEntryFlags::PRESENT.bits() != 0 {
		Some(PageTableEntry(entry))
	} else {
		None
	}
}

pub fn get_physical_address<S: PageSize>(virtual_address: VirtAddr) -> Option<PhysAddr> {
	get_page_table_entry::<S>(virtual_address).map(|e| {
		let offset = virtual_address.as_u64() & (S::SIZE - 1);
		PhysAddr::new(e.address().as_u64() + offset)
	})
}

fn ensure_next_level(table: *mut PageTable, index: usize, user: bool) {
	unsafe {
		if (*table).entries[index] & PageTableEntryFlags::PRESENT.bits() == 0 {
			let frame =
				physicalmem::allocate_physical(BasePageSize::SIZE as usize, BasePageSize::SIZE as usize)
					.expect("out of physical memory while growing page tables");
			let mut flags = PageTableEntryFlags::empty();
			flags.normal().writable();
			if user {
				flags.user();
			}
			(*table).entries[index] = frame.as_u64() as usize | flags.bits();
		} else if user {
			(*table).entries[index] |= PageTableEntryFlags::USER_ACCESSIBLE.bits();
		}
	}
}

/// Maps `count` consecutive pages of size `S` starting at `virtual_address` to `physical_address`.
pub fn map<S: PageSize>(
	virtual_address: VirtAddr,
	physical_address: PhysAddr,
	count: usize,
	flags: PageTableEntryFlags,
) {
	let user = flags.contains(PageTableEntryFlags::USER_ACCESSIBLE);

	for i in 0..count {
		let vaddr = virtual_address + i as u64 * S::SIZE;
		let paddr = physical_address + i as u64 * S::SIZE;

		// Walk/create PML4 -> PDPT -> PD, stopping one level above the leaf for S.
		for level in (S::MAP_LEVEL + 1..3).rev() {
			let table = table_address(level + 1, vaddr);
			let index = (vaddr.as_u64() as usize >> (12 + 9 * (level + 1))) & 0x1FF;
			ensure_next_level(table, index, user);
		}

		let leaf_table = table_address(S::MAP_LEVEL, vaddr);
		let leaf_index = (vaddr.as_u64() as usize >> (12 + 9 * S::MAP_LEVEL)) & 0x1FF;
		let mut entry_flags = flags;
		entry_flags.insert(PageTableEntryFlags::PRESENT);
		if S::MAP_LEVEL > 0 {
			entry_flags.insert(PageTableEntryFlags::from_bits_truncate(S::HUGE_PAGE_BIT));
		}
		unsafe {
			(*leaf_table).entries[leaf_index] = paddr.as_u64() as usize | entry_flags.bits();
		}
		tlb::flush(x86_64::VirtAddr::new(vaddr.as_u64()));
	}
}

/// Removes `count` mappings of size `S` starting at `virtual_address`. Does not free page tables.
pub fn unmap<S: PageSize>(virtual_address: VirtAddr, count: usize) {
	for i in 0..count {
		let vaddr = virtual_address + i as u64 * S::SIZE;
		let leaf_table = table_address(S::MAP_LEVEL, vaddr);
		let leaf_index = (vaddr.as_u64() as usize >> (12 + 9 * S::MAP_LEVEL)) & 0x1FF;
		unsafe {
			(*leaf_table).entries[leaf_index] = 0;
		}
		tlb::flush(x86_64::VirtAddr::new(vaddr.as_u64()));
	}
}

/// Invalidates the TLB entry for a single page on this CPU. Used by cross-CPU TLB shootdown
/// recipients (see `mm::tlb`).
pub fn invalidate_tlb_page(virtual_address: VirtAddr) {
	tlb::flush(x86_64::VirtAddr::new(virtual_address.as_u64()));
}

/// Identity-maps a single physical frame of size `S`.
pub fn identity_map<S: PageSize>(physical_address: PhysAddr) {
	let mut flags = PageTableEntryFlags::empty();
	flags.normal().writable().execute_disable();
	map::<S>(
		VirtAddr::new(physical_address.as_u64()),
		physical_address,
		1,
		flags,
	);
}

pub fn get_application_page_size() -> usize {
	BasePageSize::SIZE as usize
}

/// Current page-table root physical address (read e.g. by the TLB-flush IPI handler, which
/// simply reloads `cr3` with its current value to flush non-global entries).
pub fn current_page_table_root() -> PhysAddr {
	PhysAddr::new(Cr3::read().0.start_address().as_u64())
}

/// Switches to a different top-level page table (used when entering a process address space).
///
/// # Safety
/// `root` must point at a valid, fully populated PML4 whose kernel-half entries match the
/// running kernel's expectations.
pub unsafe fn set_page_table_root(root: PhysAddr) {
	let frame = PhysFrame::containing_address(x86_64::PhysAddr::new(root.as_u64()));
	unsafe {
		Cr3::write(frame, Cr3Flags::empty());
	}
}

pub fn init() {}

pub fn init_page_tables() {
	let _ = ptr::null::<PageTable>();
}

/// Allocates a fresh top-level page table for a new address space (`mm::addrspace::AddressSpace`):
/// the kernel half (entries 256..512) is copied verbatim from the currently active PML4 so every
/// address space shares one view of kernel memory, except the recursive self-map slot, which is
/// rewritten to point at the new table itself; the user half starts empty.
pub fn new_address_space() -> PhysAddr {
	let frame = physicalmem::allocate_physical(BasePageSize::SIZE as usize, BasePageSize::SIZE as usize)
		.expect("out of physical memory while creating an address space");
	let current = table_address(3, VirtAddr::new(0));
	let new_table = frame.as_u64() as *mut PageTable;

	unsafe {
		ptr::write_bytes(new_table.cast::<u8>(), 0, BasePageSize::SIZE as usize);
		for i in 256..PAGE_MAP_ENTRIES {
			if i as u64 != RECURSIVE_INDEX {
				(*new_table).entries[i] = (*current).entries[i];
			}
		}

		let mut flags = PageTableEntryFlags::empty();
		flags.normal().writable();
		(*new_table).entries[RECURSIVE_INDEX as usize] = frame.as_u64() as usize | flags.bits();
	}

	frame
}

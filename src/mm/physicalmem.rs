//! Physical frame allocator.
//!
//! Grounded on the teacher's `physicalmem.rs`: a `free_list::FreeList` tracks free physical
//! frames, seeded once at boot from the range the bootloader reported as usable RAM. This
//! crate drops the teacher's FDT-based multi-architecture detection (aarch64/riscv64 only)
//! and UEFI `DeviceAlloc` phys-offset remapping, since x86-64 BIOS/multiboot boot always
//! identity-maps physical memory.

use alloc::alloc::AllocError;
use core::sync::atomic::{AtomicUsize, Ordering};

use align_address::Align;
use free_list::{FreeList, PageLayout, PageRange};
use hermit_sync::InterruptTicketMutex;
use memory_addresses::PhysAddr;

use crate::arch::mm::paging::{self, LargePageSize, PageSize};

const FREE_LIST_INLINE_SIZE: usize = 16;

static PHYSICAL_FREE_LIST: InterruptTicketMutex<FreeList<FREE_LIST_INLINE_SIZE>> =
	InterruptTicketMutex::new(FreeList::new());
pub static TOTAL_MEMORY: AtomicUsize = AtomicUsize::new(0);

pub fn total_memory_size() -> usize {
	TOTAL_MEMORY.load(Ordering::Relaxed)
}

/// Allocate physical memory.
pub fn allocate_physical(size: usize, align: usize) -> Result<PhysAddr, AllocError> {
	let page_range = PHYSICAL_FREE_LIST
		.lock()
		.allocate(PageLayout::from_size_align(size, align).unwrap())
		.map_err(|_| AllocError)?;
	Ok(PhysAddr::new(page_range.start() as u64))
}

/// Deallocate memory previously allocated with [allocate_physical].
pub unsafe fn deallocate_physical(addr: PhysAddr, size: usize) {
	unsafe {
		PHYSICAL_FREE_LIST
			.lock()
			.deallocate(PageRange::new(addr.as_u64() as usize, size).unwrap())
			.unwrap();
	};
}

pub fn print_physical_free_list() {
	info!("Physical memory free list:\n{}", PHYSICAL_FREE_LIST.lock());
}

/// Hands a range of usable physical memory to the free list and identity-maps it with large
/// pages, so the kernel can always dereference a `PhysAddr` directly during early boot.
unsafe fn init_frame_range(frame_range: PageRange) {
	unsafe {
		PHYSICAL_FREE_LIST.lock().deallocate(frame_range).unwrap();
	}

	(frame_range.start()..frame_range.end())
		.step_by(LargePageSize::SIZE as usize)
		.map(|addr| PhysAddr::new(addr.try_into().unwrap()))
		.for_each(paging::identity_map::<LargePageSize>);

	debug!(
		"claimed physical memory: {:#x}..{:#x}",
		frame_range.start(),
		frame_range.end()
	);
	TOTAL_MEMORY.fetch_add(frame_range.len().get(), Ordering::Relaxed);
}

pub fn init() {
	let start = crate::arch::x86_64::kernel::get_ram_address()
		.as_u64()
		.align_up(LargePageSize::SIZE);
	let end = (crate::arch::x86_64::kernel::get_limit() as u64).align_down(LargePageSize::SIZE);

	let frame_range =
		PageRange::new(start as usize, end as usize).expect("bootloader reported no usable RAM");

	unsafe {
		init_frame_range(frame_range);
	}
}

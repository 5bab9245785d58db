//! Virtual memory management: physical/virtual frame allocators, the kernel heap, VMOs, address
//! spaces and regions, and the block buffer cache.
//!
//! Grounded on the teacher's `mm/mod.rs` (kernel image bounds, `allocate`/`deallocate` wrapping
//! the physical+virtual allocators and `arch::mm::paging`), adapted onto the `BootInfo`-based
//! `kernel::get_base_address`/`get_image_size` this crate already uses instead of a linker
//! symbol, and onto `talc` for the global heap (see [`GrowHeapOnOom`]) instead of the teacher's
//! `good_memory_allocator`-backed bump allocator, since `talc` is already this crate's declared
//! dependency and the teacher's own `drivers/balloon/oom.rs` shows the matching `OomHandler`
//! idiom.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use align_address::Align;
use hermit_sync::InterruptTicketMutex;
use memory_addresses::VirtAddr;
use talc::{OomHandler, Span, Talc};

use crate::arch::mm::paging::{self, BasePageSize, LargePageSize, PageSize, PageTableEntryFlags, PageTableEntryFlagsExt};

pub mod addrspace;
pub mod buffer_cache;
pub mod device_alloc;
pub mod phys_page;
pub mod physicalmem;
pub mod region;
pub mod virtualmem;
pub mod vmo;

/// Physical and virtual address of the first 2 MiB page that maps the kernel image.
static mut KERNEL_START_ADDRESS: usize = 0;
/// Physical and virtual address of the first page after the kernel image.
static mut KERNEL_END_ADDRESS: usize = 0;

pub fn kernel_start_address() -> usize {
	unsafe { ptr::addr_of!(KERNEL_START_ADDRESS).read() }
}

pub fn kernel_end_address() -> usize {
	unsafe { ptr::addr_of!(KERNEL_END_ADDRESS).read() }
}

/// Grows the kernel heap by mapping a fresh run of pages rather than reserving a fixed arena
/// upfront: the first allocation always misses, which hands control to this handler before any
/// heap memory exists at all (spec.md's ambient allocator concern). Grounded on the teacher's
/// `drivers/balloon/oom.rs` `DeflateBalloonOnOom`, swapping "reclaim from the balloon" for "map
/// more pages" as the recovery strategy.
struct GrowHeapOnOom;

impl OomHandler for GrowHeapOnOom {
	fn handle_oom(talc: &mut Talc<Self>, layout: Layout) -> Result<(), ()> {
		let requested = layout.size() + layout.align();
		let size = requested
			.next_multiple_of(BasePageSize::SIZE as usize)
			.max(BasePageSize::SIZE as usize * 16);

		let virtual_address = virtualmem::allocate(size).map_err(|_| ())?;
		let physical_address =
			physicalmem::allocate_physical(size, BasePageSize::SIZE as usize).map_err(|_| ())?;

		let mut flags = PageTableEntryFlags::empty();
		flags.normal().writable();
		paging::map::<BasePageSize>(
			virtual_address,
			physical_address,
			size / BasePageSize::SIZE as usize,
			flags,
		);

		let span = Span::from_base_size(virtual_address.as_u64() as *mut u8, size);
		unsafe { talc.claim(span) }.map(|_| ()).map_err(|_| ())
	}
}

/// Wraps [`Talc`] behind the same `InterruptTicketMutex`-guarded [`GlobalAlloc`] shape the
/// teacher's `mm::allocator::LockedAllocator` uses, so allocation never races an interrupt
/// handler that itself allocates.
pub struct LockedAllocator(InterruptTicketMutex<Talc<GrowHeapOnOom>>);

impl LockedAllocator {
	const fn new() -> Self {
		Self(InterruptTicketMutex::new(Talc::new(GrowHeapOnOom)))
	}
}

unsafe impl GlobalAlloc for LockedAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		unsafe {
			self.0
				.lock()
				.malloc(layout)
				.map_or(ptr::null_mut(), NonNull::as_ptr)
		}
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		unsafe {
			self.0.lock().free(NonNull::new_unchecked(ptr), layout);
		}
	}

	unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
		let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
			return ptr::null_mut();
		};

		unsafe {
			let old = NonNull::new_unchecked(ptr);
			if new_size > layout.size() {
				self.0
					.lock()
					.grow(old, layout, new_layout)
					.map_or(ptr::null_mut(), NonNull::as_ptr)
			} else {
				self.0.lock().shrink(old, layout, new_layout);
				ptr
			}
		}
	}
}

#[global_allocator]
pub static ALLOCATOR: LockedAllocator = LockedAllocator::new();

pub fn init() {
	unsafe {
		KERNEL_START_ADDRESS = crate::arch::x86_64::kernel::get_base_address()
			.as_u64()
			.align_down(LargePageSize::SIZE) as usize;
		KERNEL_END_ADDRESS = (crate::arch::x86_64::kernel::get_base_address().as_u64()
			+ crate::arch::x86_64::kernel::get_image_size() as u64)
			.align_up(LargePageSize::SIZE) as usize;
	}

	paging::init();
	paging::init_page_tables();

	physicalmem::init();
	virtualmem::init();

	addrspace::init_kernel_address_space();
}

pub fn print_information() {
	physicalmem::print_physical_free_list();
}

/// Maps `sz` bytes of fresh physical memory at a newly reserved virtual range (spec.md's ambient
/// allocator concern; used by `gdt::add_current_core` for per-core kernel/IST stacks and by
/// [`device_alloc::DeviceAlloc`] for device-visible buffers).
pub fn allocate(sz: usize, execute_disable: bool) -> VirtAddr {
	let size = (sz as u64).align_up(BasePageSize::SIZE) as usize;

	let physical_address = physicalmem::allocate_physical(size, BasePageSize::SIZE as usize)
		.expect("out of physical memory");
	let virtual_address = virtualmem::allocate(size).expect("out of kernel virtual address space");

	let count = size / BasePageSize::SIZE as usize;
	let mut flags = PageTableEntryFlags::empty();
	flags.normal().writable();
	if execute_disable {
		flags.execute_disable();
	}
	paging::map::<BasePageSize>(virtual_address, physical_address, count, flags);

	virtual_address
}

pub fn deallocate(virtual_address: VirtAddr, sz: usize) {
	let size = (sz as u64).align_up(BasePageSize::SIZE) as usize;

	if let Some(entry) = paging::get_page_table_entry::<BasePageSize>(virtual_address) {
		paging::unmap::<BasePageSize>(virtual_address, size / BasePageSize::SIZE as usize);
		virtualmem::deallocate(virtual_address, size);
		unsafe {
			physicalmem::deallocate_physical(entry.address(), size);
		}
	} else {
		panic!("no page table entry for virtual address {virtual_address:p}");
	}
}

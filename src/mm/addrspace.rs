//! Per-process (and the one kernel) address space: region tree, first-fit allocation, ASLR,
//! mmap/munmap/mprotect/brk/fork, fault handling, and cross-CPU TLB shootdown.
//!
//! Grounded on spec.md §§3-4.5 and §A.5/§A.6's restored detail
//! (`original_source/kernel/kernel/mm/vm.c`'s `vm_mprotect_in_region`,
//! `find_forked_private_vmo`/`fork_vm_region`). The region tree uses the same
//! `InterruptTicketMutex<BTreeMap<..>>` pattern as `IRQ_NAMES`/`vmo::Vmo`'s page index rather
//! than a hand-rolled red-black tree, since `BTreeMap` already gives ordered, disjoint-interval
//! lookup by base address (`range`/`find_le`-style queries via `.range(..=addr).next_back()`).
//!
//! This crate's recursive self-mapped PML4 (`arch::mm::paging`) only exposes one page table at
//! a time through the fixed recursive window; mutating a non-active [`AddressSpace`] therefore
//! briefly switches `cr3` to it and restores the previous root afterwards ([`AddressSpace::with_active`]).
//! A production SMP kernel would instead give every core its own recursive slot or walk tables by
//! physical address; this simplification is recorded in `DESIGN.md`.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use hermit_sync::{InterruptTicketMutex, OnceCell};
use memory_addresses::{PhysAddr, VirtAddr};

use crate::arch::mm::paging::{self, BasePageSize, PageSize, PageTableEntryFlags, PageTableEntryFlagsExt};
use crate::arch::x86_64::kernel::{apic, irq, processor};
use crate::config::{HEAP_ASLR_BITS, VMALLOC_ASLR_BITS};
use crate::errno::{Errno, FaultKind};
use crate::mm::phys_page::PhysPage;
use crate::mm::region::{FileHandle, MappingType, Prot, RegionFlags, RegionType, VmRegion};
use crate::mm::vmo::Vmo;
use crate::scheduler::CoreId;

/// Mirrors `mmap`'s flag argument (spec.md §6).
bitflags::bitflags! {
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub struct MmapFlags: u32 {
		const PRIVATE = 1 << 0;
		const SHARED = 1 << 1;
		const FIXED = 1 << 2;
		const ANONYMOUS = 1 << 3;
	}
}

/// A page-aligned byte length, verified non-zero at the call boundary.
fn page_count(length: u64) -> Result<usize, Errno> {
	if length == 0 {
		return Err(Errno::Inval);
	}
	Ok(length.div_ceil(BasePageSize::SIZE) as usize)
}

fn is_page_aligned(addr: VirtAddr) -> bool {
	addr.as_u64() % BasePageSize::SIZE == 0
}

static ASLR_ENABLED: OnceCell<core::sync::atomic::AtomicBool> = OnceCell::new();

fn aslr_enabled() -> bool {
	ASLR_ENABLED
		.get_or_init(|| core::sync::atomic::AtomicBool::new(crate::env::aslr_enabled()))
		.load(Ordering::Relaxed)
}

/// Backs the `/sys/vm_aslr` sysfs knob (spec.md §6): toggles ASLR for address spaces created
/// from this point on.
pub fn set_aslr_enabled(enabled: bool) {
	ASLR_ENABLED
		.get_or_init(|| core::sync::atomic::AtomicBool::new(crate::env::aslr_enabled()))
		.store(enabled, Ordering::Relaxed);
}

/// `arc4random() << 12` masked to `bits`, per spec.md §4.4. Falls back to zero (no
/// randomization) if the platform RNG is unavailable yet.
fn random_page_aligned_offset(bits: u32) -> u64 {
	if !aslr_enabled() {
		return 0;
	}
	let raw = processor::seed_entropy()
		.map(|buf| u64::from_ne_bytes(buf[0..8].try_into().unwrap()))
		.unwrap_or(0);
	let mask = (1u64 << bits) - 1;
	(raw & mask) << 12
}

/// One mapped, non-overlapping interval inside `[start, end]`, keyed by `base`.
type RegionMap = BTreeMap<VirtAddr, VmRegion>;

pub struct AddressSpace {
	page_table_root: PhysAddr,
	start: VirtAddr,
	end: VirtAddr,
	regions: InterruptTicketMutex<RegionMap>,
	mmap_base: AtomicU64,
	brk: AtomicU64,
	brk_base: VirtAddr,
	private_vmos: InterruptTicketMutex<Vec<Vmo>>,
	/// Bitmap of cores whose current thread runs in this address space (spec.md §4.5: "every
	/// other CPU whose current thread belongs to the same process"). Simplified to a 64-core
	/// bitmap rather than a full per-core current-thread pointer, since this crate does not own
	/// the thread/process abstraction.
	active_cores: core::sync::atomic::AtomicU64,
}

pub struct MemStat {
	pub region_count: usize,
	pub mapped_pages: u64,
}

impl AddressSpace {
	/// Creates a user address space covering `[start, end]`, with a fresh top-level page table
	/// whose kernel half matches the currently active one (`paging::new_address_space`).
	pub fn new(start: VirtAddr, end: VirtAddr) -> Self {
		let page_table_root = paging::new_address_space();
		let mmap_base = end.as_u64() / 2 - random_page_aligned_offset(VMALLOC_ASLR_BITS);
		let brk_base = VirtAddr::new(start.as_u64() + 0x1000_0000);

		Self {
			page_table_root,
			start,
			end,
			regions: InterruptTicketMutex::new(BTreeMap::new()),
			mmap_base: AtomicU64::new(mmap_base),
			brk: AtomicU64::new(brk_base.as_u64() + random_page_aligned_offset(HEAP_ASLR_BITS)),
			brk_base,
			private_vmos: InterruptTicketMutex::new(Vec::new()),
			active_cores: core::sync::atomic::AtomicU64::new(0),
		}
	}

	pub fn mark_active_on(&self, core: CoreId) {
		self.active_cores.fetch_or(1 << (core % 64), Ordering::AcqRel);
	}

	pub fn mark_inactive_on(&self, core: CoreId) {
		self.active_cores
			.fetch_and(!(1 << (core % 64)), Ordering::AcqRel);
	}

	/// Runs `f` with this address space's page table active, restoring the caller's previous
	/// root afterwards if it had to switch (see module doc).
	fn with_active<T>(&self, f: impl FnOnce() -> T) -> T {
		let previous = paging::current_page_table_root();
		let switched = previous != self.page_table_root;
		if switched {
			unsafe {
				paging::set_page_table_root(self.page_table_root);
			}
		}
		let result = f();
		if switched {
			unsafe {
				paging::set_page_table_root(previous);
			}
		}
		result
	}

	fn region_flags(prot: Prot) -> PageTableEntryFlags {
		let mut flags = PageTableEntryFlags::empty();
		flags.normal();
		if prot.contains(Prot::WRITE) {
			flags.writable();
		}
		if prot.contains(Prot::USER) {
			flags.user();
		}
		if prot.contains(Prot::NOEXEC) {
			flags.execute_disable();
		}
		flags
	}

	/// First-fit walk for a free `[min, min + size)` gap (spec.md §4.4 "Allocate-free region"):
	/// walks in-order from the first region with `base >= min`, accepting the first gap wide
	/// enough; falls back to placing the region right after the last-seen end.
	fn find_free_region(&self, regions: &RegionMap, min: VirtAddr, size: u64) -> Result<VirtAddr, Errno> {
		let mut last_end = min;
		for (&base, region) in regions.range(min..) {
			if base > last_end && base.as_u64() - last_end.as_u64() >= size {
				return Ok(last_end);
			}
			last_end = last_end.max(region.end());
		}

		if last_end.as_u64() + size > self.end.as_u64() {
			return Err(Errno::NoMem);
		}
		Ok(last_end)
	}

	/// Inserts a region into the tree. Does **not** touch the VMO's mapping refcount — callers
	/// decide whether the insert represents a brand-new mapping (`add_mapping` first) or a
	/// reshaped existing one (prefix/suffix shrink keeps the same logical mapping).
	fn insert_region(&self, regions: &mut RegionMap, region: VmRegion) {
		regions.insert(region.base, region);
	}

	/// `mmap(addr, length, prot, flags, fd, off)` (spec.md §4.4, §6).
	#[allow(clippy::too_many_arguments)]
	pub fn mmap(
		&self,
		addr: Option<VirtAddr>,
		length: u64,
		prot: Prot,
		flags: MmapFlags,
		file: Option<(FileHandle, Arc<crate::mm::vmo::CommitFn>, bool)>,
		offset: u64,
	) -> Result<VirtAddr, Errno> {
		let private = flags.contains(MmapFlags::PRIVATE);
		let shared = flags.contains(MmapFlags::SHARED);
		if private == shared {
			return Err(Errno::Inval);
		}
		if offset % BasePageSize::SIZE != 0 {
			return Err(Errno::Inval);
		}
		let pages = page_count(length)?;
		let fixed = flags.contains(MmapFlags::FIXED);

		if fixed {
			let base = addr.ok_or(Errno::Inval)?;
			if !is_page_aligned(base) {
				return Err(Errno::Inval);
			}
			self.munmap(base, pages as u64 * BasePageSize::SIZE)?;
		}

		let mut regions = self.regions.lock();
		let base = if fixed {
			addr.unwrap()
		} else {
			let hint = addr.unwrap_or_else(|| VirtAddr::new(self.mmap_base.load(Ordering::Relaxed)));
			self.find_free_region(&regions, hint, pages as u64 * BasePageSize::SIZE)?
		};

		let (vmo, region_type, file_handle, region_flags) = match (flags.contains(MmapFlags::ANONYMOUS), file)
		{
			(true, _) => (
				Vmo::new_anonymous(pages as u64 * BasePageSize::SIZE),
				RegionType::Regular,
				None,
				RegionFlags::empty(),
			),
			(false, Some((handle, commit, file_shared))) => {
				let vmo_shared = shared && file_shared;
				let vmo = Vmo::new_file_backed(
					pages as u64 * BasePageSize::SIZE,
					commit,
					vmo_shared,
				);
				let region_flags = if !shared && vmo_shared {
					RegionFlags::USING_MAP_SHARED_OPT
				} else {
					RegionFlags::empty()
				};
				(vmo, RegionType::FileBacked, Some(handle), region_flags)
			}
			(false, None) => return Err(Errno::BadFd),
		};

		vmo.add_mapping();
		if !shared {
			self.private_vmos.lock().push(vmo.clone());
		}

		let region = VmRegion {
			base,
			pages,
			prot,
			region_type,
			mapping_type: if shared { MappingType::Shared } else { MappingType::Private },
			offset,
			vmo,
			flags: region_flags,
			file: file_handle,
		};

		self.insert_region(&mut regions, region);
		if !fixed {
			self.mmap_base.store(base.as_u64() + pages as u64 * BasePageSize::SIZE, Ordering::Relaxed);
		}
		Ok(base)
	}

	/// `munmap(addr, length)` (spec.md §4.4).
	pub fn munmap(&self, addr: VirtAddr, length: u64) -> Result<(), Errno> {
		if !is_page_aligned(addr) || length == 0 {
			return Err(Errno::Inval);
		}
		let end = addr + length;
		let mut regions = self.regions.lock();

		let overlapping: Vec<VirtAddr> = regions
			.iter()
			.filter(|(_, r)| r.intersects(addr, end))
			.map(|(&base, _)| base)
			.collect();

		for base in overlapping {
			let region = regions.remove(&base).unwrap();
			let r_start = region.base;
			let r_end = region.end();

			self.with_active(|| {
				paging::unmap::<BasePageSize>(r_start.max(addr), {
					let clipped_start = r_start.max(addr).as_u64();
					let clipped_end = r_end.min(end).as_u64();
					((clipped_end - clipped_start) / BasePageSize::SIZE) as usize
				});
			});
			apic::ipi_tlb_flush(r_start.max(addr), {
				let clipped_start = r_start.max(addr).as_u64();
				let clipped_end = r_end.min(end).as_u64();
				((clipped_end - clipped_start) / BasePageSize::SIZE) as usize
			});

			if addr <= r_start && end >= r_end {
				// Fully covered: drop the region entirely.
				if region.vmo.remove_mapping() == 0 {
					drop(region.vmo);
				}
				continue;
			}

			if addr <= r_start {
				// Prefix removed: shrink from the front.
				let shave_off = end.as_u64() - r_start.as_u64();
				let mut region = region;
				region.base = end;
				region.pages -= (shave_off / BasePageSize::SIZE) as usize;
				region.offset += shave_off;
				if matches!(region.mapping_type, MappingType::Private) {
					region.vmo.truncate_beginning_and_resize(shave_off);
					region.offset -= shave_off;
				}
				self.insert_region(&mut regions, region);
				continue;
			}

			if end >= r_end {
				// Suffix removed: shrink from the back.
				let mut region = region;
				let new_pages = (addr.as_u64() - r_start.as_u64()) / BasePageSize::SIZE;
				region.pages = new_pages as usize;
				region.vmo.resize(region.offset + new_pages * BasePageSize::SIZE);
				self.insert_region(&mut regions, region);
				continue;
			}

			// Interior hole: split the region (and its VMO) in two. The left half keeps using
			// the original VMO and its existing mapping; the right half gets a fresh VMO with
			// its own mapping.
			let gap = end.as_u64() - addr.as_u64();
			let left_pages = (addr.as_u64() - r_start.as_u64()) / BasePageSize::SIZE;
			let right_vmo = region.vmo.split(region.offset + left_pages * BasePageSize::SIZE, gap);
			right_vmo.add_mapping();
			if matches!(region.mapping_type, MappingType::Private) {
				self.private_vmos.lock().push(right_vmo.clone());
			}

			let left = VmRegion {
				base: r_start,
				pages: left_pages as usize,
				..region.clone()
			};
			let right = VmRegion {
				base: end,
				pages: ((r_end.as_u64() - end.as_u64()) / BasePageSize::SIZE) as usize,
				offset: 0,
				vmo: right_vmo,
				..region
			};

			self.insert_region(&mut regions, left);
			self.insert_region(&mut regions, right);
		}

		Ok(())
	}

	/// `mprotect(addr, len, prot)` (spec.md §4.4): splits each intersecting region into up to
	/// three independent pieces (left/middle/right), rewriting PTEs only for the middle range
	/// (restored `vm_mprotect_in_region` detail, spec.md §A.5).
	pub fn mprotect(&self, addr: VirtAddr, length: u64, prot: Prot) -> Result<(), Errno> {
		if !is_page_aligned(addr) || length == 0 {
			return Err(Errno::Inval);
		}
		let end = addr + length;
		let mut regions = self.regions.lock();

		let overlapping: Vec<VirtAddr> = regions
			.iter()
			.filter(|(_, r)| r.intersects(addr, end))
			.map(|(&base, _)| base)
			.collect();

		for base in overlapping {
			let mut region = regions.remove(&base).unwrap();
			let r_start = region.base;
			let r_end = region.end();

			if region.flags.contains(RegionFlags::USING_MAP_SHARED_OPT) && prot.contains(Prot::WRITE) {
				// Shared->private conversion on first write (spec.md §A.6 Open Question 1).
				let private = region.vmo.convert_to_private_copy()?;
				region.vmo.remove_mapping();
				region.vmo = private;
				region.vmo.add_mapping();
				region.flags.remove(RegionFlags::USING_MAP_SHARED_OPT);
			}

			let clip_start = r_start.max(addr);
			let clip_end = r_end.min(end);

			if clip_start > r_start {
				let left_pages = (clip_start.as_u64() - r_start.as_u64()) / BasePageSize::SIZE;
				region.vmo.add_mapping();
				let left = VmRegion {
					base: r_start,
					pages: left_pages as usize,
					..region.clone()
				};
				self.insert_region(&mut regions, left);
			}

			if clip_end < r_end {
				let right_pages = (r_end.as_u64() - clip_end.as_u64()) / BasePageSize::SIZE;
				let right_offset = region.offset + (clip_end.as_u64() - r_start.as_u64());
				region.vmo.add_mapping();
				let right = VmRegion {
					base: clip_end,
					pages: right_pages as usize,
					offset: right_offset,
					..region.clone()
				};
				self.insert_region(&mut regions, right);
			}

			let middle_pages = (clip_end.as_u64() - clip_start.as_u64()) / BasePageSize::SIZE;
			let middle_offset = region.offset + (clip_start.as_u64() - r_start.as_u64());
			let middle = VmRegion {
				base: clip_start,
				pages: middle_pages as usize,
				offset: middle_offset,
				prot,
				..region
			};

			self.with_active(|| {
				for i in 0..middle.pages {
					let vaddr = middle.base + i as u64 * BasePageSize::SIZE;
					if let Some(entry) = paging::get_page_table_entry::<BasePageSize>(vaddr) {
						paging::map::<BasePageSize>(vaddr, entry.address(), 1, Self::region_flags(prot));
					}
				}
			});
			apic::ipi_tlb_flush(middle.base, middle.pages);

			self.insert_region(&mut regions, middle);
		}

		Ok(())
	}

	/// `brk(new_brk)` (spec.md §6): returns the (possibly unchanged) break. `new_brk == None`
	/// just queries the current value.
	pub fn brk(&self, new_brk: Option<VirtAddr>) -> Result<VirtAddr, Errno> {
		let Some(target) = new_brk else {
			return Ok(VirtAddr::new(self.brk.load(Ordering::Relaxed)));
		};

		let current = self.brk.load(Ordering::Relaxed);
		if target.as_u64() < self.brk_base.as_u64() {
			return Err(Errno::Inval);
		}

		if target.as_u64() > current {
			let length = target.as_u64() - current;
			self.mmap(
				Some(VirtAddr::new(current)),
				length,
				Prot::WRITE | Prot::USER,
				MmapFlags::PRIVATE | MmapFlags::ANONYMOUS | MmapFlags::FIXED,
				None,
				0,
			)?;
		} else if target.as_u64() < current {
			self.munmap(target, current - target.as_u64())?;
		}

		self.brk.store(target.as_u64(), Ordering::Relaxed);
		Ok(target)
	}

	/// Page-fault entry point (spec.md §4.4 "Fault handling"), called from
	/// `interrupts::page_fault_handler`.
	pub fn handle_page_fault(
		&self,
		addr: VirtAddr,
		write: bool,
		user: bool,
		exec: bool,
		_present: bool,
	) -> Result<(), FaultKind> {
		let page = VirtAddr::new(addr.as_u64() & !(BasePageSize::SIZE - 1));

		let region = {
			let regions = self.regions.lock();
			regions
				.range(..=page)
				.next_back()
				.map(|(_, r)| r.clone())
				.filter(|r| r.contains(page))
				.ok_or(FaultKind::Unmapped)?
		};

		if write && !region.prot.contains(Prot::WRITE) {
			return Err(FaultKind::ProtectionViolation);
		}
		if user && !region.prot.contains(Prot::USER) {
			return Err(FaultKind::ProtectionViolation);
		}
		if exec && region.prot.contains(Prot::NOEXEC) {
			return Err(FaultKind::ProtectionViolation);
		}

		// Allocation (VMO commit) may block on the physical allocator or a VFS read; don't hold
		// the rest of the system off interrupts for that (spec.md §5).
		irq::enable();

		let vmo_offset = region.vmo_offset_for(page);
		let mut phys_page = region
			.vmo
			.get(vmo_offset, true)
			.map_err(|_| FaultKind::CommitFailed)?;

		if write && region.flags.contains(RegionFlags::COW) && phys_page.refcount() > 1 {
			// Still shared with a fork sibling: copy before handing out a writable mapping.
			let copy = PhysPage::alloc_zeroed(vmo_offset).map_err(|_| FaultKind::CommitFailed)?;
			unsafe {
				core::ptr::copy_nonoverlapping(
					phys_page.physical_address().as_u64() as *const u8,
					copy.physical_address().as_u64() as *mut u8,
					BasePageSize::SIZE as usize,
				);
			}
			region.vmo.insert(vmo_offset, copy.clone());
			phys_page = copy;
		}

		self.with_active(|| {
			paging::map::<BasePageSize>(page, phys_page.physical_address(), 1, Self::region_flags(region.prot));
		});

		Ok(())
	}

	/// Clones the page tables (COW-marking user-writable pages read-only in the parent),
	/// duplicates every private VMO into the child, and rewrites each region's VMO reference to
	/// the matching fork in the child (spec.md §4.4, restored `vm_fork_private_vmos` detail).
	pub fn fork(&self) -> Self {
		let child = AddressSpace::new(self.start, self.end);

		let mut parent_regions = self.regions.lock();
		let parent_private = self.private_vmos.lock();

		// Duplicate every private VMO first so the region walk below can resolve
		// `forked_from` correspondences (spec.md §4.3 `find_forked_private_vmo`).
		let mut child_private = Vec::with_capacity(parent_private.len());
		for vmo in parent_private.iter() {
			child_private.push(vmo.fork());
		}

		let mut child_regions = child.regions.lock();
		for region in parent_regions.values_mut() {
			let is_private = matches!(region.mapping_type, MappingType::Private);
			let child_vmo = match region.mapping_type {
				MappingType::Shared => region.vmo.clone(),
				MappingType::Private => parent_private
					.iter()
					.position(|v| v.identity_ptr() == region.vmo.identity_ptr())
					.and_then(|i| child_private.get(i).cloned())
					.unwrap_or_else(|| region.vmo.clone()),
			};

			if is_private {
				// Mark both sides copy-on-write: the parent's writable pages are downgraded to
				// read-only here, and `handle_page_fault` duplicates on the first post-fork
				// write from either side once the underlying page is still shared.
				region.flags.insert(RegionFlags::COW);
				self.with_active(|| {
					for i in 0..region.pages {
						let vaddr = region.base + i as u64 * BasePageSize::SIZE;
						if let Some(entry) = paging::get_page_table_entry::<BasePageSize>(vaddr) {
							if entry.flags().contains(PageTableEntryFlags::WRITABLE) {
								let mut ro = entry.flags();
								ro.remove(PageTableEntryFlags::WRITABLE);
								paging::map::<BasePageSize>(vaddr, entry.address(), 1, ro);
							}
						}
					}
				});
			}

			child_vmo.add_mapping();
			child_regions.insert(region.base, VmRegion {
				vmo: child_vmo,
				..region.clone()
			});
		}

		drop(child_regions);
		drop(parent_regions);
		*child.private_vmos.lock() = child_private;
		child
	}

	pub fn memstat(&self) -> MemStat {
		let regions = self.regions.lock();
		let mapped_pages = regions.values().map(|r| r.pages as u64).sum();
		MemStat {
			region_count: regions.len(),
			mapped_pages,
		}
	}
}

/// Process-wide singleton: the kernel's own address space, installed once during boot
/// (design notes §9: "Global mutable state ... should be represented as process-wide
/// singletons with explicit init/teardown").
static KERNEL_ADDRESS_SPACE: OnceCell<AddressSpace> = OnceCell::new();

pub fn init_kernel_address_space() {
	let space = AddressSpace {
		page_table_root: paging::current_page_table_root(),
		start: VirtAddr::new(0xFFFF_8000_0000_0000),
		end: VirtAddr::new(0xFFFF_FFFF_FFFF_FFFF),
		regions: InterruptTicketMutex::new(BTreeMap::new()),
		mmap_base: AtomicU64::new(0xFFFF_8000_0000_0000),
		brk: AtomicU64::new(0),
		brk_base: VirtAddr::new(0),
		private_vmos: InterruptTicketMutex::new(Vec::new()),
		active_cores: core::sync::atomic::AtomicU64::new(0),
	};
	KERNEL_ADDRESS_SPACE.set(space).ok();
}

/// Routes a page fault to the kernel address space. A real multi-process build would instead
/// dispatch to the faulting thread's own `AddressSpace`; this crate does not own the
/// thread/process table, so the kernel space is the only one wired to the IDT for now.
pub fn handle_page_fault(
	addr: VirtAddr,
	write: bool,
	user: bool,
	exec: bool,
	present: bool,
) -> Result<(), FaultKind> {
	KERNEL_ADDRESS_SPACE
		.get()
		.ok_or(FaultKind::Unmapped)?
		.handle_page_fault(addr, write, user, exec, present)
}

/// The address space the `mman` syscalls operate against. Like [`handle_page_fault`], this is
/// the one installed space rather than a lookup keyed by the calling thread's process, since
/// this crate does not own a thread/process table.
pub fn current() -> &'static AddressSpace {
	KERNEL_ADDRESS_SPACE
		.get()
		.expect("address space not initialized")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn space() -> AddressSpace {
		// Tests run host-side (spec.md §A.4); they exercise the region-tree/flag logic only,
		// never `with_active`'s `cr3` switch, so `page_table_root` is a dummy value.
		AddressSpace {
			page_table_root: PhysAddr::new(0),
			start: VirtAddr::new(0x1000),
			end: VirtAddr::new(0x1_0000_0000),
			regions: InterruptTicketMutex::new(BTreeMap::new()),
			mmap_base: AtomicU64::new(0x2000_0000),
			brk: AtomicU64::new(0x3000_0000),
			brk_base: VirtAddr::new(0x3000_0000),
			private_vmos: InterruptTicketMutex::new(Vec::new()),
			active_cores: core::sync::atomic::AtomicU64::new(0),
		}
	}

	#[test]
	fn find_free_region_is_first_fit() {
		let s = space();
		let mut regions = s.regions.lock();
		regions.insert(
			VirtAddr::new(0x2000_0000),
			VmRegion {
				base: VirtAddr::new(0x2000_0000),
				pages: 4,
				prot: Prot::empty(),
				region_type: RegionType::Regular,
				mapping_type: MappingType::Private,
				offset: 0,
				vmo: Vmo::new_anonymous(4 * BasePageSize::SIZE),
				flags: RegionFlags::empty(),
				file: None,
			},
		);
		let found = s
			.find_free_region(&regions, VirtAddr::new(0x2000_0000), BasePageSize::SIZE)
			.unwrap();
		assert_eq!(found, VirtAddr::new(0x2000_0000 + 4 * BasePageSize::SIZE));
	}

	#[test]
	fn page_count_rejects_zero_length() {
		assert!(page_count(0).is_err());
	}

	#[test]
	fn page_count_rounds_up() {
		assert_eq!(page_count(1).unwrap(), 1);
		assert_eq!(page_count(BasePageSize::SIZE + 1).unwrap(), 2);
	}
}

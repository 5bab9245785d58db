//! `VMRegion`: one half-open virtual interval inside an address space, tied to a VMO slice.
//!
//! Grounded on spec.md §3 ("VMRegion") and §4.4; bitflag layout follows the teacher's
//! `PageTableEntryFlags` convention in `arch/x86_64/mm/paging.rs` (a `bitflags!` struct of
//! `usize`-valued bits rather than a hand-rolled `u32`).

use crate::arch::mm::paging::{BasePageSize, PageSize};
use crate::mm::vmo::Vmo;
use memory_addresses::VirtAddr;

bitflags::bitflags! {
	/// Permission bits a region grants; READ is implicit and not represented as a bit (spec.md
	/// §3: "rwx permission bits (READ implicit, WRITE, NOEXEC, USER)").
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub struct Prot: u32 {
		const WRITE = 1 << 0;
		const NOEXEC = 1 << 1;
		const USER = 1 << 2;
	}
}

bitflags::bitflags! {
	/// Region behavior flags (spec.md §3).
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub struct RegionFlags: u32 {
		/// A read-only shared page is duplicated on first write.
		const COW = 1 << 0;
		/// A read-only `MAP_PRIVATE` file mapping is still backed by the inode's shared page
		/// cache, pending the first write (spec.md §4.3 "Sharing optimization").
		const USING_MAP_SHARED_OPT = 1 << 1;
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionType {
	Regular,
	Stack,
	FileBacked,
	Heap,
	Shared,
	Module,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingType {
	Private,
	Shared,
}

/// A file description reference a file-backed region keeps alive for the duration of the
/// mapping. This crate does not own the file-descriptor table (spec.md §1 Non-goals: "user-mode
/// ABI details beyond those the VMM needs"); a caller supplies an opaque token it can resolve
/// back to its own VFS state.
pub type FileHandle = u64;

/// One mapped interval `[base, base + pages * PAGE_SIZE)` (spec.md §3). Exclusively owned by
/// its address space; holds a shared reference ([`Vmo`]) on its backing content.
#[derive(Clone)]
pub struct VmRegion {
	pub base: VirtAddr,
	pub pages: usize,
	pub prot: Prot,
	pub region_type: RegionType,
	pub mapping_type: MappingType,
	/// Byte offset into `vmo` where this region's content starts.
	pub offset: u64,
	pub vmo: Vmo,
	pub flags: RegionFlags,
	pub file: Option<FileHandle>,
}

impl VmRegion {
	pub fn end(&self) -> VirtAddr {
		self.base + (self.pages * BasePageSize::SIZE as usize) as u64
	}

	pub fn contains(&self, addr: VirtAddr) -> bool {
		addr >= self.base && addr < self.end()
	}

	pub fn intersects(&self, start: VirtAddr, end: VirtAddr) -> bool {
		self.base < end && start < self.end()
	}

	/// Offset into `vmo` that backs the page at `addr` (must be contained in this region).
	pub fn vmo_offset_for(&self, addr: VirtAddr) -> u64 {
		self.offset + (addr.as_u64() - self.base.as_u64())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn region(base: u64, pages: usize) -> VmRegion {
		VmRegion {
			base: VirtAddr::new(base),
			pages,
			prot: Prot::USER,
			region_type: RegionType::Regular,
			mapping_type: MappingType::Private,
			offset: 0,
			vmo: Vmo::new_anonymous((pages * BasePageSize::SIZE as usize) as u64),
			flags: RegionFlags::empty(),
			file: None,
		}
	}

	#[test]
	fn end_is_base_plus_pages() {
		let r = region(0x1000, 3);
		assert_eq!(r.end(), VirtAddr::new(0x1000 + 3 * BasePageSize::SIZE));
	}

	#[test]
	fn contains_is_half_open() {
		let r = region(0x1000, 2);
		assert!(r.contains(VirtAddr::new(0x1000)));
		assert!(r.contains(VirtAddr::new(0x1fff)));
		assert!(!r.contains(VirtAddr::new(0x1000 + 2 * BasePageSize::SIZE)));
	}

	#[test]
	fn intersects_detects_overlap_and_adjacency() {
		let r = region(0x1000, 2);
		let end = r.end();
		assert!(r.intersects(VirtAddr::new(0x1000), end));
		assert!(r.intersects(VirtAddr::new(0x1fff), VirtAddr::new(0x3000)));
		assert!(!r.intersects(end, VirtAddr::new(0x4000)));
		assert!(!r.intersects(VirtAddr::new(0), r.base));
	}

	#[test]
	fn vmo_offset_for_accounts_for_region_offset() {
		let mut r = region(0x2000, 2);
		r.offset = 0x1000;
		assert_eq!(r.vmo_offset_for(VirtAddr::new(0x2000)), 0x1000);
		assert_eq!(r.vmo_offset_for(VirtAddr::new(0x2500)), 0x1500);
	}
}

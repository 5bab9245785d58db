//! `mmap`/`munmap`/`mprotect`/`brk`/`memstat` syscall shims over `mm::addrspace`.
//!
//! Grounded on the teacher's `syscalls/mman.rs` (small `extern "C"` wrappers, one per syscall,
//! each converting a `Result` into a raw `i32`/`i64`), rewritten against `mm::addrspace`'s region
//! tree instead of the teacher's flat `MEMORY_REGIONS` linked list — which this crate's VMO/VMM
//! split already replaces with VMO commit-on-fault.

use core::ffi::c_int;

use bitflags::bitflags;
use memory_addresses::VirtAddr;

use crate::errno::Errno;
use crate::mm::addrspace::{self, MmapFlags};
use crate::mm::region::Prot;

bitflags! {
	#[repr(transparent)]
	#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
	pub struct MemoryProtection: u32 {
		const READ = 1 << 0;
		const WRITE = 1 << 1;
		const EXEC = 1 << 2;
	}
}

bitflags! {
	#[repr(transparent)]
	#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
	pub struct MemoryMapFlags: u32 {
		const PRIVATE = 1 << 0;
		const SHARED = 1 << 1;
		const FIXED = 1 << 2;
		const ANONYMOUS = 1 << 3;
	}
}

fn to_prot(flags: MemoryProtection) -> Prot {
	let mut prot = Prot::USER;
	if flags.contains(MemoryProtection::WRITE) {
		prot.insert(Prot::WRITE);
	}
	if !flags.contains(MemoryProtection::EXEC) {
		prot.insert(Prot::NOEXEC);
	}
	prot
}

fn to_mmap_flags(flags: MemoryMapFlags) -> MmapFlags {
	let mut out = MmapFlags::empty();
	if flags.contains(MemoryMapFlags::PRIVATE) {
		out.insert(MmapFlags::PRIVATE);
	}
	if flags.contains(MemoryMapFlags::SHARED) {
		out.insert(MmapFlags::SHARED);
	}
	if flags.contains(MemoryMapFlags::FIXED) {
		out.insert(MmapFlags::FIXED);
	}
	if flags.contains(MemoryMapFlags::ANONYMOUS) {
		out.insert(MmapFlags::ANONYMOUS);
	}
	out
}

/// Creates a new anonymous virtual memory mapping of `len` bytes with the given protection and
/// mapping flags. `addr` is a placement hint unless `flags` contains `FIXED`, in which case it
/// is mandatory. Returns the mapped address, or a negative `Errno` on failure.
#[hermit_macro::system]
#[unsafe(no_mangle)]
pub extern "C" fn sys_mmap(
	addr: *mut u8,
	len: usize,
	prot: MemoryProtection,
	flags: MemoryMapFlags,
	fd: c_int,
) -> i64 {
	if fd >= 0 {
		// File-backed mappings need a VFS layer to resolve `fd` to a commit function; this
		// crate's scope stops at the block buffer cache (spec.md §1 Non-goal: "filesystem
		// semantics above the block-buffer layer").
		return Errno::NoSys.to_raw();
	}

	let hint = if addr.is_null() {
		None
	} else {
		Some(VirtAddr::new(addr as u64))
	};

	match addrspace::current().mmap(hint, len as u64, to_prot(prot), to_mmap_flags(flags), None, 0) {
		Ok(base) => base.as_u64() as i64,
		Err(e) => e.to_raw(),
	}
}

/// Unmaps `len` bytes of virtual memory starting at `addr`.
#[hermit_macro::system]
#[unsafe(no_mangle)]
pub extern "C" fn sys_munmap(addr: *mut u8, len: usize) -> i32 {
	match addrspace::current().munmap(VirtAddr::new(addr as u64), len as u64) {
		Ok(()) => 0,
		Err(e) => e.to_raw() as i32,
	}
}

/// Changes the protection of `len` bytes of virtual memory starting at `addr`.
#[hermit_macro::system]
#[unsafe(no_mangle)]
pub extern "C" fn sys_mprotect(addr: *mut u8, len: usize, prot: MemoryProtection) -> i32 {
	match addrspace::current().mprotect(VirtAddr::new(addr as u64), len as u64, to_prot(prot)) {
		Ok(()) => 0,
		Err(e) => e.to_raw() as i32,
	}
}

/// Grows or shrinks the program break to `addr`. Passing a null pointer only queries the
/// current break. Returns the (possibly unchanged) break address.
#[hermit_macro::system]
#[unsafe(no_mangle)]
pub extern "C" fn sys_brk(addr: *mut u8) -> i64 {
	let target = if addr.is_null() {
		None
	} else {
		Some(VirtAddr::new(addr as u64))
	};
	match addrspace::current().brk(target) {
		Ok(brk) => brk.as_u64() as i64,
		Err(e) => e.to_raw(),
	}
}

/// Raw `memstat` result: region count and total mapped pages in the calling address space
/// (spec.md §6).
#[derive(Debug, Copy, Clone, Default)]
#[repr(C)]
pub struct MemStat {
	pub region_count: u64,
	pub mapped_pages: u64,
}

/// Reports the number of regions and mapped pages in the calling address space.
#[hermit_macro::system]
#[unsafe(no_mangle)]
pub extern "C" fn sys_memstat(out: &mut MemStat) -> i32 {
	let stat = addrspace::current().memstat();
	*out = MemStat {
		region_count: stat.region_count as u64,
		mapped_pages: stat.mapped_pages,
	};
	0
}

//! The user-mode ABI surface this crate owns: memory management only (`mmap`/`munmap`/
//! `mprotect`/`brk`/`memstat`) plus `getpagesize`, per spec.md §1's Non-goal "user ABI beyond
//! those the VMM needs". Everything else an application-facing libOS would expose (file I/O,
//! sockets, process control) is an outer crate's concern.

#[cfg(feature = "mman")]
pub mod mman;
pub mod system;

pub(crate) fn init() {
	debug!("syscall surface ready");
}

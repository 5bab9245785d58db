//! Kernel-internal error type and the raw-errno ABI boundary.
//!
//! Grounded on the teacher's `errno.rs` (a flat table of `i32` constants used directly as
//! syscall return values), generalized into a `thiserror`-derived enum per spec.md §7's error
//! taxonomy. Internal VMM/VMO/buffer-cache code returns `Result<T, Errno>`; only the syscall
//! shims in `syscalls::*` convert to the raw negative-errno `i64` the calling convention expects.

use thiserror::Error;

/// A hardware protection fault, reported up from the page-fault handler to the scheduler for
/// synchronous delivery to the faulting task (spec.md §7: "protection fault -> SIGSEGV").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
	/// No VMRegion covers the faulting address.
	Unmapped,
	/// A region exists but does not permit the access that faulted (e.g. write to read-only).
	ProtectionViolation,
	/// The backing VMO failed to commit a page for this offset.
	CommitFailed,
}

/// Kernel-internal error type. Every fallible VMM, VMO, APIC, and buffer-cache operation in this
/// crate returns `Result<T, Errno>` rather than a raw integer; raw errno values only appear at
/// the `syscalls::*` boundary, via [`Errno::to_raw`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
	/// Resource exhaustion: out of physical pages, out of virtual address space, region tree
	/// full. Maps to `ENOMEM`.
	#[error("out of memory")]
	NoMem,
	/// Permission or argument validation failure: misaligned address, zero length, bad protection
	/// flags, overlapping fixed mapping. Maps to `EINVAL`.
	#[error("invalid argument")]
	Inval,
	/// Requested access is not permitted by the region's protection bits or the caller's
	/// privilege level. Maps to `EACCES`.
	#[error("permission denied")]
	Access,
	/// A user-supplied pointer does not resolve to a valid, appropriately-permissioned mapping.
	/// Maps to `EFAULT`.
	#[error("bad address")]
	Fault,
	/// Bad file/device descriptor passed to a file-backed mapping request. Maps to `EBADF`.
	#[error("bad file descriptor")]
	BadFd,
	/// The requested operation is not implemented. Maps to `ENOSYS`.
	#[error("function not implemented")]
	NoSys,
	/// A hardware protection fault that must be delivered to the faulting task rather than
	/// returned as a syscall result (spec.md §7). Never converted by [`Errno::to_raw`]; carried
	/// separately through `FaultOutcome`.
	#[error("protection fault: {0:?}")]
	Violation(FaultKind),
}

impl Errno {
	/// Converts to the negative-errno `i64` the C syscall ABI expects.
	///
	/// # Panics
	/// Panics if called on [`Errno::Violation`]: protection faults are delivered via signal, not
	/// returned as a syscall result, and reaching a syscall boundary with one unconverted is a
	/// bug in the caller.
	pub const fn to_raw(self) -> i64 {
		let raw = match self {
			Self::NoMem => 12,  // ENOMEM
			Self::Inval => 22,  // EINVAL
			Self::Access => 13, // EACCES
			Self::Fault => 14,  // EFAULT
			Self::BadFd => 9,   // EBADF
			Self::NoSys => 38,  // ENOSYS
			Self::Violation(_) => panic!("protection fault reached the syscall errno boundary"),
		};
		-raw
	}
}

//! APIC/timer interrupt core, virtual memory manager, and block buffer cache of a monolithic
//! x86-64 kernel.
//!
//! This crate owns three subsystems (`arch::x86_64::kernel::apic`/`irq`, `mm::addrspace`/`vmo`,
//! `mm::buffer_cache`) and the ambient stack around them (logging, error handling, boot-argument
//! parsing). Booting past firmware/architecture init, scheduling, and the user-mode ABI beyond
//! `mmap`/`munmap`/`mprotect`/`brk` are an outer kernel binary's concern; see the `arch` and
//! `scheduler` module docs for the exact seams.

#![no_std]
#![warn(rust_2018_idioms)]
#![allow(clippy::missing_safety_doc)]
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![feature(allocator_api)]
#![feature(linkage)]
#![cfg_attr(
	any(target_os = "none", target_os = "hermit"),
	feature(custom_test_frameworks)
)]
#![cfg_attr(
	any(target_os = "none", target_os = "hermit"),
	cfg_attr(test, test_runner(crate::test_runner))
)]
#![cfg_attr(
	any(target_os = "none", target_os = "hermit"),
	cfg_attr(test, reexport_test_harness_main = "test_main")
)]
#![cfg_attr(any(target_os = "none", target_os = "hermit"), cfg_attr(test, no_main))]

extern crate alloc;
#[macro_use]
extern crate log;
#[cfg(not(any(target_os = "none", target_os = "hermit")))]
extern crate std;

#[macro_use]
mod macros;

pub mod arch;
pub mod config;
mod console;
pub mod entropy;
pub mod env;
pub mod errno;
mod logging;
pub mod mm;
#[cfg(any(target_os = "none", target_os = "hermit"))]
mod runtime_glue;
pub mod scheduler;
pub mod syscalls;

pub use crate::console::_print;

/// Brings up logging, the VMM, and interrupt dispatch on the Boot Processor.
///
/// Mirrors the teacher's `boot_processor_main` init order, stopping short of spawning `initd`
/// or entering a scheduler loop: handing control to application code is an outer kernel
/// binary's job once this returns.
#[cfg(any(target_os = "none", target_os = "hermit"))]
pub fn boot_processor_init() {
	arch::message_output_init();
	unsafe {
		logging::init();
	}

	info!("starting kernel core {}", env!("CARGO_PKG_VERSION"));

	arch::boot_processor_init();

	if !env::is_uhyve() {
		arch::boot_application_processors();
	}

	syscalls::init();
}

/// Brings up interrupt dispatch on an Application Processor.
#[cfg(all(any(target_os = "none", target_os = "hermit"), feature = "smp"))]
pub fn application_processor_init() {
	arch::application_processor_init();
}

#[cfg(test)]
#[cfg(any(target_os = "none", target_os = "hermit"))]
#[no_mangle]
extern "C" fn runtime_entry(_argc: i32, _argv: *const *const u8, _env: *const *const u8) -> ! {
	println!("Executing kernel unit tests. Any arguments are dropped");
	test_main();
	loop {
		arch::processor::halt();
	}
}

#[cfg(test)]
pub fn test_runner(tests: &[&dyn Fn()]) {
	println!("Running {} tests", tests.len());
	for test in tests {
		test();
	}
}

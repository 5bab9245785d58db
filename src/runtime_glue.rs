//! Panic and allocation-failure handlers the compiler expects a `#![no_std]` binary target to
//! supply; weakly linked so a host build (`cfg(test)`, which pulls in `std`) does not fight over
//! the panic runtime.
//!
//! Grounded on the teacher's `runtime_glue.rs`, dropping the hypervisor-shutdown-on-panic path
//! (it hinged on `sys_shutdown`, which is out of scope: this crate's syscall surface is limited
//! to `mman`) and updating the per-core id lookup to `arch::core_local::core_id`.

use core::alloc::Layout;
use core::panic::PanicInfo;

use crate::arch;

#[cfg(any(target_os = "none", target_os = "hermit"))]
#[linkage = "weak"]
#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
	print!("[core {}][!!!PANIC!!!] ", arch::core_local::core_id());

	if let Some(location) = info.location() {
		print!("{}:{}: ", location.file(), location.line());
	}

	println!("{}", info.message());

	loop {
		arch::processor::halt();
	}
}

#[cfg(any(target_os = "none", target_os = "hermit"))]
#[linkage = "weak"]
#[alloc_error_handler]
fn rust_oom(layout: Layout) -> ! {
	println!(
		"[core {}][!!!OOM!!!] memory allocation of {} bytes failed",
		arch::core_local::core_id(),
		layout.size()
	);

	loop {
		arch::processor::halt();
	}
}

//! `print!`/`println!` over the console, and the `kernel_function!` wrapper `#[system]`-tagged
//! syscall shims expand into.
//!
//! Grounded on the teacher's `macros.rs`: `print!`/`println!` are carried verbatim. The teacher's
//! `kernel_function!` also swapped onto the caller's user-mode stack before entering the inner
//! function and back afterward; that stack-switch hinged on a `percore::core_scheduler()` this
//! crate's `scheduler` module deliberately does not provide (scheduling is an external
//! collaborator, see `scheduler::mod.rs`). What is grounded here from the teacher's version is
//! the IRQ-disable/re-enable bracket around the call.

/// Print formatted text to the console.
#[macro_export]
macro_rules! print {
	($($arg:tt)+) => ({
		$crate::_print(format_args!($($arg)*));
	});
}

/// Print formatted text to the console, followed by a newline.
#[macro_export]
macro_rules! println {
	() => ($crate::print!("\n"));
	($($arg:tt)+) => ($crate::print!("{}\n", format_args!($($arg)+)));
}

/// Runs a syscall's inner implementation with interrupts disabled around entry/exit, matching
/// the teacher's `kernel_function!` bracket without the removed user-stack switch.
#[macro_export]
macro_rules! kernel_function {
	($f:ident($($x:tt)*)) => {{
		use $crate::arch::irq;

		#[allow(clippy::diverging_sub_expression)]
		#[allow(unused_unsafe)]
		#[allow(unreachable_code)]
		unsafe {
			irq::disable();
			let ret = $f($($x)*);
			irq::enable();
			ret
		}
	}};
}

//! Formatted output over the serial console.
//!
//! Grounded on the teacher's `console.rs` `_print`/`fmt::Write` plumbing, simplified to this
//! crate's single COM1 backend (`arch::x86_64::kernel::output_message_buf`) instead of the
//! teacher's VGA/virtio/uhyve-multiplexed `Console`, since boot-protocol and driver concerns
//! beyond the serial port are out of scope here.

use core::fmt;

use hermit_sync::InterruptTicketMutex;

use crate::arch::x86_64::kernel::output_message_buf;

pub(crate) struct Console;

impl fmt::Write for Console {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		output_message_buf(s.as_bytes());
		Ok(())
	}
}

pub(crate) static CONSOLE: InterruptTicketMutex<Console> = InterruptTicketMutex::new(Console);

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
	use fmt::Write;
	CONSOLE.lock().write_fmt(args).ok();
}

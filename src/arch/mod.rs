//! Architecture dispatch.
//!
//! This crate targets x86-64 only; the scheduler, context-switch trampoline and
//! user-land entry points that the teacher carries here are out of scope (the
//! scheduler is an external collaborator, see `crate::scheduler`).

pub mod x86_64;

pub use crate::arch::x86_64::kernel::apic::{set_oneshot_timer, wakeup_core};
#[cfg(feature = "smp")]
pub use crate::arch::x86_64::kernel::application_processor_init;
pub use crate::arch::x86_64::kernel::core_local;
pub use crate::arch::x86_64::kernel::irq;
pub use crate::arch::x86_64::kernel::processor;
pub use crate::arch::x86_64::kernel::systemtime::get_boot_time;
pub use crate::arch::x86_64::kernel::{boot_application_processors, boot_processor_init};
pub use crate::arch::x86_64::kernel::{get_processor_count, message_output_init};
pub use crate::arch::x86_64::mm;

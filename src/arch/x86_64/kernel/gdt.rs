//! Per-core GDT/TSS setup.
//!
//! Grounded on the teacher's `gdt.rs`, ported from the removed `x86` crate's descriptor
//! builder onto `x86_64::structures::gdt`, which already owns this concern for the sibling
//! example repos. Each core gets its own leaked `GlobalDescriptorTable` and `TaskStateSegment`
//! (there is no task switching in this crate's scope, so the TSS only needs `rsp[0]` and the
//! IST stacks interrupt/exception entry relies on).
use alloc::boxed::Box;

use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable};
use x86_64::structures::tss::TaskStateSegment;

use crate::config::KERNEL_STACK_SIZE;

/// We use IST1 through IST4.
/// Each critical exception (NMI, Double Fault, Machine Check) gets a dedicated one while IST1
/// is shared for all other interrupts. See also `interrupts.rs`.
const IST_ENTRIES: usize = 4;

pub fn add_current_core() {
	let mut tss = Box::new(TaskStateSegment::new());

	// Every task later gets its own stack; this boot stack is only used until a scheduler
	// takes over.
	let boot_stack = crate::mm::allocate(KERNEL_STACK_SIZE, false);
	tss.privilege_stack_table[0] =
		x86_64::VirtAddr::new(boot_stack.as_u64() + KERNEL_STACK_SIZE as u64 - 0x10);

	for ist in tss.interrupt_stack_table.iter_mut().take(IST_ENTRIES) {
		let stack = crate::mm::allocate(KERNEL_STACK_SIZE, false);
		*ist = x86_64::VirtAddr::new(stack.as_u64() + KERNEL_STACK_SIZE as u64 - 0x10);
	}

	let tss: &'static TaskStateSegment = Box::leak(tss);

	let mut gdt = GlobalDescriptorTable::new();
	let code_sel = gdt.append(Descriptor::kernel_code_segment());
	let data_sel = gdt.append(Descriptor::kernel_data_segment());
	let tss_sel = gdt.append(Descriptor::tss_segment(tss));
	let gdt: &'static GlobalDescriptorTable = Box::leak(Box::new(gdt));

	gdt.load();
	unsafe {
		CS::set_reg(code_sel);
		DS::set_reg(data_sel);
		ES::set_reg(data_sel);
		SS::set_reg(data_sel);
		load_tss(tss_sel);
	}

	crate::arch::x86_64::kernel::core_local::CoreLocal::get()
		.tss
		.set(core::ptr::from_ref(tss) as *mut TaskStateSegment);
}

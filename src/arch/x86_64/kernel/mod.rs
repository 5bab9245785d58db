use core::ops::Range;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use hermit_sync::InterruptSpinMutex;

use self::serial::SerialPort;
use crate::arch::mm::{PhysAddr, VirtAddr};
use crate::arch::x86_64::kernel::core_local::CoreLocal;
use crate::env;

#[cfg(feature = "acpi")]
pub mod acpi;
pub mod apic;
pub mod core_local;
pub mod gdt;
pub mod interrupts;
pub mod irq;
#[cfg(feature = "kernel-stack")]
pub mod kernel_stack;
pub mod pit;
pub mod processor;
pub mod serial;
pub(crate) mod systemtime;

/// Hand-off from the loader to the kernel core, kept deliberately small: this crate does not
/// own boot protocol parsing (multiboot/Linux boot params/UEFI), only what the interrupt and
/// memory subsystems need once an external loader has parsed one.
#[derive(Clone, Copy, Debug)]
pub struct BootInfo {
	/// Usable physical RAM, as reported by the loader.
	pub phys_addr_range: Range<u64>,
	/// Virtual address range the kernel image itself occupies.
	pub kernel_image_addr_range: Range<u64>,
	/// I/O port base of the COM1-compatible serial console, if any.
	pub serial_port_base: Option<u16>,
	/// Whether we are running under the uhyve hypervisor (which short-circuits ACPI/PCI
	/// discovery and boots every core directly in long mode).
	pub uhyve: bool,
	/// Raw kernel command line, as passed by the loader.
	pub command_line: Option<&'static str>,
}

static mut BOOT_INFO: Option<BootInfo> = None;

pub fn boot_info() -> &'static BootInfo {
	unsafe { (*ptr::addr_of!(BOOT_INFO)).as_ref().unwrap() }
}

/// Called once by the loader before any other function in this crate.
pub fn set_boot_info(info: BootInfo) {
	unsafe {
		BOOT_INFO = Some(info);
	}
}

/// Serial port to print kernel messages
pub(crate) static COM1: InterruptSpinMutex<Option<SerialPort>> = InterruptSpinMutex::new(None);

pub fn get_ram_address() -> PhysAddr {
	PhysAddr::new(boot_info().phys_addr_range.start)
}

pub fn get_limit() -> usize {
	boot_info().phys_addr_range.end as usize
}

pub fn get_base_address() -> VirtAddr {
	VirtAddr::new(boot_info().kernel_image_addr_range.start)
}

pub fn get_image_size() -> usize {
	let range = &boot_info().kernel_image_addr_range;
	(range.end - range.start) as usize
}

#[cfg(feature = "smp")]
pub fn get_processor_count() -> u32 {
	CPU_ONLINE.load(Ordering::Acquire)
}

#[cfg(not(feature = "smp"))]
pub fn get_processor_count() -> u32 {
	1
}

pub fn args() -> Option<&'static str> {
	boot_info().command_line
}

/// Earliest initialization function, called by the Boot Processor before anything else so
/// log output works for every later step.
pub fn message_output_init() {
	CoreLocal::install();

	if let Some(base) = boot_info().serial_port_base {
		let serial_port = unsafe { SerialPort::new(base) };
		*COM1.lock() = Some(serial_port);
	}
}

pub fn output_message_buf(buf: &[u8]) {
	if let Some(serial) = COM1.lock().as_mut() {
		serial.send(buf);
	}
}

/// Real Boot Processor initialization as soon as the first log message made it to the
/// serial port.
pub fn boot_processor_init() {
	processor::detect_features();
	processor::configure();

	crate::mm::init();
	crate::mm::print_information();
	CoreLocal::get().add_irq_counter();
	env::init();
	gdt::add_current_core();
	interrupts::load_idt();

	processor::detect_frequency();
	processor::print_information();

	interrupts::install();
	systemtime::init();

	if !env::is_uhyve() {
		#[cfg(feature = "acpi")]
		acpi::init();
	}

	apic::init();
	serial::install_serial_interrupt();
	finish_processor_init();
	interrupts::enable();
}

/// Boots all Application Processors detected via ACPI/uhyve.
///
/// Bringing up an AP past the INIT+SIPI handshake requires a real-mode trampoline mapped
/// below 1 MiB, which is outside this crate's scope (see the IPI-primitive-only Non-goal);
/// the hand-off beyond sending the IPI sequence belongs to the loader/platform layer.
pub fn boot_application_processors() {
	#[cfg(feature = "smp")]
	apic::boot_application_processors();
}

/// Application Processor initialization, run on every AP once it reaches long mode.
#[cfg(feature = "smp")]
pub fn application_processor_init() {
	CoreLocal::install();
	processor::configure();
	gdt::add_current_core();
	interrupts::load_idt();
	apic::init_x2apic();
	apic::init_local_apic();
	interrupts::enable();
	finish_processor_init();
}

fn finish_processor_init() {
	if env::is_uhyve() {
		// uhyve boots each processor directly and does not know the Local APIC IDs in
		// advance; the sequential core id doubles as the Local APIC id in that case.
		apic::add_local_apic_id(core_local::core_id() as u8);
	}

	CPU_ONLINE.fetch_add(1, Ordering::Release);
}

pub fn print_statistics() {
	interrupts::print_statistics();
}

/// `CPU_ONLINE` is the count of CPUs that finished initialization.
pub static CPU_ONLINE: AtomicU32 = AtomicU32::new(0);

pub static CURRENT_STACK_ADDRESS: AtomicPtr<u8> = AtomicPtr::new(ptr::null_mut());

use x86_64::instructions::port::Port;

use crate::arch::x86_64::kernel::core_local::increment_irq_counter;
use crate::arch::x86_64::kernel::interrupts::{self, ExceptionStackFrame, IDT};
use crate::arch::x86_64::kernel::{apic, COM1};

const SERIAL_IRQ: u8 = 36;

enum SerialInner {
	Uart(uart_16550::SerialPort),
	Uhyve(Port<u8>),
}

pub struct SerialPort {
	inner: SerialInner,
}

impl SerialPort {
	pub unsafe fn new(base: u16) -> Self {
		if crate::env::is_uhyve() {
			let serial = Port::new(base);
			Self {
				inner: SerialInner::Uhyve(serial),
			}
		} else {
			let mut serial = unsafe { uart_16550::SerialPort::new(base) };
			serial.init();
			Self {
				inner: SerialInner::Uart(serial),
			}
		}
	}

	/// Drains one received byte from the UART. This crate has no interactive console; the
	/// byte is discarded after bumping the interrupt counter for it.
	pub fn buffer_input(&mut self) {
		if let SerialInner::Uart(s) = &mut self.inner {
			let _ = s.receive();
		}
	}

	pub fn send(&mut self, buf: &[u8]) {
		match &mut self.inner {
			SerialInner::Uhyve(s) => {
				for &data in buf {
					unsafe {
						s.write(data);
					}
				}
			}
			SerialInner::Uart(s) => {
				for &data in buf {
					s.send(data);
				}
			}
		}
	}
}

extern "x86-interrupt" fn serial_interrupt(_stack_frame: ExceptionStackFrame) {
	COM1.lock().as_mut().unwrap().buffer_input();
	increment_irq_counter(SERIAL_IRQ);

	apic::eoi();
}

pub(crate) fn install_serial_interrupt() {
	unsafe {
		let idt = &mut *(&raw mut IDT);
		idt[SERIAL_IRQ as usize]
			.set_handler_fn(serial_interrupt)
			.set_stack_index(0);
	}
	interrupts::add_irq_name((SERIAL_IRQ - 32) as u32, "COM1");
}

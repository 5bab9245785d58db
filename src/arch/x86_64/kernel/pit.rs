//! Busy-wait timing gate built on PIT channel 2.
//!
//! Grounded on `apic_calibrate_pit`/`pit_init_oneshot`/`pit_wait_for_oneshot` in
//! `original_source/kernel/arch/x86_64/apic.c`: the calibration routine in `apic.rs` needs a
//! clock it can trust before the APIC timer and TSC frequencies are known, so it gates each
//! trial on PIT channel 2 (the speaker channel, whose output bit is readable through port
//! 0x61 without taking an interrupt) rather than wiring up the channel-0 legacy IRQ.

use x86_64::instructions::port::Port;

const PIT_CLOCK: u64 = 1_193_182;

const PIT_CHANNEL2_DATA_PORT: u16 = 0x42;
const PIT_COMMAND_PORT: u16 = 0x43;
const PIT_GATE_PORT: u16 = 0x61;

const PIT_BINARY_OUTPUT: u8 = 0b0000_0000;
const PIT_ONESHOT_MODE: u8 = 0b0000_0010;
const PIT_LOBYTE_HIBYTE_ACCESS: u8 = 0b0011_0000;
const PIT_CHANNEL2: u8 = 0b1000_0000;

/// Programs PIT channel 2 for a one-shot countdown of `micros` microseconds and starts the
/// gate. Call [`wait`] to busy-poll until the countdown elapses.
pub fn start_oneshot(micros: u64) {
	let count = (PIT_CLOCK * micros + 500_000) / 1_000_000;
	let count = count.clamp(1, u16::MAX as u64) as u16;

	unsafe {
		let mut gate: Port<u8> = Port::new(PIT_GATE_PORT);
		let mut command: Port<u8> = Port::new(PIT_COMMAND_PORT);
		let mut data: Port<u8> = Port::new(PIT_CHANNEL2_DATA_PORT);

		// Disable the speaker output, enable the channel-2 gate so the counter runs.
		let current = gate.read();
		gate.write((current & 0b1111_1100) | 0b0000_0001);

		command.write(PIT_BINARY_OUTPUT | PIT_ONESHOT_MODE | PIT_LOBYTE_HIBYTE_ACCESS | PIT_CHANNEL2);
		data.write(count as u8);
		data.write((count >> 8) as u8);
	}
}

/// Busy-waits until the countdown started by [`start_oneshot`] reaches zero, i.e. until the
/// channel-2 OUT status bit (port 0x61, bit 5) goes high.
pub fn wait() {
	let mut gate: Port<u8> = Port::new(PIT_GATE_PORT);
	loop {
		let status = unsafe { gate.read() };
		if status & 0b0010_0000 != 0 {
			break;
		}
		core::hint::spin_loop();
	}
}

/// Stops the channel-2 gate after a calibration trial.
pub fn stop() {
	unsafe {
		let mut gate: Port<u8> = Port::new(PIT_GATE_PORT);
		let current = gate.read();
		gate.write(current & 0b1111_1100);
	}
}

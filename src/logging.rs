//! Installs the `log` facade over the serial console.
//!
//! Grounded on the teacher's `logging.rs`/`printlog!` macro family (a fixed `LogLevel` enum and
//! a `[core N][LEVEL] msg` line format), ported onto the `log` crate's `Log` trait so the rest of
//! the tree can use the ecosystem-standard `info!`/`warn!`/`error!`/`debug!`/`trace!` macros
//! instead of hand-rolled ones (SPEC_FULL.md §A.1).

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::arch::core_local::core_id;

struct KernelLogger;

impl Log for KernelLogger {
	fn enabled(&self, metadata: &Metadata<'_>) -> bool {
		metadata.level() <= crate::env::log_level()
	}

	fn log(&self, record: &Record<'_>) {
		if self.enabled(record.metadata()) {
			println!(
				"[core {}][{}] {}",
				core_id(),
				level_tag(record.level()),
				record.args()
			);
		}
	}

	fn flush(&self) {}
}

fn level_tag(level: Level) -> &'static str {
	match level {
		Level::Error => "ERROR",
		Level::Warn => "WARNING",
		Level::Info => "INFO",
		Level::Debug => "DEBUG",
		Level::Trace => "TRACE",
	}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs the kernel logger as the global `log` facade backend.
///
/// # Safety
/// Must be called exactly once, before any other core is started and before any `log::*!`
/// macro runs concurrently with this call.
pub unsafe fn init() {
	log::set_max_level(LevelFilter::Trace);
	log::set_logger(&LOGGER).expect("logger already installed");
}

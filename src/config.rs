#[allow(dead_code)]
pub const COMMIT_HASH: &str = match option_env!("GIT_HASH") {
	Some(hash) => hash,
	None => "unknown",
};

#[allow(dead_code)]
pub const KERNEL_STACK_SIZE: usize = 0x8000;

#[allow(dead_code)]
pub const DEFAULT_STACK_SIZE: usize = 0x40000;

/// Number of high bits of a kernel stack allocation's base address randomized by ASLR.
pub const KSTACKS_ASLR_BITS: u32 = 8;
/// Number of high bits of a `vmalloc`-style kernel region's base address randomized by ASLR.
pub const VMALLOC_ASLR_BITS: u32 = 8;
/// Number of high bits of a user heap mapping's base address randomized by ASLR.
pub const HEAP_ASLR_BITS: u32 = 16;

/// Number of repeated readings kept (smallest wins) per timer-calibration trial.
pub const CALIBRATION_TRIALS: usize = 3;
/// PIT-gated busy-wait durations, in milliseconds, used for Theil-Sen timer calibration.
pub const CALIBRATION_GATES_MS: [u64; 3] = [2, 5, 10];

/// Nanoseconds rearmed past "now" for each one-shot LAPIC timer interrupt (spec.md §4.1).
pub const TIMER_TICK_NS: u64 = 1_000_000;

/// Block size used by the buffer cache; one block per page, so cache lookups never span a
/// page boundary (spec.md §4.6).
pub const BLOCK_SIZE: usize = 0x1000;

/// Byte capacity of the deferred-work ring drained by the kernel worker thread (spec.md §4.2).
pub const DEFERRED_WORK_RING_SIZE: usize = 4096;

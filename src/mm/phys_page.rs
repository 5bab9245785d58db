//! Owned physical page frames: the unit of content a [`crate::mm::vmo::Vmo`] indexes.
//!
//! Grounded on spec.md §3 ("PhysPage. Owned frame with a physical address, a reference count,
//! and an in-VMO offset") and on the teacher's `physicalmem.rs` frame allocator, which this
//! module wraps rather than duplicates: a `PhysPage` is a refcounted handle over one frame
//! returned by [`crate::mm::physicalmem::allocate_physical`], freed via
//! [`crate::mm::physicalmem::deallocate_physical`] once the last handle drops.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use hermit_sync::InterruptTicketMutex;
use memory_addresses::PhysAddr;

use crate::arch::mm::paging::{BasePageSize, PageSize};
use crate::errno::Errno;
use crate::mm::buffer_cache::BlockBuf;
use crate::mm::physicalmem;

/// The per-page list of block descriptors a page tagged `BUFFER` carries (spec.md §3, §4.6).
#[derive(Default)]
struct BufferList {
	buffers: Vec<BlockBuf>,
}

struct PhysPageInner {
	addr: PhysAddr,
	/// Offset of this page within the owning VMO, in bytes.
	vmo_offset: u64,
	/// Whether `addr` was handed out by [`physicalmem::allocate_physical`] and must be returned
	/// to it on drop. `false` for the "physical" VMO identity (spec.md §3), which wraps frames
	/// this crate does not own the lifetime of.
	owned: bool,
	dirty: AtomicBool,
	buffers: InterruptTicketMutex<BufferList>,
}

impl Drop for PhysPageInner {
	fn drop(&mut self) {
		if self.owned {
			unsafe {
				physicalmem::deallocate_physical(self.addr, BasePageSize::SIZE as usize);
			}
		}
	}
}

/// A refcounted handle to one physical page frame (spec.md §3: "Frames are exclusively owned
/// by exactly one VMO; maps in the page tables borrow by physical address"). Cloning bumps the
/// reference count; the frame is returned to the physical allocator when the last clone drops.
#[derive(Clone)]
pub struct PhysPage(Arc<PhysPageInner>);

impl PhysPage {
	/// Allocates a fresh, zero-filled frame at `vmo_offset` (anonymous VMO commit, spec.md §4.3).
	pub fn alloc_zeroed(vmo_offset: u64) -> Result<Self, Errno> {
		let addr = physicalmem::allocate_physical(
			BasePageSize::SIZE as usize,
			BasePageSize::SIZE as usize,
		)
		.map_err(|_| Errno::NoMem)?;
		unsafe {
			core::ptr::write_bytes(addr.as_u64() as *mut u8, 0, BasePageSize::SIZE as usize);
		}
		Ok(Self(Arc::new(PhysPageInner {
			addr,
			vmo_offset,
			owned: true,
			dirty: AtomicBool::new(false),
			buffers: InterruptTicketMutex::new(BufferList::default()),
		})))
	}

	/// Wraps a pre-materialised physical frame this crate does not own (the "physical" VMO
	/// identity, spec.md §3). The frame is never handed back to the physical allocator.
	pub fn from_physical(addr: PhysAddr, vmo_offset: u64) -> Self {
		Self(Arc::new(PhysPageInner {
			addr,
			vmo_offset,
			owned: false,
			dirty: AtomicBool::new(false),
			buffers: InterruptTicketMutex::new(BufferList::default()),
		}))
	}

	pub fn physical_address(&self) -> PhysAddr {
		self.0.addr
	}

	pub fn vmo_offset(&self) -> u64 {
		self.0.vmo_offset
	}

	pub fn refcount(&self) -> usize {
		Arc::strong_count(&self.0)
	}

	/// True once [`Self::block_buf_or_insert`] has attached at least one [`BlockBuf`]
	/// (spec.md §4.6: "the page is tagged BUFFER").
	pub fn is_buffer_page(&self) -> bool {
		!self.0.buffers.lock().buffers.is_empty()
	}

	/// Finds the `BlockBuf` for `block_nr` on this page, creating one via `make` if absent
	/// (spec.md §4.6 `sb_read_block`).
	pub fn block_buf_or_insert(&self, block_nr: u64, make: impl FnOnce() -> BlockBuf) -> BlockBuf {
		let mut list = self.0.buffers.lock();
		if let Some(existing) = list.buffers.iter().find(|b| b.block_nr() == block_nr) {
			return existing.clone();
		}
		let buf = make();
		list.buffers.push(buf.clone());
		buf
	}

	/// Sets the page's DIRTY bit (spec.md §4.6: "setting a buffer's dirty bit also sets the
	/// page's dirty bit unconditionally").
	pub fn mark_dirty(&self) {
		self.0.dirty.store(true, Ordering::Release);
	}

	/// Clears the page's DIRTY bit only if no sibling buffer remains dirty (scanned, not
	/// refcounted, per spec.md §A.5).
	pub fn clear_dirty_if_no_sibling_dirty(&self) {
		let list = self.0.buffers.lock();
		if list.buffers.iter().any(BlockBuf::is_dirty) {
			return;
		}
		self.0.dirty.store(false, Ordering::Release);
	}

	pub fn is_dirty(&self) -> bool {
		self.0.dirty.load(Ordering::Acquire)
	}
}

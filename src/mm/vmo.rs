//! Virtual Memory Objects: page-indexed owners of region content.
//!
//! Grounded on spec.md §3 ("VMO") and §4.3, with the commit contract matching
//! `original_source/kernel/kernel/fs/buffer.cpp`'s `bbuffer_commit` for the device-backed case
//! (delegated to [`crate::mm::buffer_cache::device_commit`]). Uses the same
//! `InterruptTicketMutex`-guarded `alloc::collections::BTreeMap` pattern the teacher already
//! uses for `IRQ_NAMES`/`IRQ_COUNTERS` in `interrupts.rs` for the page index.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use hermit_sync::InterruptTicketMutex;

use crate::arch::mm::paging::{BasePageSize, PageSize};
use crate::errno::Errno;
use crate::mm::phys_page::PhysPage;

/// A `commit(offset) -> PhysPage` contract (spec.md §4.3). Boxed so anonymous, file-backed,
/// and device VMOs can each supply their own closure without a generic parameter infecting
/// every caller of `Vmo`.
pub type CommitFn = dyn Fn(u64) -> Result<PhysPage, Errno> + Send + Sync;

enum Identity {
	/// Zero-fill on first access.
	Anonymous,
	/// Backed by a borrowed inode plus a base file offset (spec.md §3).
	FileBacked { commit: Arc<CommitFn>, shared: bool },
	/// Pre-materialised content (e.g. MMIO, a device's page cache); `commit` hands back an
	/// already-existing page rather than allocating one.
	Physical { commit: Arc<CommitFn> },
}

struct VmoInner {
	size: AtomicU64,
	pages: InterruptTicketMutex<BTreeMap<u64, PhysPage>>,
	identity: Identity,
	/// Number of regions currently mapping this VMO (spec.md §3 invariant:
	/// `refcount == Σ mappings using v`).
	mappings: AtomicUsize,
	/// Fork-ancestor lookup key; a weak back-reference; never keeps the ancestor alive
	/// (design notes §9: "Back-references ... are weak lookups, not ownership").
	forked_from: Option<Weak<VmoInner>>,
}

/// A refcounted handle to one VMO. `Vmo::mappings()` exposes the mapping-based refcount spec.md
/// tracks separately from ordinary `Arc` cloning (a `Vmo` may be held live by the private-VMO
/// list with zero region mappings, e.g. between fork and the region-tree walk that attaches it).
#[derive(Clone)]
pub struct Vmo(Arc<VmoInner>);

impl Vmo {
	pub fn new_anonymous(size: u64) -> Self {
		Self(Arc::new(VmoInner {
			size: AtomicU64::new(size),
			pages: InterruptTicketMutex::new(BTreeMap::new()),
			identity: Identity::Anonymous,
			mappings: AtomicUsize::new(0),
			forked_from: None,
		}))
	}

	pub fn new_file_backed(size: u64, commit: Arc<CommitFn>, shared: bool) -> Self {
		Self(Arc::new(VmoInner {
			size: AtomicU64::new(size),
			pages: InterruptTicketMutex::new(BTreeMap::new()),
			identity: Identity::FileBacked { commit, shared },
			mappings: AtomicUsize::new(0),
			forked_from: None,
		}))
	}

	pub fn new_physical(size: u64, commit: Arc<CommitFn>) -> Self {
		Self(Arc::new(VmoInner {
			size: AtomicU64::new(size),
			pages: InterruptTicketMutex::new(BTreeMap::new()),
			identity: Identity::Physical { commit },
			mappings: AtomicUsize::new(0),
			forked_from: None,
		}))
	}

	pub fn size(&self) -> u64 {
		self.0.size.load(Ordering::Relaxed)
	}

	/// Unique identity for matching against a `forked_from` back-pointer (§4.3's "matching by
	/// `forked_from == original`").
	pub fn identity_ptr(&self) -> usize {
		Arc::as_ptr(&self.0) as usize
	}

	pub fn add_mapping(&self) {
		self.0.mappings.fetch_add(1, Ordering::AcqRel);
	}

	/// Decrements the mapping count (spec.md §3: "removing a mapping decrements refcount").
	/// Returns the count after decrementing; the caller drops its last `Vmo` handle once this
	/// reaches zero so the VMO and its pages are released (`Arc` does the actual freeing).
	pub fn remove_mapping(&self) -> usize {
		self.0.mappings.fetch_sub(1, Ordering::AcqRel) - 1
	}

	pub fn mappings(&self) -> usize {
		self.0.mappings.load(Ordering::Acquire)
	}

	/// Whether this VMO is shared read-only under the page-cache optimization (spec.md §4.3
	/// "Sharing optimization"); only meaningful for `FileBacked` identities.
	pub fn is_shared_file_backed(&self) -> bool {
		matches!(self.0.identity, Identity::FileBacked { shared: true, .. })
	}

	fn commit(&self, offset: u64) -> Result<PhysPage, Errno> {
		match &self.0.identity {
			Identity::Anonymous => PhysPage::alloc_zeroed(offset),
			Identity::FileBacked { commit, .. } | Identity::Physical { commit } => commit(offset),
		}
	}

	/// `get(offset, may_populate)`: looks up the page index; if absent and `may_populate`,
	/// calls `commit` and inserts the result (spec.md §4.3).
	pub fn get(&self, offset: u64, may_populate: bool) -> Result<PhysPage, Errno> {
		if offset >= self.size() {
			return Err(Errno::Inval);
		}

		{
			let pages = self.0.pages.lock();
			if let Some(page) = pages.get(&offset) {
				return Ok(page.clone());
			}
		}

		if !may_populate {
			return Err(Errno::Fault);
		}

		let page = self.commit(offset)?;
		let mut pages = self.0.pages.lock();
		// Another faulting CPU may have raced us to `commit`; keep whichever insert won.
		let page = pages.entry(offset).or_insert(page).clone();
		Ok(page)
	}

	/// Inserts an already-committed page directly at `offset`, used by the buffer cache when a
	/// device commit also wants the caller to see the fresh page without a second lookup.
	pub fn insert(&self, offset: u64, page: PhysPage) {
		self.0.pages.lock().insert(offset, page);
	}

	/// `fork(cow)`: a sibling VMO with an empty page index, zero mappings, and `forked_from`
	/// pointing back at `self` (spec.md §4.3).
	pub fn fork(&self) -> Self {
		let identity = match &self.0.identity {
			Identity::Anonymous => Identity::Anonymous,
			Identity::FileBacked { commit, shared } => Identity::FileBacked {
				commit: commit.clone(),
				shared: *shared,
			},
			Identity::Physical { commit } => Identity::Physical {
				commit: commit.clone(),
			},
		};

		Self(Arc::new(VmoInner {
			size: AtomicU64::new(self.size()),
			pages: InterruptTicketMutex::new(BTreeMap::new()),
			identity,
			mappings: AtomicUsize::new(0),
			forked_from: Some(Arc::downgrade(&self.0)),
		}))
	}

	/// Whether `self.forked_from` resolves to `ancestor` (spec.md §4.3's private-VMO
	/// correspondence walk, `find_forked_private_vmo`).
	pub fn forked_from(&self, ancestor: &Vmo) -> bool {
		self.0
			.forked_from
			.as_ref()
			.and_then(Weak::upgrade)
			.is_some_and(|f| Arc::ptr_eq(&f, &ancestor.0))
	}

	/// `split(offset, gap)`: returns a new VMO owning pages with keys ≥ `offset + gap`,
	/// re-keyed from zero (spec.md §4.3), used by interior `munmap`.
	pub fn split(&self, offset: u64, gap: u64) -> Self {
		let threshold = offset + gap;
		let mut pages = self.0.pages.lock();
		let tail: BTreeMap<u64, PhysPage> = {
			let keys: Vec<u64> = pages.range(threshold..).map(|(&k, _)| k).collect();
			keys.into_iter()
				.map(|k| (k - threshold, pages.remove(&k).unwrap()))
				.collect()
		};

		let new_size = self.size().saturating_sub(threshold);
		let identity = match &self.0.identity {
			Identity::Anonymous => Identity::Anonymous,
			Identity::FileBacked { commit, shared } => Identity::FileBacked {
				commit: commit.clone(),
				shared: *shared,
			},
			Identity::Physical { commit } => Identity::Physical {
				commit: commit.clone(),
			},
		};

		Self(Arc::new(VmoInner {
			size: AtomicU64::new(new_size),
			pages: InterruptTicketMutex::new(tail),
			identity,
			mappings: AtomicUsize::new(0),
			forked_from: None,
		}))
	}

	/// `resize(new_size)`: truncates pages beyond `new_size` (spec.md §4.3), used by suffix
	/// `munmap`.
	pub fn resize(&self, new_size: u64) {
		let mut pages = self.0.pages.lock();
		pages.retain(|&offset, _| offset < new_size);
		self.0.size.store(new_size, Ordering::Relaxed);
	}

	/// `truncate_beginning_and_resize(n)`: drops `[0, n)` and renumbers the remainder from
	/// zero (spec.md §4.3), used by prefix `munmap` on private non-shared VMOs.
	pub fn truncate_beginning_and_resize(&self, n: u64) {
		let mut pages = self.0.pages.lock();
		let keys: Vec<u64> = pages.range(n..).map(|(&k, _)| k).collect();
		let mut rekeyed = BTreeMap::new();
		for k in keys {
			rekeyed.insert(k - n, pages.remove(&k).unwrap());
		}
		*pages = rekeyed;
		self.0.size.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
			Some(s.saturating_sub(n))
		}).ok();
	}

	/// Copies every committed page in `[0, size)` into a fresh private anonymous VMO (spec.md
	/// §A.6 Open Question 1: shared→private conversion on first write).
	pub fn convert_to_private_copy(&self) -> Result<Self, Errno> {
		let private = Vmo::new_anonymous(self.size());
		let pages: Vec<(u64, PhysPage)> = self
			.0
			.pages
			.lock()
			.iter()
			.map(|(&off, p)| (off, p.clone()))
			.collect();

		for (offset, src) in pages {
			let dst = PhysPage::alloc_zeroed(offset)?;
			unsafe {
				core::ptr::copy_nonoverlapping(
					src.physical_address().as_u64() as *const u8,
					dst.physical_address().as_u64() as *mut u8,
					BasePageSize::SIZE as usize,
				);
			}
			private.insert(offset, dst);
		}

		Ok(private)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn get_populates_and_caches() {
		let vmo = Vmo::new_anonymous(8192);
		let a = vmo.get(0, true).unwrap();
		let b = vmo.get(0, true).unwrap();
		assert_eq!(a.physical_address(), b.physical_address());
	}

	#[test]
	fn get_without_populate_fails_on_absent_page() {
		let vmo = Vmo::new_anonymous(4096);
		assert!(vmo.get(0, false).is_err());
	}

	#[test]
	fn split_rekeys_tail_from_zero() {
		let vmo = Vmo::new_anonymous(3 * 4096);
		vmo.get(0, true).unwrap();
		vmo.get(4096, true).unwrap();
		vmo.get(8192, true).unwrap();

		let tail = vmo.split(4096, 4096);
		assert!(tail.get(0, false).is_ok());
		assert!(vmo.get(8192, false).is_err());
	}

	#[test]
	fn fork_starts_with_empty_page_index_and_zero_mappings() {
		let vmo = Vmo::new_anonymous(4096);
		vmo.get(0, true).unwrap();
		let child = vmo.fork();
		assert!(child.get(0, false).is_err());
		assert_eq!(child.mappings(), 0);
		assert!(child.forked_from(&vmo));
	}

	#[test]
	fn mapping_refcount_tracks_attach_detach() {
		let vmo = Vmo::new_anonymous(4096);
		vmo.add_mapping();
		vmo.add_mapping();
		assert_eq!(vmo.mappings(), 2);
		assert_eq!(vmo.remove_mapping(), 1);
	}
}

//! The sparse sector-to-page map backing one RAM disk volume.
//!
//! A [`PageStore`] never allocates until first write: a [`PageIndex`]
//! absent from the table reads as all-zeros. Reads take the table's read
//! lock to look a page up, then read through the page's own lock; writes
//! to a page that does not yet exist take the table's write lock just
//! long enough to insert a freshly zeroed page, losing the race
//! gracefully if another writer got there first (`spec.md` §4.1/§9).

mod page;

use std::{
	collections::BTreeMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use parking_lot::RwLock;

use crate::error::PageStoreError;
use page::Page;

pub(crate) type SectorIndex = u64;
pub(crate) type PageIndex = u64;

/// Snapshot of the bookkeeping counters a page store exposes through
/// `RamDiskEngine::get_stats` (`spec.md` §3.1, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PageStoreStats {
	/// Highest sector ever written, i.e. one past the last byte any
	/// write has touched.
	pub max_blk_alloc: u64,
	/// Total number of pages allocated since the last `free_all`. Not
	/// decremented by discard, only a full reset brings it back to
	/// zero, matching RapidDisk's `max_page_cnt`.
	pub max_page_count: u64,
}

pub(crate) struct PageStore {
	page_size: u64,
	sectors_per_page: u64,
	pages: RwLock<BTreeMap<PageIndex, Arc<Page>>>,
	max_blk_alloc: AtomicU64,
	max_page_count: AtomicU64,
}

impl PageStore {
	pub fn new(page_size: u64) -> Self {
		debug_assert!(page_size.is_power_of_two());
		Self {
			page_size,
			sectors_per_page: page_size / blockdev::SECTOR_SIZE,
			pages: RwLock::new(BTreeMap::new()),
			max_blk_alloc: AtomicU64::new(0),
			max_page_count: AtomicU64::new(0),
		}
	}

	fn page_index(&self, sector: SectorIndex) -> PageIndex {
		sector / self.sectors_per_page
	}

	fn bump_max_blk_alloc(&self, end_sector: u64) {
		self.max_blk_alloc.fetch_max(end_sector, Ordering::AcqRel);
	}

	/// Look up an existing page without allocating.
	fn lookup(&self, index: PageIndex) -> Option<Arc<Page>> {
		self.pages.read().get(&index).cloned()
	}

	/// Ensure a page exists at `index`, allocating and inserting a zeroed
	/// one if absent. If a concurrent writer wins the race to insert the
	/// same index, this discovers and reuses their page rather than
	/// installing a second one (`spec.md` §4.1 concurrency note).
	fn ensure_page(&self, index: PageIndex) -> Result<Arc<Page>, PageStoreError> {
		if let Some(page) = self.lookup(index) {
			return Ok(page);
		}

		let fresh =
			Arc::new(Page::zeroed(self.page_size as usize).ok_or(PageStoreError::OutOfMemory)?);

		let mut pages = self.pages.write();
		let page = match pages.entry(index) {
			std::collections::btree_map::Entry::Occupied(entry) => {
				// Lost the race: reuse the winner's page instead of leaking ours.
				Arc::clone(entry.get())
			}
			std::collections::btree_map::Entry::Vacant(entry) => {
				self.max_page_count.fetch_add(1, Ordering::AcqRel);
				Arc::clone(entry.insert(fresh))
			}
		};
		drop(pages);
		Ok(page)
	}

	/// For each page straddled by the byte range
	/// `[sector * SECTOR_SIZE, sector * SECTOR_SIZE + len_bytes)`, invoke
	/// `f(page_index, page_local_offset_bytes, chunk_len_bytes,
	/// buf_offset_bytes)`.
	fn for_each_segment(
		&self,
		sector: SectorIndex,
		len_bytes: u64,
		mut f: impl FnMut(PageIndex, u64, u64, u64),
	) {
		let mut byte_pos = sector * blockdev::SECTOR_SIZE;
		let end = byte_pos + len_bytes;
		let mut buf_offset = 0u64;
		while byte_pos < end {
			let index = byte_pos / self.page_size;
			let page_offset = byte_pos % self.page_size;
			let chunk = (end - byte_pos).min(self.page_size - page_offset);
			f(index, page_offset, chunk, buf_offset);
			byte_pos += chunk;
			buf_offset += chunk;
		}
	}

	/// Copy `buf.len()` bytes starting at `sector` into `buf`. Never
	/// allocates: absent pages read as zero.
	pub fn read(&self, sector: SectorIndex, buf: &mut [u8]) {
		let len = buf.len() as u64;
		self.for_each_segment(sector, len, |index, page_offset, chunk, buf_offset| {
			let dst = &mut buf[buf_offset as usize..(buf_offset + chunk) as usize];
			match self.lookup(index) {
				Some(page) => page.read(page_offset as usize, dst),
				None => dst.fill(0),
			}
		});
	}

	/// Write `buf` starting at `sector`, allocating pages on demand.
	pub fn write(&self, sector: SectorIndex, buf: &[u8]) -> Result<(), PageStoreError> {
		let len = buf.len() as u64;
		let mut result = Ok(());
		self.for_each_segment(sector, len, |index, page_offset, chunk, buf_offset| {
			if result.is_err() {
				return;
			}
			let src = &buf[buf_offset as usize..(buf_offset + chunk) as usize];
			match self.ensure_page(index) {
				Ok(page) => page.write(page_offset as usize, src),
				Err(err) => result = Err(err),
			}
		});
		result?;
		self.bump_max_blk_alloc(sector + len / blockdev::SECTOR_SIZE);
		Ok(())
	}

	/// Discard `n_sectors` starting at `sector`. Only valid when `sector`
	/// is page-aligned and the length is a whole number of pages;
	/// misaligned discards are rejected outright (`spec.md` §4.1 leaves
	/// this choice open; rejecting surfaces caller mistakes instead of
	/// silently doing nothing).
	pub fn discard(&self, sector: SectorIndex, n_sectors: u64) -> Result<(), PageStoreError> {
		if sector % self.sectors_per_page != 0 || n_sectors % self.sectors_per_page != 0 {
			return Err(PageStoreError::Misaligned);
		}
		let start_index = self.page_index(sector);
		let num_pages = n_sectors / self.sectors_per_page;
		for offset in 0..num_pages {
			let index = start_index + offset;
			if let Some(page) = self.lookup(index) {
				page.zero_out();
			}
		}
		Ok(())
	}

	/// Drop every page and reset the high-water-mark counters.
	pub fn free_all(&self) {
		self.pages.write().clear();
		self.max_blk_alloc.store(0, Ordering::Release);
		self.max_page_count.store(0, Ordering::Release);
	}

	pub fn stats(&self) -> PageStoreStats {
		PageStoreStats {
			max_blk_alloc: self.max_blk_alloc.load(Ordering::Acquire),
			max_page_count: self.max_page_count.load(Ordering::Acquire),
		}
	}

	pub fn page_count(&self) -> usize {
		self.pages.read().len()
	}

	pub fn page_size_bytes(&self) -> u64 {
		self.page_size
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_buf_eq;

	fn store() -> PageStore {
		PageStore::new(16) // tiny pages (2 sectors) make boundary tests cheap
	}

	#[test]
	fn unwritten_range_reads_as_zero() {
		let store = store();
		let mut buf = [0xAA; 32];
		store.read(0, &mut buf);
		assert_buf_eq!(buf, [0; 32]);
	}

	#[test]
	fn read_your_writes() {
		let store = store();
		store.write(0, &[1, 2, 3, 4]).unwrap();
		store.write(10, &[9, 9]).unwrap();

		let mut buf = [0; 4];
		store.read(0, &mut buf);
		assert_buf_eq!(buf, [1, 2, 3, 4]);

		let mut buf = [0; 2];
		store.read(10, &mut buf);
		assert_buf_eq!(buf, [9, 9]);
	}

	#[test]
	fn write_spans_multiple_pages() {
		let store = store(); // page size 16 bytes == 2 sectors
		let data: Vec<u8> = (0..40).collect();
		store.write(0, &data).unwrap();

		let mut buf = vec![0; 40];
		store.read(0, &mut buf);
		assert_buf_eq!(buf, data);
	}

	#[test]
	fn max_blk_alloc_tracks_highest_sector_written() {
		let store = store();
		store.write(20, &[1, 2]).unwrap();
		assert_eq!(store.stats().max_blk_alloc, 20 + 2 / 512);
		store.write(0, &[1]).unwrap();
		// A later, lower write never lowers the high-water mark.
		assert_eq!(store.stats().max_blk_alloc, 20 + 2 / 512);
	}

	#[test]
	fn discard_requires_page_alignment() {
		let store = store();
		store.write(0, &[1; 16]).unwrap();
		assert_eq!(store.discard(1, 2), Err(PageStoreError::Misaligned));
		assert_eq!(store.discard(0, 1), Err(PageStoreError::Misaligned));
	}

	#[test]
	fn aligned_discard_zeroes_page_without_touching_neighbors() {
		let store = store();
		store.write(0, &[1; 16]).unwrap(); // page 0
		store.write(2, &[2; 16]).unwrap(); // page 1 (sectors 2..4, page size 16B = 2 sectors)
		store.discard(0, 2).unwrap();

		let mut buf = [0xAA; 16];
		store.read(0, &mut buf);
		assert_buf_eq!(buf, [0; 16]);

		let mut buf = [0; 16];
		store.read(2, &mut buf);
		assert_buf_eq!(buf, [2; 16]);
	}

	#[test]
	fn free_all_resets_everything() {
		let store = store();
		store.write(0, &[1; 16]).unwrap();
		assert!(store.page_count() > 0);
		store.free_all();
		assert_eq!(store.page_count(), 0);
		assert_eq!(store.stats(), PageStoreStats::default());
		let mut buf = [0xAA; 16];
		store.read(0, &mut buf);
		assert_buf_eq!(buf, [0; 16]);
	}
}

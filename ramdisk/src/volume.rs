use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use blockdev::{BlockDevice, DeviceError, Region};
use log::warn;

use crate::{
	error::RamDiskError,
	page_store::PageStore,
	stats::RamDiskStats,
};

/// One RAM disk volume: a lazily-allocated page store exposed as a
/// seekable block device, plus the small amount of lifecycle state an
/// attach/detach/resize/lock/flush admin surface needs (`spec.md` §3.2).
pub struct RamDiskVolume {
	id: u32,
	capacity_bytes: AtomicU64,
	locked: AtomicBool,
	error_count: AtomicU64,
	open_handles: AtomicUsize,
	page_store: PageStore,
}

impl RamDiskVolume {
	pub(crate) fn new(id: u32, capacity_bytes: u64, page_size: u64) -> Result<Self, RamDiskError> {
		if capacity_bytes == 0 || capacity_bytes % blockdev::SECTOR_SIZE != 0 {
			return Err(RamDiskError::InvalidSize);
		}
		Ok(Self {
			id,
			capacity_bytes: AtomicU64::new(capacity_bytes),
			locked: AtomicBool::new(false),
			error_count: AtomicU64::new(0),
			open_handles: AtomicUsize::new(0),
			page_store: PageStore::new(page_size),
		})
	}

	pub fn id(&self) -> u32 {
		self.id
	}

	pub fn is_locked(&self) -> bool {
		self.locked.load(Ordering::Acquire)
	}

	pub fn set_lock(&self, locked: bool) {
		self.locked.store(locked, Ordering::Release);
	}

	pub(crate) fn open_handle_count(&self) -> usize {
		self.open_handles.load(Ordering::Acquire)
	}

	pub(crate) fn inc_handles(&self) {
		self.open_handles.fetch_add(1, Ordering::AcqRel);
	}

	pub(crate) fn dec_handles(&self) {
		self.open_handles.fetch_sub(1, Ordering::AcqRel);
	}

	/// Grow-only resize (`spec.md` §3.2, §4.2).
	pub fn resize(&self, new_size_bytes: u64) -> Result<(), RamDiskError> {
		if new_size_bytes == 0 || new_size_bytes % blockdev::SECTOR_SIZE != 0 {
			return Err(RamDiskError::InvalidSize);
		}
		let current = self.capacity_bytes.load(Ordering::Acquire);
		if new_size_bytes < current {
			return Err(RamDiskError::ShrinkNotAllowed);
		}
		self.capacity_bytes.store(new_size_bytes, Ordering::Release);
		Ok(())
	}

	/// `BLKFLSBUF` semantics: when called by the sole open handle,
	/// discards every page and resets the high-water-mark counters;
	/// otherwise the volume is busy (`spec.md` §3.2, §4.2).
	pub(crate) fn blkflsbuf(&self) -> Result<(), RamDiskError> {
		if self.open_handle_count() > 1 {
			return Err(RamDiskError::Busy);
		}
		self.page_store.free_all();
		self.error_count.store(0, Ordering::Release);
		Ok(())
	}

	pub fn stats(&self) -> RamDiskStats {
		let page_stats = self.page_store.stats();
		RamDiskStats {
			id: self.id,
			capacity_bytes: self.capacity_bytes.load(Ordering::Acquire),
			max_blk_alloc_sectors: page_stats.max_blk_alloc,
			pages_allocated: page_stats.max_page_count,
			error_count: self.error_count.load(Ordering::Acquire),
			locked: self.is_locked(),
		}
	}

	fn record_error(&self) {
		self.error_count.fetch_add(1, Ordering::AcqRel);
	}

	fn check_range(&self, sector: u64, len: u64) -> Result<(), DeviceError> {
		let capacity = self.capacity_bytes.load(Ordering::Acquire);
		let end = sector
			.checked_mul(blockdev::SECTOR_SIZE)
			.and_then(|start| start.checked_add(len))
			.ok_or(DeviceError::OutOfRange)?;
		if end > capacity {
			return Err(DeviceError::OutOfRange);
		}
		Ok(())
	}
}

impl BlockDevice for RamDiskVolume {
	fn capacity_bytes(&self) -> u64 {
		self.capacity_bytes.load(Ordering::Acquire)
	}

	fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
		if let Err(err) = self.check_range(sector, buf.len() as u64) {
			self.record_error();
			return Err(err);
		}
		self.page_store.read(sector, buf);
		Ok(())
	}

	fn write_at(&self, sector: u64, buf: &[u8]) -> Result<(), DeviceError> {
		if self.is_locked() {
			return Err(DeviceError::ReadOnly);
		}
		if let Err(err) = self.check_range(sector, buf.len() as u64) {
			self.record_error();
			return Err(err);
		}
		self.page_store.write(sector, buf).map_err(|err| {
			self.record_error();
			warn!("ramdisk {}: write failed: {err}", self.id);
			DeviceError::from(err)
		})
	}

	fn discard(&self, region: Region) -> Result<(), DeviceError> {
		if self.is_locked() {
			return Err(DeviceError::ReadOnly);
		}
		if let Err(err) = self.check_range(region.sector, region.count * blockdev::SECTOR_SIZE) {
			self.record_error();
			return Err(err);
		}
		self.page_store.discard(region.sector, region.count).map_err(|err| {
			self.record_error();
			DeviceError::from(err)
		})
	}

	fn flush(&self) -> Result<(), DeviceError> {
		// Per-I/O flush is a reported-supported no-op: the store is
		// volatile, so there is nothing to durably commit (`spec.md`
		// §4.2). This is distinct from the admin `BLKFLSBUF` operation,
		// which actually discards pages (`blkflsbuf` above).
		Ok(())
	}

	fn preferred_block_size(&self) -> u64 {
		self.page_store.page_size_bytes()
	}

	fn is_ramdisk_backed(&self) -> bool {
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_buf_eq;

	fn volume() -> RamDiskVolume {
		RamDiskVolume::new(0, 64 * 1024 * 1024, 4096).unwrap()
	}

	#[test]
	fn round_trip_s1() {
		let vol = volume();
		vol.write_at(0, &[0x2F; 4096]).unwrap();

		let mut buf = [0; 4096];
		vol.read_at(65536 / blockdev::SECTOR_SIZE, &mut buf).unwrap();
		assert_buf_eq!(buf, [0; 4096]);

		let mut buf = [0; 4096];
		vol.read_at(0, &mut buf).unwrap();
		assert_buf_eq!(buf, [0x2F; 4096]);
	}

	#[test]
	fn lock_rejects_writes_s2() {
		let vol = volume();
		vol.set_lock(true);
		let err = vol.write_at(0, &[0x2F; 4096]).unwrap_err();
		assert_eq!(err, DeviceError::ReadOnly);
		assert_eq!(vol.stats().max_blk_alloc_sectors, 0);

		vol.set_lock(false);
		vol.write_at(0, &[0x2F; 4096]).unwrap();
	}

	#[test]
	fn reads_past_capacity_fail() {
		let vol = RamDiskVolume::new(0, 4096, 4096).unwrap();
		let mut buf = [0; 4096];
		assert_eq!(
			vol.read_at(8, &mut buf).unwrap_err(),
			DeviceError::OutOfRange
		);
	}

	#[test]
	fn resize_grows_only() {
		let vol = volume();
		vol.write_at(0, &[1; 16]).unwrap();
		vol.resize(128 * 1024 * 1024).unwrap();
		assert_eq!(vol.capacity_bytes(), 128 * 1024 * 1024);
		assert_eq!(
			vol.resize(64 * 1024 * 1024),
			Err(RamDiskError::ShrinkNotAllowed)
		);

		let mut buf = [0; 16];
		vol.read_at(0, &mut buf).unwrap();
		assert_buf_eq!(buf, [1; 16]);
	}

	#[test]
	fn blkflsbuf_resets_state_s5() {
		let vol = volume();
		let data = vec![0x11; 32 * 1024 * 1024];
		vol.write_at(0, &data).unwrap();
		assert!(vol.stats().pages_allocated > 0);

		vol.inc_handles(); // the sole open handle issuing BLKFLSBUF
		vol.blkflsbuf().unwrap();
		vol.dec_handles();

		let stats = vol.stats();
		assert_eq!(stats.pages_allocated, 0);
		assert_eq!(stats.max_blk_alloc_sectors, 0);

		let mut buf = [0xAA; 16];
		vol.read_at(0, &mut buf).unwrap();
		assert_buf_eq!(buf, [0; 16]);
	}

	#[test]
	fn blkflsbuf_busy_with_multiple_handles() {
		let vol = volume();
		vol.inc_handles();
		vol.inc_handles();
		assert_eq!(vol.blkflsbuf(), Err(RamDiskError::Busy));
	}
}

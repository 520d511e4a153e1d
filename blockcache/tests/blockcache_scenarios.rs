//! End-to-end scenarios from `spec.md` §8, driven through
//! `BlockCacheEngine::construct` against a real `ramdisk::RamDiskVolume`
//! as cache storage, the way an embedder actually wires this crate up.

use std::sync::{
	Arc, Condvar, Mutex,
};

use blockdev::{BlockDevice, DeviceError, Region};
use blockcache::{BlockCacheConfig, BlockCacheEngine, CacheMode, ConfigError};
use ramdisk::{RamDiskNamespace, RamDiskNamespaceConfig};

/// A plain in-memory source device, no artificial delays.
struct MemSource {
	data: Mutex<Vec<u8>>,
}

impl MemSource {
	fn new(capacity_bytes: u64) -> Self {
		Self {
			data: Mutex::new(vec![0u8; capacity_bytes as usize]),
		}
	}
}

impl BlockDevice for MemSource {
	fn capacity_bytes(&self) -> u64 {
		self.data.lock().unwrap().len() as u64
	}

	fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
		let data = self.data.lock().unwrap();
		let start = (sector * blockdev::SECTOR_SIZE) as usize;
		buf.copy_from_slice(&data[start..start + buf.len()]);
		Ok(())
	}

	fn write_at(&self, sector: u64, buf: &[u8]) -> Result<(), DeviceError> {
		let mut data = self.data.lock().unwrap();
		let start = (sector * blockdev::SECTOR_SIZE) as usize;
		data[start..start + buf.len()].copy_from_slice(buf);
		Ok(())
	}

	fn discard(&self, _region: Region) -> Result<(), DeviceError> {
		Ok(())
	}

	fn flush(&self) -> Result<(), DeviceError> {
		Ok(())
	}
}

/// Same as [`MemSource`], except every `read_at` first announces that it
/// has started (so a test can safely interleave a concurrent write) and
/// then blocks until released. Used to force the §4.4.3/§4.4.5 race
/// between an in-flight cache fill and an overlapping write (S4).
struct GatedSource {
	inner: MemSource,
	started: Mutex<bool>,
	started_cv: Condvar,
	proceed: Mutex<bool>,
	proceed_cv: Condvar,
}

impl GatedSource {
	fn new(capacity_bytes: u64) -> Self {
		Self {
			inner: MemSource::new(capacity_bytes),
			started: Mutex::new(false),
			started_cv: Condvar::new(),
			proceed: Mutex::new(false),
			proceed_cv: Condvar::new(),
		}
	}

	/// Block until a `read_at` call has entered and is waiting on us.
	fn wait_until_read_started(&self) {
		let mut guard = self.started.lock().unwrap();
		while !*guard {
			guard = self.started_cv.wait(guard).unwrap();
		}
	}

	/// Let the blocked `read_at` call proceed.
	fn release_read(&self) {
		*self.proceed.lock().unwrap() = true;
		self.proceed_cv.notify_all();
	}
}

impl BlockDevice for GatedSource {
	fn capacity_bytes(&self) -> u64 {
		self.inner.capacity_bytes()
	}

	fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
		// Snapshot the data now, as a real device would at the moment it
		// services the request, then only *report completion* late. This
		// lets a concurrent write race the in-flight fill without making
		// the outcome depend on exactly when this thread gets scheduled.
		let result = self.inner.read_at(sector, buf);

		*self.started.lock().unwrap() = true;
		self.started_cv.notify_all();

		let mut guard = self.proceed.lock().unwrap();
		while !*guard {
			guard = self.proceed_cv.wait(guard).unwrap();
		}

		result
	}

	fn write_at(&self, sector: u64, buf: &[u8]) -> Result<(), DeviceError> {
		self.inner.write_at(sector, buf)
	}

	fn discard(&self, region: Region) -> Result<(), DeviceError> {
		self.inner.discard(region)
	}

	fn flush(&self) -> Result<(), DeviceError> {
		self.inner.flush()
	}
}

/// A real RAM disk volume, sized and shaped as the cache device the
/// scenarios describe (a 64 KiB cache, matching `spec.md` §8 S3/S4).
fn cache_volume(capacity_bytes: u64) -> Arc<ramdisk::RamDiskVolume> {
	let ns = RamDiskNamespace::new(RamDiskNamespaceConfig::default());
	ns.attach(0, capacity_bytes).unwrap();
	ns.volume(0).unwrap()
}

fn block_sized_config(assoc: u32, size_blocks: u64, mode: CacheMode) -> BlockCacheConfig {
	BlockCacheConfig {
		size_blocks: Some(size_blocks),
		mode,
		assoc,
		..Default::default()
	}
}

/// S3: Cache hit/miss ordering.
#[test]
fn s3_cache_hit_then_miss_then_write() {
	let source = Arc::new(MemSource::new(1024 * 1024));
	let cache = cache_volume(64 * 1024);
	let config = block_sized_config(2, 4, CacheMode::WriteThrough);
	let engine = BlockCacheEngine::construct(source, cache, config).unwrap();

	let block5 = 5 * engine.block_size_sectors();

	// First read: miss, fills a slot.
	let mut buf = [0u8; 4096];
	engine.read(block5, &mut buf).unwrap();
	let stats = engine.stats();
	assert_eq!(stats.counters.cache_hits, 0);
	assert_eq!(stats.counters.disk_reads, 1);
	assert_eq!(stats.counters.cache_writes, 1);
	assert_eq!(stats.counters.cached_blocks, 1);

	// Second read of the same block: hit.
	engine.read(block5, &mut buf).unwrap();
	let stats = engine.stats();
	assert_eq!(stats.counters.cache_hits, 1);
	assert_eq!(stats.counters.disk_reads, 1, "a hit must not re-read source");
	assert_eq!(stats.counters.cache_reads, 1);

	// A one-cache-block-sized write to the same dbn either replaces the
	// entry in place (`cache_wr_replace`) or loses the invalidation race
	// (`wr_invalidates`); either is correct per `spec.md` §8 S3.
	engine.write(block5, &[0x5A; 4096]).unwrap();
	let stats = engine.stats();
	assert!(
		stats.counters.cache_wr_replace + stats.counters.wr_invalidates >= 1,
		"expected a replace or an invalidation, got {stats}"
	);
}

/// S4: Concurrent invalidation: a write arrives while a read-miss fill
/// for the same `dbn` is in flight.
#[test]
fn s4_concurrent_invalidation_during_fill() {
	let source = Arc::new(GatedSource::new(1024 * 1024));
	let cache = cache_volume(64 * 1024);
	let config = block_sized_config(2, 4, CacheMode::WriteThrough);
	let engine = BlockCacheEngine::construct(Arc::clone(&source) as Arc<dyn BlockDevice>, cache, config)
		.unwrap();

	let block9 = 9 * engine.block_size_sectors();

	let read_engine = Arc::clone(&engine);
	let reader = std::thread::spawn(move || {
		let mut buf = [0u8; 4096];
		read_engine.read(block9, &mut buf).unwrap();
		buf
	});

	// Wait until the cache-fill read has actually reached the source
	// device and is blocked there, i.e. the entry is `InProg`.
	source.wait_until_read_started();

	// A write to the same dbn must invalidate the in-flight entry
	// (-> `InProgInvalid`) and itself bypass straight to source, never
	// waiting on the cache fill.
	engine.write(block9, &[0x77; 4096]).unwrap();

	// Now let the original fill's source read complete.
	source.release_read();
	let read_buf = reader.join().unwrap();

	// The read must have delivered data (not an error, not a hang); the
	// entry must not have been populated by the superseded fill.
	assert_eq!(read_buf, [0u8; 4096], "read observed the pre-write state");
	let stats = engine.stats();
	assert!(stats.counters.rd_invalidates + stats.counters.wr_invalidates >= 1);

	// A subsequent read of the same block is a miss again, not a hit on
	// stale cached data.
	let hits_before = engine.stats().counters.cache_hits;
	let mut buf = [0u8; 4096];
	engine.read(block9, &mut buf).unwrap();
	assert_eq!(buf, [0x77; 4096], "post-write data is now authoritative");
	assert_eq!(
		engine.stats().counters.cache_hits,
		hits_before,
		"the post-invalidation read must not have hit stale cache state"
	);
}

/// S6: Associativity validation.
#[test]
fn s6_associativity_validation() {
	let source: Arc<dyn BlockDevice> = Arc::new(MemSource::new(1024 * 1024));

	let non_pow2 = block_sized_config(3, 512, CacheMode::WriteThrough);
	let err =
		BlockCacheEngine::construct(Arc::clone(&source), cache_volume(512 * 4096), non_pow2).unwrap_err();
	assert_eq!(err, ConfigError::InvalidAssociativity.into());

	let too_big = block_sized_config(1024, 512, CacheMode::WriteThrough);
	let err = BlockCacheEngine::construct(source, cache_volume(512 * 4096), too_big).unwrap_err();
	assert_eq!(err, ConfigError::CacheTooSmall.into());
}

/// Boundary: a request that is not exactly one cache block bypasses
/// uncached and still invalidates overlapping entries.
#[test]
fn non_block_sized_write_bypasses_and_invalidates() {
	let source: Arc<dyn BlockDevice> = Arc::new(MemSource::new(1024 * 1024));
	let cache = cache_volume(64 * 1024);
	let config = block_sized_config(2, 4, CacheMode::WriteThrough);
	let engine = BlockCacheEngine::construct(source, cache, config).unwrap();

	let block0 = 0u64;
	let mut buf = [0u8; 4096];
	engine.read(block0, &mut buf).unwrap(); // populate the cache
	assert_eq!(engine.stats().counters.cached_blocks, 1);

	// A write smaller than one cache block, overlapping the cached dbn.
	engine.write(block0, &[0xEE; 512]).unwrap();
	assert_eq!(
		engine.stats().counters.cached_blocks,
		0,
		"the overlapping cached entry must be invalidated"
	);
	assert_eq!(engine.stats().counters.uncached_writes, 1);
}

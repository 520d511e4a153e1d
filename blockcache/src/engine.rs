//! The set-associative block cache engine (`spec.md` §4.4): lookup,
//! replacement, the read and write algorithms, the invalidation helper,
//! and the asynchronous completion callback that ties cache fills and
//! write-through pushes back into the entry state machine.
//!
//! Every request blocks its caller on a [`PendingRequest`] (the
//! synchronous face of an otherwise async job (see `job.rs`) while the
//! actual work travels through the shared [`BlockCacheSubsystem`]; this
//! mirrors the "compute under lock, release, then do I/O" shape the
//! teacher crate's page cache uses (`PageCache::access`), generalized to
//! a state machine with asynchronous completions instead of a single
//! synchronous storage call.

use std::sync::{
	atomic::Ordering,
	Arc,
};

use blockdev::{BlockDevice, Region};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
	cache_block::{CacheBlock, CacheBlockState},
	config::{BlockCacheConfig, CacheMode},
	context::{self, CacheCounters, ContextState, Direction, SetLookup},
	errors::{BlockCacheError, ConfigError, JobPoolError},
	job::{Job, JobKind, PendingOutcome, PendingRequest},
	stats::BlockCacheStats,
	worker::BlockCacheSubsystem,
};

/// A set-associative block cache layered in front of a `source` device,
/// using a `cache` device (expected to be a RAM disk) for storage
/// (`spec.md` §3.4, §4.4).
pub struct BlockCacheEngine {
	subsystem: Arc<BlockCacheSubsystem>,
	source: Arc<dyn BlockDevice>,
	cache: Arc<dyn BlockDevice>,
	mode: CacheMode,
	assoc: u32,
	block_size_sectors: u64,
	size_blocks: u64,
	state: Mutex<ContextState>,
	counters: CacheCounters,
}

impl BlockCacheEngine {
	/// Construct a new engine. Validation happens entirely before any
	/// state is allocated (`spec.md` §4.4.7, §7): an invalid associativity,
	/// a cache device too small for it, a requested size over the cache
	/// device's own capacity, or a cache device not backed by a RAM disk
	/// all fail here with no partial state retained.
	pub fn new(
		subsystem: Arc<BlockCacheSubsystem>,
		source: Arc<dyn BlockDevice>,
		cache: Arc<dyn BlockDevice>,
		config: BlockCacheConfig,
	) -> Result<Arc<Self>, BlockCacheError> {
		if !cache.is_ramdisk_backed() {
			return Err(ConfigError::NotARamDisk("<cache device>".to_string()).into());
		}
		if config.assoc == 0 || !config.assoc.is_power_of_two() {
			return Err(ConfigError::InvalidAssociativity.into());
		}

		let block_size_bytes = config.block_size_sectors * blockdev::SECTOR_SIZE;
		let cache_capacity_blocks = cache.capacity_bytes() / block_size_bytes;
		let requested_blocks = config.size_blocks.unwrap_or(cache_capacity_blocks);

		if requested_blocks < config.assoc as u64 {
			return Err(ConfigError::CacheTooSmall.into());
		}
		if requested_blocks > cache_capacity_blocks {
			return Err(ConfigError::SizeExceedsCacheCapacity.into());
		}

		// Round down to a multiple of assoc, mirroring RapidDisk's
		// `cache_ctr` (`spec.md` §4.4.7).
		let size_blocks = (requested_blocks / config.assoc as u64) * config.assoc as u64;

		let engine = Arc::new(Self {
			subsystem,
			source,
			cache,
			mode: config.mode,
			assoc: config.assoc,
			block_size_sectors: config.block_size_sectors,
			size_blocks,
			state: Mutex::new(ContextState::new(size_blocks, config.assoc)),
			counters: CacheCounters::default(),
		});
		debug!(
			"blockcache constructed: {size_blocks} blocks, assoc {}, mode {:?}",
			config.assoc, config.mode
		);
		Ok(engine)
	}

	/// Construct a standalone engine with its own freshly-built
	/// [`BlockCacheSubsystem`], sized per `config.job_pool_capacity`.
	///
	/// This is the entry point a single device-mapper-style cache target
	/// (`spec.md` §6.2) uses: one constructor string makes one engine,
	/// and that engine owns its job pool rather than sharing the
	/// multi-engine singleton [`Self::new`] expects a caller to have
	/// built already.
	pub fn construct(
		source: Arc<dyn BlockDevice>,
		cache: Arc<dyn BlockDevice>,
		config: BlockCacheConfig,
	) -> Result<Arc<Self>, BlockCacheError> {
		let subsystem = BlockCacheSubsystem::new(config.job_pool_capacity)
			.map_err(|err| ConfigError::SubsystemInit(err.to_string()))?;
		Self::new(subsystem, source, cache, config)
	}

	pub fn mode(&self) -> CacheMode {
		self.mode
	}

	pub fn size_blocks(&self) -> u64 {
		self.size_blocks
	}

	pub fn assoc(&self) -> u32 {
		self.assoc
	}

	pub fn block_size_sectors(&self) -> u64 {
		self.block_size_sectors
	}

	fn block_size_bytes(&self) -> u64 {
		self.block_size_sectors * blockdev::SECTOR_SIZE
	}

	pub(crate) fn cache_device(&self) -> &Arc<dyn BlockDevice> {
		&self.cache
	}

	fn cache_region_for_index(&self, index: usize) -> Region {
		Region::new(index as u64 * self.block_size_sectors, self.block_size_sectors)
	}

	pub fn stats(&self) -> BlockCacheStats {
		BlockCacheStats {
			mode: self.mode,
			assoc: self.assoc,
			block_size_sectors: self.block_size_sectors,
			size_blocks: self.size_blocks,
			counters: self.counters.snapshot(),
		}
	}

	/// Wait for outstanding jobs to drain, then log a final summary
	/// (`spec.md` §4.4.7 teardown).
	pub fn shutdown(&self) {
		self.subsystem.shutdown();
		debug!("blockcache teardown complete: {}", self.stats());
	}

	// ---- public request entry points (`spec.md` §4.4.1) ----

	/// Read `buf.len()` bytes starting at `sector` on the source device,
	/// served from cache when possible.
	pub fn read(self: &Arc<Self>, sector: u64, buf: &mut [u8]) -> Result<(), BlockCacheError> {
		self.counters.reads.fetch_add(1, Ordering::Relaxed);

		if buf.len() as u64 != self.block_size_bytes() {
			let len_sectors = sector_count(buf.len() as u64);
			self.invalidate_overlap(sector, len_sectors, Direction::Read);
			let request = PendingRequest::new(sector, Direction::Read);
			self.issue_bypass_read(sector, buf.len(), Arc::clone(&request));
			return self.await_read(request, buf);
		}

		let set = context::set_index(sector, self.block_size_sectors, self.assoc, self.size_blocks);
		let mut state = self.state.lock();
		let lookup = context::lookup_set(&state, self.assoc, set, sector);

		let request = match lookup {
			SetLookup::Hit { index } => {
				self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
				state.entries[index].state = CacheBlockState::CacheReadInProg;
				drop(state);

				let request = PendingRequest::new(sector, Direction::Read);
				let data = vec![0u8; self.block_size_bytes() as usize].into_boxed_slice();
				if let Err(err) = self.spawn_job(
					Arc::clone(&request),
					Region::new(sector, self.block_size_sectors),
					self.cache_region_for_index(index),
					Some(index),
					JobKind::ReadCache,
					data,
				) {
					self.state.lock().entries[index].state = CacheBlockState::Invalid;
					// This entry was `Valid` (a hit) and is being dropped
					// to `Invalid` without ever reaching `WriteCache`'s
					// completion, so `cached_blocks` must be decremented
					// here too, not just on the miss-eviction path.
					self.counters.cached_blocks.fetch_sub(1, Ordering::Relaxed);
					return Err(err);
				}
				request
			}
			SetLookup::InFlight { .. } | SetLookup::AlreadyInvalidated { .. } => {
				drop(state);
				let request = PendingRequest::new(sector, Direction::Read);
				self.issue_bypass_read(sector, buf.len(), Arc::clone(&request));
				request
			}
			SetLookup::Miss { slot: None, .. } => {
				drop(state);
				let request = PendingRequest::new(sector, Direction::Read);
				self.issue_bypass_read(sector, buf.len(), Arc::clone(&request));
				request
			}
			SetLookup::Miss {
				slot: Some(index),
				evicted_valid,
			} => {
				if evicted_valid {
					self.counters.cached_blocks.fetch_sub(1, Ordering::Relaxed);
					self.counters.replace.fetch_add(1, Ordering::Relaxed);
					context::advance_lru(&mut state, self.assoc, set, index);
				}
				state.entries[index] = CacheBlock {
					dbn: sector,
					state: CacheBlockState::InProg,
				};
				drop(state);

				let request = PendingRequest::new(sector, Direction::Read);
				let data = vec![0u8; self.block_size_bytes() as usize].into_boxed_slice();
				if let Err(err) = self.spawn_job(
					Arc::clone(&request),
					Region::new(sector, self.block_size_sectors),
					self.cache_region_for_index(index),
					Some(index),
					JobKind::ReadSource,
					data,
				) {
					self.state.lock().entries[index].state = CacheBlockState::Invalid;
					return Err(err);
				}
				request
			}
		};

		self.await_read(request, buf)
	}

	/// Write `buf` starting at `sector` on the source device, populating
	/// or invalidating the cache as the mode requires.
	pub fn write(self: &Arc<Self>, sector: u64, buf: &[u8]) -> Result<(), BlockCacheError> {
		self.counters.writes.fetch_add(1, Ordering::Relaxed);

		if buf.len() as u64 != self.block_size_bytes() {
			let len_sectors = sector_count(buf.len() as u64);
			self.invalidate_overlap(sector, len_sectors, Direction::Write);
			let request = PendingRequest::new(sector, Direction::Write);
			self.issue_bypass_write(sector, buf, Arc::clone(&request));
			return self.await_write(request);
		}

		let set = context::set_index(sector, self.block_size_sectors, self.assoc, self.size_blocks);
		let mut state = self.state.lock();
		let in_progress_invalidations = context::invalidate_overlap(
			&mut state,
			&self.counters,
			self.assoc,
			self.block_size_sectors,
			self.size_blocks,
			sector,
			self.block_size_sectors,
			Direction::Write,
		);
		if in_progress_invalidations > 0 {
			drop(state);
			let request = PendingRequest::new(sector, Direction::Write);
			self.issue_bypass_write(sector, buf, Arc::clone(&request));
			return self.await_write(request);
		}

		if self.mode == CacheMode::WriteAround {
			drop(state);
			let request = PendingRequest::new(sector, Direction::Write);
			self.issue_bypass_write(sector, buf, Arc::clone(&request));
			return self.await_write(request);
		}

		let lookup = context::lookup_set(&state, self.assoc, set, sector);
		let request = match lookup {
			SetLookup::Hit { .. } | SetLookup::InFlight { .. } | SetLookup::AlreadyInvalidated { .. } => {
				unreachable!(
					"write lookup found a non-invalid entry for dbn {sector} right after invalidating overlaps"
				)
			}
			SetLookup::Miss { slot: None, .. } => {
				drop(state);
				let request = PendingRequest::new(sector, Direction::Write);
				self.issue_bypass_write(sector, buf, Arc::clone(&request));
				request
			}
			SetLookup::Miss {
				slot: Some(index),
				evicted_valid,
			} => {
				if evicted_valid {
					self.counters.cached_blocks.fetch_sub(1, Ordering::Relaxed);
					self.counters.cache_wr_replace.fetch_add(1, Ordering::Relaxed);
					context::advance_lru(&mut state, self.assoc, set, index);
				}
				state.entries[index] = CacheBlock {
					dbn: sector,
					state: CacheBlockState::InProg,
				};
				drop(state);

				let request = PendingRequest::new(sector, Direction::Write);
				let data: Box<[u8]> = buf.to_vec().into_boxed_slice();
				if let Err(err) = self.spawn_job(
					Arc::clone(&request),
					Region::new(sector, self.block_size_sectors),
					self.cache_region_for_index(index),
					Some(index),
					JobKind::WriteSource,
					data,
				) {
					self.state.lock().entries[index].state = CacheBlockState::Invalid;
					return Err(err);
				}
				request
			}
		};

		self.await_write(request)
	}

	fn await_read(&self, request: Arc<PendingRequest>, buf: &mut [u8]) -> Result<(), BlockCacheError> {
		let outcome = request.wait();
		outcome.result.map_err(BlockCacheError::from)?;
		if let Some(data) = outcome.data {
			buf.copy_from_slice(&data);
		}
		Ok(())
	}

	fn await_write(&self, request: Arc<PendingRequest>) -> Result<(), BlockCacheError> {
		request.wait().result.map_err(BlockCacheError::from)
	}

	fn invalidate_overlap(&self, sector: u64, len_sectors: u64, direction: Direction) -> u32 {
		let mut state = self.state.lock();
		context::invalidate_overlap(
			&mut state,
			&self.counters,
			self.assoc,
			self.block_size_sectors,
			self.size_blocks,
			sector,
			len_sectors,
			direction,
		)
	}

	// ---- bypass path (`spec.md` §4.4.1, §4.4.3 item 3, §4.4.4 item 3/6) ----

	fn issue_bypass_read(&self, sector: u64, len_bytes: usize, request: Arc<PendingRequest>) {
		self.counters.uncached_reads.fetch_add(1, Ordering::Relaxed);
		self.counters.disk_reads.fetch_add(1, Ordering::Relaxed);
		let mut buf = vec![0u8; len_bytes].into_boxed_slice();
		let result = self.source.read_at(sector, &mut buf);
		request.complete(PendingOutcome {
			data: result.is_ok().then_some(buf),
			result,
		});
	}

	fn issue_bypass_write(&self, sector: u64, buf: &[u8], request: Arc<PendingRequest>) {
		self.counters.uncached_writes.fetch_add(1, Ordering::Relaxed);
		self.counters.disk_writes.fetch_add(1, Ordering::Relaxed);
		let result = self.source.write_at(sector, buf);
		request.complete(PendingOutcome { result, data: None });
	}

	// ---- job dispatch ----

	fn spawn_job(
		self: &Arc<Self>,
		request: Arc<PendingRequest>,
		disk: Region,
		cache: Region,
		entry_index: Option<usize>,
		rw: JobKind,
		data: Box<[u8]>,
	) -> Result<(), BlockCacheError> {
		let job = Job {
			engine: Arc::clone(self),
			request,
			disk,
			cache,
			entry_index,
			rw,
			data,
			error: None,
		};
		let index = self
			.subsystem
			.pool
			.acquire(job)
			.map_err(|_| BlockCacheError::from(JobPoolError::Exhausted))?;
		if !self.subsystem.track_outstanding() {
			self.subsystem.pool.release(index);
			return Err(JobPoolError::Exhausted.into());
		}

		let subsystem = Arc::clone(&self.subsystem);
		subsystem.dispatch_async(index, Self::run_job, Self::complete_job);
		Ok(())
	}

	fn run_job(job: &mut Job) {
		let result = match job.rw {
			JobKind::ReadSource => job.engine.source.read_at(job.disk.sector, &mut job.data),
			JobKind::WriteSource => job.engine.source.write_at(job.disk.sector, &job.data),
			JobKind::ReadCache => job.engine.cache.read_at(job.cache.sector, &mut job.data),
			JobKind::WriteCache | JobKind::ReadCacheDone => {
				unreachable!("{:?} jobs are driven by the worker's queues, not dispatch_async", job.rw)
			}
		};
		job.error = result.err();
	}

	fn complete_job(subsystem: Arc<BlockCacheSubsystem>, index: usize) {
		let (engine, rw) = subsystem.pool.with_mut(index, |job| (Arc::clone(&job.engine), job.rw));
		match rw {
			JobKind::ReadSource => engine.finish_read_source(index),
			JobKind::WriteSource => engine.finish_write_source(index),
			JobKind::ReadCache => engine.finish_read_cache(index),
			JobKind::WriteCache | JobKind::ReadCacheDone => unreachable!(),
		}
	}

	// ---- completion callback (`spec.md` §4.4.6) ----

	/// `READ_SOURCE` completion: a cache-fill read from source for a
	/// read miss.
	fn finish_read_source(self: &Arc<Self>, index: usize) {
		let entry_index = self.subsystem.pool.with_mut(index, |job| job.entry_index).unwrap();
		let error = self.subsystem.pool.with_mut(index, |job| job.error);
		self.counters.disk_reads.fetch_add(1, Ordering::Relaxed);

		let invalidated = {
			let mut state = self.state.lock();
			let entry = &mut state.entries[entry_index];
			if error.is_some() || entry.state == CacheBlockState::InProgInvalid {
				entry.state = CacheBlockState::Invalid;
				true
			} else {
				false
			}
		};

		if invalidated {
			let job = self.subsystem.pool.release(index);
			// Per `spec.md` §4.4.3 item 4: the INPROG_INVALID case still
			// delivers the data that was read, it just drops the cache
			// copy; the error case propagates the error instead.
			job.request.complete(PendingOutcome {
				data: error.is_none().then_some(job.data),
				result: error.map_or(Ok(()), Err),
			});
			self.subsystem.untrack_outstanding();
		} else {
			self.subsystem.pool.with_mut(index, |job| job.rw = JobKind::WriteCache);
			self.subsystem.push_io_job(index);
		}
	}

	/// `WRITE_SOURCE` completion: the write-through push to source for a
	/// write miss.
	fn finish_write_source(self: &Arc<Self>, index: usize) {
		let entry_index = self.subsystem.pool.with_mut(index, |job| job.entry_index).unwrap();
		let error = self.subsystem.pool.with_mut(index, |job| job.error);
		self.counters.disk_writes.fetch_add(1, Ordering::Relaxed);

		let invalidated = {
			let mut state = self.state.lock();
			let entry = &mut state.entries[entry_index];
			if error.is_some() || entry.state == CacheBlockState::InProgInvalid {
				entry.state = CacheBlockState::Invalid;
				true
			} else {
				false
			}
		};

		if invalidated {
			let job = self.subsystem.pool.release(index);
			// The write has already reached source by the time we get
			// here; a concurrent invalidation with no error still means
			// the write succeeded (`spec.md` §5: "the cache never
			// acknowledges a write before source has").
			job.request.complete(PendingOutcome {
				data: None,
				result: error.map_or(Ok(()), Err),
			});
			self.subsystem.untrack_outstanding();
		} else {
			self.subsystem.pool.with_mut(index, |job| job.rw = JobKind::WriteCache);
			self.subsystem.push_io_job(index);
		}
	}

	/// `READ_CACHE` completion: serving a hit from the cache device.
	fn finish_read_cache(self: &Arc<Self>, index: usize) {
		let entry_index = self.subsystem.pool.with_mut(index, |job| job.entry_index).unwrap();
		let error = self.subsystem.pool.with_mut(index, |job| job.error);
		self.counters.cache_reads.fetch_add(1, Ordering::Relaxed);

		let still_valid = {
			let mut state = self.state.lock();
			let entry = &mut state.entries[entry_index];
			if error.is_none() && entry.state == CacheBlockState::CacheReadInProg {
				entry.state = CacheBlockState::Valid;
				true
			} else {
				false
			}
		};

		if still_valid {
			let job = self.subsystem.pool.release(index);
			job.request.complete(PendingOutcome {
				data: Some(job.data),
				result: Ok(()),
			});
			self.subsystem.untrack_outstanding();
		} else {
			self.subsystem
				.pool
				.with_mut(index, |job| job.rw = JobKind::ReadCacheDone);
			self.subsystem.push_completion_job(index);
		}
	}

	/// `READ_CACHE_DONE` drain (`spec.md` §4.3): a hit that errored or
	/// was invalidated mid-read. The worker has already released the
	/// job slot; this just fixes up entry state and retries uncached.
	pub(crate) fn finish_read_cache_done(self: &Arc<Self>, job: Job) {
		{
			let mut state = self.state.lock();
			if let Some(index) = job.entry_index {
				state.entries[index].state = CacheBlockState::Invalid;
			}
		}
		let sector = job.request.sector();
		self.issue_bypass_read(sector, job.data.len(), job.request);
	}

	/// `WRITE_CACHE` drain (`spec.md` §4.4.6): the cache-device write
	/// populating the cache after a source hit (read miss fill or
	/// write-through push). The original request always ends
	/// successfully here; the authoritative source operation already
	/// succeeded; a cache-write failure only costs the cache entry, not
	/// the caller's result.
	pub(crate) fn finish_write_cache(self: &Arc<Self>, job: Job) {
		self.counters.cache_writes.fetch_add(1, Ordering::Relaxed);
		{
			let mut state = self.state.lock();
			if let Some(index) = job.entry_index {
				let entry = &mut state.entries[index];
				if job.error.is_some() || entry.state == CacheBlockState::InProgInvalid {
					entry.state = CacheBlockState::Invalid;
				} else {
					entry.state = CacheBlockState::Valid;
					self.counters.cached_blocks.fetch_add(1, Ordering::Relaxed);
				}
			}
		}
		if let Some(err) = job.error {
			warn!("blockcache: cache-device write failed, entry dropped: {err}");
		}
		let data = match job.request.direction() {
			Direction::Read => Some(job.data),
			Direction::Write => None,
		};
		job.request.complete(PendingOutcome { data, result: Ok(()) });
	}
}

fn sector_count(len_bytes: u64) -> u64 {
	len_bytes.div_ceil(blockdev::SECTOR_SIZE)
}

use crate::consts::{DEFAULT_ASSOC, DEFAULT_BLOCK_SIZE_SECTORS, MIN_JOB_POOL_CAPACITY};

/// Write policy for populated cache blocks (`spec.md` §3.4, §4.4.4).
///
/// Write-back (dirty tracking, delayed flush to source) is explicitly a
/// non-goal (`spec.md` §1) and has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
	/// Every write reaches source, and on success is also pushed to the
	/// cache. RapidDisk's `WRITETHROUGH = 0`, the default.
	#[default]
	WriteThrough,
	/// Every write reaches source only; overlapping cache entries are
	/// invalidated but never (re-)populated by a write.
	WriteAround,
}

/// Construction parameters for a [`crate::BlockCacheEngine`]
/// (`spec.md` §4.4.7, §6.2).
#[derive(Debug, Clone, Copy)]
pub struct BlockCacheConfig {
	/// Total cache entries, or `None` to use the cache device's full
	/// capacity. Rounded down to a multiple of `assoc` (`spec.md` §3.4).
	pub size_blocks: Option<u64>,
	pub mode: CacheMode,
	/// Set associativity. Must be a power of two and `<= size_blocks`.
	pub assoc: u32,
	/// Cache block size, in sectors. Fixed per engine instance.
	pub block_size_sectors: u64,
	/// Capacity of the process-wide job pool backing this engine's
	/// subsystem, shared by every `BlockCacheEngine` (`spec.md` §3.5).
	pub job_pool_capacity: usize,
}

impl Default for BlockCacheConfig {
	fn default() -> Self {
		Self {
			size_blocks: None,
			mode: CacheMode::default(),
			assoc: DEFAULT_ASSOC,
			block_size_sectors: DEFAULT_BLOCK_SIZE_SECTORS,
			job_pool_capacity: MIN_JOB_POOL_CAPACITY,
		}
	}
}

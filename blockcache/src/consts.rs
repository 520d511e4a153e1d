pub use blockdev::SECTOR_SIZE;

/// Default cache block size, in sectors. `8` matches a 4 KiB page over
/// 512-byte sectors, RapidDisk's `CACHE_BLOCK_SIZE`.
pub const DEFAULT_BLOCK_SIZE_SECTORS: u64 = 8;

/// Default set associativity.
pub const DEFAULT_ASSOC: u32 = 512;

/// Lower bound on the shared job pool's capacity, RapidDisk's
/// `WT_MIN_JOBS`.
pub const MIN_JOB_POOL_CAPACITY: usize = 1024;

/// Prefix a cache device path must carry to be accepted as a RamDisk
/// volume reference (`spec.md` §6.2: "must start with the RamDisk
/// device-path prefix"), matching RapidDisk's `/dev/rd*` naming.
pub const RAMDISK_PATH_PREFIX: &str = "/dev/rd";

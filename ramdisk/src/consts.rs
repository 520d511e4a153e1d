pub use blockdev::SECTOR_SIZE;

/// Default page size backing a RAM disk's sparse page store, in bytes.
/// `4 KiB` gives `PAGE_SIZE / SECTOR_SIZE == 8` sectors per page, matching
/// the typical value named in the spec.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Default cap on the number of RAM disk volumes a single namespace will
/// register, matching RapidDisk's `MAX_RxDISKS`.
pub const DEFAULT_MAX_VOLUMES: u32 = 128;

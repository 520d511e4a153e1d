//! A lazily-allocated, RAM-backed block device with create / detach /
//! resize / flush / discard / lock lifecycle management.
//!
//! [`RamDiskNamespace`] owns a process-wide registry of [`RamDiskVolume`]s,
//! each backed by its own [`page_store::PageStore`]. A volume implements
//! [`blockdev::BlockDevice`] directly, so it can serve as either the
//! source or the cache device of a `blockcache::BlockCacheEngine`.

mod admin;
mod consts;
mod error;
mod handle;
mod namespace;
mod page_store;
mod stats;
mod volume;

pub use admin::{parse_line, AdminCommand, AdminError};
pub use consts::{DEFAULT_MAX_VOLUMES, DEFAULT_PAGE_SIZE};
pub use error::{PageStoreError, RamDiskError};
pub use handle::RamDiskHandle;
pub use namespace::{RamDiskNamespace, RamDiskNamespaceConfig};
pub use stats::RamDiskStats;
pub use volume::RamDiskVolume;

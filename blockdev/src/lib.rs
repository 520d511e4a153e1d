//! Shared block-device contract used by the RAM-backed store and the
//! set-associative cache layered on top of it.
//!
//! Both engines in this workspace speak to "a block device" only through
//! [`BlockDevice`]; neither depends on the other's concrete type. This
//! mirrors the layering in the rest of the workspace, where the cache
//! engine is generic over its source and cache devices rather than tied
//! to the RAM disk specifically.

mod error;
mod region;

pub use error::{DeviceError, ErrorCode};
pub use region::Region;

/// Fixed sector size for every device in this workspace.
pub const SECTOR_SIZE: u64 = 512;

/// A block device addressable in fixed-size sectors, supporting
/// scatter/gather-style submission, flush, and discard.
///
/// Implementors are expected to be cheap to clone-and-share (an `Arc<T>`
/// around interior-mutable state) since both engines hold devices behind
/// shared references across asynchronous completions.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait BlockDevice: Send + Sync {
	/// Total addressable capacity, in bytes. Always a multiple of
	/// [`SECTOR_SIZE`].
	fn capacity_bytes(&self) -> u64;

	/// Copy `buf.len()` bytes starting at `sector` into `buf`.
	///
	/// `buf.len()` need not be sector-aligned; callers may read partial
	/// sectors. Reading past `capacity_bytes()` fails with
	/// [`DeviceError::OutOfRange`].
	fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<(), DeviceError>;

	/// Copy `buf` into the device starting at `sector`.
	///
	/// Writing past `capacity_bytes()` fails with
	/// [`DeviceError::OutOfRange`]; writing to a read-only device fails
	/// with [`DeviceError::ReadOnly`] without mutating any state.
	fn write_at(&self, sector: u64, buf: &[u8]) -> Result<(), DeviceError>;

	/// Discard (zero or free) the sectors in `region`. Implementations
	/// that cannot discard at sub-page granularity may reject a
	/// misaligned region with [`DeviceError::Misaligned`].
	fn discard(&self, region: Region) -> Result<(), DeviceError>;

	/// Flush any buffered state. A volatile device may implement this as
	/// a no-op, but must still report success: callers rely on `flush`
	/// being a safe, always-supported capability.
	fn flush(&self) -> Result<(), DeviceError>;

	/// Preferred I/O block size in bytes, used by callers (in particular
	/// the block cache) to decide the unit of caching. Devices that have
	/// no opinion should return [`SECTOR_SIZE`].
	fn preferred_block_size(&self) -> u64 {
		SECTOR_SIZE
	}

	/// Whether this device is backed by a RAM disk volume.
	///
	/// `blockcache`'s constructor uses this to enforce `spec.md` §6.2's
	/// "cache device must be a RamDisk" constraint without this crate
	/// needing to depend on `ramdisk` to name its concrete type.
	fn is_ramdisk_backed(&self) -> bool {
		false
	}
}

impl<T: BlockDevice + ?Sized> BlockDevice for std::sync::Arc<T> {
	fn capacity_bytes(&self) -> u64 {
		(**self).capacity_bytes()
	}

	fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
		(**self).read_at(sector, buf)
	}

	fn write_at(&self, sector: u64, buf: &[u8]) -> Result<(), DeviceError> {
		(**self).write_at(sector, buf)
	}

	fn discard(&self, region: Region) -> Result<(), DeviceError> {
		(**self).discard(region)
	}

	fn flush(&self) -> Result<(), DeviceError> {
		(**self).flush()
	}

	fn preferred_block_size(&self) -> u64 {
		(**self).preferred_block_size()
	}

	fn is_ramdisk_backed(&self) -> bool {
		(**self).is_ramdisk_backed()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct NullDevice;

	impl BlockDevice for NullDevice {
		fn capacity_bytes(&self) -> u64 {
			0
		}

		fn read_at(&self, _sector: u64, _buf: &mut [u8]) -> Result<(), DeviceError> {
			Err(DeviceError::OutOfRange)
		}

		fn write_at(&self, _sector: u64, _buf: &[u8]) -> Result<(), DeviceError> {
			Err(DeviceError::OutOfRange)
		}

		fn discard(&self, _region: Region) -> Result<(), DeviceError> {
			Ok(())
		}

		fn flush(&self) -> Result<(), DeviceError> {
			Ok(())
		}
	}

	#[test]
	fn arc_forwards_to_inner_device() {
		let dev = std::sync::Arc::new(NullDevice);
		assert_eq!(dev.capacity_bytes(), 0);
		assert_eq!(dev.preferred_block_size(), SECTOR_SIZE);
		assert!(dev.flush().is_ok());
	}
}

use blockdev::ErrorCode;
use thiserror::Error;

/// Errors returned by the [`crate::page_store::PageStore`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PageStoreError {
	#[error("failed to allocate a page")]
	OutOfMemory,

	#[error("discard range is not page-aligned or not a page-size multiple")]
	Misaligned,
}

impl From<PageStoreError> for blockdev::DeviceError {
	fn from(value: PageStoreError) -> Self {
		match value {
			PageStoreError::OutOfMemory => blockdev::DeviceError::OutOfSpace,
			PageStoreError::Misaligned => blockdev::DeviceError::Misaligned,
		}
	}
}

/// Errors returned by administrative operations on a RAM disk namespace
/// (attach/detach/resize/lock/stats), per `spec.md` §6.5.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RamDiskError {
	#[error("no RAM disk with that id is attached")]
	NotFound,

	#[error("a RAM disk with that id is already attached")]
	Duplicate,

	#[error("too many RAM disks attached")]
	TooManyVolumes,

	#[error("size must be a non-zero multiple of {SECTOR_SIZE} bytes", SECTOR_SIZE = blockdev::SECTOR_SIZE)]
	InvalidSize,

	#[error("resize must grow the volume, never shrink it")]
	ShrinkNotAllowed,

	#[error("the volume has open handles")]
	Busy,

	#[error("the volume is locked read-only")]
	ReadOnly,

	#[error(transparent)]
	Device(#[from] blockdev::DeviceError),

	#[error(transparent)]
	PageStore(#[from] PageStoreError),
}

impl RamDiskError {
	pub fn code(&self) -> ErrorCode {
		match self {
			RamDiskError::NotFound => ErrorCode::NotFound,
			RamDiskError::Duplicate => ErrorCode::InvalidArgument,
			RamDiskError::TooManyVolumes => ErrorCode::InvalidArgument,
			RamDiskError::InvalidSize => ErrorCode::InvalidArgument,
			RamDiskError::ShrinkNotAllowed => ErrorCode::InvalidArgument,
			RamDiskError::Busy => ErrorCode::Busy,
			RamDiskError::ReadOnly => ErrorCode::ReadOnly,
			RamDiskError::Device(err) => err.code(),
			RamDiskError::PageStore(_) => ErrorCode::NoSpace,
		}
	}
}

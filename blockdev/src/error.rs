use thiserror::Error;

/// The host-platform-independent outcome of a failed device or
/// management operation. Every engine-specific error converts into one
/// of these; an embedder that needs actual errno values maps this enum
/// onto its own platform's set at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
	Success,
	NotFound,
	InvalidArgument,
	NoSpace,
	Busy,
	ReadOnly,
	Io,
}

/// Errors surfaced directly from [`crate::BlockDevice`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
	#[error("request falls outside the device's capacity")]
	OutOfRange,

	#[error("the device is locked read-only")]
	ReadOnly,

	#[error("the region is not aligned to the device's discard granularity")]
	Misaligned,

	#[error("the device has no space left to satisfy the request")]
	OutOfSpace,

	#[error("an I/O error occurred")]
	Io,
}

impl DeviceError {
	pub fn code(self) -> ErrorCode {
		match self {
			DeviceError::OutOfRange => ErrorCode::InvalidArgument,
			DeviceError::ReadOnly => ErrorCode::ReadOnly,
			DeviceError::Misaligned => ErrorCode::InvalidArgument,
			DeviceError::OutOfSpace => ErrorCode::NoSpace,
			DeviceError::Io => ErrorCode::Io,
		}
	}
}

use blockdev::{DeviceError, ErrorCode};
use thiserror::Error;

/// Rejected at construction time, before any state is allocated
/// (`spec.md` §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("associativity must be a power of two")]
	InvalidAssociativity,

	#[error("cache device is smaller than the requested associativity")]
	CacheTooSmall,

	#[error("cache path {0:?} does not name an attached RamDisk volume")]
	NotARamDisk(String),

	#[error("unrecognized cache mode {0:?}")]
	InvalidMode(String),

	#[error("requested size in blocks exceeds the cache device's capacity")]
	SizeExceedsCacheCapacity,

	#[error("missing required constructor argument: {0}")]
	MissingArgument(&'static str),

	#[error("failed to start the cache subsystem's worker thread pool: {0}")]
	SubsystemInit(String),
}

/// Transient, hot-path failure of the job dispatch machinery
/// (`spec.md` §4.3, §7): never retried inside the core, always surfaced
/// as an I/O error to the originating request.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JobPoolError {
	#[error("job pool exhausted")]
	Exhausted,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockCacheError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	JobPool(#[from] JobPoolError),

	#[error(transparent)]
	Device(#[from] DeviceError),
}

impl BlockCacheError {
	pub fn code(&self) -> ErrorCode {
		match self {
			BlockCacheError::Config(_) => ErrorCode::InvalidArgument,
			BlockCacheError::JobPool(_) => ErrorCode::Io,
			BlockCacheError::Device(err) => err.code(),
		}
	}
}

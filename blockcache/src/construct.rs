//! Parser for the device-mapper-style constructor string (`spec.md`
//! §6.2): positional, space-separated, with everything past the two
//! required paths optional. Kept as a thin text front-end over
//! [`crate::config::BlockCacheConfig`], per `spec.md` §9's guidance to
//! replace the kernel text protocol with a typed API while still
//! honoring the exact grammar where compatibility is wanted.

use crate::{
	config::{BlockCacheConfig, CacheMode},
	consts::{DEFAULT_ASSOC, DEFAULT_BLOCK_SIZE_SECTORS, MIN_JOB_POOL_CAPACITY, RAMDISK_PATH_PREFIX},
	errors::ConfigError,
};

/// Parsed constructor arguments, before the source/cache devices have
/// been resolved to live [`blockdev::BlockDevice`] handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
	pub source_path: String,
	pub cache_path: String,
	pub config: BlockCacheConfig,
}

/// Parse `"source cache [size_sectors] [mode] [assoc]"` (`spec.md`
/// §6.2). Only the device-path validation and syntactic checks happen
/// here; whether `cache_path` actually names a RamDisk volume is
/// checked by [`crate::engine::BlockCacheEngine::new`] against the
/// resolved device, not the path string.
pub fn parse_args(input: &str) -> Result<ParsedArgs, ConfigError> {
	let mut fields = input.split_whitespace();

	let source_path = fields
		.next()
		.ok_or(ConfigError::MissingArgument("source device path"))?
		.to_string();
	let cache_path = fields
		.next()
		.ok_or(ConfigError::MissingArgument("cache device path"))?
		.to_string();
	if !cache_path.starts_with(RAMDISK_PATH_PREFIX) {
		return Err(ConfigError::NotARamDisk(cache_path));
	}

	let size_blocks = fields
		.next()
		.map(|s| parse_size_sectors(s))
		.transpose()?;
	let mode = fields.next().map(parse_mode).transpose()?.unwrap_or_default();
	let assoc = fields
		.next()
		.map(parse_assoc)
		.transpose()?
		.unwrap_or(DEFAULT_ASSOC);

	if fields.next().is_some() {
		return Err(ConfigError::MissingArgument("unexpected trailing argument"));
	}

	Ok(ParsedArgs {
		source_path,
		cache_path,
		config: BlockCacheConfig {
			size_blocks,
			mode,
			assoc,
			block_size_sectors: DEFAULT_BLOCK_SIZE_SECTORS,
			job_pool_capacity: MIN_JOB_POOL_CAPACITY,
		},
	})
}

fn parse_size_sectors(field: &str) -> Result<u64, ConfigError> {
	let sectors: u64 = field
		.parse()
		.map_err(|_| ConfigError::MissingArgument("cache size in sectors"))?;
	Ok(sectors / DEFAULT_BLOCK_SIZE_SECTORS)
}

fn parse_mode(field: &str) -> Result<CacheMode, ConfigError> {
	match field {
		"0" => Ok(CacheMode::WriteThrough),
		"1" => Ok(CacheMode::WriteAround),
		other => Err(ConfigError::InvalidMode(other.to_string())),
	}
}

fn parse_assoc(field: &str) -> Result<u32, ConfigError> {
	field
		.parse()
		.map_err(|_| ConfigError::MissingArgument("associativity"))
}

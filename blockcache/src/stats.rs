use std::fmt;

use crate::{config::CacheMode, context::CacheCountersSnapshot};

/// A point-in-time snapshot of one engine's configuration and counters
/// (`spec.md` §3.4, §6.4), suitable for a status line or a management
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCacheStats {
	pub mode: CacheMode,
	pub assoc: u32,
	pub block_size_sectors: u64,
	pub size_blocks: u64,
	pub counters: CacheCountersSnapshot,
}

impl fmt::Display for BlockCacheStats {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mode = match self.mode {
			CacheMode::WriteThrough => "writethrough",
			CacheMode::WriteAround => "writearound",
		};
		write!(
			f,
			"{} blocks, assoc {}, {} sectors/block, mode {mode}: \
			 {} rd, {} wr, {} hits, {} replace, {} cached, \
			 {} rd_invalid, {} wr_invalid, {} uncached_rd, {} uncached_wr",
			self.size_blocks,
			self.assoc,
			self.block_size_sectors,
			self.counters.reads,
			self.counters.writes,
			self.counters.cache_hits,
			self.counters.replace,
			self.counters.cached_blocks,
			self.counters.rd_invalidates,
			self.counters.wr_invalidates,
			self.counters.uncached_reads,
			self.counters.uncached_writes,
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_includes_mode_and_counts() {
		let stats = BlockCacheStats {
			mode: CacheMode::WriteThrough,
			assoc: 4,
			block_size_sectors: 8,
			size_blocks: 64,
			counters: CacheCountersSnapshot {
				reads: 10,
				cache_hits: 3,
				..Default::default()
			},
		};
		let text = stats.to_string();
		assert!(text.contains("writethrough"));
		assert!(text.contains("10 rd"));
		assert!(text.contains("3 hits"));
	}
}

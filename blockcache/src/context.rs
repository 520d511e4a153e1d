use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache_block::{CacheBlock, CacheBlockState};

/// Direction of an I/O request, used to pick which invalidation counter
/// to bump (`spec.md` §4.4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Read,
	Write,
}

/// The plain unsigned counters of `spec.md` §3.4. Each is independently
/// atomic rather than behind the context lock: counter bookkeeping is
/// pure addition and happens both on the submission path and from async
/// completion callbacks, so serializing it behind the same lock that
/// protects entry state would be needless contention.
#[derive(Default)]
pub struct CacheCounters {
	pub reads: AtomicU64,
	pub writes: AtomicU64,
	pub cache_hits: AtomicU64,
	pub replace: AtomicU64,
	pub wr_invalidates: AtomicU64,
	pub rd_invalidates: AtomicU64,
	pub cached_blocks: AtomicU64,
	pub cache_wr_replace: AtomicU64,
	pub uncached_reads: AtomicU64,
	pub uncached_writes: AtomicU64,
	pub cache_reads: AtomicU64,
	pub cache_writes: AtomicU64,
	pub disk_reads: AtomicU64,
	pub disk_writes: AtomicU64,
}

impl CacheCounters {
	pub(crate) fn snapshot(&self) -> CacheCountersSnapshot {
		CacheCountersSnapshot {
			reads: self.reads.load(Ordering::Relaxed),
			writes: self.writes.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			replace: self.replace.load(Ordering::Relaxed),
			wr_invalidates: self.wr_invalidates.load(Ordering::Relaxed),
			rd_invalidates: self.rd_invalidates.load(Ordering::Relaxed),
			cached_blocks: self.cached_blocks.load(Ordering::Relaxed),
			cache_wr_replace: self.cache_wr_replace.load(Ordering::Relaxed),
			uncached_reads: self.uncached_reads.load(Ordering::Relaxed),
			uncached_writes: self.uncached_writes.load(Ordering::Relaxed),
			cache_reads: self.cache_reads.load(Ordering::Relaxed),
			cache_writes: self.cache_writes.load(Ordering::Relaxed),
			disk_reads: self.disk_reads.load(Ordering::Relaxed),
			disk_writes: self.disk_writes.load(Ordering::Relaxed),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheCountersSnapshot {
	pub reads: u64,
	pub writes: u64,
	pub cache_hits: u64,
	pub replace: u64,
	pub wr_invalidates: u64,
	pub rd_invalidates: u64,
	pub cached_blocks: u64,
	pub cache_wr_replace: u64,
	pub uncached_reads: u64,
	pub uncached_writes: u64,
	pub cache_reads: u64,
	pub cache_writes: u64,
	pub disk_reads: u64,
	pub disk_writes: u64,
}

/// The mutable part of the cache context: the entry table and the
/// per-set FIFO sweep cursor, protected as one unit by the context lock
/// (`spec.md` §3.4, §5). Everything here is only ever touched with the
/// lock held.
pub(crate) struct ContextState {
	pub entries: Vec<CacheBlock>,
	pub set_lru_next: Vec<u32>,
}

impl ContextState {
	pub fn new(size_blocks: u64, assoc: u32) -> Self {
		let num_sets = size_blocks / assoc as u64;
		let entries = vec![CacheBlock::empty(); size_blocks as usize];
		let set_lru_next = (0..num_sets).map(|s| (s * assoc as u64) as u32).collect();
		Self {
			entries,
			set_lru_next,
		}
	}
}

/// Outcome of scanning one set for `dbn` (`spec.md` §4.4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetLookup {
	/// `dbn` matches a `Valid` entry: a cache hit.
	Hit { index: usize },
	/// `dbn` matches an entry that is `InProg`/`CacheReadInProg`: someone
	/// else is already servicing this sector.
	InFlight { index: usize },
	/// `dbn` matches an entry that was invalidated mid-fill.
	AlreadyInvalidated { index: usize },
	/// No entry matches `dbn`. `slot` is the index to populate, if any;
	/// `evicted_valid` says whether that slot held a `Valid` victim that
	/// must be accounted for as a replacement.
	Miss {
		slot: Option<usize>,
		evicted_valid: bool,
	},
}

/// Associativity-aware helpers shared by the read and write algorithms.
/// Free functions (not methods on the engine) so they can be unit-tested
/// against a bare `ContextState` without constructing a whole engine.
pub(crate) fn set_index(dbn: u64, block_size_sectors: u64, assoc: u32, size_blocks: u64) -> usize {
	let block_shift = block_size_sectors.trailing_zeros();
	let consecutive_shift = assoc.trailing_zeros();
	let num_sets = size_blocks >> consecutive_shift;
	((dbn >> (block_shift + consecutive_shift)) % num_sets) as usize
}

pub(crate) fn lookup_set(state: &ContextState, assoc: u32, set: usize, dbn: u64) -> SetLookup {
	let assoc = assoc as usize;
	let base = set * assoc;

	for i in 0..assoc {
		let entry = &state.entries[base + i];
		if entry.state != CacheBlockState::Invalid && entry.dbn == dbn {
			return match entry.state {
				CacheBlockState::Valid => SetLookup::Hit { index: base + i },
				CacheBlockState::InProg | CacheBlockState::CacheReadInProg => {
					SetLookup::InFlight { index: base + i }
				}
				CacheBlockState::InProgInvalid => SetLookup::AlreadyInvalidated { index: base + i },
				CacheBlockState::Invalid => unreachable!(),
			};
		}
	}

	if let Some(offset) = (0..assoc).find(|&i| state.entries[base + i].state == CacheBlockState::Invalid)
	{
		return SetLookup::Miss {
			slot: Some(base + offset),
			evicted_valid: false,
		};
	}

	let start = state.set_lru_next[set] as usize - base;
	for step in 0..assoc {
		let offset = (start + step) % assoc;
		if state.entries[base + offset].state == CacheBlockState::Valid {
			return SetLookup::Miss {
				slot: Some(base + offset),
				evicted_valid: true,
			};
		}
	}

	SetLookup::Miss {
		slot: None,
		evicted_valid: false,
	}
}

/// Advance the FIFO sweep cursor for `set` past the just-chosen victim
/// offset within that set (`spec.md` §4.4.2).
pub(crate) fn advance_lru(state: &mut ContextState, assoc: u32, set: usize, chosen_index: usize) {
	let base = set * assoc as usize;
	let offset = (chosen_index - base) as u32;
	state.set_lru_next[set] = base as u32 + (offset + 1) % assoc;
}

/// Invalidate entries in `set` whose cached range overlaps
/// `[io_start, io_end)`, per `spec.md` §4.4.5. Returns the number of
/// in-progress entries that were converted to `InProgInvalid`.
pub(crate) fn invalidate_set(
	state: &mut ContextState,
	counters: &CacheCounters,
	assoc: u32,
	set: usize,
	block_size_sectors: u64,
	io_start: u64,
	io_end: u64,
	direction: Direction,
) -> u32 {
	let base = set * assoc as usize;
	let mut in_progress_invalidations = 0;

	for i in 0..assoc as usize {
		let entry = &mut state.entries[base + i];
		if !entry.overlaps(block_size_sectors, io_start, io_end) {
			continue;
		}
		match entry.state {
			CacheBlockState::Valid => {
				entry.state = CacheBlockState::Invalid;
				counters.cached_blocks.fetch_sub(1, Ordering::Relaxed);
			}
			CacheBlockState::InProg | CacheBlockState::CacheReadInProg => {
				entry.state = CacheBlockState::InProgInvalid;
				in_progress_invalidations += 1;
			}
			CacheBlockState::InProgInvalid | CacheBlockState::Invalid => {}
		}
		match direction {
			Direction::Read => counters.rd_invalidates.fetch_add(1, Ordering::Relaxed),
			Direction::Write => counters.wr_invalidates.fetch_add(1, Ordering::Relaxed),
		};
	}

	in_progress_invalidations
}

/// Invalidate overlapping entries in whichever one or two sets the byte
/// range `[io_start, io_start + io_len_sectors)` touches (`spec.md`
/// §4.4.5: "for each of the start- and end-sets"). Returns the total
/// count of in-progress invalidations across both sets, used by the
/// caller to decide whether to bypass.
///
/// Callers already hold the context lock (`state`); this is a free
/// function rather than a method so it composes with the write
/// algorithm's "invalidate, then look up, under the same lock
/// acquisition" shape without re-entering the mutex.
#[allow(clippy::too_many_arguments)]
pub(crate) fn invalidate_overlap(
	state: &mut ContextState,
	counters: &CacheCounters,
	assoc: u32,
	block_size_sectors: u64,
	size_blocks: u64,
	io_start: u64,
	io_len_sectors: u64,
	direction: Direction,
) -> u32 {
	let io_end = io_start + io_len_sectors;
	let last_sector = io_end.saturating_sub(1).max(io_start);
	let start_set = set_index(io_start, block_size_sectors, assoc, size_blocks);
	let end_set = set_index(last_sector, block_size_sectors, assoc, size_blocks);

	let mut invalidations = invalidate_set(
		state,
		counters,
		assoc,
		start_set,
		block_size_sectors,
		io_start,
		io_end,
		direction,
	);
	if end_set != start_set {
		invalidations += invalidate_set(
			state,
			counters,
			assoc,
			end_set,
			block_size_sectors,
			io_start,
			io_end,
			direction,
		);
	}
	invalidations
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn set_index_groups_consecutive_blocks() {
		// block_size_sectors=8, assoc=2, size_blocks=4 -> num_sets=2
		let idx_a = set_index(5 * 8, 8, 2, 4);
		let idx_b = set_index(5 * 8 + 1, 8, 2, 4);
		assert_eq!(idx_a, idx_b, "consecutive dbns within a block share a set");
	}

	#[test]
	fn lookup_prefers_invalid_slot_over_victim() {
		let mut state = ContextState::new(4, 2);
		state.entries[0].state = CacheBlockState::Valid;
		state.entries[0].dbn = 1;
		// entries[1] is still Invalid: should be chosen over evicting entries[0].
		match lookup_set(&state, 2, 0, 99) {
			SetLookup::Miss {
				slot: Some(1),
				evicted_valid: false,
			} => {}
			other => panic!("expected invalid slot 1, got {other:?}"),
		}
	}

	#[test]
	fn lookup_sweeps_for_victim_when_set_full() {
		let mut state = ContextState::new(4, 2);
		state.entries[0].state = CacheBlockState::Valid;
		state.entries[0].dbn = 1;
		state.entries[1].state = CacheBlockState::Valid;
		state.entries[1].dbn = 2;
		state.set_lru_next[0] = 1;
		match lookup_set(&state, 2, 0, 99) {
			SetLookup::Miss {
				slot: Some(1),
				evicted_valid: true,
			} => {}
			other => panic!("expected victim slot 1, got {other:?}"),
		}
	}

	#[test]
	fn invalidate_set_converts_in_progress_and_counts_it() {
		let mut state = ContextState::new(2, 2);
		let counters = CacheCounters::default();
		state.entries[0].state = CacheBlockState::InProg;
		state.entries[0].dbn = 5;

		let count = invalidate_set(&mut state, &counters, 2, 0, 8, 5, 13, Direction::Write);
		assert_eq!(count, 1);
		assert_eq!(state.entries[0].state, CacheBlockState::InProgInvalid);
		assert_eq!(counters.wr_invalidates.load(Ordering::Relaxed), 1);
	}

	#[test]
	fn invalidate_overlap_spans_two_sets() {
		// block_size_sectors=8, assoc=2, size_blocks=4 -> num_sets=2.
		// A 2-block-wide write starting at the last block of set 0 touches
		// both sets (`spec.md` §4.4.5: "for each of the start- and
		// end-sets").
		let mut state = ContextState::new(4, 2);
		let counters = CacheCounters::default();
		state.entries[1].state = CacheBlockState::Valid; // set 0, dbn 8
		state.entries[1].dbn = 8;
		state.entries[2].state = CacheBlockState::Valid; // set 1, dbn 16
		state.entries[2].dbn = 16;

		let count = invalidate_overlap(&mut state, &counters, 2, 8, 4, 8, 16, Direction::Write);

		assert_eq!(count, 0);
		assert_eq!(state.entries[1].state, CacheBlockState::Invalid);
		assert_eq!(state.entries[2].state, CacheBlockState::Invalid);
		assert_eq!(counters.wr_invalidates.load(Ordering::Relaxed), 2);
	}

	#[test]
	fn invalidate_set_drops_valid_entries() {
		let mut state = ContextState::new(2, 2);
		let counters = CacheCounters::default();
		counters.cached_blocks.store(1, Ordering::Relaxed);
		state.entries[0].state = CacheBlockState::Valid;
		state.entries[0].dbn = 5;

		let count = invalidate_set(&mut state, &counters, 2, 0, 8, 5, 13, Direction::Read);
		assert_eq!(count, 0);
		assert_eq!(state.entries[0].state, CacheBlockState::Invalid);
		assert_eq!(counters.cached_blocks.load(Ordering::Relaxed), 0);
		assert_eq!(counters.rd_invalidates.load(Ordering::Relaxed), 1);
	}
}

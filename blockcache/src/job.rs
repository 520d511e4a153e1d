use std::sync::Arc;

use blockdev::{DeviceError, Region};
use parking_lot::{Condvar, Mutex};

use crate::{context::Direction, engine::BlockCacheEngine};

/// The `rw` tag of a job (`spec.md` §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
	ReadCache,
	WriteCache,
	ReadSource,
	WriteSource,
	ReadCacheDone,
}

/// Outcome delivered back to whichever thread is blocked in
/// [`PendingRequest::wait`].
pub(crate) struct PendingOutcome {
	pub result: Result<(), DeviceError>,
	/// Populated for reads: the bytes to copy into the caller's buffer.
	pub data: Option<Box<[u8]>>,
}

/// The synchronous face of an otherwise async job: the engine's public
/// `read`/`write` call blocks here while the job travels through the
/// pool, a device call, and possibly the worker, exactly mirroring a
/// kernel submit/bio-completion handshake without exposing futures to
/// the caller.
pub(crate) struct PendingRequest {
	sector: u64,
	direction: Direction,
	outcome: Mutex<Option<PendingOutcome>>,
	condvar: Condvar,
}

impl PendingRequest {
	pub fn new(sector: u64, direction: Direction) -> Arc<Self> {
		Arc::new(Self {
			sector,
			direction,
			outcome: Mutex::new(None),
			condvar: Condvar::new(),
		})
	}

	pub fn sector(&self) -> u64 {
		self.sector
	}

	pub fn direction(&self) -> Direction {
		self.direction
	}

	pub fn complete(&self, outcome: PendingOutcome) {
		*self.outcome.lock() = Some(outcome);
		self.condvar.notify_all();
	}

	pub fn wait(&self) -> PendingOutcome {
		let mut guard = self.outcome.lock();
		loop {
			if let Some(outcome) = guard.take() {
				return outcome;
			}
			self.condvar.wait(&mut guard);
		}
	}
}

/// A job in flight between dispatch and completion (`spec.md` §3.5).
pub(crate) struct Job {
	pub engine: Arc<BlockCacheEngine>,
	pub request: Arc<PendingRequest>,
	pub disk: Region,
	pub cache: Region,
	pub entry_index: Option<usize>,
	pub rw: JobKind,
	pub data: Box<[u8]>,
	pub error: Option<DeviceError>,
}

/// Fixed-capacity slab of jobs, shared process-wide by every
/// [`BlockCacheEngine`] through a [`crate::worker::BlockCacheSubsystem`]
/// (`spec.md` §3.5, §5). Jobs are identified by index, not by pointer,
/// per the spec's guidance to prefer index-based hot-path structures.
pub(crate) struct JobPool {
	inner: Mutex<JobPoolInner>,
}

struct JobPoolInner {
	slots: Vec<Option<Job>>,
	free: Vec<usize>,
}

impl JobPool {
	pub fn new(capacity: usize) -> Self {
		let mut slots = Vec::with_capacity(capacity);
		slots.resize_with(capacity, || None);
		Self {
			inner: Mutex::new(JobPoolInner {
				slots,
				free: (0..capacity).rev().collect(),
			}),
		}
	}

	/// Acquire a free slot and install `job` into it, or fail if the
	/// pool is exhausted (`spec.md` §4.3/§7: never block, fail fast).
	pub fn acquire(&self, job: Job) -> Result<usize, Job> {
		let mut inner = self.inner.lock();
		let Some(index) = inner.free.pop() else {
			return Err(job);
		};
		inner.slots[index] = Some(job);
		Ok(index)
	}

	pub fn with_mut<R>(&self, index: usize, f: impl FnOnce(&mut Job) -> R) -> R {
		let mut inner = self.inner.lock();
		let job = inner.slots[index]
			.as_mut()
			.expect("job slot referenced after release");
		f(job)
	}

	/// Remove and return the job at `index`, returning its slot to the
	/// free list.
	pub fn release(&self, index: usize) -> Job {
		let mut inner = self.inner.lock();
		inner.free.push(index);
		inner.slots[index]
			.take()
			.expect("job slot referenced after release")
	}

	#[cfg(test)]
	pub fn capacity(&self) -> usize {
		self.inner.lock().slots.len()
	}
}

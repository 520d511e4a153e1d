//! The process-wide job pool and its single worker (`spec.md` §4.3, §5).
//!
//! The worker drains two FIFOs, `completion_jobs` and `io_jobs`, under
//! one lock, exactly as specified: `completion_jobs` carries
//! `READ_CACHE_DONE` bypass-retries, `io_jobs` carries `WRITE_CACHE`
//! writes to populate the cache after a source hit. Both ultimately
//! call back into [`crate::engine::BlockCacheEngine`] to apply the state
//! machine and release the job.

use std::{collections::VecDeque, io, sync::Arc};

use futures::executor::ThreadPool;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::job::{Job, JobPool};

struct QueuesInner {
	completion_jobs: VecDeque<usize>,
	io_jobs: VecDeque<usize>,
	outstanding: usize,
	shutting_down: bool,
}

struct JobQueues {
	inner: Mutex<QueuesInner>,
	condvar: Condvar,
}

impl JobQueues {
	fn new() -> Self {
		Self {
			inner: Mutex::new(QueuesInner {
				completion_jobs: VecDeque::new(),
				io_jobs: VecDeque::new(),
				outstanding: 0,
				shutting_down: false,
			}),
			condvar: Condvar::new(),
		}
	}
}

/// Global process state for the cache subsystem: the job pool, its two
/// queues, and the single worker. Constructed explicitly by the
/// embedder and shared by every `BlockCacheEngine`, rather than a
/// `static`, per the spec's explicit-lifecycle guidance (`spec.md` §9).
pub struct BlockCacheSubsystem {
	pub(crate) pool: JobPool,
	queues: JobQueues,
	executor: ThreadPool,
}

impl BlockCacheSubsystem {
	pub fn new(job_pool_capacity: usize) -> Result<Arc<Self>, io::Error> {
		let subsystem = Arc::new(Self {
			pool: JobPool::new(job_pool_capacity),
			queues: JobQueues::new(),
			executor: ThreadPool::new()?,
		});
		let worker = Arc::clone(&subsystem);
		subsystem.executor.spawn_ok(async move {
			worker.run_worker();
		});
		Ok(subsystem)
	}

	/// Register a job as outstanding, refusing if teardown has already
	/// begun (`spec.md` §4.3: "new job submission must not be accepted
	/// once teardown has begun"). Every job acquired from the pool must
	/// be counted here exactly once, for the leg of its life that runs
	/// from [`Self::dispatch_async`] through to whichever of
	/// [`Self::untrack_outstanding`], [`Self::push_completion_job`]'s
	/// drain, or [`Self::push_io_job`]'s drain finally releases it, so
	/// the destroy barrier can observe drain-to-zero.
	pub(crate) fn track_outstanding(&self) -> bool {
		let mut inner = self.queues.inner.lock();
		if inner.shutting_down {
			return false;
		}
		inner.outstanding += 1;
		true
	}

	pub(crate) fn untrack_outstanding(&self) {
		let mut inner = self.queues.inner.lock();
		inner.outstanding -= 1;
		if inner.outstanding == 0 {
			self.queues.condvar.notify_all();
		}
	}

	/// Run a blocking device call on a pool thread against the job
	/// already resident at `index`, then hand the index to
	/// `on_complete`. This is the "asynchronous read/write" of
	/// `spec.md` §4.4.3/§4.4.4: the calling thread does not block here,
	/// only the `PendingRequest` it waits on later does.
	///
	/// `index` must already be tracked via [`Self::track_outstanding`]
	/// by the caller (who acquired it from [`crate::job::JobPool`]);
	/// `on_complete` is responsible for eventually releasing the slot
	/// and calling [`Self::untrack_outstanding`], whether directly or by
	/// handing the index to one of the two queues.
	pub(crate) fn dispatch_async(
		self: &Arc<Self>,
		index: usize,
		run: impl FnOnce(&mut Job) + Send + 'static,
		on_complete: impl FnOnce(Arc<Self>, usize) + Send + 'static,
	) {
		let subsystem = Arc::clone(self);
		self.executor.spawn_ok(async move {
			subsystem.pool.with_mut(index, run);
			on_complete(subsystem, index);
		});
	}

	/// Push a `READ_CACHE_DONE` job for the worker to bypass-retry.
	pub(crate) fn push_completion_job(&self, index: usize) {
		let mut inner = self.queues.inner.lock();
		inner.completion_jobs.push_back(index);
		self.queues.condvar.notify_all();
	}

	/// Push a `WRITE_CACHE` job for the worker to issue to the cache
	/// device.
	pub(crate) fn push_io_job(&self, index: usize) {
		let mut inner = self.queues.inner.lock();
		inner.io_jobs.push_back(index);
		self.queues.condvar.notify_all();
	}

	/// Block until every outstanding job has drained and refuse new
	/// submissions from this point on (`spec.md` §4.3, §4.4.7 teardown).
	pub fn shutdown(&self) {
		let mut inner = self.queues.inner.lock();
		inner.shutting_down = true;
		self.queues.condvar.notify_all();
		while inner.outstanding > 0 || !inner.completion_jobs.is_empty() || !inner.io_jobs.is_empty()
		{
			self.queues.condvar.wait(&mut inner);
		}
	}

	fn run_worker(self: Arc<Self>) {
		loop {
			let mut inner = self.queues.inner.lock();
			loop {
				if let Some(index) = inner.completion_jobs.pop_front() {
					drop(inner);
					self.drain_completion_job(index);
					inner = self.queues.inner.lock();
					continue;
				}
				if let Some(index) = inner.io_jobs.pop_front() {
					drop(inner);
					self.drain_io_job(index);
					inner = self.queues.inner.lock();
					continue;
				}
				// `outstanding` covers jobs that have been tracked but not
				// yet reached either queue (an in-flight `dispatch_async`
				// leg running on another pool thread). Exiting on empty
				// queues alone would race: that leg could enqueue a
				// completion/IO job immediately after this check, and with
				// no worker left to drain it, `shutdown` would wait on
				// `outstanding` forever. Requiring it to be zero first
				// means every tracked job is either queued here (and thus
				// handled below) or already fully released.
				if inner.shutting_down && inner.outstanding == 0 {
					debug!("blockcache worker exiting: teardown complete");
					return;
				}
				self.queues.condvar.wait(&mut inner);
			}
		}
	}

	fn drain_completion_job(self: &Arc<Self>, index: usize) {
		let job = self.pool.release(index);
		let engine = Arc::clone(&job.engine);
		engine.finish_read_cache_done(job);
		self.untrack_outstanding();
	}

	fn drain_io_job(self: &Arc<Self>, index: usize) {
		let subsystem = Arc::clone(self);
		self.pool.with_mut(index, |job| {
			if job.error.is_some() {
				warn!("blockcache: skipping cache write, job already carries an error");
			}
		});
		let job = self.pool.release(index);
		let engine = Arc::clone(&job.engine);
		let cache = Arc::clone(engine.cache_device());
		let mut job = job;
		let result = cache.write_at(job.cache.sector, &job.data);
		job.error = result.err();
		engine.finish_write_cache(job);
		subsystem.untrack_outstanding();
	}
}

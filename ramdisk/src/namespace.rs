use std::{collections::HashMap, sync::Arc};

use log::info;
use parking_lot::RwLock;

use crate::{
	consts::{DEFAULT_MAX_VOLUMES, DEFAULT_PAGE_SIZE},
	error::RamDiskError,
	handle::RamDiskHandle,
	stats::RamDiskStats,
	volume::RamDiskVolume,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamDiskNamespaceConfig {
	/// Maximum number of volumes the namespace will register at once,
	/// matching RapidDisk's `max_rxcnt` module parameter.
	pub max_volumes: u32,
	/// Page size used by every volume's page store. Fixed for the
	/// lifetime of the namespace, matching the spec's "set at boot"
	/// sectors-per-page contract (`spec.md` §3.1).
	pub page_size_bytes: u64,
}

impl Default for RamDiskNamespaceConfig {
	fn default() -> Self {
		Self {
			max_volumes: DEFAULT_MAX_VOLUMES,
			page_size_bytes: DEFAULT_PAGE_SIZE,
		}
	}
}

/// Process-wide registry of attached RAM disk volumes: the realization of
/// the `attach`/`detach`/`resize`/`set_lock`/`get_stats` admin surface in
/// `spec.md` §4.2/§6.3.
pub struct RamDiskNamespace {
	config: RamDiskNamespaceConfig,
	volumes: RwLock<HashMap<u32, Arc<RamDiskVolume>>>,
}

impl RamDiskNamespace {
	pub fn new(config: RamDiskNamespaceConfig) -> Self {
		Self {
			config,
			volumes: RwLock::new(HashMap::new()),
		}
	}

	/// Attach a new volume. Fails on a duplicate id, too many volumes, or
	/// a capacity that is zero or not a multiple of the sector size
	/// (`spec.md` §4.2).
	pub fn attach(&self, id: u32, size_bytes: u64) -> Result<(), RamDiskError> {
		let mut volumes = self.volumes.write();
		if volumes.contains_key(&id) {
			return Err(RamDiskError::Duplicate);
		}
		if volumes.len() as u32 >= self.config.max_volumes {
			return Err(RamDiskError::TooManyVolumes);
		}
		let volume = RamDiskVolume::new(id, size_bytes, self.config.page_size_bytes)?;
		volumes.insert(id, Arc::new(volume));
		info!("ramdisk rd{id} attached ({size_bytes} bytes)");
		Ok(())
	}

	fn lookup(&self, id: u32) -> Result<Arc<RamDiskVolume>, RamDiskError> {
		self.volumes
			.read()
			.get(&id)
			.cloned()
			.ok_or(RamDiskError::NotFound)
	}

	/// Open a handle on an attached volume. Required before issuing I/O
	/// or calling `flush`, so that "no open handles" / "last open handle"
	/// conditions on detach/flush are well defined.
	pub fn open(&self, id: u32) -> Result<RamDiskHandle, RamDiskError> {
		let volume = self.lookup(id)?;
		Ok(RamDiskHandle::open(volume))
	}

	/// Remove a volume from the namespace and free all of its pages.
	/// Idempotent only when no handles are open on it.
	pub fn detach(&self, id: u32) -> Result<(), RamDiskError> {
		let mut volumes = self.volumes.write();
		let Some(volume) = volumes.get(&id) else {
			return Err(RamDiskError::NotFound);
		};
		if volume.open_handle_count() > 0 {
			return Err(RamDiskError::Busy);
		}
		volumes.remove(&id);
		info!("ramdisk rd{id} detached");
		Ok(())
	}

	/// Grow-only resize (`spec.md` §4.2).
	pub fn resize(&self, id: u32, new_size_bytes: u64) -> Result<(), RamDiskError> {
		self.lookup(id)?.resize(new_size_bytes)
	}

	pub fn set_lock(&self, id: u32, locked: bool) -> Result<(), RamDiskError> {
		self.lookup(id)?.set_lock(locked);
		Ok(())
	}

	/// `BLKFLSBUF` on the handle's volume: frees all pages and resets
	/// counters if this is the last open handle, otherwise busy
	/// (`spec.md` §3.2, §4.2).
	pub fn flush(&self, handle: &RamDiskHandle) -> Result<(), RamDiskError> {
		handle.volume().blkflsbuf()
	}

	pub fn get_stats(&self, id: u32) -> Result<RamDiskStats, RamDiskError> {
		Ok(self.lookup(id)?.stats())
	}

	pub fn volume(&self, id: u32) -> Result<Arc<RamDiskVolume>, RamDiskError> {
		self.lookup(id)
	}

	pub fn len(&self) -> usize {
		self.volumes.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn namespace() -> RamDiskNamespace {
		RamDiskNamespace::new(RamDiskNamespaceConfig::default())
	}

	#[test]
	fn attach_rejects_duplicate_id() {
		let ns = namespace();
		ns.attach(0, 4096).unwrap();
		assert_eq!(ns.attach(0, 4096), Err(RamDiskError::Duplicate));
	}

	#[test]
	fn attach_rejects_misaligned_size() {
		let ns = namespace();
		assert_eq!(ns.attach(0, 511), Err(RamDiskError::InvalidSize));
	}

	#[test]
	fn detach_requires_no_open_handles() {
		let ns = namespace();
		ns.attach(0, 4096).unwrap();
		let handle = ns.open(0).unwrap();
		assert_eq!(ns.detach(0), Err(RamDiskError::Busy));
		drop(handle);
		ns.detach(0).unwrap();
		assert_eq!(ns.detach(0), Err(RamDiskError::NotFound));
	}

	#[test]
	fn detach_frees_pages() {
		use blockdev::BlockDevice;

		let ns = namespace();
		ns.attach(0, 4096).unwrap();
		{
			let handle = ns.open(0).unwrap();
			handle.volume().write_at(0, &[1; 16]).unwrap();
		}
		ns.detach(0).unwrap();
		ns.attach(0, 4096).unwrap();
		assert_eq!(ns.get_stats(0).unwrap().pages_allocated, 0);
	}

	#[test]
	fn too_many_volumes_rejected() {
		let ns = RamDiskNamespace::new(RamDiskNamespaceConfig {
			max_volumes: 1,
			..Default::default()
		});
		ns.attach(0, 4096).unwrap();
		assert_eq!(ns.attach(1, 4096), Err(RamDiskError::TooManyVolumes));
	}

	#[test]
	fn operations_on_missing_volume_are_not_found() {
		let ns = namespace();
		assert_eq!(ns.resize(0, 4096), Err(RamDiskError::NotFound));
		assert_eq!(ns.set_lock(0, true), Err(RamDiskError::NotFound));
		assert_eq!(ns.get_stats(0), Err(RamDiskError::NotFound));
	}
}

use std::sync::Arc;

use crate::volume::RamDiskVolume;

/// An RAII open handle on a [`RamDiskVolume`].
///
/// Holding one prevents `detach` from succeeding and makes `flush`
/// (`BLKFLSBUF`) report busy unless this is the only handle outstanding
/// (`spec.md` §3.2, §4.2). Dropping the handle releases it.
pub struct RamDiskHandle {
	volume: Arc<RamDiskVolume>,
}

impl RamDiskHandle {
	pub(crate) fn open(volume: Arc<RamDiskVolume>) -> Self {
		volume.inc_handles();
		Self { volume }
	}

	pub fn volume(&self) -> &Arc<RamDiskVolume> {
		&self.volume
	}
}

impl Drop for RamDiskHandle {
	fn drop(&mut self) {
		self.volume.dec_handles();
	}
}

use std::fmt;

/// Status readout for one RAM disk volume (`spec.md` §6.1, §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamDiskStats {
	pub id: u32,
	pub capacity_bytes: u64,
	pub max_blk_alloc_sectors: u64,
	pub pages_allocated: u64,
	pub error_count: u64,
	pub locked: bool,
}

impl fmt::Display for RamDiskStats {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "rd{}", self.id)?;
		writeln!(f, "  capacity_bytes: {}", self.capacity_bytes)?;
		writeln!(f, "  max_blk_alloc_sectors: {}", self.max_blk_alloc_sectors)?;
		writeln!(f, "  pages_allocated: {}", self.pages_allocated)?;
		writeln!(f, "  error_count: {}", self.error_count)?;
		write!(f, "  read_only: {}", self.locked)
	}
}

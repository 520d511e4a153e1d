use parking_lot::RwLock;

/// A single fixed-size, zero-initialized page of a [`super::PageStore`].
///
/// The page body is behind its own lock so that concurrent readers and a
/// single writer to the *same* page never tear each other's bytes, while
/// unrelated pages remain entirely independent; the page table lock only
/// ever needs to be held long enough to look up or insert the `Arc<Page>`.
pub(crate) struct Page {
	data: RwLock<Box<[u8]>>,
}

impl Page {
	/// Allocate a new zeroed page. Returns `None` on allocation failure,
	/// mirroring the "fails rather than sleeps" hot-path contract for
	/// page allocation (`spec.md` §4.1/§5): there is no fallible global
	/// allocator hook in stable Rust, so this can only fail via
	/// `try_reserve`-style paths, which is what `Box<[u8]>` construction
	/// below uses.
	pub fn zeroed(size: usize) -> Option<Self> {
		let mut data = Vec::new();
		data.try_reserve_exact(size).ok()?;
		data.resize(size, 0);
		Some(Self {
			data: RwLock::new(data.into_boxed_slice()),
		})
	}

	/// Copy `buf.len()` bytes starting at `offset` within this page into
	/// `buf`.
	pub fn read(&self, offset: usize, buf: &mut [u8]) {
		let data = self.data.read();
		buf.copy_from_slice(&data[offset..offset + buf.len()]);
	}

	/// Copy `buf` into this page starting at `offset`.
	pub fn write(&self, offset: usize, buf: &[u8]) {
		let mut data = self.data.write();
		data[offset..offset + buf.len()].copy_from_slice(buf);
	}

	/// Zero the full page body in place, used by discard when a page is
	/// kept (rather than dropped from the table) to satisfy "subsequent
	/// reads see zeros".
	pub fn zero_out(&self) {
		let mut data = self.data.write();
		data.fill(0);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zeroed_page_reads_as_zero() {
		let page = Page::zeroed(16).unwrap();
		let mut buf = [0xAA; 16];
		page.read(0, &mut buf);
		assert_eq!(buf, [0; 16]);
	}

	#[test]
	fn write_then_read_round_trips() {
		let page = Page::zeroed(16).unwrap();
		page.write(4, &[1, 2, 3]);
		let mut buf = [0; 3];
		page.read(4, &mut buf);
		assert_eq!(buf, [1, 2, 3]);
	}

	#[test]
	fn zero_out_clears_previous_writes() {
		let page = Page::zeroed(16).unwrap();
		page.write(0, &[9; 16]);
		page.zero_out();
		let mut buf = [0xFF; 16];
		page.read(0, &mut buf);
		assert_eq!(buf, [0; 16]);
	}
}

//! Device-side packet buffer accounting.
//!
//! The TX FIFO is a fixed circular byte region. Frames are carved out of it
//! in posting order at 4-byte granularity and given back in the same order
//! when their descriptors complete. The arena only does the bookkeeping; the
//! bytes themselves live in the device.

/// Round a frame length up to the FIFO's 4-byte granularity.
#[inline]
pub const fn round4(len: usize) -> usize {
    (len + 3) & !3
}

/// Write cursor and free-space counter for one circular device buffer.
#[derive(Debug, Clone)]
pub(crate) struct Arena {
    capacity: usize,
    cursor: usize,
    free: usize,
}

impl Arena {
    pub(crate) const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cursor: 0,
            free: capacity,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
        self.free = self.capacity;
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn free(&self) -> usize {
        self.free
    }

    /// Bytes allocated and not yet released.
    pub(crate) fn in_flight(&self) -> usize {
        self.capacity - self.free
    }

    /// Offset of the next allocation.
    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    /// Offset that follows an allocation of `size` bytes at `from`.
    pub(crate) fn advance(&self, from: usize, size: usize) -> usize {
        (from + size) % self.capacity
    }

    /// Carve `size` bytes (already rounded) at the cursor.
    ///
    /// Returns the offset of the allocation, or `None` if it doesn't fit.
    pub(crate) fn alloc(&mut self, size: usize) -> Option<usize> {
        debug_assert_eq!(size % 4, 0);
        if size > self.free {
            return None;
        }
        let offset = self.cursor;
        self.cursor = self.advance(offset, size);
        self.free -= size;
        Some(offset)
    }

    /// Give back `size` bytes from the oldest allocation.
    pub(crate) fn release(&mut self, size: usize) {
        // Hardware supplied the length; never let it push us past capacity.
        self.free = (self.free + size).min(self.capacity);
    }
}

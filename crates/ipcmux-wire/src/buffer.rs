//! Fixed-capacity arena that serialization writes into.

/// Every object in a message starts on this boundary.
pub const ALIGNMENT: usize = 8;

/// Round `size` up to the next multiple of [`ALIGNMENT`].
pub const fn align(size: usize) -> usize {
    (size + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

/// Whether `offset` sits on an [`ALIGNMENT`] boundary.
pub const fn is_aligned(offset: usize) -> bool {
    offset % ALIGNMENT == 0
}

/// A zero-initialized byte arena with a monotonically increasing cursor.
///
/// Capacity is fixed at construction. Callers compute the exact size up
/// front with a sizing pass, so running out of space is a bug in the
/// serializer rather than a recoverable condition.
#[derive(Debug, Clone)]
pub struct FixedBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl FixedBuffer {
    /// Create a buffer of `capacity` bytes, rounded up to the alignment.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; align(capacity)],
            cursor: 0,
        }
    }

    /// Reserve `num_bytes` (rounded up to the alignment) and return the
    /// offset of the region. The region is zeroed.
    ///
    /// # Panics
    ///
    /// Panics if the allocation does not fit in the remaining capacity.
    pub fn allocate(&mut self, num_bytes: usize) -> usize {
        let size = align(num_bytes);
        let offset = self.cursor;
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= self.data.len())
            .unwrap_or_else(|| {
                panic!(
                    "FixedBuffer overflow: {size} bytes requested at {offset}, capacity {}",
                    self.data.len()
                )
            });
        self.cursor = end;
        offset
    }

    /// Total bytes available.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes handed out so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Full contents, including unallocated space.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of `len` bytes at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past the allocated part of the buffer.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        assert!(
            offset + len <= self.cursor,
            "write past allocated region ({offset}+{len} > {})",
            self.cursor
        );
        &mut self.data[offset..offset + len]
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) {
        self.slice_mut(offset, 1)[0] = value;
    }

    pub fn put_u16(&mut self, offset: usize, value: u16) {
        self.slice_mut(offset, 2).copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.slice_mut(offset, 4).copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, offset: usize, value: u64) {
        self.slice_mut(offset, 8).copy_from_slice(&value.to_le_bytes());
    }

    /// Consume the buffer, keeping only the allocated bytes.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.cursor);
        self.data
    }
}

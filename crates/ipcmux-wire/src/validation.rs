//! Per-message bookkeeping of which bytes and handles have been claimed.

use crate::error::{Result, ValidationError};

/// Nested objects deeper than this are rejected.
pub const MAX_RECURSION_DEPTH: usize = 100;

/// Encoded value of an absent handle.
pub const INVALID_HANDLE_INDEX: u32 = u32::MAX;

/// Tracks the unclaimed byte range and handle-index range of one inbound
/// payload while it is validated.
///
/// Objects must be claimed in increasing order, which is the order the
/// serializer lays them out in. A claimed range can never be claimed again,
/// so no two objects overlap.
#[derive(Debug)]
pub struct ValidationContext<'a> {
    data: &'a [u8],
    data_begin: usize,
    handle_begin: u32,
    handle_end: u32,
    depth: usize,
}

impl<'a> ValidationContext<'a> {
    /// Start validating `data`, which arrived with `num_handles` handles.
    pub fn new(data: &'a [u8], num_handles: usize) -> Self {
        Self {
            data,
            data_begin: 0,
            handle_begin: 0,
            handle_end: u32::try_from(num_handles).unwrap_or(INVALID_HANDLE_INDEX),
            depth: 0,
        }
    }

    /// The payload under validation.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// First byte not yet claimed.
    pub fn data_begin(&self) -> usize {
        self.data_begin
    }

    /// End of the payload.
    pub fn data_end(&self) -> usize {
        self.data.len()
    }

    /// Next handle index that may be claimed.
    pub fn handle_begin(&self) -> u32 {
        self.handle_begin
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether `[offset, offset + size)` is non-empty and entirely unclaimed.
    pub fn is_valid_range(&self, offset: usize, size: usize) -> bool {
        match offset.checked_add(size) {
            Some(end) => end > offset && offset >= self.data_begin && end <= self.data.len(),
            None => false,
        }
    }

    /// Claim `[offset, offset + size)`. Everything before `offset + size`
    /// becomes unavailable to later claims.
    pub fn claim_memory(&mut self, offset: usize, size: usize) -> Result<()> {
        if !self.is_valid_range(offset, size) {
            return Err(ValidationError::IllegalMemoryRange);
        }
        self.data_begin = offset + size;
        Ok(())
    }

    /// Claim handle `index`. The invalid index is accepted without effect;
    /// nullability is decided by the caller.
    pub fn claim_handle(&mut self, index: u32) -> Result<()> {
        if index == INVALID_HANDLE_INDEX {
            return Ok(());
        }
        if index < self.handle_begin || index >= self.handle_end {
            return Err(ValidationError::IllegalHandle);
        }
        self.handle_begin = index + 1;
        Ok(())
    }

    /// Run `f` one nesting level deeper.
    pub fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(ValidationError::MaxRecursionDepth);
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

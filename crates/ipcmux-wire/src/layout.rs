//! Bounds-checked reads and the relative-pointer convention.
//!
//! A pointer is a `u64` stored in a slot; its target is `slot + value`, and
//! `0` means null. All positions are byte indices into one message payload,
//! never raw addresses.

use crate::buffer::{is_aligned, FixedBuffer};
use crate::error::{Result, ValidationError};

/// Inline size of an encoded pointer.
pub const POINTER_SIZE: usize = 8;

/// Read `N` bytes at `offset`.
pub fn read_bytes<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    let end = offset
        .checked_add(N)
        .ok_or(ValidationError::IllegalMemoryRange)?;
    let bytes = data
        .get(offset..end)
        .ok_or(ValidationError::IllegalMemoryRange)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    data.get(offset)
        .copied()
        .ok_or(ValidationError::IllegalMemoryRange)
}

pub fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    read_bytes(data, offset).map(u16::from_le_bytes)
}

pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    read_bytes(data, offset).map(u32::from_le_bytes)
}

pub fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    read_bytes(data, offset).map(u64::from_le_bytes)
}

/// Resolve the target of a pointer stored at `slot`.
///
/// Returns `None` when the addition would wrap around the index space.
pub fn pointer_target(slot: usize, offset: u64) -> Option<usize> {
    usize::try_from(offset)
        .ok()
        .and_then(|offset| slot.checked_add(offset))
}

/// Decode the pointer stored at `slot`. `Ok(None)` is a null pointer.
///
/// This only checks that the target is representable and aligned; callers
/// claim the target range through the validation context.
pub fn decode_pointer(data: &[u8], slot: usize) -> Result<Option<usize>> {
    let offset = read_u64(data, slot)?;
    if offset == 0 {
        return Ok(None);
    }
    let target = pointer_target(slot, offset).ok_or(ValidationError::IllegalPointer)?;
    if !is_aligned(target) {
        return Err(ValidationError::MisalignedObject);
    }
    Ok(Some(target))
}

/// Store a pointer from `slot` to `target`.
///
/// # Panics
///
/// Panics if `target` does not follow `slot`; the serializer only ever
/// points forward.
pub fn encode_pointer(buf: &mut FixedBuffer, slot: usize, target: usize) {
    assert!(target > slot, "pointer target {target} precedes slot {slot}");
    buf.put_u64(slot, (target - slot) as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_bounds_checked() {
        let data = [1u8, 0, 0, 0, 2, 0, 0];
        assert_eq!(read_u32(&data, 0).unwrap(), 1);
        assert_eq!(read_u16(&data, 4).unwrap(), 2);
        assert_eq!(read_u32(&data, 4), Err(ValidationError::IllegalMemoryRange));
        assert_eq!(
            read_u64(&data, usize::MAX - 2),
            Err(ValidationError::IllegalMemoryRange)
        );
        assert_eq!(read_u8(&data, 7), Err(ValidationError::IllegalMemoryRange));
    }

    #[test]
    fn null_pointer_decodes_to_none() {
        let data = [0u8; 8];
        assert_eq!(decode_pointer(&data, 0).unwrap(), None);
    }

    #[test]
    fn pointer_is_relative_to_its_slot() {
        let mut buf = FixedBuffer::new(32);
        buf.allocate(32);
        encode_pointer(&mut buf, 8, 24);
        assert_eq!(read_u64(buf.as_slice(), 8).unwrap(), 16);
        assert_eq!(decode_pointer(buf.as_slice(), 8).unwrap(), Some(24));
    }

    #[test]
    fn misaligned_target_is_rejected() {
        let mut data = [0u8; 16];
        data[..8].copy_from_slice(&12u64.to_le_bytes());
        assert_eq!(
            decode_pointer(&data, 0),
            Err(ValidationError::MisalignedObject)
        );
    }

    #[test]
    fn offset_near_end_of_index_space_is_rejected() {
        let slot = usize::MAX - 8;
        assert_eq!(pointer_target(slot, 0x7FFF_FFFF), None);
        assert_eq!(pointer_target(slot, u64::MAX), None);
        assert_eq!(pointer_target(16, 0x7FFF_FFFF), Some(16 + 0x7FFF_FFFF));
    }

    #[test]
    fn huge_offset_in_message_is_an_illegal_pointer() {
        let mut data = [0u8; 16];
        data[8..].copy_from_slice(&u64::MAX.to_le_bytes());
        assert_eq!(decode_pointer(&data, 8), Err(ValidationError::IllegalPointer));
    }
}

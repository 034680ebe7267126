//! Arrays and strings: a pointer to `{num_bytes, num_elements}` followed by
//! the element bodies.

use crate::buffer::align;
use crate::codec::{
    is_null_pointer, validate_pointer, Decoder, Encoder, Nullable, ValidateParams, Wire,
};
use crate::error::{Result, ValidationError};
use crate::layout::{read_u32, POINTER_SIZE};
use crate::validation::ValidationContext;

pub const ARRAY_HEADER_SIZE: usize = 8;

/// Bytes the header and body of an array of `len` `T`s occupy, padded.
pub fn array_storage_size<T: Wire>(len: usize) -> usize {
    align(ARRAY_HEADER_SIZE + T::array_body_size(len))
}

/// Out-of-line size of an array holding `items`.
pub fn array_size<'a, T: Wire + 'a>(items: impl ExactSizeIterator<Item = &'a T>) -> usize {
    let len = items.len();
    array_storage_size::<T>(len) + items.map(Wire::out_of_line_size).sum::<usize>()
}

/// Allocate the array, point `slot` at it and encode the elements.
pub fn encode_array<T: Wire>(items: Vec<T>, enc: &mut Encoder<'_>, slot: usize) {
    let len = items.len();
    let num_bytes = ARRAY_HEADER_SIZE + T::array_body_size(len);
    let offset = enc.allocate(num_bytes);
    enc.put_u32(offset, u32::try_from(num_bytes).expect("array exceeds u32 bytes"));
    enc.put_u32(offset + 4, u32::try_from(len).expect("array exceeds u32 elements"));
    enc.put_pointer(slot, offset);
    T::encode_array(items, enc, offset + ARRAY_HEADER_SIZE);
}

/// Validate an array header at `offset`, claim it and validate the
/// elements. Returns the element count.
pub fn validate_array_at<T: Wire>(
    ctx: &mut ValidationContext<'_>,
    offset: usize,
    params: &ValidateParams<'_>,
) -> Result<u32> {
    if !ctx.is_valid_range(offset, ARRAY_HEADER_SIZE) {
        return Err(ValidationError::IllegalMemoryRange);
    }
    let num_bytes = read_u32(ctx.data(), offset)?;
    let num_elements = read_u32(ctx.data(), offset + 4)?;

    let needed = ARRAY_HEADER_SIZE.saturating_add(T::array_body_size(num_elements as usize));
    if (num_bytes as usize) < needed {
        return Err(ValidationError::UnexpectedArrayHeader);
    }
    if params.expected_num_elements != 0 && num_elements != params.expected_num_elements {
        return Err(ValidationError::UnexpectedArrayLength);
    }
    ctx.claim_memory(offset, num_bytes as usize)?;
    T::validate_array(
        ctx,
        offset + ARRAY_HEADER_SIZE,
        num_elements as usize,
        params.element(),
    )?;
    Ok(num_elements)
}

/// Validate the array pointed to from `slot`. `Ok(None)` is an accepted null.
pub fn validate_array_pointer<T: Wire>(
    ctx: &mut ValidationContext<'_>,
    slot: usize,
    params: &ValidateParams<'_>,
) -> Result<Option<u32>> {
    match validate_pointer(ctx, slot, params)? {
        Some(target) => ctx
            .nested(|ctx| validate_array_at::<T>(ctx, target, params))
            .map(Some),
        None => Ok(None),
    }
}

pub fn decode_array<T: Wire>(dec: &mut Decoder<'_>, slot: usize) -> Result<Vec<T>> {
    let target = dec
        .read_pointer(slot)?
        .ok_or(ValidationError::UnexpectedNullPointer)?;
    let len = dec.read_u32(target + 4)?;
    T::decode_array(dec, target + ARRAY_HEADER_SIZE, len as usize)
}

impl<T: Wire> Wire for Vec<T> {
    const INLINE_SIZE: usize = POINTER_SIZE;

    fn out_of_line_size(&self) -> usize {
        array_size(self.iter())
    }

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        encode_array(self, enc, slot);
    }

    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        validate_array_pointer::<T>(ctx, slot, params).map(|_| ())
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        decode_array(dec, slot)
    }
}

impl<T: Wire> Nullable for Vec<T> {
    fn is_null(data: &[u8], slot: usize) -> Result<bool> {
        is_null_pointer(data, slot)
    }

    fn encode_null(_enc: &mut Encoder<'_>, _slot: usize) {}
}

/// Strings are byte arrays that must hold UTF-8.
impl Wire for String {
    const INLINE_SIZE: usize = POINTER_SIZE;

    fn out_of_line_size(&self) -> usize {
        array_storage_size::<u8>(self.len())
    }

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        encode_array(self.into_bytes(), enc, slot);
    }

    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        let Some(target) = validate_pointer(ctx, slot, params)? else {
            return Ok(());
        };
        let len = ctx.nested(|ctx| validate_array_at::<u8>(ctx, target, params))?;
        let body = target + ARRAY_HEADER_SIZE;
        let bytes = ctx
            .data()
            .get(body..body + len as usize)
            .ok_or(ValidationError::IllegalMemoryRange)?;
        std::str::from_utf8(bytes).map_err(|_| ValidationError::InvalidUtf8)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        String::from_utf8(decode_array::<u8>(dec, slot)?).map_err(|_| ValidationError::InvalidUtf8)
    }
}

impl Nullable for String {
    fn is_null(data: &[u8], slot: usize) -> Result<bool> {
        is_null_pointer(data, slot)
    }

    fn encode_null(_enc: &mut Encoder<'_>, _slot: usize) {}
}

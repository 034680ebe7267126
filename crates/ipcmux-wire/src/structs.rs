//! Versioned structs: `{num_bytes, version}` followed by the fields.
//!
//! A receiver accepts any version it knows at exactly the size it knows,
//! and any newer version at least as large as the newest layout it knows.
//! Bytes past the fields it understands are ignored; fields added after the
//! sender's version decode as defaults.

use crate::buffer::{align, is_aligned};
use crate::codec::{validate_pointer, Decoder, Encoder, ValidateParams, Wire};
use crate::error::{Result, ValidationError};
use crate::layout::read_u32;
use crate::validation::ValidationContext;

pub const STRUCT_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructHeader {
    pub num_bytes: u32,
    pub version: u32,
}

impl StructHeader {
    /// Whether a field of `size` bytes at `offset` (from the struct start)
    /// was written by the sender.
    pub fn has_field(&self, offset: usize, size: usize) -> bool {
        offset + size <= self.num_bytes as usize
    }
}

/// One known layout of a struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructVersion {
    pub version: u32,
    pub num_bytes: u32,
}

impl StructVersion {
    pub const fn new(version: u32, num_bytes: u32) -> Self {
        Self { version, num_bytes }
    }
}

/// Field-level codec of a struct. Offsets passed in are the struct start.
pub trait WireStruct: Sized {
    /// Known layouts in ascending version order. The last one is written.
    const VERSIONS: &'static [StructVersion];

    /// Out-of-line bytes of the fields.
    fn fields_out_of_line_size(&self) -> usize {
        0
    }

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize);

    /// Validate the fields present under `header`. The struct's own bytes are
    /// already claimed.
    fn validate_fields(
        ctx: &mut ValidationContext<'_>,
        base: usize,
        header: &StructHeader,
    ) -> Result<()>;

    fn decode_fields(dec: &mut Decoder<'_>, base: usize, header: &StructHeader) -> Result<Self>;
}

/// The layout this implementation writes.
pub fn latest_version<S: WireStruct>() -> StructVersion {
    *S::VERSIONS.last().expect("struct declares no versions")
}

/// Total bytes `value` needs: its padded body plus everything it points to.
pub fn struct_size<S: WireStruct>(value: &S) -> usize {
    align(latest_version::<S>().num_bytes as usize) + value.fields_out_of_line_size()
}

/// Allocate `value`, write its header and fields, and return its offset.
pub fn encode_struct<S: WireStruct>(value: S, enc: &mut Encoder<'_>) -> usize {
    let latest = latest_version::<S>();
    let offset = enc.allocate(latest.num_bytes as usize);
    enc.put_u32(offset, latest.num_bytes);
    enc.put_u32(offset + 4, latest.version);
    value.encode_fields(enc, offset);
    offset
}

/// Check alignment, read the header and claim the struct's bytes.
pub fn validate_struct_header(ctx: &mut ValidationContext<'_>, offset: usize) -> Result<StructHeader> {
    if !is_aligned(offset) {
        return Err(ValidationError::MisalignedObject);
    }
    if !ctx.is_valid_range(offset, STRUCT_HEADER_SIZE) {
        return Err(ValidationError::IllegalMemoryRange);
    }
    let header = StructHeader {
        num_bytes: read_u32(ctx.data(), offset)?,
        version: read_u32(ctx.data(), offset + 4)?,
    };
    if (header.num_bytes as usize) < STRUCT_HEADER_SIZE {
        return Err(ValidationError::UnexpectedStructHeader);
    }
    ctx.claim_memory(offset, header.num_bytes as usize)?;
    Ok(header)
}

/// Match `header` against the known layouts.
pub fn validate_struct_version(header: &StructHeader, versions: &[StructVersion]) -> Result<()> {
    let Some(newest) = versions.last() else {
        return Err(ValidationError::UnexpectedStructHeader);
    };
    if header.version > newest.version {
        return if header.num_bytes >= newest.num_bytes {
            Ok(())
        } else {
            Err(ValidationError::UnexpectedStructHeader)
        };
    }
    match versions.iter().rev().find(|known| header.version >= known.version) {
        Some(known) if known.num_bytes == header.num_bytes => Ok(()),
        _ => Err(ValidationError::UnexpectedStructHeader),
    }
}

/// Validate a whole struct at `offset`.
pub fn validate_struct_at<S: WireStruct>(
    ctx: &mut ValidationContext<'_>,
    offset: usize,
) -> Result<StructHeader> {
    let header = validate_struct_header(ctx, offset)?;
    validate_struct_version(&header, S::VERSIONS)?;
    S::validate_fields(ctx, offset, &header)?;
    Ok(header)
}

pub fn decode_struct_at<S: WireStruct>(dec: &mut Decoder<'_>, offset: usize) -> Result<S> {
    let header = StructHeader {
        num_bytes: dec.read_u32(offset)?,
        version: dec.read_u32(offset + 4)?,
    };
    S::decode_fields(dec, offset, &header)
}

pub fn encode_struct_pointer<S: WireStruct>(value: S, enc: &mut Encoder<'_>, slot: usize) {
    let offset = encode_struct(value, enc);
    enc.put_pointer(slot, offset);
}

pub fn validate_struct_pointer<S: WireStruct>(
    ctx: &mut ValidationContext<'_>,
    slot: usize,
    params: &ValidateParams<'_>,
) -> Result<()> {
    match validate_pointer(ctx, slot, params)? {
        Some(target) => ctx.nested(|ctx| validate_struct_at::<S>(ctx, target).map(|_| ())),
        None => Ok(()),
    }
}

pub fn decode_struct_pointer<S: WireStruct>(dec: &mut Decoder<'_>, slot: usize) -> Result<S> {
    let target = dec
        .read_pointer(slot)?
        .ok_or(ValidationError::UnexpectedNullPointer)?;
    decode_struct_at(dec, target)
}

/// Validate a field only when the sender's layout includes it.
pub fn validate_field<T: Wire>(
    ctx: &mut ValidationContext<'_>,
    header: &StructHeader,
    base: usize,
    offset: usize,
    params: &ValidateParams<'_>,
) -> Result<()> {
    if header.has_field(offset, T::INLINE_SIZE) {
        T::validate(ctx, base + offset, params)?;
    }
    Ok(())
}

/// Decode a field, or return `default` when the sender's layout predates it.
pub fn decode_field_or<T: Wire>(
    dec: &mut Decoder<'_>,
    header: &StructHeader,
    base: usize,
    offset: usize,
    default: T,
) -> Result<T> {
    if header.has_field(offset, T::INLINE_SIZE) {
        T::decode(dec, base + offset)
    } else {
        Ok(default)
    }
}

/// Implement [`Wire`] and [`Nullable`](crate::Nullable) for
/// [`WireStruct`] types, which are then carried by pointer.
#[macro_export]
macro_rules! impl_wire_for_struct {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::Wire for $ty {
            const INLINE_SIZE: usize = $crate::layout::POINTER_SIZE;

            fn out_of_line_size(&self) -> usize {
                $crate::structs::struct_size(self)
            }

            fn encode(self, enc: &mut $crate::Encoder<'_>, slot: usize) {
                $crate::structs::encode_struct_pointer(self, enc, slot)
            }

            fn validate(
                ctx: &mut $crate::ValidationContext<'_>,
                slot: usize,
                params: &$crate::ValidateParams<'_>,
            ) -> $crate::Result<()> {
                $crate::structs::validate_struct_pointer::<Self>(ctx, slot, params)
            }

            fn decode(dec: &mut $crate::Decoder<'_>, slot: usize) -> $crate::Result<Self> {
                $crate::structs::decode_struct_pointer(dec, slot)
            }
        }

        impl $crate::Nullable for $ty {
            fn is_null(data: &[u8], slot: usize) -> $crate::Result<bool> {
                $crate::codec::is_null_pointer(data, slot)
            }

            fn encode_null(_enc: &mut $crate::Encoder<'_>, _slot: usize) {}
        }
    )+};
}

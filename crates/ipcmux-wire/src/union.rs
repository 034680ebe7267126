//! Inline unions: 16 bytes of `{size: u32, tag: u32, data: u64}`.
//!
//! A null union has size 0. Variants whose value does not fit in eight
//! bytes store a pointer in the data slot.

use crate::codec::{Decoder, Encoder, ValidateParams};
use crate::error::{Result, ValidationError};
use crate::layout::read_u32;
use crate::validation::ValidationContext;

pub const UNION_SIZE: usize = 16;

/// Offset of the data slot inside a union.
pub const UNION_DATA_OFFSET: usize = 8;

/// Variant-level codec of a union.
pub trait WireUnion: Sized {
    fn tag(&self) -> u32;

    fn data_out_of_line_size(&self) -> usize {
        0
    }

    /// Write the variant's value into the 8-byte data slot.
    fn encode_data(self, enc: &mut Encoder<'_>, data_slot: usize);

    /// Validate the value for `tag`. Unknown tags are
    /// [`ValidationError::UnknownUnionTag`].
    fn validate_data(ctx: &mut ValidationContext<'_>, tag: u32, data_slot: usize) -> Result<()>;

    fn decode_data(dec: &mut Decoder<'_>, tag: u32, data_slot: usize) -> Result<Self>;
}

pub fn encode_union<U: WireUnion>(value: U, enc: &mut Encoder<'_>, slot: usize) {
    enc.put_u32(slot, UNION_SIZE as u32);
    enc.put_u32(slot + 4, value.tag());
    value.encode_data(enc, slot + UNION_DATA_OFFSET);
}

pub fn validate_union<U: WireUnion>(
    ctx: &mut ValidationContext<'_>,
    slot: usize,
    params: &ValidateParams<'_>,
) -> Result<()> {
    let size = read_u32(ctx.data(), slot)?;
    if size == 0 {
        return if params.nullable {
            Ok(())
        } else {
            Err(ValidationError::UnexpectedNullPointer)
        };
    }
    if size as usize != UNION_SIZE {
        return Err(ValidationError::UnexpectedUnionHeader);
    }
    let tag = read_u32(ctx.data(), slot + 4)?;
    ctx.nested(|ctx| U::validate_data(ctx, tag, slot + UNION_DATA_OFFSET))
}

pub fn decode_union<U: WireUnion>(dec: &mut Decoder<'_>, slot: usize) -> Result<U> {
    if dec.read_u32(slot)? == 0 {
        return Err(ValidationError::UnexpectedNullPointer);
    }
    let tag = dec.read_u32(slot + 4)?;
    U::decode_data(dec, tag, slot + UNION_DATA_OFFSET)
}

/// Implement [`Wire`](crate::Wire) and [`Nullable`](crate::Nullable) for
/// [`WireUnion`] types, which are then carried inline.
#[macro_export]
macro_rules! impl_wire_for_union {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::Wire for $ty {
            const INLINE_SIZE: usize = $crate::union::UNION_SIZE;

            fn out_of_line_size(&self) -> usize {
                $crate::union::WireUnion::data_out_of_line_size(self)
            }

            fn encode(self, enc: &mut $crate::Encoder<'_>, slot: usize) {
                $crate::union::encode_union(self, enc, slot)
            }

            fn validate(
                ctx: &mut $crate::ValidationContext<'_>,
                slot: usize,
                params: &$crate::ValidateParams<'_>,
            ) -> $crate::Result<()> {
                $crate::union::validate_union::<Self>(ctx, slot, params)
            }

            fn decode(dec: &mut $crate::Decoder<'_>, slot: usize) -> $crate::Result<Self> {
                $crate::union::decode_union(dec, slot)
            }
        }

        impl $crate::Nullable for $ty {
            fn is_null(data: &[u8], slot: usize) -> $crate::Result<bool> {
                $crate::layout::read_u32(data, slot).map(|size| size == 0)
            }

            fn encode_null(_enc: &mut $crate::Encoder<'_>, _slot: usize) {}
        }
    )+};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{decode_slot, encode_slot, validate_slot};
    use crate::codec::Wire;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Value {
        Int(i64),
        Text(String),
    }

    impl WireUnion for Value {
        fn tag(&self) -> u32 {
            match self {
                Value::Int(_) => 0,
                Value::Text(_) => 1,
            }
        }

        fn data_out_of_line_size(&self) -> usize {
            match self {
                Value::Int(_) => 0,
                Value::Text(text) => text.out_of_line_size(),
            }
        }

        fn encode_data(self, enc: &mut Encoder<'_>, data_slot: usize) {
            match self {
                Value::Int(v) => v.encode(enc, data_slot),
                Value::Text(text) => text.encode(enc, data_slot),
            }
        }

        fn validate_data(ctx: &mut ValidationContext<'_>, tag: u32, data_slot: usize) -> Result<()> {
            match tag {
                0 => Ok(()),
                1 => String::validate(ctx, data_slot, &ValidateParams::DEFAULT),
                _ => Err(ValidationError::UnknownUnionTag),
            }
        }

        fn decode_data(dec: &mut Decoder<'_>, tag: u32, data_slot: usize) -> Result<Self> {
            match tag {
                0 => i64::decode(dec, data_slot).map(Value::Int),
                1 => String::decode(dec, data_slot).map(Value::Text),
                _ => Err(ValidationError::UnknownUnionTag),
            }
        }
    }

    crate::impl_wire_for_union!(Value);

    #[test]
    fn inline_layout() {
        let (data, _) = encode_slot(Value::Int(-3));
        assert_eq!(data.len(), 16);
        assert_eq!(read_u32(&data, 0).unwrap(), 16);
        assert_eq!(read_u32(&data, 4).unwrap(), 0);
        validate_slot::<Value>(&data, 0, &ValidateParams::DEFAULT).unwrap();
        assert_eq!(decode_slot::<Value>(&data, vec![]).unwrap(), Value::Int(-3));
    }

    #[test]
    fn pointer_variant() {
        let value = Value::Text("abc".into());
        let (data, _) = encode_slot(value.clone());
        validate_slot::<Value>(&data, 0, &ValidateParams::DEFAULT).unwrap();
        assert_eq!(decode_slot::<Value>(&data, vec![]).unwrap(), value);
    }

    #[test]
    fn null_union() {
        let (data, _) = encode_slot(None::<Value>);
        assert_eq!(
            validate_slot::<Value>(&data, 0, &ValidateParams::DEFAULT),
            Err(ValidationError::UnexpectedNullPointer)
        );
        validate_slot::<Option<Value>>(&data, 0, &ValidateParams::DEFAULT).unwrap();
        assert_eq!(decode_slot::<Option<Value>>(&data, vec![]).unwrap(), None);
    }

    #[test]
    fn bad_size_and_unknown_tag() {
        let (mut data, _) = encode_slot(Value::Int(1));
        data[0..4].copy_from_slice(&24u32.to_le_bytes());
        assert_eq!(
            validate_slot::<Value>(&data, 0, &ValidateParams::DEFAULT),
            Err(ValidationError::UnexpectedUnionHeader)
        );

        let (mut data, _) = encode_slot(Value::Int(1));
        data[4..8].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(
            validate_slot::<Value>(&data, 0, &ValidateParams::DEFAULT),
            Err(ValidationError::UnknownUnionTag)
        );
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::Int),
            ".{0,16}".prop_map(Value::Text),
        ]
    }

    proptest! {
        #[test]
        fn union_arrays_roundtrip(
            values in prop::collection::vec(prop::option::of(value_strategy()), 0..8),
        ) {
            let (data, _) = encode_slot(values.clone());
            prop_assert!(
                validate_slot::<Vec<Option<Value>>>(&data, 0, &ValidateParams::DEFAULT).is_ok()
            );
            prop_assert_eq!(decode_slot::<Vec<Option<Value>>>(&data, vec![]).unwrap(), values);
        }
    }
}

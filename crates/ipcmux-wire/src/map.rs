//! Maps: a pointer to a 24-byte struct holding a keys array and a values
//! array of the same length.

use std::collections::BTreeMap;

use crate::array::{array_size, decode_array, encode_array, validate_array_pointer};
use crate::buffer::align;
use crate::codec::{
    is_null_pointer, validate_pointer, Decoder, Encoder, Nullable, ValidateParams, Wire,
};
use crate::error::{Result, ValidationError};
use crate::layout::POINTER_SIZE;
use crate::structs::{
    validate_struct_header, validate_struct_version, StructVersion, STRUCT_HEADER_SIZE,
};
use crate::validation::ValidationContext;

const MAP_STRUCT_SIZE: u32 = 24;
const MAP_VERSIONS: &[StructVersion] = &[StructVersion::new(0, MAP_STRUCT_SIZE)];
const KEYS_OFFSET: usize = STRUCT_HEADER_SIZE;
const VALUES_OFFSET: usize = STRUCT_HEADER_SIZE + POINTER_SIZE;

/// Validate a map pointed to from `slot`.
///
/// Keys are never nullable. `params.element` applies to the values.
pub fn validate_map<K: Wire, V: Wire>(
    ctx: &mut ValidationContext<'_>,
    slot: usize,
    params: &ValidateParams<'_>,
) -> Result<()> {
    let Some(target) = validate_pointer(ctx, slot, params)? else {
        return Ok(());
    };
    ctx.nested(|ctx| {
        let header = validate_struct_header(ctx, target)?;
        validate_struct_version(&header, MAP_VERSIONS)?;

        let keys_params = ValidateParams::DEFAULT;
        let values_params = ValidateParams {
            element: params.element,
            ..ValidateParams::DEFAULT
        };
        let num_keys = validate_array_pointer::<K>(ctx, target + KEYS_OFFSET, &keys_params)?;
        let num_values = validate_array_pointer::<V>(ctx, target + VALUES_OFFSET, &values_params)?;
        if num_keys != num_values {
            return Err(ValidationError::DifferentSizedArraysInMap);
        }
        Ok(())
    })
}

impl<K: Wire + Ord, V: Wire> Wire for BTreeMap<K, V> {
    const INLINE_SIZE: usize = POINTER_SIZE;

    fn out_of_line_size(&self) -> usize {
        align(MAP_STRUCT_SIZE as usize) + array_size(self.keys()) + array_size(self.values())
    }

    fn encode(self, enc: &mut Encoder<'_>, slot: usize) {
        let offset = enc.allocate(MAP_STRUCT_SIZE as usize);
        enc.put_u32(offset, MAP_STRUCT_SIZE);
        enc.put_u32(offset + 4, 0);
        enc.put_pointer(slot, offset);
        let (keys, values): (Vec<K>, Vec<V>) = self.into_iter().unzip();
        encode_array(keys, enc, offset + KEYS_OFFSET);
        encode_array(values, enc, offset + VALUES_OFFSET);
    }

    fn validate(
        ctx: &mut ValidationContext<'_>,
        slot: usize,
        params: &ValidateParams<'_>,
    ) -> Result<()> {
        validate_map::<K, V>(ctx, slot, params)
    }

    fn decode(dec: &mut Decoder<'_>, slot: usize) -> Result<Self> {
        let target = dec
            .read_pointer(slot)?
            .ok_or(ValidationError::UnexpectedNullPointer)?;
        let keys = decode_array::<K>(dec, target + KEYS_OFFSET)?;
        let values = decode_array::<V>(dec, target + VALUES_OFFSET)?;
        if keys.len() != values.len() {
            return Err(ValidationError::DifferentSizedArraysInMap);
        }
        Ok(keys.into_iter().zip(values).collect())
    }
}

impl<K: Wire + Ord, V: Wire> Nullable for BTreeMap<K, V> {
    fn is_null(data: &[u8], slot: usize) -> Result<bool> {
        is_null_pointer(data, slot)
    }

    fn encode_null(_enc: &mut Encoder<'_>, _slot: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{decode_slot, encode_slot, validate_slot};
    use crate::layout::read_u32;

    fn sample() -> BTreeMap<String, Vec<u16>> {
        BTreeMap::from([
            ("alpha".to_string(), vec![1, 2]),
            ("beta".to_string(), vec![]),
            ("gamma".to_string(), vec![3]),
        ])
    }

    #[test]
    fn keys_and_values_travel_as_parallel_arrays() {
        let (data, _) = encode_slot(sample());
        // map struct at 8, keys array right after it
        assert_eq!(read_u32(&data, 8).unwrap(), MAP_STRUCT_SIZE);
        assert_eq!(read_u32(&data, 8 + 24 + 4).unwrap(), 3);

        validate_slot::<BTreeMap<String, Vec<u16>>>(&data, 0, &ValidateParams::DEFAULT).unwrap();
        assert_eq!(
            decode_slot::<BTreeMap<String, Vec<u16>>>(&data, vec![]).unwrap(),
            sample()
        );
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let map = BTreeMap::from([(1u32, 10u32), (2, 20)]);
        let (mut data, _) = encode_slot(map);
        // keys array header starts at 32; drop one element from its count
        // while keeping num_bytes valid.
        data[36..40].copy_from_slice(&1u32.to_le_bytes());
        assert_eq!(
            validate_slot::<BTreeMap<u32, u32>>(&data, 0, &ValidateParams::DEFAULT),
            Err(ValidationError::DifferentSizedArraysInMap)
        );
    }

    #[test]
    fn null_keys_array_is_rejected() {
        let map = BTreeMap::from([(1u8, 1u8)]);
        let (mut data, _) = encode_slot(map);
        data[16..24].fill(0);
        assert_eq!(
            validate_slot::<BTreeMap<u8, u8>>(&data, 0, &ValidateParams::DEFAULT),
            Err(ValidationError::UnexpectedNullPointer)
        );
    }

    #[test]
    fn nullable_values() {
        let map = BTreeMap::from([(1u8, None), (2u8, Some("x".to_string()))]);
        let (data, _) = encode_slot(map.clone());
        validate_slot::<BTreeMap<u8, Option<String>>>(&data, 0, &ValidateParams::DEFAULT).unwrap();
        assert_eq!(
            validate_slot::<BTreeMap<u8, String>>(&data, 0, &ValidateParams::DEFAULT),
            Err(ValidationError::UnexpectedNullPointer)
        );
        assert_eq!(
            decode_slot::<BTreeMap<u8, Option<String>>>(&data, vec![]).unwrap(),
            map
        );
    }
}

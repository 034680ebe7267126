use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::codec::testing::{decode_slot, encode_slot, validate_slot};
use crate::{validate_message_header, Message, ValidateParams};

type Map = BTreeMap<String, Vec<u16>>;

const MAX_LEN: usize = 16;

fn nested_strategy() -> impl Strategy<Value = Vec<Vec<u32>>> {
    prop::collection::vec(prop::collection::vec(any::<u32>(), 0..MAX_LEN), 0..MAX_LEN)
}

fn map_strategy() -> impl Strategy<Value = Map> {
    prop::collection::btree_map(
        "[a-z]{0,12}",
        prop::collection::vec(any::<u16>(), 0..MAX_LEN),
        0..MAX_LEN,
    )
}

fn optional_strings_strategy() -> impl Strategy<Value = Vec<Option<String>>> {
    prop::collection::vec(prop::option::of(".{0,8}"), 0..MAX_LEN)
}

/// Byte writes applied on top of a valid encoding.
fn corruption_strategy() -> impl Strategy<Value = Vec<(prop::sample::Index, u8)>> {
    prop::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 1..8)
}

proptest! {
    #[test]
    fn header_validation_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
        if let Ok(header) = validate_message_header(&data) {
            prop_assert!(header.num_bytes as usize <= data.len());
        }
        let _ = Message::from_parts(data, vec![]);
    }

    #[test]
    fn arbitrary_bytes_never_validate_out_of_range(
        data in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        if validate_slot::<Map>(&data, 0, &ValidateParams::DEFAULT).is_ok() {
            prop_assert!(decode_slot::<Map>(&data, vec![]).is_ok());
        }
        let _ = validate_slot::<Vec<Vec<u32>>>(&data, 0, &ValidateParams::DEFAULT);
        let _ = validate_slot::<Vec<Option<String>>>(&data, 0, &ValidateParams::DEFAULT);
    }

    #[test]
    fn corrupted_maps_are_rejected_or_decode(
        map in map_strategy(),
        writes in corruption_strategy(),
    ) {
        let (mut data, _) = encode_slot(map);
        for (index, byte) in writes {
            let at = index.index(data.len());
            data[at] = byte;
        }
        if validate_slot::<Map>(&data, 0, &ValidateParams::DEFAULT).is_ok() {
            prop_assert!(decode_slot::<Map>(&data, vec![]).is_ok());
        }
    }

    #[test]
    fn nested_arrays_roundtrip(value in nested_strategy()) {
        let (data, _) = encode_slot(value.clone());
        prop_assert!(validate_slot::<Vec<Vec<u32>>>(&data, 0, &ValidateParams::DEFAULT).is_ok());
        prop_assert_eq!(decode_slot::<Vec<Vec<u32>>>(&data, vec![]).unwrap(), value);
    }

    #[test]
    fn maps_roundtrip(map in map_strategy()) {
        let (data, _) = encode_slot(map.clone());
        prop_assert!(validate_slot::<Map>(&data, 0, &ValidateParams::DEFAULT).is_ok());
        prop_assert_eq!(decode_slot::<Map>(&data, vec![]).unwrap(), map);
    }

    #[test]
    fn nullable_strings_roundtrip(value in optional_strings_strategy()) {
        let (data, _) = encode_slot(value.clone());
        prop_assert!(
            validate_slot::<Vec<Option<String>>>(&data, 0, &ValidateParams::DEFAULT).is_ok()
        );
        prop_assert_eq!(decode_slot::<Vec<Option<String>>>(&data, vec![]).unwrap(), value);
    }

    #[test]
    fn bool_arrays_roundtrip(value in prop::collection::vec(any::<bool>(), 0..64)) {
        let (data, _) = encode_slot(value.clone());
        prop_assert!(validate_slot::<Vec<bool>>(&data, 0, &ValidateParams::DEFAULT).is_ok());
        prop_assert_eq!(decode_slot::<Vec<bool>>(&data, vec![]).unwrap(), value);
    }
}

use proptest::collection::vec;
use proptest::prelude::*;
use stratadb_encoding::{
    check_key_order, read_value, write_value, EnumLit, EnumModel, FieldValue, ValueEncoding, F32,
    F64,
};

fn encode(encoding: &ValueEncoding, value: &FieldValue) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, encoding, value).unwrap();
    out
}

fn assert_round_trip(encoding: &ValueEncoding, value: FieldValue) {
    let bytes = encode(encoding, &value);
    let mut input = &bytes[..];
    let decoded = read_value(&mut input, encoding).unwrap();
    assert!(input.is_empty(), "decoder left {} bytes", input.len());
    assert_eq!(decoded, value);
}

macro_rules! scalar_strategy {
    ($name:ident, $enc:ident, $ty:ty) => {
        fn $name() -> impl Strategy<Value = (ValueEncoding, FieldValue)> {
            any::<$ty>().prop_map(|x| (ValueEncoding::$enc, FieldValue::from(x)))
        }
    };
}

scalar_strategy!(bools, Bool, bool);
scalar_strategy!(i8s, I8, i8);
scalar_strategy!(u8s, U8, u8);
scalar_strategy!(i16s, I16, i16);
scalar_strategy!(u16s, U16, u16);
scalar_strategy!(i32s, I32, i32);
scalar_strategy!(u32s, U32, u32);
scalar_strategy!(i64s, I64, i64);
scalar_strategy!(u64s, U64, u64);

fn floats() -> impl Strategy<Value = (ValueEncoding, FieldValue)> {
    prop_oneof![
        any::<f32>().prop_map(|x| (ValueEncoding::F32, FieldValue::F32(F32::from(x)))),
        any::<f64>().prop_map(|x| (ValueEncoding::F64, FieldValue::F64(F64::from(x)))),
    ]
}

fn strings() -> impl Strategy<Value = (ValueEncoding, FieldValue)> {
    prop_oneof![
        Just((ValueEncoding::String, FieldValue::Null)),
        ".*".prop_map(|s| (ValueEncoding::String, FieldValue::String(s))),
    ]
}

fn byte_arrays() -> impl Strategy<Value = (ValueEncoding, FieldValue)> {
    vec(any::<u8>(), 0..64).prop_map(|b| (ValueEncoding::Bytes, FieldValue::Bytes(b)))
}

fn enum_values() -> impl Strategy<Value = (ValueEncoding, FieldValue)> {
    let model = EnumModel::new(["NORTH", "EAST", "SOUTH", "WEST"]);
    (0u32..4).prop_map(move |ordinal| {
        let lit = model.find_by_ordinal(ordinal).unwrap();
        (ValueEncoding::Enum(model.clone()), FieldValue::Enum(lit))
    })
}

fn enum_arrays() -> impl Strategy<Value = (ValueEncoding, FieldValue)> {
    let model = EnumModel::new(["OFF", "ON"]);
    let elem = ValueEncoding::Enum(model.clone());
    vec(prop_oneof![Just(None), (0u32..2).prop_map(Some)], 0..8).prop_map(move |ordinals| {
        let items = ordinals
            .into_iter()
            .map(|ordinal| match ordinal {
                None => FieldValue::Null,
                Some(o) => FieldValue::Enum(model.find_by_ordinal(o).unwrap()),
            })
            .collect();
        (
            ValueEncoding::Array(Box::new(elem.clone())),
            FieldValue::Array(items),
        )
    })
}

fn any_slot() -> impl Strategy<Value = (ValueEncoding, FieldValue)> {
    prop_oneof![
        bools(),
        i8s(),
        u8s(),
        i16s(),
        u16s(),
        i32s(),
        u32s(),
        i64s(),
        u64s(),
        floats(),
        strings(),
        byte_arrays(),
        enum_values(),
        enum_arrays(),
    ]
}

proptest! {
    #[test]
    fn every_slot_round_trips((encoding, value) in any_slot()) {
        assert_round_trip(&encoding, value);
    }

    #[test]
    fn signed_pairs_preserve_order(a in any::<i64>(), b in any::<i64>()) {
        check_key_order(
            &ValueEncoding::I64,
            &FieldValue::I64(a),
            &FieldValue::I64(b),
        ).unwrap();
    }

    #[test]
    fn float_pairs_preserve_order(a in any::<f64>(), b in any::<f64>()) {
        check_key_order(
            &ValueEncoding::F64,
            &FieldValue::F64(F64::from(a)),
            &FieldValue::F64(F64::from(b)),
        ).unwrap();
    }

    #[test]
    fn string_pairs_preserve_order(a in ".*", b in ".*") {
        check_key_order(
            &ValueEncoding::String,
            &FieldValue::String(a),
            &FieldValue::String(b),
        ).unwrap();
    }

    #[test]
    fn bytes_pairs_preserve_order(a in vec(any::<u8>(), 0..32), b in vec(any::<u8>(), 0..32)) {
        check_key_order(
            &ValueEncoding::Bytes,
            &FieldValue::Bytes(a),
            &FieldValue::Bytes(b),
        ).unwrap();
    }

    #[test]
    fn tuple_concatenation_preserves_order(
        a1 in any::<i32>(), a2 in ".*",
        b1 in any::<i32>(), b2 in ".*",
    ) {
        let encode_pair = |x: i32, s: &str| {
            let mut out = Vec::new();
            write_value(&mut out, &ValueEncoding::I32, &FieldValue::I32(x)).unwrap();
            write_value(&mut out, &ValueEncoding::String, &FieldValue::from(s)).unwrap();
            out
        };
        let ka = encode_pair(a1, &a2);
        let kb = encode_pair(b1, &b2);
        let natural = (a1, a2.as_str()).cmp(&(b1, b2.as_str()));
        prop_assert_eq!(natural, ka.cmp(&kb));
    }
}

#[test]
fn null_string_sorts_before_all_strings() {
    let enc = ValueEncoding::String;
    let null = encode(&enc, &FieldValue::Null);
    for s in ["", "\0", "a", "\u{10FFFF}"] {
        assert!(null < encode(&enc, &FieldValue::from(s)), "null vs {s:?}");
    }
}

#[test]
fn enum_arrays_round_trip_nested() {
    let model = EnumModel::new(["A", "B", "C"]);
    let elem = ValueEncoding::Enum(model.clone());
    let enc = ValueEncoding::Array(Box::new(ValueEncoding::Array(Box::new(elem))));
    let value = FieldValue::Array(vec![
        FieldValue::Array(vec![
            FieldValue::Enum(EnumLit::new("C", 2)),
            FieldValue::Enum(EnumLit::new("A", 0)),
        ]),
        FieldValue::Null,
        FieldValue::Array(vec![]),
    ]);
    assert_round_trip(&enc, value);
}

#[test]
fn string_pair_ordering_matches_natural_order() {
    // Keys that exercise the escape path specifically.
    let cases = [
        ("", "\0"),
        ("\0", "\0\0"),
        ("\0", "\u{1}"),
        ("a", "a\0"),
        ("a\0", "ab"),
        ("a\u{FF}", "a\u{100}"),
    ];
    for (a, b) in cases {
        check_key_order(
            &ValueEncoding::String,
            &FieldValue::from(a),
            &FieldValue::from(b),
        )
        .unwrap();
    }
}

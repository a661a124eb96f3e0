use bytes::{BufMut, BytesMut};
use chrono::{FixedOffset, NaiveDate, NaiveTime};
use jsoniq_engine::item::codec::{decode_sequence, encode_sequence};
use jsoniq_engine::{ErrorKind, Item, Tuple};
use proptest::prelude::*;
use rstest::rstest;
use rust_decimal::Decimal;

fn round_trip(item: &Item) -> Item {
    let mut buf = BytesMut::new();
    item.encode(&mut buf);
    let mut frozen = buf.freeze();
    let out = Item::decode(&mut frozen).unwrap();
    assert!(frozen.is_empty(), "trailing bytes after decoding {item:?}");
    out
}

fn arb_offset() -> impl Strategy<Value = Option<FixedOffset>> {
    prop::option::of((-840i32..=840).prop_map(|minutes| FixedOffset::east_opt(minutes * 60).unwrap()))
}

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (1i32..1_000_000).prop_map(|days| NaiveDate::from_num_days_from_ce_opt(days).unwrap())
}

fn arb_time() -> impl Strategy<Value = NaiveTime> {
    (0u32..86_400, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).unwrap())
}

fn arb_temporal() -> impl Strategy<Value = Item> {
    prop_oneof![
        (arb_date(), arb_time(), arb_offset()).prop_map(|(date, time, tz)| Item::DateTime {
            value: date.and_time(time),
            tz,
        }),
        (arb_date(), arb_offset()).prop_map(|(date, tz)| Item::Date { date, tz }),
        (arb_time(), arb_offset()).prop_map(|(time, tz)| Item::Time { time, tz }),
    ]
}

fn timezone(item: &Item) -> Option<Option<FixedOffset>> {
    match item {
        Item::DateTime { tz, .. } | Item::Date { tz, .. } | Item::Time { tz, .. } => Some(*tz),
        _ => None,
    }
}

fn arb_atomic() -> impl Strategy<Value = Item> {
    prop_oneof![
        Just(Item::Null),
        any::<bool>().prop_map(Item::Boolean),
        any::<i64>().prop_map(Item::Integer),
        (any::<i64>(), 0u32..10).prop_map(|(m, s)| Item::Decimal(Decimal::new(m, s))),
        any::<f64>().prop_map(Item::Double),
        "\\PC{0,12}".prop_map(Item::String),
        arb_temporal(),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Item::HexBinary),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Item::Base64Binary),
    ]
}

fn arb_item() -> impl Strategy<Value = Item> {
    arb_atomic().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Item::Array),
            prop::collection::vec(inner, 0..4).prop_map(|values| {
                Item::object(values.into_iter().enumerate().map(|(i, v)| (format!("k{i}"), v))).unwrap()
            }),
        ]
    })
}

proptest! {
    #[test]
    fn decode_inverts_encode(item in arb_item()) {
        prop_assert_eq!(round_trip(&item), item);
    }

    #[test]
    fn temporal_values_keep_their_timezone(item in arb_temporal()) {
        let decoded = round_trip(&item);
        prop_assert_eq!(timezone(&decoded), timezone(&item));
        prop_assert_eq!(decoded.serialize(), item.serialize());
    }

    #[test]
    fn sequences_keep_order(items in prop::collection::vec(arb_atomic(), 0..8)) {
        let mut buf = BytesMut::new();
        encode_sequence(&items, &mut buf);
        let decoded = decode_sequence(&mut buf.freeze()).unwrap();
        prop_assert_eq!(decoded, items);
    }
}

#[rstest]
fn tuple_bindings_survive_encoding() {
    let tuple = Tuple::new()
        .with("x", vec![Item::Integer(1), Item::string("a")])
        .with("empty", Vec::new());
    let mut buf = BytesMut::new();
    tuple.encode(&mut buf);
    let decoded = Tuple::decode(&mut buf.freeze()).unwrap();
    assert_eq!(decoded, tuple);
    assert_eq!(decoded.get("empty"), Some(&Vec::new()));
}

#[rstest]
#[case::unknown_tag(vec![0xEE])]
#[case::truncated_integer(vec![3, 0, 0])]
#[case::empty(vec![])]
fn malformed_input_is_a_dynamic_error(#[case] raw: Vec<u8>) {
    let err = Item::decode(&mut raw.as_slice()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dynamic);
}

#[rstest]
fn duplicate_object_keys_are_rejected_on_decode() {
    let mut buf = BytesMut::new();
    Item::object([("a", Item::Integer(1))]).unwrap().encode(&mut buf);
    // patch the entry count from 1 to 2 and append a second "a"
    let mut raw = buf.to_vec();
    raw[1..5].copy_from_slice(&2u32.to_be_bytes());
    let mut tail = BytesMut::new();
    tail.put_u32(1);
    tail.put_slice(b"a");
    Item::Integer(2).encode(&mut tail);
    raw.extend_from_slice(&tail);
    assert!(Item::decode(&mut raw.as_slice()).is_err());
}

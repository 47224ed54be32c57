mod common;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use common::{Event, EventKind};
use proptest::prelude::*;
use rust_sqlite_repo::value::{load_value, store_value};
use rust_sqlite_repo::{
    ColumnModel, EnumName, FieldValue, Mapper, StorageType, UnixMillis, Value, ValueConverter,
};

fn column(storage_type: StorageType) -> ColumnModel {
    ColumnModel {
        ordinal: 1,
        field_name: "field".to_string(),
        column_name: "field".to_string(),
        storage_type,
        is_primary_key: false,
        is_identity: false,
        is_nullable: true,
        explicit_storage_type: None,
    }
}

fn round_trip<F: FieldValue>(field: &F) -> F {
    let col = column(F::STORAGE);
    let stored = store_value(&col, field.to_value()).unwrap();
    F::from_value(load_value(&col, stored).unwrap()).unwrap()
}

proptest! {
    #[test]
    fn integers_round_trip(v in any::<i64>()) {
        prop_assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn narrow_integers_round_trip(a in any::<i32>(), b in any::<u32>()) {
        prop_assert_eq!(round_trip(&a), a);
        prop_assert_eq!(round_trip(&b), b);
    }

    #[test]
    fn booleans_round_trip(v in any::<bool>()) {
        prop_assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn finite_reals_round_trip(v in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        prop_assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn text_round_trips(v in ".*") {
        prop_assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn blobs_round_trip(v in proptest::collection::vec(any::<u8>(), 0..64)) {
        prop_assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn optional_values_round_trip(v in proptest::option::of(any::<i64>())) {
        prop_assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn dates_round_trip(days in 0i64..100_000) {
        let date = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap() + chrono::Duration::days(days);
        prop_assert_eq!(round_trip(&date), date);
    }

    #[test]
    fn local_date_times_round_trip(secs in 0i64..6_000_000_000, nanos in 0i64..1_000_000_000) {
        let epoch: NaiveDateTime = NaiveDate::from_ymd_opt(1900, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let stamp = epoch + chrono::Duration::seconds(secs) + chrono::Duration::nanoseconds(nanos);
        prop_assert_eq!(round_trip(&stamp), stamp);
    }

    #[test]
    fn timestamps_round_trip(millis in -2_000_000_000_000i64..4_000_000_000_000) {
        let stamp = Utc.timestamp_millis_opt(millis).unwrap();
        prop_assert_eq!(round_trip(&stamp), stamp);

        let converter = UnixMillis;
        let col = column(converter.storage_type());
        let stored = store_value(&col, converter.to_storage(&stamp)).unwrap();
        prop_assert_eq!(&stored, &Value::Integer(millis));
        prop_assert_eq!(converter.from_storage(load_value(&col, stored).unwrap()).unwrap(), stamp);
    }
}

#[test]
fn enum_names_round_trip_and_reject_unknown_names() {
    let converter = EnumName::<EventKind>::default();
    for kind in [EventKind::Created, EventKind::Updated, EventKind::Deleted] {
        let stored = converter.to_storage(&kind);
        assert_eq!(converter.from_storage(stored).unwrap(), kind);
    }
    assert!(converter.from_storage(Value::from("Archived")).is_err());
}

#[test]
fn records_read_back_through_their_converters() {
    let mapper = Mapper::default();
    let mapping = mapper.mapping::<Event>().unwrap();
    let event = Event {
        id: 4,
        kind: EventKind::Deleted,
        happened_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        acknowledged_at: None,
        payload: vec![0, 1, 2, 255],
    };
    let values: Vec<Value> = mapping
        .values_where(&event, |_| true)
        .unwrap()
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    assert_eq!(
        values,
        vec![
            Value::Integer(4),
            Value::from("Deleted"),
            Value::Integer(1_714_552_200_000),
            Value::Null,
            Value::Blob(vec![0, 1, 2, 255]),
        ]
    );
}

#[test]
fn timestamps_store_as_rfc3339_text_without_a_converter() {
    let stamp: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(stamp.to_value(), Value::from("2024-01-02T03:04:05Z"));
}

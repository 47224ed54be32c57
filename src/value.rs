//! Storage values and the single conversion path between fields and columns.
//!
//! Every column write goes through [`store_value`] and every column read through
//! [`load_value`]; both coerce into the column's effective [`StorageType`].

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};
use crate::schema::ColumnModel;

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Storage class of a non-null value.
    pub fn storage_type(&self) -> Option<StorageType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(StorageType::Integer),
            Value::Real(_) => Some(StorageType::Real),
            Value::Text(_) => Some(StorageType::Text),
            Value::Blob(_) => Some(StorageType::Blob),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(
                std::str::from_utf8(t)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))?
                    .to_string(),
            ),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

macro_rules! value_from {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from($v: $ty) -> Self {
                $body
            }
        })*
    };
}

value_from! {
    bool => |v| Value::Integer(i64::from(v)),
    i32 => |v| Value::Integer(i64::from(v)),
    i64 => |v| Value::Integer(v),
    u32 => |v| Value::Integer(i64::from(v)),
    f32 => |v| Value::Real(f64::from(v)),
    f64 => |v| Value::Real(v),
    String => |v| Value::Text(v),
    &str => |v| Value::Text(v.to_string()),
    Vec<u8> => |v| Value::Blob(v),
    &[u8] => |v| Value::Blob(v.to_vec()),
    NaiveDate => |v| v.to_value(),
    NaiveDateTime => |v| v.to_value(),
    DateTime<Utc> => |v| v.to_value(),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Column storage classes understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    Integer,
    Real,
    Text,
    Blob,
}

impl StorageType {
    pub fn sql_name(self) -> &'static str {
        match self {
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
            StorageType::Text => "TEXT",
            StorageType::Blob => "BLOB",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A field value that did not have the shape its Rust type needs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct ValueError {
    pub expected: &'static str,
    pub found: String,
}

impl ValueError {
    fn new(expected: &'static str, found: &Value) -> Self {
        let found = match found {
            Value::Text(s) => format!("TEXT {s:?}"),
            other => other.type_name().to_string(),
        };
        Self { expected, found }
    }
}

/// In-memory field types with a built-in storage mapping.
///
/// The storage class is inferred from the Rust type unless the column is
/// backed by a [`crate::convert::ValueConverter`].
pub trait FieldValue: Sized {
    const STORAGE: StorageType;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, ValueError>;
}

impl FieldValue for bool {
    const STORAGE: StorageType = StorageType::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Integer(i) => Ok(i != 0),
            other => Err(ValueError::new("boolean INTEGER", &other)),
        }
    }
}

impl FieldValue for i64 {
    const STORAGE: StorageType = StorageType::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(ValueError::new("INTEGER", &other)),
        }
    }
}

macro_rules! narrow_integer_field {
    ($($ty:ty),*) => {
        $(impl FieldValue for $ty {
            const STORAGE: StorageType = StorageType::Integer;

            fn to_value(&self) -> Value {
                Value::Integer(i64::from(*self))
            }

            fn from_value(value: Value) -> Result<Self, ValueError> {
                match value {
                    Value::Integer(i) => <$ty>::try_from(i)
                        .map_err(|_| ValueError::new(stringify!($ty), &Value::Integer(i))),
                    other => Err(ValueError::new("INTEGER", &other)),
                }
            }
        })*
    };
}

narrow_integer_field!(i32, u32);

impl FieldValue for f64 {
    const STORAGE: StorageType = StorageType::Real;

    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Real(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => Err(ValueError::new("REAL", &other)),
        }
    }
}

impl FieldValue for f32 {
    const STORAGE: StorageType = StorageType::Real;

    fn to_value(&self) -> Value {
        Value::Real(f64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FieldValue for String {
    const STORAGE: StorageType = StorageType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(ValueError::new("TEXT", &other)),
        }
    }
}

impl FieldValue for Vec<u8> {
    const STORAGE: StorageType = StorageType::Blob;

    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Blob(b) => Ok(b),
            other => Err(ValueError::new("BLOB", &other)),
        }
    }
}

const ISO_DATE: &str = "%Y-%m-%d";
const ISO_DATE_TIME: &str = "%Y-%m-%dT%H:%M:%S%.f";

impl FieldValue for NaiveDate {
    const STORAGE: StorageType = StorageType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.format(ISO_DATE).to_string())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(ref s) => NaiveDate::parse_from_str(s, ISO_DATE)
                .map_err(|_| ValueError::new("ISO date", &value)),
            other => Err(ValueError::new("ISO date", &other)),
        }
    }
}

impl FieldValue for NaiveDateTime {
    const STORAGE: StorageType = StorageType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.format(ISO_DATE_TIME).to_string())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(ref s) => NaiveDateTime::parse_from_str(s, ISO_DATE_TIME)
                .map_err(|_| ValueError::new("ISO date-time", &value)),
            other => Err(ValueError::new("ISO date-time", &other)),
        }
    }
}

impl FieldValue for DateTime<Utc> {
    const STORAGE: StorageType = StorageType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(ref s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ValueError::new("RFC 3339 timestamp", &value)),
            other => Err(ValueError::new("RFC 3339 timestamp", &other)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const STORAGE: StorageType = T::STORAGE;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldValue::to_value)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Coerces a field's value into its column's storage class before binding.
pub fn store_value(column: &ColumnModel, value: Value) -> Result<Value> {
    coerce(value, column.storage_type, &column.column_name)
}

/// Coerces a value read from the store into its column's storage class.
///
/// The column's storage type already prefers a converter's declaration over
/// the inferred one.
pub fn load_value(column: &ColumnModel, value: Value) -> Result<Value> {
    coerce(value, column.storage_type, &column.column_name)
}

fn coerce(value: Value, target: StorageType, column: &str) -> Result<Value> {
    let mismatch = |value: &Value| {
        DbError::Mapping(format!(
            "cannot convert {} to {target} for column {column}",
            value.type_name()
        ))
    };

    match (target, value) {
        (_, Value::Null) => Ok(Value::Null),
        (StorageType::Integer, v @ Value::Integer(_)) => Ok(v),
        (StorageType::Integer, Value::Real(f))
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
        {
            Ok(Value::Integer(f as i64))
        }
        (StorageType::Integer, Value::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| mismatch(&Value::Text(s))),
        (StorageType::Real, Value::Integer(i)) => Ok(Value::Real(i as f64)),
        (StorageType::Real, v @ Value::Real(_)) => Ok(v),
        (StorageType::Real, Value::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| mismatch(&Value::Text(s))),
        (StorageType::Text, v @ Value::Text(_)) => Ok(v),
        (StorageType::Text, Value::Integer(i)) => Ok(Value::Text(i.to_string())),
        (StorageType::Text, Value::Real(f)) => Ok(Value::Text(f.to_string())),
        (StorageType::Blob, v @ Value::Blob(_)) => Ok(v),
        (_, other) => Err(mismatch(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(storage_type: StorageType) -> ColumnModel {
        ColumnModel {
            ordinal: 1,
            field_name: "f".to_string(),
            column_name: "c".to_string(),
            storage_type,
            is_primary_key: false,
            is_identity: false,
            is_nullable: true,
            explicit_storage_type: None,
        }
    }

    #[test]
    fn booleans_store_as_integers() {
        let col = column(StorageType::Integer);
        assert_eq!(store_value(&col, true.to_value()).unwrap(), Value::Integer(1));
        assert_eq!(store_value(&col, false.to_value()).unwrap(), Value::Integer(0));
    }

    #[test]
    fn reals_outside_the_integer_range_are_rejected() {
        let col = column(StorageType::Integer);
        let two_pow_63 = 2f64.powi(63);
        assert!(matches!(
            store_value(&col, Value::Real(two_pow_63)),
            Err(DbError::Mapping(_))
        ));
        assert_eq!(
            store_value(&col, Value::Real(-two_pow_63)).unwrap(),
            Value::Integer(i64::MIN)
        );
        assert_eq!(
            store_value(&col, Value::Real(4096.0)).unwrap(),
            Value::Integer(4096)
        );
    }

    #[test]
    fn null_passes_through_every_column_type() {
        for ty in [
            StorageType::Integer,
            StorageType::Real,
            StorageType::Text,
            StorageType::Blob,
        ] {
            assert_eq!(store_value(&column(ty), Value::Null).unwrap(), Value::Null);
        }
    }

    #[test]
    fn text_parses_into_numeric_columns() {
        assert_eq!(
            store_value(&column(StorageType::Integer), Value::from(" 42 ")).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            store_value(&column(StorageType::Real), Value::from("2.5")).unwrap(),
            Value::Real(2.5)
        );
    }

    #[test]
    fn lossy_and_binary_coercions_fail() {
        assert!(matches!(
            store_value(&column(StorageType::Integer), Value::Real(1.5)),
            Err(DbError::Mapping(_))
        ));
        assert!(matches!(
            store_value(&column(StorageType::Blob), Value::from("bytes")),
            Err(DbError::Mapping(_))
        ));
        assert!(matches!(
            store_value(&column(StorageType::Text), Value::Blob(vec![1])),
            Err(DbError::Mapping(_))
        ));
    }

    #[test]
    fn narrow_integers_reject_overflow() {
        let err = i32::from_value(Value::Integer(i64::from(i32::MAX) + 1)).unwrap_err();
        assert_eq!(err.expected, "i32");
        assert!(u32::from_value(Value::Integer(-1)).is_err());
    }

    #[test]
    fn date_time_text_is_canonical_iso() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(date.to_value(), Value::from("2024-02-29"));
        let stamp = date.and_hms_milli_opt(13, 5, 9, 120).unwrap();
        assert_eq!(stamp.to_value(), Value::from("2024-02-29T13:05:09.120"));
        assert_eq!(NaiveDateTime::from_value(stamp.to_value()).unwrap(), stamp);
    }
}

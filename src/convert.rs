//! Pluggable field <-> storage converters and the registry that shares them.
//!
//! # Intention
//!
//! - A converter is a pure, stateless pair of functions plus the storage class
//!   it writes. One instance per converter type is shared by every field that
//!   uses it.
//! - The registry is an explicit object handed to the [`crate::schema::Mapper`],
//!   never process-global state.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;

use crate::value::{StorageType, Value};

/// Maps a field-level value to a storage primitive and back.
pub trait ValueConverter: Send + Sync + 'static {
    type Field;

    /// Storage class this converter writes; overrides the inferred one.
    fn storage_type(&self) -> StorageType {
        StorageType::Text
    }

    fn to_storage(&self, field: &Self::Field) -> Value;

    fn from_storage(&self, value: Value) -> anyhow::Result<Self::Field>;
}

/// Insert-once cache of converter instances keyed by converter type.
#[derive(Default)]
pub struct ConverterRegistry {
    instances: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared instance of `C`, creating it on first use.
    ///
    /// Concurrent callers racing on the same type all receive the same `Arc`.
    pub fn get_or_create<C: ValueConverter + Default>(&self) -> Arc<C> {
        let erased = self
            .instances
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Arc::new(C::default()) as Arc<dyn Any + Send + Sync>)
            .clone();
        downcast(erased)
    }

    /// Registers a converter that needs construction arguments.
    ///
    /// If an instance of `C` is already registered it wins and is returned.
    pub fn register<C: ValueConverter>(&self, converter: C) -> Arc<C> {
        let erased = self
            .instances
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Arc::new(converter) as Arc<dyn Any + Send + Sync>)
            .clone();
        downcast(erased)
    }

    pub fn get<C: ValueConverter>(&self) -> Option<Arc<C>> {
        self.instances
            .get(&TypeId::of::<C>())
            .map(|entry| downcast(entry.value().clone()))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

pub(crate) fn downcast<C: Send + Sync + 'static>(erased: Arc<dyn Any + Send + Sync>) -> Arc<C> {
    erased
        .downcast::<C>()
        .unwrap_or_else(|_| unreachable!("registry entries are keyed by TypeId"))
}

/// `DateTime<Utc>` stored as epoch milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixMillis;

impl ValueConverter for UnixMillis {
    type Field = DateTime<Utc>;

    fn storage_type(&self) -> StorageType {
        StorageType::Integer
    }

    fn to_storage(&self, field: &DateTime<Utc>) -> Value {
        Value::Integer(field.timestamp_millis())
    }

    fn from_storage(&self, value: Value) -> anyhow::Result<DateTime<Utc>> {
        match value {
            Value::Integer(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| anyhow!("timestamp {ms} ms is out of range")),
            other => Err(anyhow!("expected epoch millis, found {other:?}")),
        }
    }
}

/// Enumerations that persist as their textual variant name.
pub trait TextEnum: Sized + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;
}

/// Stores a [`TextEnum`] as TEXT.
pub struct EnumName<E>(PhantomData<fn() -> E>);

impl<E> Default for EnumName<E> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<E: TextEnum> ValueConverter for EnumName<E> {
    type Field = E;

    fn to_storage(&self, field: &E) -> Value {
        Value::Text(field.name().to_string())
    }

    fn from_storage(&self, value: Value) -> anyhow::Result<E> {
        match value {
            Value::Text(name) => E::from_name(&name)
                .with_context(|| format!("unknown {} variant {name:?}", short_type_name::<E>())),
            other => Err(anyhow!("expected enum name, found {other:?}")),
        }
    }
}

/// Lifts a converter over `Option<Field>`, mapping `None` to NULL.
#[derive(Default)]
pub struct Nullable<C>(C);

impl<C: ValueConverter> ValueConverter for Nullable<C> {
    type Field = Option<C::Field>;

    fn storage_type(&self) -> StorageType {
        self.0.storage_type()
    }

    fn to_storage(&self, field: &Option<C::Field>) -> Value {
        field
            .as_ref()
            .map_or(Value::Null, |inner| self.0.to_storage(inner))
    }

    fn from_storage(&self, value: Value) -> anyhow::Result<Option<C::Field>> {
        match value {
            Value::Null => Ok(None),
            other => self.0.from_storage(other).map(Some),
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

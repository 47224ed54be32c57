//! Record descriptions, column models and the per-type mapping cache.
//!
//! # Intention
//!
//! - A record type declares its table once through [`Record::describe`]; the
//!   [`Mapper`] turns that declaration into an ordered [`TableModel`] plus
//!   field accessors, and caches the result for the life of the mapper.
//! - Only declared fields are mapped. Column order is the declared ordinal,
//!   ties keep declaration order.

use std::any::{type_name, Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::convert::{downcast, ConverterRegistry, EnumName, TextEnum, ValueConverter};
use crate::error::{DbError, Result};
use crate::ident::validate_identifier;
use crate::value::{load_value, store_value, FieldValue, StorageType, Value};

/// Ordinal given to columns that do not declare one.
pub const DEFAULT_ORDINAL: i32 = 1010;

/// Metadata for one mapped field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnModel {
    pub ordinal: i32,
    pub field_name: String,
    pub column_name: String,
    /// Effective storage class: the converter's declaration when present.
    pub storage_type: StorageType,
    pub is_primary_key: bool,
    pub is_identity: bool,
    pub is_nullable: bool,
    pub explicit_storage_type: Option<StorageType>,
}

impl ColumnModel {
    /// Case-insensitive match on either the column or the field name.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        self.column_name.eq_ignore_ascii_case(name) || self.field_name.eq_ignore_ascii_case(name)
    }
}

/// A record type's table and its columns in canonical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableModel {
    pub table_name: String,
    pub columns: Vec<ColumnModel>,
}

impl TableModel {
    /// Primary-key columns in ordinal order.
    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnModel> {
        self.columns.iter().filter(|c| c.is_primary_key)
    }

    pub fn identity(&self) -> Option<&ColumnModel> {
        self.columns.iter().find(|c| c.is_identity)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnModel> {
        self.columns.iter().find(|c| c.matches(name))
    }
}

/// A plain data type persisted as one table row.
///
/// ```ignore
/// impl Record for Todo {
///     fn describe(t: &mut TableBuilder<'_, Self>) {
///         t.name("todos");
///         t.field("id", |r| &r.id, |r| &mut r.id).ordinal(1).primary_key().identity();
///         t.field("title", |r| &r.title, |r| &mut r.title).ordinal(2).not_null();
///     }
/// }
/// ```
pub trait Record: Default + Send + 'static {
    fn describe(table: &mut TableBuilder<'_, Self>);
}

type ReadFn<R> = Box<dyn Fn(&R) -> Value + Send + Sync>;
type WriteFn<R> = Box<dyn Fn(&mut R, Value) -> Result<()> + Send + Sync>;

struct Accessor<R> {
    read: ReadFn<R>,
    write: WriteFn<R>,
}

/// Column declaration returned by [`TableBuilder`]; adjust with the setters.
pub struct ColumnSpec<R> {
    model: ColumnModel,
    accessor: Accessor<R>,
}

impl<R> ColumnSpec<R> {
    /// Column name, defaults to the field name.
    pub fn column(&mut self, name: &str) -> &mut Self {
        if !name.trim().is_empty() {
            self.model.column_name = name.trim().to_string();
        }
        self
    }

    pub fn ordinal(&mut self, ordinal: i32) -> &mut Self {
        self.model.ordinal = ordinal;
        self
    }

    pub fn primary_key(&mut self) -> &mut Self {
        self.model.is_primary_key = true;
        self
    }

    /// Store-assigned value; never written on insert.
    pub fn identity(&mut self) -> &mut Self {
        self.model.is_identity = true;
        self
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.nullable(false)
    }

    pub fn nullable(&mut self, nullable: bool) -> &mut Self {
        self.model.is_nullable = nullable;
        self
    }
}

/// Collects a record type's table name and column declarations.
pub struct TableBuilder<'a, R> {
    converters: &'a ConverterRegistry,
    name: Option<String>,
    columns: Vec<ColumnSpec<R>>,
}

impl<'a, R: 'static> TableBuilder<'a, R> {
    fn new(converters: &'a ConverterRegistry) -> Self {
        Self {
            converters,
            name: None,
            columns: Vec::new(),
        }
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn converters(&self) -> &ConverterRegistry {
        self.converters
    }

    /// A field whose storage class is inferred from its Rust type.
    pub fn field<F: FieldValue + 'static>(
        &mut self,
        field_name: &'static str,
        get: fn(&R) -> &F,
        get_mut: fn(&mut R) -> &mut F,
    ) -> &mut ColumnSpec<R> {
        let accessor = Accessor {
            read: Box::new(move |record: &R| get(record).to_value()),
            write: Box::new(move |record: &mut R, value: Value| {
                *get_mut(record) = F::from_value(value)
                    .map_err(|e| DbError::Mapping(format!("field {field_name}: {e}")))?;
                Ok(())
            }),
        };
        self.push(field_name, F::STORAGE, None, accessor)
    }

    /// A field stored through the shared instance of converter `C`.
    pub fn converted<C: ValueConverter + Default>(
        &mut self,
        field_name: &'static str,
        get: fn(&R) -> &C::Field,
        get_mut: fn(&mut R) -> &mut C::Field,
    ) -> &mut ColumnSpec<R> {
        let converter = self.converters.get_or_create::<C>();
        self.converted_with(field_name, converter, get, get_mut)
    }

    /// A field stored through an explicitly provided converter instance.
    pub fn converted_with<C: ValueConverter>(
        &mut self,
        field_name: &'static str,
        converter: Arc<C>,
        get: fn(&R) -> &C::Field,
        get_mut: fn(&mut R) -> &mut C::Field,
    ) -> &mut ColumnSpec<R> {
        let storage = converter.storage_type();
        let reader = Arc::clone(&converter);
        let accessor = Accessor {
            read: Box::new(move |record: &R| reader.to_storage(get(record))),
            write: Box::new(move |record: &mut R, value: Value| {
                *get_mut(record) = converter
                    .from_storage(value)
                    .map_err(|e| DbError::conversion(field_name, e))?;
                Ok(())
            }),
        };
        self.push(field_name, storage, Some(storage), accessor)
    }

    /// An enumeration stored as its variant name.
    pub fn enum_field<E: TextEnum>(
        &mut self,
        field_name: &'static str,
        get: fn(&R) -> &E,
        get_mut: fn(&mut R) -> &mut E,
    ) -> &mut ColumnSpec<R> {
        self.converted::<EnumName<E>>(field_name, get, get_mut)
    }

    fn push(
        &mut self,
        field_name: &'static str,
        storage_type: StorageType,
        explicit_storage_type: Option<StorageType>,
        accessor: Accessor<R>,
    ) -> &mut ColumnSpec<R> {
        let index = self.columns.len();
        self.columns.push(ColumnSpec {
            model: ColumnModel {
                ordinal: DEFAULT_ORDINAL,
                field_name: field_name.to_string(),
                column_name: field_name.to_string(),
                storage_type,
                is_primary_key: false,
                is_identity: false,
                is_nullable: true,
                explicit_storage_type,
            },
            accessor,
        });
        &mut self.columns[index]
    }

    fn finish(self, record_type: &'static str) -> Result<EntityMapping<R>> {
        let table_name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => validate_identifier(name)?.to_string(),
            _ => {
                return Err(DbError::Configuration(format!(
                    "record type {record_type} declares no table name"
                )))
            }
        };

        let mut specs = self.columns;
        specs.sort_by_key(|spec| spec.model.ordinal);

        let mut seen = HashSet::new();
        let mut identities = 0;
        for spec in &specs {
            let column = &spec.model;
            validate_identifier(&column.column_name)?;
            if !seen.insert(column.column_name.to_ascii_lowercase()) {
                return Err(DbError::Configuration(format!(
                    "{record_type}: column {} is declared twice",
                    column.column_name
                )));
            }
            if column.is_identity {
                identities += 1;
                if !column.is_primary_key || column.storage_type != StorageType::Integer {
                    return Err(DbError::Configuration(format!(
                        "{record_type}: identity column {} must be an INTEGER primary key",
                        column.column_name
                    )));
                }
            }
        }
        if identities > 1 {
            return Err(DbError::Configuration(format!(
                "{record_type}: at most one identity column is allowed"
            )));
        }

        let (columns, accessors) = specs
            .into_iter()
            .map(|spec| (spec.model, spec.accessor))
            .unzip();
        Ok(EntityMapping {
            record_type,
            table: TableModel {
                table_name,
                columns,
            },
            accessors,
        })
    }
}

/// A record type's table model together with its field accessors.
pub struct EntityMapping<R> {
    record_type: &'static str,
    table: TableModel,
    accessors: Vec<Accessor<R>>,
}

impl<R> EntityMapping<R> {
    pub fn record_type(&self) -> &'static str {
        self.record_type
    }

    pub fn table(&self) -> &TableModel {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        &self.table.table_name
    }

    pub fn columns(&self) -> &[ColumnModel] {
        &self.table.columns
    }

    pub fn primary_keys(&self) -> Vec<&ColumnModel> {
        self.table.primary_keys().collect()
    }

    /// Finds a column by column or field name.
    pub fn column_by_name(&self, name: &str) -> Result<&ColumnModel> {
        if name.trim().is_empty() {
            return Err(DbError::Argument("column name must not be empty".to_string()));
        }
        self.table.column(name).ok_or_else(|| {
            DbError::Argument(format!(
                "no column {name:?} on {} ({})",
                self.table.table_name, self.record_type
            ))
        })
    }

    /// Storage values for every column accepted by `include`, in column order.
    pub fn values_where(
        &self,
        record: &R,
        include: impl Fn(&ColumnModel) -> bool,
    ) -> Result<Vec<(&ColumnModel, Value)>> {
        self.table
            .columns
            .iter()
            .zip(&self.accessors)
            .filter(|(column, _)| include(column))
            .map(|(column, accessor)| Ok((column, store_value(column, (accessor.read)(record))?)))
            .collect()
    }

    /// The record's primary-key values in ordinal order, read through converters.
    pub fn key_values(&self, record: &R) -> Result<Vec<Value>> {
        let keys = self.values_where(record, |c| c.is_primary_key)?;
        if keys.is_empty() {
            return Err(self.missing_primary_key());
        }
        keys.into_iter()
            .map(|(column, value)| {
                if value.is_null() {
                    Err(DbError::Integrity(format!(
                        "primary key {} of {} is NULL",
                        column.column_name, self.table.table_name
                    )))
                } else {
                    Ok(value)
                }
            })
            .collect()
    }

    /// Writes a store-assigned row id into the identity field, if there is one.
    pub fn assign_identity(&self, record: &mut R, row_id: i64) -> Result<bool> {
        let slot = self
            .table
            .columns
            .iter()
            .zip(&self.accessors)
            .find(|(column, _)| column.is_identity && column.is_primary_key);
        match slot {
            Some((column, accessor)) => {
                (accessor.write)(record, load_value(column, Value::Integer(row_id))?)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Builds a record from a row; columns absent from the row keep their default.
    pub fn from_row(&self, row: &rusqlite::Row<'_>) -> Result<R>
    where
        R: Default,
    {
        let statement: &rusqlite::Statement<'_> = row.as_ref();
        let mut record = R::default();
        for (column, accessor) in self.table.columns.iter().zip(&self.accessors) {
            let Ok(index) = statement.column_index(&column.column_name) else {
                continue;
            };
            let raw: Value = row.get(index)?;
            (accessor.write)(&mut record, load_value(column, raw)?)?;
        }
        Ok(record)
    }

    pub(crate) fn missing_primary_key(&self) -> DbError {
        DbError::Schema(format!(
            "{} ({}) has no primary key",
            self.table.table_name, self.record_type
        ))
    }
}

/// Type registry and schema reflector: resolves and caches [`EntityMapping`]s.
pub struct Mapper {
    converters: Arc<ConverterRegistry>,
    mappings: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new(Arc::new(ConverterRegistry::new()))
    }
}

impl Mapper {
    pub fn new(converters: Arc<ConverterRegistry>) -> Self {
        Self {
            converters,
            mappings: DashMap::new(),
        }
    }

    pub fn converters(&self) -> &Arc<ConverterRegistry> {
        &self.converters
    }

    /// The cached mapping for `R`, derived on first access.
    pub fn mapping<R: Record>(&self) -> Result<Arc<EntityMapping<R>>> {
        let key = TypeId::of::<R>();
        if let Some(found) = self.mappings.get(&key) {
            return Ok(downcast(found.value().clone()));
        }
        let erased = self
            .mappings
            .entry(key)
            .or_try_insert_with(|| {
                self.describe::<R>()
                    .map(|mapping| Arc::new(mapping) as Arc<dyn Any + Send + Sync>)
            })?
            .clone();
        Ok(downcast(erased))
    }

    /// Columns of `R` sorted by ordinal; the returned copy is the caller's.
    pub fn columns_of<R: Record>(&self) -> Result<Vec<ColumnModel>> {
        Ok(self.mapping::<R>()?.columns().to_vec())
    }

    pub fn table_name_of<R: Record>(&self) -> Result<String> {
        Ok(self.mapping::<R>()?.table_name().to_string())
    }

    pub fn primary_keys_of<R: Record>(&self) -> Result<Vec<ColumnModel>> {
        Ok(self.mapping::<R>()?.table.primary_keys().cloned().collect())
    }

    pub fn column_by_name<R: Record>(&self, name: &str) -> Result<ColumnModel> {
        self.mapping::<R>()?.column_by_name(name).cloned()
    }

    fn describe<R: Record>(&self) -> Result<EntityMapping<R>> {
        let mut builder = TableBuilder::new(&self.converters);
        R::describe(&mut builder);
        let mapping = builder.finish(type_name::<R>())?;
        debug!(
            record = mapping.record_type,
            table = %mapping.table.table_name,
            columns = mapping.table.columns.len(),
            "mapped record type"
        );
        Ok(mapping)
    }
}

//! DDL and record-level DML built from a record type's column model.

use crate::error::{DbError, Result};
use crate::ident::{quote_identifier, validate_identifier, RawExpr};
use crate::schema::{ColumnModel, EntityMapping, Mapper, Record};
use crate::value::{store_value, StorageType, Value};

use super::select::{DeleteWhere, Select, UpdateWhere};
use super::CompiledCommand;

/// Compiles commands for record types known to a [`Mapper`].
#[derive(Clone, Copy)]
pub struct Compiler<'m> {
    mapper: &'m Mapper,
}

impl<'m> Compiler<'m> {
    pub fn new(mapper: &'m Mapper) -> Self {
        Self { mapper }
    }

    pub fn mapper(&self) -> &'m Mapper {
        self.mapper
    }

    /// `CREATE TABLE IF NOT EXISTS` for `R`.
    pub fn create_table<R: Record>(&self) -> Result<CompiledCommand> {
        self.create_table_with::<R>(&[])
    }

    /// `CREATE TABLE IF NOT EXISTS` with trailing table constraints inserted verbatim.
    pub fn create_table_with<R: Record>(&self, constraints: &[RawExpr]) -> Result<CompiledCommand> {
        let mapping = self.mapper.mapping::<R>()?;
        let columns = mapping.columns();
        if columns.is_empty() {
            return Err(DbError::Schema(format!(
                "{} ({}) has no mapped columns",
                mapping.table_name(),
                mapping.record_type()
            )));
        }

        let keys = mapping.primary_keys();
        let composite = keys.len() > 1;
        let mut parts: Vec<String> = columns
            .iter()
            .map(|column| column_definition(column, composite))
            .collect();
        if composite {
            parts.push(format!("PRIMARY KEY ({})", quoted_names(&keys)));
        }
        parts.extend(constraints.iter().map(|c| c.as_str().to_string()));

        Ok(CompiledCommand::ddl(format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            quote_identifier(mapping.table_name()),
            parts.join(", ")
        )))
    }

    /// `CREATE [UNIQUE] INDEX IF NOT EXISTS` over columns of `R`, named by column or field.
    pub fn create_index<R: Record>(
        &self,
        index_name: &str,
        unique: bool,
        columns: &[&str],
    ) -> Result<CompiledCommand> {
        let index_name = validate_identifier(index_name)?;
        if columns.is_empty() {
            return Err(DbError::Argument(format!(
                "index {index_name} needs at least one column"
            )));
        }
        let mapping = self.mapper.mapping::<R>()?;
        let columns = columns
            .iter()
            .map(|name| {
                let name = validate_identifier(name)?;
                Ok(quote_identifier(&mapping.column_by_name(name)?.column_name))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledCommand::ddl(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
            if unique { "UNIQUE " } else { "" },
            quote_identifier(index_name),
            quote_identifier(mapping.table_name()),
            columns.join(", ")
        )))
    }

    pub fn drop_index(&self, index_name: &str) -> Result<CompiledCommand> {
        let index_name = validate_identifier(index_name)?;
        Ok(CompiledCommand::ddl(format!(
            "DROP INDEX IF EXISTS {};",
            quote_identifier(index_name)
        )))
    }

    pub fn drop_table<R: Record>(&self) -> Result<CompiledCommand> {
        let mapping = self.mapper.mapping::<R>()?;
        self.drop_table_named(mapping.table_name())
    }

    pub fn drop_table_named(&self, table_name: &str) -> Result<CompiledCommand> {
        let table_name = validate_identifier(table_name)?;
        Ok(CompiledCommand::ddl(format!(
            "DROP TABLE IF EXISTS {};",
            quote_identifier(table_name)
        )))
    }

    /// Inserts every non-identity column.
    pub fn insert<R: Record>(&self, record: &R) -> Result<CompiledCommand> {
        let mapping = self.mapper.mapping::<R>()?;
        let values = mapping.values_where(record, |c| !c.is_identity)?;
        if values.is_empty() {
            return Err(DbError::Mapping(format!(
                "{} has no writable columns",
                mapping.table_name()
            )));
        }

        let names: Vec<String> = values
            .iter()
            .map(|(column, _)| quote_identifier(&column.column_name))
            .collect();
        let marks = vec!["?"; values.len()].join(", ");
        let args = values.into_iter().map(|(_, value)| value).collect();
        CompiledCommand::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({});",
                quote_identifier(mapping.table_name()),
                names.join(", "),
                marks
            ),
            args,
        )
    }

    /// Updates every non-key column of the row identified by the record's key.
    pub fn update<R: Record>(&self, record: &R) -> Result<CompiledCommand> {
        let mapping = self.mapper.mapping::<R>()?;
        let keys = mapping.key_values(record)?;
        let values = mapping.values_where(record, |c| !c.is_primary_key)?;
        if values.is_empty() {
            return Err(DbError::Mapping(format!(
                "{} has no updatable columns",
                mapping.table_name()
            )));
        }

        let assignments: Vec<String> = values
            .iter()
            .map(|(column, _)| format!("{} = ?", quote_identifier(&column.column_name)))
            .collect();
        let mut args: Vec<Value> = values.into_iter().map(|(_, value)| value).collect();
        args.extend(keys);
        CompiledCommand::new(
            format!(
                "UPDATE {} SET {} WHERE {};",
                quote_identifier(mapping.table_name()),
                assignments.join(", "),
                key_clause(&mapping)
            ),
            args,
        )
    }

    /// Deletes the row identified by the record's key.
    pub fn delete<R: Record>(&self, record: &R) -> Result<CompiledCommand> {
        let mapping = self.mapper.mapping::<R>()?;
        let keys = mapping.key_values(record)?;
        delete_by_keys(&mapping, keys)
    }

    /// Deletes by explicit key values, positionally matching the key columns.
    pub fn delete_by_key<R: Record>(&self, key: &[Value]) -> Result<CompiledCommand> {
        let mapping = self.mapper.mapping::<R>()?;
        let columns = mapping.primary_keys();
        if columns.is_empty() {
            return Err(mapping.missing_primary_key());
        }
        if columns.len() != key.len() {
            return Err(DbError::Argument(format!(
                "{} has {} primary key columns but {} values were given",
                mapping.table_name(),
                columns.len(),
                key.len()
            )));
        }
        let keys = columns
            .iter()
            .zip(key)
            .map(|(column, value)| key_value(column, value.clone()))
            .collect::<Result<Vec<_>>>()?;
        delete_by_keys(&mapping, keys)
    }

    pub fn delete_all<R: Record>(&self) -> Result<CompiledCommand> {
        let mapping = self.mapper.mapping::<R>()?;
        Ok(CompiledCommand::ddl(format!(
            "DELETE FROM {};",
            quote_identifier(mapping.table_name())
        )))
    }

    /// Single-row lookup on the first primary-key column only.
    ///
    /// Composite-key tables should use [`Compiler::select`] with a full predicate.
    pub fn get_by_id<R: Record>(&self, id: impl Into<Value>) -> Result<CompiledCommand> {
        let mapping = self.mapper.mapping::<R>()?;
        let key = mapping
            .primary_keys()
            .first()
            .copied()
            .ok_or_else(|| mapping.missing_primary_key())?;
        let id = key_value(key, id.into())?;
        CompiledCommand::new(
            format!(
                "SELECT * FROM {} WHERE {} = ? LIMIT 1;",
                quote_identifier(mapping.table_name()),
                quote_identifier(&key.column_name)
            ),
            vec![id],
        )
    }

    pub fn select<R: Record>(&self) -> Result<Select<R>> {
        Select::from(self.mapper)
    }

    pub fn update_where<R: Record>(&self) -> Result<UpdateWhere<R>> {
        UpdateWhere::new(self.mapper)
    }

    pub fn delete_where<R: Record>(&self) -> Result<DeleteWhere<R>> {
        DeleteWhere::new(self.mapper)
    }
}

fn column_definition(column: &ColumnModel, composite_key: bool) -> String {
    let mut def = format!(
        "{} {}",
        quote_identifier(&column.column_name),
        column.storage_type.sql_name()
    );
    if column.is_primary_key && !composite_key {
        def.push_str(" PRIMARY KEY");
        if column.is_identity && column.storage_type == StorageType::Integer {
            def.push_str(" AUTOINCREMENT");
        }
    } else if !column.is_nullable || (column.is_primary_key && composite_key) {
        def.push_str(" NOT NULL");
    }
    def
}

fn quoted_names(columns: &[&ColumnModel]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(&c.column_name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_clause<R: Record>(mapping: &EntityMapping<R>) -> String {
    mapping
        .primary_keys()
        .iter()
        .map(|c| format!("{} = ?", quote_identifier(&c.column_name)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn key_value(column: &ColumnModel, value: Value) -> Result<Value> {
    let value = store_value(column, value)?;
    if value.is_null() {
        return Err(DbError::Integrity(format!(
            "primary key {} must not be NULL",
            column.column_name
        )));
    }
    Ok(value)
}

fn delete_by_keys<R: Record>(mapping: &EntityMapping<R>, keys: Vec<Value>) -> Result<CompiledCommand> {
    CompiledCommand::new(
        format!(
            "DELETE FROM {} WHERE {};",
            quote_identifier(mapping.table_name()),
            key_clause(mapping)
        ),
        keys,
    )
}

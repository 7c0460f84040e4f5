//! Resolves partially-qualified table keys against discovered metadata.

use std::collections::BTreeSet;

use reporter_repository::{FieldFilters, TableFilters, TableSchema};

use crate::datasource::DEFAULT_SCHEMA;
use crate::error::ProcessingError;

/// A table key split into its optional explicit schema and table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableKey<'a> {
    pub schema: Option<&'a str>,
    pub table: &'a str,
}

/// Splits `schema__table` or `schema.table`; `__` takes precedence.
pub fn parse_table_key(key: &str) -> TableKey<'_> {
    if let Some((schema, table)) = key.split_once("__") {
        return TableKey {
            schema: Some(schema),
            table,
        };
    }
    if let Some((schema, table)) = key.split_once('.') {
        return TableKey {
            schema: Some(schema),
            table,
        };
    }
    TableKey {
        schema: None,
        table: key,
    }
}

/// Schema lookups for a single database.
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    database: String,
    tables: Vec<TableSchema>,
}

impl SchemaResolver {
    pub fn new(database: impl Into<String>, tables: Vec<TableSchema>) -> Self {
        Self {
            database: database.into(),
            tables,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Returns the schema that owns `table`.
    ///
    /// An explicit schema must match exactly. Without one, the table must live
    /// in exactly one discovered schema.
    pub fn resolve_schema(
        &self,
        explicit_schema: Option<&str>,
        table: &str,
    ) -> Result<String, ProcessingError> {
        if let Some(schema) = explicit_schema {
            return match TableSchema::find(&self.tables, schema, table) {
                Some(found) => Ok(found.schema_name.clone()),
                None => Err(self.unknown(&format!("{schema}.{table}"))),
            };
        }

        let candidates: BTreeSet<&str> = self
            .tables
            .iter()
            .filter(|entry| entry.table_name == table)
            .map(|entry| entry.schema_name.as_str())
            .collect();

        let mut candidates = candidates.into_iter();
        match (candidates.next(), candidates.next()) {
            (None, _) => Err(self.unknown(table)),
            (Some(only), None) => Ok(only.to_string()),
            (Some(first), Some(second)) => {
                let mut schemas = vec![first.to_string(), second.to_string()];
                schemas.extend(candidates.map(str::to_string));
                Err(ProcessingError::SchemaAmbiguity {
                    database: self.database.clone(),
                    table: table.to_string(),
                    schemas,
                })
            }
        }
    }

    /// Parses `key` and resolves it, returning `(schema, table)`.
    pub fn resolve_key<'k>(&self, key: &'k str) -> Result<(String, &'k str), ProcessingError> {
        let parsed = parse_table_key(key);
        let schema = self.resolve_schema(parsed.schema, parsed.table)?;
        Ok((schema, parsed.table))
    }

    fn unknown(&self, table: &str) -> ProcessingError {
        ProcessingError::SchemaUnknown {
            database: self.database.clone(),
            table: table.to_string(),
        }
    }
}

/// Finds the filters posted for `key`, accepting the other qualified form and
/// a `public` qualification for unqualified keys.
pub fn get_table_filters<'a>(filters: Option<&'a TableFilters>, key: &str) -> Option<&'a FieldFilters> {
    let filters = filters?;
    if let Some(found) = filters.get(key) {
        return Some(found);
    }

    let mut alternatives = Vec::with_capacity(2);
    if key.contains("__") {
        alternatives.push(key.replacen("__", ".", 1));
    } else if key.contains('.') {
        alternatives.push(key.replacen('.', "__", 1));
    } else {
        alternatives.push(format!("{DEFAULT_SCHEMA}.{key}"));
        alternatives.push(format!("{DEFAULT_SCHEMA}__{key}"));
    }

    alternatives
        .iter()
        .find_map(|alternative| filters.get(alternative.as_str()))
}

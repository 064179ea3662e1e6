//! Canonical table and index descriptors.
//!
//! Table declarations arrive in several historical shapes: a boolean, a
//! primary key string, or an array whose head is the primary key and whose
//! tail lists secondary indexes. [`normalize`] decides the shape once and
//! produces a [`TableDeclaration`]; nothing downstream inspects raw JSON.
//!
//! Normalisation only borrows the caller's configuration. The descriptors it
//! returns are freshly built and own their data.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::domain::ConfigError;

/// Primary key used when a declaration does not name one.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Opaque index expression forwarded verbatim to the driver.
///
/// For the RethinkDB adapter this is a serialised ReQL function term.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFunction(Value);

impl IndexFunction {
    /// Wrap a driver-specific expression.
    pub fn new(term: Value) -> Self {
        Self(term)
    }

    /// Borrow the wrapped expression.
    pub fn term(&self) -> &Value {
        &self.0
    }
}

/// Desired state for one secondary index.
///
/// Identity is the `key` alone: an existing index with the same key
/// satisfies the declaration whatever its function or options.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    key: String,
    index_function: Option<IndexFunction>,
    options: Map<String, Value>,
}

impl IndexSpec {
    /// Declare a plain field index on `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tablesync::domain::IndexSpec;
    ///
    /// let index = IndexSpec::plain("email");
    /// assert_eq!(index.key(), "email");
    /// assert!(index.index_function().is_none());
    /// assert!(index.options().is_empty());
    /// ```
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            index_function: None,
            options: Map::new(),
        }
    }

    /// Attach a computed index expression.
    pub fn with_function(mut self, function: IndexFunction) -> Self {
        self.index_function = Some(function);
        self
    }

    /// Attach driver-level creation options such as `geo` or `multi`.
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    /// Index name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Computed index expression, when declared.
    pub fn index_function(&self) -> Option<&IndexFunction> {
        self.index_function.as_ref()
    }

    /// Creation options; empty means driver defaults.
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }
}

/// Normalised shape of one table declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum TableDeclaration {
    /// Declared but intentionally absent; reconciliation skips it.
    Disabled,
    /// Table with a primary key and no secondary indexes.
    SimplePrimaryKey(String),
    /// Table with a primary key and at least one secondary index.
    PrimaryKeyWithIndexes(String, Vec<IndexSpec>),
}

/// Desired state for one named table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    name: String,
    declaration: TableDeclaration,
}

impl TableSpec {
    /// Pair a table name with its normalised declaration.
    pub fn new(name: impl Into<String>, declaration: TableDeclaration) -> Self {
        Self {
            name: name.into(),
            declaration,
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalised declaration.
    pub fn declaration(&self) -> &TableDeclaration {
        &self.declaration
    }

    /// Returns false for declarations the reconciler must skip.
    pub fn is_enabled(&self) -> bool {
        !matches!(self.declaration, TableDeclaration::Disabled)
    }

    /// Primary key for enabled tables.
    pub fn primary_key(&self) -> Option<&str> {
        match &self.declaration {
            TableDeclaration::Disabled => None,
            TableDeclaration::SimplePrimaryKey(key)
            | TableDeclaration::PrimaryKeyWithIndexes(key, _) => Some(key),
        }
    }

    /// Declared secondary indexes, in declaration order.
    pub fn secondary_indexes(&self) -> &[IndexSpec] {
        match &self.declaration {
            TableDeclaration::PrimaryKeyWithIndexes(_, indexes) => indexes,
            TableDeclaration::Disabled | TableDeclaration::SimplePrimaryKey(_) => &[],
        }
    }
}

/// Normalise one raw table declaration.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use tablesync::domain::{TableDeclaration, normalize};
///
/// assert_eq!(normalize("audit", &json!(false)), Ok(TableDeclaration::Disabled));
/// assert_eq!(
///     normalize("users", &json!(true)),
///     Ok(TableDeclaration::SimplePrimaryKey("id".to_owned()))
/// );
/// ```
pub fn normalize(table: &str, raw: &Value) -> Result<TableDeclaration, ConfigError> {
    if is_falsy(raw) {
        return Ok(TableDeclaration::Disabled);
    }

    match raw {
        Value::Bool(_) => Ok(TableDeclaration::SimplePrimaryKey(
            DEFAULT_PRIMARY_KEY.to_owned(),
        )),
        Value::String(primary_key) => Ok(TableDeclaration::SimplePrimaryKey(primary_key.clone())),
        Value::Array(items) => normalize_array(table, items),
        other => Err(ConfigError::invalid_table_declaration(
            table,
            json_kind(other),
        )),
    }
}

/// Normalise every entry of a `tables` mapping.
///
/// Fails on the first malformed entry so no database work starts for a
/// configuration that is partly invalid.
pub fn normalize_tables(tables: &Map<String, Value>) -> Result<Vec<TableSpec>, ConfigError> {
    tables
        .iter()
        .map(|(name, raw)| {
            normalize(name, raw).map(|declaration| TableSpec::new(name, declaration))
        })
        .collect()
}

fn normalize_array(table: &str, items: &[Value]) -> Result<TableDeclaration, ConfigError> {
    let Some((head, tail)) = items.split_first() else {
        return Err(invalid_primary_key(table));
    };
    let Value::String(primary_key) = head else {
        return Err(invalid_primary_key(table));
    };

    let mut seen = BTreeSet::new();
    let mut indexes = Vec::with_capacity(tail.len());
    for (offset, declaration) in tail.iter().enumerate() {
        let index = normalize_index(table, offset + 1, declaration)?;
        if !seen.insert(index.key().to_owned()) {
            return Err(ConfigError::DuplicateIndex {
                table: table.to_owned(),
                index: index.key().to_owned(),
            });
        }
        indexes.push(index);
    }

    if indexes.is_empty() {
        Ok(TableDeclaration::SimplePrimaryKey(primary_key.clone()))
    } else {
        Ok(TableDeclaration::PrimaryKeyWithIndexes(
            primary_key.clone(),
            indexes,
        ))
    }
}

fn normalize_index(table: &str, position: usize, raw: &Value) -> Result<IndexSpec, ConfigError> {
    match raw {
        Value::String(key) => Ok(IndexSpec::plain(key.clone())),
        Value::Object(fields) => normalize_structured_index(table, position, fields),
        _ => Err(ConfigError::InvalidIndexDeclaration {
            table: table.to_owned(),
            position,
        }),
    }
}

fn normalize_structured_index(
    table: &str,
    position: usize,
    fields: &Map<String, Value>,
) -> Result<IndexSpec, ConfigError> {
    let Some(Value::String(key)) = fields.get("name") else {
        return Err(ConfigError::MissingIndexName {
            table: table.to_owned(),
            position,
        });
    };

    let mut index = IndexSpec::plain(key.clone());
    match fields.get("indexFunction") {
        None | Some(Value::Null) => {}
        Some(term) => index = index.with_function(IndexFunction::new(term.clone())),
    }
    match fields.get("options") {
        None | Some(Value::Null) => {}
        Some(Value::Object(options)) => index = index.with_options(options.clone()),
        Some(_) => {
            return Err(ConfigError::InvalidIndexOptions {
                table: table.to_owned(),
                index: key.clone(),
            });
        }
    }

    Ok(index)
}

fn invalid_primary_key(table: &str) -> ConfigError {
    ConfigError::InvalidPrimaryKey {
        table: table.to_owned(),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n == 0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[path = "table_spec_tests.rs"]
mod tests;

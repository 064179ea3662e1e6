//! In-process document database implementing the driver ports.
//!
//! Tables hold rows and named indexes. An index starts out building and only
//! becomes ready once [`DatabaseDriver::wait_for_index`] is called for it,
//! which lets callers check that every created index was waited on.
//! Mutating calls are recorded in order and can be made to fail on demand.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::ConnectionSettings;
use crate::domain::IndexSpec;
use crate::domain::ports::{DatabaseConnector, DatabaseDriver, DatabaseDriverError};

/// A mutating or synchronising call observed by [`InMemoryDatabase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOperation {
    /// `create_database`.
    CreateDatabase {
        /// Database name.
        database: String,
    },
    /// `create_table`.
    CreateTable {
        /// Table name.
        table: String,
        /// Requested primary key.
        primary_key: String,
    },
    /// `create_index`.
    CreateIndex {
        /// Owning table.
        table: String,
        /// Index name.
        index: String,
    },
    /// `wait_for_index`.
    WaitForIndex {
        /// Owning table.
        table: String,
        /// Index name.
        index: String,
    },
    /// `delete_all`.
    DeleteAll {
        /// Table name.
        table: String,
    },
    /// `insert`.
    Insert {
        /// Table name.
        table: String,
    },
}

impl DriverOperation {
    /// Returns true for calls that create schema objects.
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            Self::CreateDatabase { .. } | Self::CreateTable { .. } | Self::CreateIndex { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct IndexState {
    ready: bool,
    spec: IndexSpec,
}

#[derive(Debug, Clone)]
struct TableState {
    primary_key: String,
    indexes: BTreeMap<String, IndexState>,
    rows: Vec<Value>,
}

impl TableState {
    fn new(primary_key: &str) -> Self {
        Self {
            primary_key: primary_key.to_owned(),
            indexes: BTreeMap::new(),
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    databases: BTreeMap<String, BTreeMap<String, TableState>>,
    operations: Vec<DriverOperation>,
    failures: Vec<(DriverOperation, String)>,
    refusal: Option<String>,
}

impl State {
    fn tables(&self, database: &str) -> Result<&BTreeMap<String, TableState>, DatabaseDriverError> {
        self.databases
            .get(database)
            .ok_or_else(|| missing_database(database))
    }

    fn tables_mut(
        &mut self,
        database: &str,
    ) -> Result<&mut BTreeMap<String, TableState>, DatabaseDriverError> {
        self.databases
            .get_mut(database)
            .ok_or_else(|| missing_database(database))
    }

    fn table(&self, database: &str, table: &str) -> Result<&TableState, DatabaseDriverError> {
        self.tables(database)?
            .get(table)
            .ok_or_else(|| missing_table(database, table))
    }

    fn table_mut(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<&mut TableState, DatabaseDriverError> {
        self.tables_mut(database)?
            .get_mut(table)
            .ok_or_else(|| missing_table(database, table))
    }

    /// Record `operation`, failing it when a failure was registered.
    fn record(&mut self, operation: DriverOperation) -> Result<(), DatabaseDriverError> {
        let failure = self
            .failures
            .iter()
            .find(|(candidate, _)| *candidate == operation)
            .map(|(_, message)| message.clone());
        self.operations.push(operation);
        match failure {
            Some(message) => Err(DatabaseDriverError::query(message)),
            None => Ok(()),
        }
    }
}

/// Shared in-memory database; clones observe the same state.
///
/// # Examples
///
/// ```rust
/// use tablesync::outbound::memory::InMemoryDatabase;
///
/// let database = InMemoryDatabase::default()
///     .with_table("test", "users", "id")
///     .with_ready_index("test", "users", "email");
///
/// assert_eq!(database.index_names("test", "users"), ["email"]);
/// assert!(database.is_index_ready("test", "users", "email"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl InMemoryDatabase {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an empty database.
    pub fn with_database(self, database: &str) -> Self {
        self.lock().databases.entry(database.to_owned()).or_default();
        self
    }

    /// Seed a table, creating its database when needed.
    pub fn with_table(self, database: &str, table: &str, primary_key: &str) -> Self {
        self.lock()
            .databases
            .entry(database.to_owned())
            .or_default()
            .entry(table.to_owned())
            .or_insert_with(|| TableState::new(primary_key));
        self
    }

    /// Seed a built index on an already seeded table.
    pub fn with_ready_index(self, database: &str, table: &str, index: &str) -> Self {
        if let Some(state) = self
            .lock()
            .databases
            .get_mut(database)
            .and_then(|tables| tables.get_mut(table))
        {
            state.indexes.insert(
                index.to_owned(),
                IndexState {
                    ready: true,
                    spec: IndexSpec::plain(index),
                },
            );
        }
        self
    }

    /// Seed rows on an already seeded table.
    pub fn with_rows(self, database: &str, table: &str, rows: Vec<Value>) -> Self {
        if let Some(state) = self
            .lock()
            .databases
            .get_mut(database)
            .and_then(|tables| tables.get_mut(table))
        {
            state.rows.extend(rows);
        }
        self
    }

    /// Make every matching operation fail with `message`.
    ///
    /// Failing calls are still recorded.
    pub fn fail_on(&self, operation: DriverOperation, message: &str) {
        self.lock().failures.push((operation, message.to_owned()));
    }

    /// Refuse every subsequent connection attempt.
    pub fn refuse_connections(&self, message: &str) {
        self.lock().refusal = Some(message.to_owned());
    }

    /// Operations recorded so far, in call order.
    pub fn operations(&self) -> Vec<DriverOperation> {
        self.lock().operations.clone()
    }

    /// Number of recorded creation calls.
    pub fn creation_count(&self) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|operation| operation.is_creation())
            .count()
    }

    /// Database names.
    pub fn database_names(&self) -> Vec<String> {
        self.lock().databases.keys().cloned().collect()
    }

    /// Table names of `database`; empty when it does not exist.
    pub fn table_names(&self, database: &str) -> Vec<String> {
        self.lock()
            .databases
            .get(database)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Primary key of a table.
    pub fn primary_key(&self, database: &str, table: &str) -> Option<String> {
        self.lock()
            .table(database, table)
            .ok()
            .map(|state| state.primary_key.clone())
    }

    /// Index names of a table; empty when it does not exist.
    pub fn index_names(&self, database: &str, table: &str) -> Vec<String> {
        self.lock()
            .table(database, table)
            .map(|state| state.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Declaration an index was created from.
    pub fn index_spec(&self, database: &str, table: &str, index: &str) -> Option<IndexSpec> {
        self.lock()
            .table(database, table)
            .ok()
            .and_then(|state| state.indexes.get(index))
            .map(|state| state.spec.clone())
    }

    /// Whether an index has finished building.
    pub fn is_index_ready(&self, database: &str, table: &str, index: &str) -> bool {
        self.lock()
            .table(database, table)
            .ok()
            .and_then(|state| state.indexes.get(index))
            .is_some_and(|state| state.ready)
    }

    /// Rows of a table; empty when it does not exist.
    pub fn rows(&self, database: &str, table: &str) -> Vec<Value> {
        self.lock()
            .table(database, table)
            .map(|state| state.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatabaseDriver for InMemoryDatabase {
    async fn list_databases(&self) -> Result<Vec<String>, DatabaseDriverError> {
        Ok(self.database_names())
    }

    async fn create_database(&self, database: &str) -> Result<(), DatabaseDriverError> {
        let mut state = self.lock();
        state.record(DriverOperation::CreateDatabase {
            database: database.to_owned(),
        })?;
        if state.databases.contains_key(database) {
            return Err(DatabaseDriverError::query(format!(
                "Database `{database}` already exists."
            )));
        }
        state.databases.insert(database.to_owned(), BTreeMap::new());
        Ok(())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, DatabaseDriverError> {
        let state = self.lock();
        Ok(state.tables(database)?.keys().cloned().collect())
    }

    async fn create_table(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
    ) -> Result<(), DatabaseDriverError> {
        let mut state = self.lock();
        state.record(DriverOperation::CreateTable {
            table: table.to_owned(),
            primary_key: primary_key.to_owned(),
        })?;
        let tables = state.tables_mut(database)?;
        if tables.contains_key(table) {
            return Err(DatabaseDriverError::query(format!(
                "Table `{database}.{table}` already exists."
            )));
        }
        tables.insert(table.to_owned(), TableState::new(primary_key));
        Ok(())
    }

    async fn list_indexes(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Vec<String>, DatabaseDriverError> {
        let state = self.lock();
        Ok(state.table(database, table)?.indexes.keys().cloned().collect())
    }

    async fn create_index(
        &self,
        database: &str,
        table: &str,
        index: &IndexSpec,
    ) -> Result<(), DatabaseDriverError> {
        let mut state = self.lock();
        state.record(DriverOperation::CreateIndex {
            table: table.to_owned(),
            index: index.key().to_owned(),
        })?;
        let target = state.table_mut(database, table)?;
        if target.indexes.contains_key(index.key()) {
            return Err(DatabaseDriverError::query(format!(
                "Index `{}` already exists on table `{database}.{table}`.",
                index.key()
            )));
        }
        target.indexes.insert(
            index.key().to_owned(),
            IndexState {
                ready: false,
                spec: index.clone(),
            },
        );
        Ok(())
    }

    async fn wait_for_index(
        &self,
        database: &str,
        table: &str,
        index: &str,
    ) -> Result<(), DatabaseDriverError> {
        let mut state = self.lock();
        state.record(DriverOperation::WaitForIndex {
            table: table.to_owned(),
            index: index.to_owned(),
        })?;
        let target = state
            .table_mut(database, table)?
            .indexes
            .get_mut(index)
            .ok_or_else(|| {
                DatabaseDriverError::query(format!(
                    "Index `{index}` was not found on table `{database}.{table}`."
                ))
            })?;
        target.ready = true;
        Ok(())
    }

    async fn delete_all(&self, database: &str, table: &str) -> Result<(), DatabaseDriverError> {
        let mut state = self.lock();
        state.record(DriverOperation::DeleteAll {
            table: table.to_owned(),
        })?;
        state.table_mut(database, table)?.rows.clear();
        Ok(())
    }

    async fn insert(
        &self,
        database: &str,
        table: &str,
        records: Vec<Value>,
    ) -> Result<(), DatabaseDriverError> {
        let mut state = self.lock();
        state.record(DriverOperation::Insert {
            table: table.to_owned(),
        })?;
        let target = state.table_mut(database, table)?;
        for (position, record) in records.iter().enumerate() {
            insertable(target, &records[..position], record)?;
        }
        target.rows.extend(records);
        Ok(())
    }
}

#[async_trait]
impl DatabaseConnector for InMemoryDatabase {
    type Driver = Self;

    async fn connect(
        &self,
        _settings: &ConnectionSettings,
    ) -> Result<Self::Driver, DatabaseDriverError> {
        match &self.lock().refusal {
            Some(message) => Err(DatabaseDriverError::connection(message.clone())),
            None => Ok(self.clone()),
        }
    }
}

/// Checks `record` against stored rows and the documents ahead of it in its batch.
fn insertable(
    table: &TableState,
    earlier: &[Value],
    record: &Value,
) -> Result<(), DatabaseDriverError> {
    let Value::Object(fields) = record else {
        return Err(DatabaseDriverError::query("Expected type OBJECT."));
    };
    let Some(key) = fields.get(&table.primary_key) else {
        return Ok(());
    };
    let duplicate = table
        .rows
        .iter()
        .chain(earlier)
        .any(|row| row.get(&table.primary_key) == Some(key));
    if duplicate {
        return Err(DatabaseDriverError::query(format!(
            "Duplicate primary key `{}`: {key}",
            table.primary_key
        )));
    }
    Ok(())
}

fn missing_database(database: &str) -> DatabaseDriverError {
    DatabaseDriverError::query(format!("Database `{database}` does not exist."))
}

fn missing_table(database: &str, table: &str) -> DatabaseDriverError {
    DatabaseDriverError::query(format!("Table `{database}.{table}` does not exist."))
}

#[cfg(test)]
mod tests {
    //! Unit coverage for the in-memory adapter's bookkeeping.

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn created_indexes_stay_unready_until_waited_on() {
        let database = InMemoryDatabase::default().with_table("test", "logs", "id");

        database
            .create_index("test", "logs", &IndexSpec::plain("ts"))
            .await
            .expect("index creation should succeed");
        assert!(!database.is_index_ready("test", "logs", "ts"));

        database
            .wait_for_index("test", "logs", "ts")
            .await
            .expect("wait should succeed");
        assert!(database.is_index_ready("test", "logs", "ts"));
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_table_creation_is_rejected() {
        let database = InMemoryDatabase::default().with_table("test", "users", "id");

        let result = database.create_table("test", "users", "id").await;

        assert!(matches!(result, Err(DatabaseDriverError::Query { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn registered_failures_are_returned_and_recorded() {
        let database = InMemoryDatabase::default().with_database("test");
        let operation = DriverOperation::CreateTable {
            table: "users".to_owned(),
            primary_key: "id".to_owned(),
        };
        database.fail_on(operation.clone(), "permission denied");

        let result = database.create_table("test", "users", "id").await;

        assert_eq!(result, Err(DatabaseDriverError::query("permission denied")));
        assert_eq!(database.operations(), [operation]);
        assert!(database.table_names("test").is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_primary_keys_are_rejected_on_insert() {
        let database = InMemoryDatabase::default()
            .with_table("test", "users", "id")
            .with_rows("test", "users", vec![json!({"id": 1})]);

        let result = database
            .insert("test", "users", vec![json!({"id": 1, "name": "again"})])
            .await;

        assert!(matches!(result, Err(DatabaseDriverError::Query { .. })));
        assert_eq!(database.rows("test", "users").len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_primary_keys_within_one_batch_are_rejected() {
        let database = InMemoryDatabase::default().with_table("test", "users", "id");

        let result = database
            .insert(
                "test",
                "users",
                vec![json!({"id": 7}), json!({"id": 8}), json!({"id": 7, "name": "twin"})],
            )
            .await;

        assert!(matches!(result, Err(DatabaseDriverError::Query { .. })));
        assert!(database.rows("test", "users").is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn refused_connections_are_connection_errors() {
        let database = InMemoryDatabase::default();
        database.refuse_connections("no route to host");

        let result = database.connect(&ConnectionSettings::default()).await;

        assert!(matches!(result, Err(DatabaseDriverError::Connection { .. })));
    }
}

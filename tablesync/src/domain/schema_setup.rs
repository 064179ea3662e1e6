//! Caller-facing setup operations.
//!
//! `connect_and_setup` and `setup` validate every table declaration before
//! the first database request, so a malformed configuration never leaves a
//! half-applied schema behind. `empty` and `load` are thin fan-outs over the
//! driver with no schema checks of their own.

use std::sync::Arc;

use futures_util::future::try_join_all;
use serde_json::{Map, Value};
use tracing::info;

use crate::domain::ports::{DatabaseConnector, DatabaseDriver};
use crate::domain::{
    ConnectionSettings, ReconcileReport, SchemaConfig, SchemaReconciler, SetupError, TableSpec,
};

/// A live driver bound to the database it was configured for.
pub struct Connection<D> {
    driver: Arc<D>,
    database: String,
}

impl<D> Clone for Connection<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            database: self.database.clone(),
        }
    }
}

impl<D> Connection<D> {
    /// Bind a driver to a database name.
    pub fn new(driver: Arc<D>, database: impl Into<String>) -> Self {
        Self {
            driver,
            database: database.into(),
        }
    }

    /// Shared driver handle.
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Database the connection targets.
    pub fn database(&self) -> &str {
        &self.database
    }
}

/// Open a connection for `settings`.
pub async fn connect<C: DatabaseConnector>(
    connector: &C,
    settings: &ConnectionSettings,
) -> Result<Connection<C::Driver>, SetupError> {
    let driver = connector.connect(settings).await?;
    info!(
        host = settings.host(),
        port = settings.port(),
        database = settings.database(),
        "connected"
    );
    Ok(Connection::new(Arc::new(driver), settings.database()))
}

/// Connect with `config.connection`, then reconcile `config.tables`.
///
/// Table declarations are validated before connecting. On failure no
/// connection is returned.
pub async fn connect_and_setup<C: DatabaseConnector>(
    connector: &C,
    config: &SchemaConfig,
) -> Result<Connection<C::Driver>, SetupError> {
    let tables = config.table_specs()?;
    let connection = connect(connector, &config.connection).await?;
    reconcile(&connection, &tables).await?;
    Ok(connection)
}

/// Reconcile `config.tables` over an existing connection.
///
/// Fails with [`crate::domain::ConfigError::MissingTables`] when the
/// configuration has no `tables` mapping.
pub async fn setup<D: DatabaseDriver>(
    connection: &Connection<D>,
    config: &SchemaConfig,
) -> Result<ReconcileReport, SetupError> {
    let tables = config.table_specs()?;
    reconcile(connection, &tables).await
}

async fn reconcile<D: DatabaseDriver>(
    connection: &Connection<D>,
    tables: &[TableSpec],
) -> Result<ReconcileReport, SetupError> {
    SchemaReconciler::new(Arc::clone(connection.driver()))
        .reconcile(connection.database(), tables)
        .await
}

/// Delete every row from every table named in `config.tables`.
///
/// Disabled declarations are emptied too; tables and indexes are kept.
/// Returns the number of tables emptied.
pub async fn empty<D: DatabaseDriver>(
    connection: &Connection<D>,
    config: &SchemaConfig,
) -> Result<usize, SetupError> {
    let tables = config.tables()?;
    let database = connection.database();
    let driver = connection.driver();

    try_join_all(
        tables
            .keys()
            .map(|table| async move { driver.delete_all(database, table).await }),
    )
    .await?;

    info!(database, tables = tables.len(), "tables emptied");
    Ok(tables.len())
}

/// Insert records into their tables.
///
/// Each entry maps a table name to a single document or an array of
/// documents. Returns the number of documents submitted.
pub async fn load<D: DatabaseDriver>(
    connection: &Connection<D>,
    records: &Map<String, Value>,
) -> Result<usize, SetupError> {
    let database = connection.database();
    let driver = connection.driver();

    let counts = try_join_all(records.iter().map(|(table, payload)| {
        let documents = documents_of(payload);
        async move {
            let count = documents.len();
            driver.insert(database, table, documents).await?;
            Ok::<_, SetupError>(count)
        }
    }))
    .await?;

    let total: usize = counts.iter().sum();
    info!(database, tables = records.len(), records = total, "records loaded");
    Ok(total)
}

fn documents_of(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(documents) => documents.clone(),
        document => vec![document.clone()],
    }
}

#[cfg(test)]
#[path = "schema_setup_tests.rs"]
mod tests;

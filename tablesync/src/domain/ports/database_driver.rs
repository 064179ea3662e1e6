//! Port abstraction for the document database driver.
//!
//! Adapters wrap one live connection. Every call is an independent request;
//! adapters must tolerate many requests in flight at once on the same
//! connection because the reconciler fans out across tables and indexes.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::IndexSpec;

use super::define_port_error;

define_port_error! {
    /// Errors raised by database driver adapters.
    pub enum DatabaseDriverError {
        /// The connection could not be established or was lost.
        Connection { message: String } => "database connection failed: {message}",
        /// The database rejected or failed a request.
        Query { message: String } => "database query failed: {message}",
    }
}

/// Port for the database operations schema reconciliation relies on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// List every database on the server.
    async fn list_databases(&self) -> Result<Vec<String>, DatabaseDriverError>;

    /// Create a database.
    async fn create_database(&self, database: &str) -> Result<(), DatabaseDriverError>;

    /// List the tables of `database`.
    async fn list_tables(&self, database: &str) -> Result<Vec<String>, DatabaseDriverError>;

    /// Create `table` in `database` keyed by `primary_key`.
    async fn create_table(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
    ) -> Result<(), DatabaseDriverError>;

    /// List the secondary index names of `table`.
    async fn list_indexes(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Vec<String>, DatabaseDriverError>;

    /// Issue the creation of a secondary index.
    ///
    /// Returning does not imply the index is built; callers must follow up
    /// with [`DatabaseDriver::wait_for_index`].
    async fn create_index(
        &self,
        database: &str,
        table: &str,
        index: &IndexSpec,
    ) -> Result<(), DatabaseDriverError>;

    /// Block until the named index is fully built and usable.
    async fn wait_for_index(
        &self,
        database: &str,
        table: &str,
        index: &str,
    ) -> Result<(), DatabaseDriverError>;

    /// Delete every row of `table`, keeping the table and its indexes.
    async fn delete_all(&self, database: &str, table: &str) -> Result<(), DatabaseDriverError>;

    /// Insert documents into `table`.
    async fn insert(
        &self,
        database: &str,
        table: &str,
        records: Vec<Value>,
    ) -> Result<(), DatabaseDriverError>;
}

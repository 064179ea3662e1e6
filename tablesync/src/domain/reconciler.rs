//! Schema reconciliation.
//!
//! The reconciler diffs desired [`TableSpec`]s against the live inventory
//! and issues only the creations needed to close the gap:
//! - the target database is ensured once per call;
//! - tables fan out concurrently, and so do indexes within one table;
//! - each index creation is followed by a wait for its build, so a table's
//!   branch settles only once its indexes are usable.
//!
//! Idempotence is existence-based. An index whose key already exists is
//! left alone even if its declared function or options differ.
//!
//! Every request is multiplexed over the one shared driver from a single
//! task. The first failing branch decides the result; creations that
//! completed before it stay in place.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::{debug, info};

use crate::domain::ports::DatabaseDriver;
use crate::domain::{IndexSpec, SetupError, TableSpec};

/// A secondary index created during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CreatedIndex {
    /// Owning table.
    pub table: String,
    /// Index name.
    pub index: String,
}

/// Creations issued by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Whether the target database had to be created.
    pub database_created: bool,
    /// Tables created, sorted by name.
    pub created_tables: Vec<String>,
    /// Indexes created and confirmed ready, sorted by table then index.
    pub created_indexes: Vec<CreatedIndex>,
}

impl ReconcileReport {
    /// Number of creation calls issued.
    pub fn creation_count(&self) -> usize {
        usize::from(self.database_created) + self.created_tables.len() + self.created_indexes.len()
    }

    /// Returns true when the database already matched the configuration.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tablesync::domain::ReconcileReport;
    ///
    /// assert!(ReconcileReport::default().is_noop());
    /// ```
    pub fn is_noop(&self) -> bool {
        self.creation_count() == 0
    }
}

#[derive(Debug)]
struct TableOutcome {
    table: String,
    table_created: bool,
    created_indexes: Vec<String>,
}

/// Domain service closing the gap between declared and live schema.
pub struct SchemaReconciler<D> {
    driver: Arc<D>,
}

impl<D> SchemaReconciler<D> {
    /// Create a reconciler over a shared driver.
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }
}

impl<D: DatabaseDriver> SchemaReconciler<D> {
    /// Bring `database` into conformance with `tables`.
    ///
    /// Disabled specs are skipped without any call. The inventory is read
    /// fresh on every invocation, so running twice issues no creations the
    /// second time.
    pub async fn reconcile(
        &self,
        database: &str,
        tables: &[TableSpec],
    ) -> Result<ReconcileReport, SetupError> {
        let database_created = self.ensure_database(database).await?;
        let existing_tables: BTreeSet<String> =
            self.driver.list_tables(database).await?.into_iter().collect();

        let outcomes = try_join_all(
            tables
                .iter()
                .filter(|table| table.is_enabled())
                .map(|table| self.reconcile_table(database, table, &existing_tables)),
        )
        .await?;

        let mut report = ReconcileReport {
            database_created,
            ..ReconcileReport::default()
        };
        for outcome in outcomes {
            if outcome.table_created {
                report.created_tables.push(outcome.table.clone());
            }
            report
                .created_indexes
                .extend(outcome.created_indexes.into_iter().map(|index| CreatedIndex {
                    table: outcome.table.clone(),
                    index,
                }));
        }
        report.created_tables.sort();
        report.created_indexes.sort();

        info!(
            database,
            database_created = report.database_created,
            tables_created = report.created_tables.len(),
            indexes_created = report.created_indexes.len(),
            "schema reconciled"
        );
        Ok(report)
    }

    /// Create `database` unless it is already listed.
    pub async fn ensure_database(&self, database: &str) -> Result<bool, SetupError> {
        let databases = self.driver.list_databases().await?;
        if databases.iter().any(|name| name == database) {
            debug!(database, "database exists");
            return Ok(false);
        }

        self.driver.create_database(database).await?;
        info!(database, "database created");
        Ok(true)
    }

    async fn reconcile_table(
        &self,
        database: &str,
        table: &TableSpec,
        existing_tables: &BTreeSet<String>,
    ) -> Result<TableOutcome, SetupError> {
        let name = table.name();
        let table_created = if existing_tables.contains(name) {
            debug!(database, table = name, "table exists");
            false
        } else {
            let primary_key = table.primary_key().unwrap_or_default();
            self.driver.create_table(database, name, primary_key).await?;
            info!(database, table = name, primary_key, "table created");
            true
        };

        let existing_indexes: BTreeSet<String> = self
            .driver
            .list_indexes(database, name)
            .await?
            .into_iter()
            .collect();

        let created_indexes = try_join_all(
            table
                .secondary_indexes()
                .iter()
                .filter(|index| {
                    let present = existing_indexes.contains(index.key());
                    if present {
                        debug!(database, table = name, index = index.key(), "index exists");
                    }
                    !present
                })
                .map(|index| self.build_index(database, name, index)),
        )
        .await?;

        Ok(TableOutcome {
            table: name.to_owned(),
            table_created,
            created_indexes,
        })
    }

    async fn build_index(
        &self,
        database: &str,
        table: &str,
        index: &IndexSpec,
    ) -> Result<String, SetupError> {
        self.driver.create_index(database, table, index).await?;
        debug!(database, table, index = index.key(), "index creation issued");
        self.driver
            .wait_for_index(database, table, index.key())
            .await?;
        info!(database, table, index = index.key(), "index ready");
        Ok(index.key().to_owned())
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;

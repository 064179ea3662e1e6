//! Port abstraction for opening driver connections.

use async_trait::async_trait;

use crate::domain::ConnectionSettings;

use super::{DatabaseDriver, DatabaseDriverError};

/// Port for establishing a connection to the document database.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Driver handle produced by a successful connection.
    type Driver: DatabaseDriver + 'static;

    /// Open a connection using resolved connection settings.
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Self::Driver, DatabaseDriverError>;
}

//! Domain ports for the hexagonal boundary with the database.

mod macros;
pub(crate) use macros::define_port_error;

mod database_connector;
mod database_driver;

pub use database_connector::DatabaseConnector;
#[cfg(test)]
pub use database_driver::MockDatabaseDriver;
pub use database_driver::{DatabaseDriver, DatabaseDriverError};

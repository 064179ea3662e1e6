//! Outbound adapters implementing the database ports.

pub mod memory;
pub mod rethinkdb;

pub use self::memory::{DriverOperation, InMemoryDatabase};
pub use self::rethinkdb::{RethinkDbConnector, RethinkDbDriver};

//! Declarative schema setup for RethinkDB.
//!
//! A JSON configuration names the tables a database should contain, their
//! primary keys and secondary indexes. [`domain::connect_and_setup`] creates
//! whatever is missing, waits for every new index to finish building and is
//! safe to run repeatedly. [`domain::empty`] and [`domain::load`] manage
//! table contents for fixtures and tests.
//!
//! The crate follows a ports-and-adapters layout:
//! - [`domain`] holds descriptors, the reconciler and the driver ports.
//! - [`outbound`] implements the ports for a RethinkDB server and an
//!   in-memory database.
//! - [`inbound`] exposes the command-line surface.

pub mod domain;
pub mod inbound;
pub mod outbound;

//! RethinkDB adapter speaking the JSON wire protocol directly.
//!
//! [`RethinkDbConnector`] opens a TCP socket, authenticates with
//! SCRAM-SHA-256 and yields a [`RethinkDbDriver`] whose requests are
//! multiplexed over that single socket.

mod connection;
mod driver;
mod handshake;
mod protocol;

pub use self::driver::{RethinkDbConnector, RethinkDbDriver};

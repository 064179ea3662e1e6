//! Schema descriptors, reconciliation and setup operations.
//!
//! Purpose: Normalise declarative table configuration into canonical
//! descriptors and drive a database towards them through the
//! [`ports::DatabaseDriver`] port. Nothing here knows about sockets or wire
//! formats; outbound adapters supply those.
//!
//! Public surface:
//! - SchemaConfig / ConnectionSettings: configuration document and defaults.
//! - TableSpec / IndexSpec / TableDeclaration: canonical descriptors.
//! - SchemaReconciler: the diff-and-create algorithm.
//! - connect_and_setup / setup / empty / load: caller-facing operations.

pub mod config;
pub mod error;
pub mod ports;
pub mod reconciler;
pub mod schema_setup;
pub mod table_spec;

pub use self::config::{
    ConnectionSettings, DEFAULT_DATABASE, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_USER, SchemaConfig,
};
pub use self::error::{ConfigError, SetupError};
pub use self::reconciler::{CreatedIndex, ReconcileReport, SchemaReconciler};
pub use self::schema_setup::{Connection, connect, connect_and_setup, empty, load, setup};
pub use self::table_spec::{
    DEFAULT_PRIMARY_KEY, IndexFunction, IndexSpec, TableDeclaration, TableSpec, normalize,
    normalize_tables,
};

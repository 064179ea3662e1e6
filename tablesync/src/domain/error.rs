//! Domain-level error types.
//!
//! Configuration problems are contract violations detected before any
//! network call is made. Connection and driver failures are runtime
//! conditions reported exactly once; nothing in this crate retries.

use std::path::PathBuf;

use crate::domain::ports::DatabaseDriverError;

/// Malformed or incomplete schema configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The configuration object has no `tables` mapping.
    #[error("config object requires a 'tables' property")]
    MissingTables,
    /// A table declaration has an unsupported shape.
    #[error("table '{table}' must be declared as a boolean, a string or an array, found {found}")]
    InvalidTableDeclaration {
        /// Table whose declaration was rejected.
        table: String,
        /// JSON kind that was found instead.
        found: &'static str,
    },
    /// An array declaration does not start with a string primary key.
    #[error("table '{table}' must list its primary key as the first array element")]
    InvalidPrimaryKey {
        /// Table whose declaration was rejected.
        table: String,
    },
    /// A structured index declaration lacks a string `name`.
    #[error("index declaration {position} on table '{table}' requires a string 'name'")]
    MissingIndexName {
        /// Table owning the index declaration.
        table: String,
        /// One-based position of the declaration after the primary key.
        position: usize,
    },
    /// An index declaration is neither a string nor an object.
    #[error("index declaration {position} on table '{table}' must be a string or an object")]
    InvalidIndexDeclaration {
        /// Table owning the index declaration.
        table: String,
        /// One-based position of the declaration after the primary key.
        position: usize,
    },
    /// Index `options` were present but not an object.
    #[error("options for index '{index}' on table '{table}' must be an object")]
    InvalidIndexOptions {
        /// Table owning the index.
        table: String,
        /// Index whose options were rejected.
        index: String,
    },
    /// The same index key is declared twice on one table.
    #[error("index '{index}' is declared more than once on table '{table}'")]
    DuplicateIndex {
        /// Table owning the index.
        table: String,
        /// Repeated index key.
        index: String,
    },
    /// A configuration or payload file could not be read.
    #[error("failed to read {}: {message}", path.display())]
    Read {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        message: String,
    },
    /// A configuration or payload document is not valid JSON of the
    /// expected shape.
    #[error("failed to parse configuration: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },
}

impl ConfigError {
    /// Create an invalid table declaration error.
    pub fn invalid_table_declaration(table: impl Into<String>, found: &'static str) -> Self {
        Self::InvalidTableDeclaration {
            table: table.into(),
            found,
        }
    }

    /// Create a parse error with the given diagnostic.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

/// Failure of a setup, reconcile, empty or load operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// The configuration was rejected before any database call.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The database could not be reached or the connection was lost.
    #[error("database connection failed: {message}")]
    Connection {
        /// Transport diagnostic.
        message: String,
    },
    /// A list, create, wait, delete or insert call failed.
    #[error("database operation failed: {message}")]
    Driver {
        /// Driver diagnostic, surfaced verbatim.
        message: String,
    },
}

impl SetupError {
    /// Returns true when the failure came from configuration validation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tablesync::domain::{ConfigError, SetupError};
    ///
    /// assert!(SetupError::from(ConfigError::MissingTables).is_config());
    /// ```
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<DatabaseDriverError> for SetupError {
    fn from(error: DatabaseDriverError) -> Self {
        match error {
            DatabaseDriverError::Connection { message } => Self::Connection { message },
            DatabaseDriverError::Query { message } => Self::Driver { message },
        }
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for error mapping.

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn connection_failures_map_to_connection_errors() {
        let error = SetupError::from(DatabaseDriverError::connection("refused"));
        assert_eq!(
            error,
            SetupError::Connection {
                message: "refused".to_owned()
            }
        );
    }

    #[rstest]
    fn query_failures_keep_the_driver_message() {
        let error = SetupError::from(DatabaseDriverError::query("Table `a` already exists."));
        assert_eq!(
            error.to_string(),
            "database operation failed: Table `a` already exists."
        );
    }

    #[rstest]
    fn config_errors_pass_through_transparently() {
        let error = SetupError::from(ConfigError::MissingTables);
        assert!(error.is_config());
        assert_eq!(error.to_string(), "config object requires a 'tables' property");
    }
}

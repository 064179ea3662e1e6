//! Schema configuration document.
//!
//! Defaults (database `test`, host `localhost`, port `28015`, user `admin`,
//! empty password) are resolved here once, through accessors, rather than at
//! each call site.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{ConfigError, TableSpec, normalize_tables};

/// Database name used when the configuration does not provide one.
pub const DEFAULT_DATABASE: &str = "test";
/// Host used when the configuration does not provide one.
pub const DEFAULT_HOST: &str = "localhost";
/// RethinkDB client driver port.
pub const DEFAULT_PORT: u16 = 28015;
/// Account used when the configuration does not provide one.
pub const DEFAULT_USER: &str = "admin";

/// Where and as whom to connect.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Server host name.
    pub host: Option<String>,
    /// Server driver port.
    pub port: Option<u16>,
    /// Target database.
    pub db: Option<String>,
    /// Account name.
    pub user: Option<String>,
    /// Account password.
    pub password: Option<String>,
}

impl ConnectionSettings {
    /// Server host name, falling back to [`DEFAULT_HOST`].
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    /// Server port, falling back to [`DEFAULT_PORT`].
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Target database, falling back to [`DEFAULT_DATABASE`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tablesync::domain::ConnectionSettings;
    ///
    /// assert_eq!(ConnectionSettings::default().database(), "test");
    /// ```
    pub fn database(&self) -> &str {
        self.db.as_deref().unwrap_or(DEFAULT_DATABASE)
    }

    /// Account name, falling back to [`DEFAULT_USER`].
    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_USER)
    }

    /// Account password; empty when unset.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Top-level configuration: connection settings plus table declarations.
///
/// Table declarations stay raw until [`SchemaConfig::table_specs`]
/// normalises them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawSchemaConfig")]
pub struct SchemaConfig {
    /// Connection settings.
    pub connection: ConnectionSettings,
    /// Raw table declarations keyed by table name.
    pub tables: Option<Map<String, Value>>,
}

/// Wire shape, including the legacy top-level `host`/`db` keys that predate
/// the `connection` block.
#[derive(Deserialize)]
struct RawSchemaConfig {
    connection: Option<ConnectionSettings>,
    host: Option<String>,
    db: Option<String>,
    tables: Option<Map<String, Value>>,
}

impl From<RawSchemaConfig> for SchemaConfig {
    fn from(raw: RawSchemaConfig) -> Self {
        let connection = raw.connection.unwrap_or_else(|| ConnectionSettings {
            host: raw.host,
            db: raw.db,
            ..ConnectionSettings::default()
        });
        Self {
            connection,
            tables: raw.tables,
        }
    }
}

impl SchemaConfig {
    /// Parse a configuration document.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tablesync::domain::SchemaConfig;
    ///
    /// let config = SchemaConfig::from_json(r#"{"db": "app", "tables": {"users": true}}"#)
    ///     .expect("valid config");
    /// assert_eq!(config.connection.database(), "app");
    /// ```
    pub fn from_json(payload: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(payload).map_err(|error| ConfigError::parse(error.to_string()))
    }

    /// Raw table declarations, which every operation except connecting
    /// requires.
    pub fn tables(&self) -> Result<&Map<String, Value>, ConfigError> {
        self.tables.as_ref().ok_or(ConfigError::MissingTables)
    }

    /// Normalise every table declaration.
    pub fn table_specs(&self) -> Result<Vec<TableSpec>, ConfigError> {
        normalize_tables(self.tables()?)
    }
}

//! Runtime connection overrides loaded via OrthoConfig.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::ConnectionSettings;

/// `TABLESYNC_*` values layered over the configuration file's `connection`
/// block.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "TABLESYNC")]
pub struct ConnectionOverrides {
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
    /// Run against an in-memory database instead of a server.
    #[ortho_config(default = false)]
    pub dry_run: bool,
}

impl ConnectionOverrides {
    /// Return `settings` with every override that is set applied on top.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tablesync::domain::ConnectionSettings;
    /// use tablesync::inbound::settings::ConnectionOverrides;
    ///
    /// let overrides = ConnectionOverrides {
    ///     db: Some("staging".to_owned()),
    ///     ..ConnectionOverrides::default()
    /// };
    /// let settings = overrides.applied_to(&ConnectionSettings::default());
    /// assert_eq!(settings.database(), "staging");
    /// assert_eq!(settings.host(), "localhost");
    /// ```
    pub fn applied_to(&self, settings: &ConnectionSettings) -> ConnectionSettings {
        ConnectionSettings {
            host: self.host.clone().or_else(|| settings.host.clone()),
            port: self.port.or(settings.port),
            db: self.db.clone().or_else(|| settings.db.clone()),
            user: self.user.clone().or_else(|| settings.user.clone()),
            password: self.password.clone().or_else(|| settings.password.clone()),
        }
    }
}

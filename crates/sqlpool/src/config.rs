//! Pool configuration.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::PoolError;

/// Default port used by [`ConnectionSettings`].
pub const DEFAULT_PORT: u16 = 3306;

/// Connection details for one named pool member.
///
/// The pool treats these fields as opaque and hands them to the
/// [`Driver`](crate::Driver) when the connection is materialized.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ConnectionSettings {
    /// Driver identifier (e.g. `mysql`).
    pub driver: String,
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Connection character set.
    pub charset: String,
    /// Connection collation.
    pub collation: String,
    /// Table prefix.
    pub prefix: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            driver: "mysql".into(),
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            charset: "utf8mb4".into(),
            collation: "utf8mb4_unicode_ci".into(),
            prefix: String::new(),
        }
    }
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ConnectionSettings {
    /// Create settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the driver identifier.
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the login credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the character set.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the collation.
    #[must_use]
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = collation.into();
        self
    }

    /// Set the table prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Configuration for the connection pool.
///
/// `connections` is an ordered set of templates. New pool members are
/// materialized from the first template whose name is not yet live, so the
/// declaration order decides which names appear first.
///
/// This struct is marked `#[non_exhaustive]`; use the builder methods,
/// [`Default::default()`] or [`PoolConfig::from_json`] to construct it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of connections opened at start and after a refill.
    pub min_connections: u32,

    /// Maximum number of connections allowed.
    pub max_connections: u32,

    /// Connection templates keyed by connection name.
    pub connections: IndexMap<String, ConnectionSettings>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connections: IndexMap::new(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    ///
    /// ```rust
    /// use sqlpool::PoolConfig;
    ///
    /// let config = PoolConfig::from_json(r#"{
    ///     "min_connections": 1,
    ///     "max_connections": 2,
    ///     "connections": {
    ///         "mysql-1": { "host": "db.internal", "database": "app" },
    ///         "mysql-2": { "host": "db.internal", "database": "app" }
    ///     }
    /// }"#).unwrap();
    ///
    /// assert_eq!(config.connections.len(), 2);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, PoolError> {
        serde_json::from_str(json).map_err(|e| PoolError::Configuration(e.to_string()))
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Declare a named connection template.
    ///
    /// Re-declaring an existing name replaces its settings but keeps its
    /// original position.
    #[must_use]
    pub fn connection(mut self, name: impl Into<String>, settings: ConnectionSettings) -> Self {
        self.connections.insert(name.into(), settings);
        self
    }

    /// Declare `count` templates named `<base>-1` through `<base>-<count>`.
    #[must_use]
    pub fn numbered_connections(
        mut self,
        base: &str,
        count: u32,
        settings: ConnectionSettings,
    ) -> Self {
        for index in 1..=count {
            self.connections
                .insert(format!("{base}-{index}"), settings.clone());
        }
        self
    }

    /// Look up the template for a connection name.
    #[must_use]
    pub fn settings(&self, name: &str) -> Option<&ConnectionSettings> {
        self.connections.get(name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if self.connections.len() < self.min_connections as usize {
            return Err(PoolError::Configuration(format!(
                "{} connection templates declared but min_connections is {}",
                self.connections.len(),
                self.min_connections
            )));
        }
        Ok(())
    }
}

//! Pool configuration fixtures.
//!
//! Tests talk to [`MockDriver`](crate::MockDriver), so the settings built
//! here are never dialed. They still mirror a real deployment so that
//! switching a test to a live server only means swapping the driver.

use sqlpool::{ConnectionSettings, PoolConfig};

/// Base name of fixture connections (`mysql-1`, `mysql-2`, ...).
pub const CONNECTION_BASE: &str = "mysql";

/// Database fixture describing the pool a test runs against.
#[derive(Debug, Clone)]
pub struct TestFixture {
    /// Connection settings shared by every template.
    pub settings: ConnectionSettings,
    /// Minimum pool size.
    pub min_connections: u32,
    /// Maximum pool size.
    pub max_connections: u32,
}

impl TestFixture {
    /// Create a fixture for the given pool bounds with local settings.
    #[must_use]
    pub fn new(min_connections: u32, max_connections: u32) -> Self {
        Self {
            settings: ConnectionSettings::new()
                .database("sqlpool_test")
                .credentials("test", "test"),
            min_connections,
            max_connections,
        }
    }

    /// Create a fixture whose settings come from the environment.
    ///
    /// Reads `DB_HOST`, `DB_PORT`, `DB_DATABASE`, `DB_USER` and `DB_PASS`,
    /// keeping the local default for anything unset or unparsable.
    #[must_use]
    pub fn from_env(min_connections: u32, max_connections: u32) -> Self {
        let mut fixture = Self::new(min_connections, max_connections);
        let settings = &mut fixture.settings;

        if let Ok(host) = std::env::var("DB_HOST") {
            settings.host = host;
        }
        if let Some(port) = std::env::var("DB_PORT").ok().and_then(|p| p.parse().ok()) {
            settings.port = port;
        }
        if let Ok(database) = std::env::var("DB_DATABASE") {
            settings.database = database;
        }
        if let Ok(username) = std::env::var("DB_USER") {
            settings.username = username;
        }
        if let Ok(password) = std::env::var("DB_PASS") {
            settings.password = password;
        }

        fixture
    }

    /// Name of the `index`th fixture connection, counting from 1.
    #[must_use]
    pub fn connection_name(index: u32) -> String {
        format!("{CONNECTION_BASE}-{index}")
    }

    /// Build a pool configuration with one template per slot.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        PoolConfig::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .numbered_connections(CONNECTION_BASE, self.max_connections, self.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_config() {
        let config = TestFixture::new(2, 4).config();

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 4);
        let names: Vec<_> = config.connections.keys().cloned().collect();
        assert_eq!(names, ["mysql-1", "mysql-2", "mysql-3", "mysql-4"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connection_name() {
        assert_eq!(TestFixture::connection_name(3), "mysql-3");
    }
}

//! Connection manager (component G): a named registry of [`Connection`]s,
//! resolving a default, instantiating lazily via a per-connection factory,
//! and caching the result.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::connection::{Connection, ConnectionConfig, DbClient, Reconnector};
use crate::error::{OrmError, OrmResult};

/// Builds a live [`DbClient`] for a parsed [`ConnectionConfig`]. The
/// manager never knows how to connect; it asks this factory once per
/// connection and caches what comes back.
pub type ClientFactory = Arc<dyn Fn(&ConnectionConfig) -> OrmResult<Arc<dyn DbClient>> + Send + Sync>;

struct Entry {
    config: ConnectionConfig,
    connection: Option<Arc<Connection>>,
}

/// Named registry of connections. `add_connection` validates and stores;
/// `connection(name)` resolves the default when empty, builds via the
/// factory on first use, and caches the result for subsequent calls.
pub struct ConnectionManager {
    factory: ClientFactory,
    default: Mutex<Option<String>>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ConnectionManager {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            factory,
            default: Mutex::new(None),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a named configuration. The first connection added becomes
    /// the default unless [`Self::set_default`] is called afterward.
    pub async fn add_connection(&self, config: ConnectionConfig, name: impl Into<String>) -> OrmResult<()> {
        let name = name.into();
        self.entries
            .lock()
            .await
            .insert(name.clone(), Entry { config, connection: None });
        let mut default = self.default.lock().await;
        if default.is_none() {
            *default = Some(name);
        }
        Ok(())
    }

    pub async fn set_default(&self, name: impl Into<String>) -> OrmResult<()> {
        let name = name.into();
        if !self.entries.lock().await.contains_key(&name) {
            return Err(OrmError::Config(format!("no connection named `{name}` has been added")));
        }
        *self.default.lock().await = Some(name);
        Ok(())
    }

    async fn resolve_name(&self, name: Option<&str>) -> OrmResult<String> {
        match name {
            Some(n) => Ok(n.to_string()),
            None => self
                .default
                .lock()
                .await
                .clone()
                .ok_or_else(|| OrmError::Config("no default connection is configured".into())),
        }
    }

    /// Resolves the named connection (or the default, if `name` is `None`),
    /// instantiating and caching it via the factory on first use, and
    /// installing a reconnector so a lost-connection retry can rebuild the
    /// client without going back through the manager.
    pub async fn connection(&self, name: Option<&str>) -> OrmResult<Arc<Connection>> {
        let name = self.resolve_name(name).await?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&name)
            .ok_or_else(|| OrmError::Config(format!("no connection named `{name}` has been added")))?;
        if let Some(conn) = &entry.connection {
            return Ok(conn.clone());
        }

        let client = (self.factory)(&entry.config)?;
        let common = entry.config.common().clone();
        let mut conn = Connection::new(name.clone(), entry.config.dialect(), client).with_prefix(&common.prefix);
        if let Some(tz) = &common.qt_timezone {
            conn = conn.with_timezone(tz.clone());
        }

        let config = entry.config.clone();
        let factory = self.factory.clone();
        let reconnector: Reconnector = Arc::new(move |_name: &str| (factory)(&config));
        conn.set_reconnector(reconnector).await;

        let conn = Arc::new(conn);
        entry.connection = Some(conn.clone());
        Ok(conn)
    }

    /// Disconnects without forgetting the configuration; the entry remains
    /// and a later `connection()` call rebuilds it via the factory.
    pub async fn disconnect(&self, name: Option<&str>) -> OrmResult<()> {
        let name = self.resolve_name(name).await?;
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&name) {
            entry.connection = None;
        }
        Ok(())
    }

    pub async fn reconnect(&self, name: Option<&str>) -> OrmResult<Arc<Connection>> {
        self.disconnect(name).await?;
        self.connection(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PretendDbClient;

    fn pretend_factory() -> ClientFactory {
        Arc::new(|_cfg: &ConnectionConfig| Ok(Arc::new(PretendDbClient) as Arc<dyn DbClient>))
    }

    fn config(name: &str) -> ConnectionConfig {
        use crate::connection::config::{CommonConfig, SqliteOptions};
        ConnectionConfig::Sqlite(
            CommonConfig { database: name.to_string(), ..Default::default() },
            SqliteOptions::default(),
        )
    }

    #[tokio::test]
    async fn first_added_connection_becomes_default() {
        let manager = ConnectionManager::new(pretend_factory());
        manager.add_connection(config("primary"), "primary").await.unwrap();
        let conn = manager.connection(None).await.unwrap();
        assert_eq!(conn.name(), "primary");
    }

    #[tokio::test]
    async fn connection_is_cached_across_calls() {
        let manager = ConnectionManager::new(pretend_factory());
        manager.add_connection(config("a"), "a").await.unwrap();
        let first = manager.connection(Some("a")).await.unwrap();
        let second = manager.connection(Some("a")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn reconnect_produces_a_fresh_instance() {
        let manager = ConnectionManager::new(pretend_factory());
        manager.add_connection(config("a"), "a").await.unwrap();
        let first = manager.connection(Some("a")).await.unwrap();
        let second = manager.reconnect(Some("a")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn unknown_connection_name_errors() {
        let manager = ConnectionManager::new(pretend_factory());
        let err = manager.connection(Some("missing")).await.unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }
}

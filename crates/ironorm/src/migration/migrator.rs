//! Migrator (component I): runs/rolls back a sorted registry of
//! [`Migration`]s against a repository (component H) and a connection
//! resolver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::manager::ConnectionManager;
use crate::migration::repository::{MigrationRepository, SortOrder};

/// One migration. `name()` MUST be unique and the full registry MUST sort
/// strictly ascending by it (typically a timestamp/sequence prefix) —
/// verified once at [`Migrator::new`].
#[async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    async fn up(&self, connection: &Connection) -> OrmResult<()>;

    async fn down(&self, connection: &Connection) -> OrmResult<()>;

    /// Whether `up`/`down` should run inside a transaction (and roll back
    /// on failure). Ignored for dialects without transactional DDL.
    fn within_transaction(&self) -> bool {
        true
    }

    /// A named connection this migration should run against instead of the
    /// manager's default.
    fn connection_override(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Give each pending migration its own batch number instead of sharing
    /// one batch for the whole run.
    pub step: bool,
    pub pretend: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackOptions {
    /// Roll back this many of the most recent batches; `0` rolls back just
    /// the single most recent batch (via `getLast`).
    pub step_value: i64,
    pub pretend: bool,
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub name: String,
    pub elapsed: std::time::Duration,
    /// Populated instead of running, when `pretend` was requested.
    pub pretended_sql: Vec<String>,
}

/// Holds the sorted registry plus lookup maps built once at construction.
pub struct Migrator {
    registry: Vec<Arc<dyn Migration>>,
    by_name: HashMap<String, usize>,
    repository: MigrationRepository,
    manager: Arc<ConnectionManager>,
}

impl Migrator {
    /// Builds the migrator. `registry` MUST already be sorted strictly
    /// ascending by name; this is a configuration error, not a runtime one,
    /// so it is caught here rather than silently re-sorted.
    pub fn new(
        registry: Vec<Arc<dyn Migration>>,
        repository: MigrationRepository,
        manager: Arc<ConnectionManager>,
    ) -> OrmResult<Self> {
        for pair in registry.windows(2) {
            if pair[0].name() >= pair[1].name() {
                return Err(OrmError::Config(format!(
                    "migration registry is not strictly ascending: `{}` >= `{}`",
                    pair[0].name(),
                    pair[1].name()
                )));
            }
        }
        let by_name = registry
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name().to_string(), i))
            .collect();
        Ok(Self { registry, by_name, repository, manager })
    }

    async fn connection_for(&self, migration: &dyn Migration) -> OrmResult<Arc<Connection>> {
        self.manager.connection(migration.connection_override()).await
    }

    async fn run_up(&self, migration: &dyn Migration, batch: i64, pretend: bool) -> OrmResult<MigrationReport> {
        let connection = self.connection_for(migration).await?;
        let started = Instant::now();

        if pretend {
            let logged = connection.pretend(|| migration.up(&connection)).await?;
            return Ok(MigrationReport {
                name: migration.name().to_string(),
                elapsed: started.elapsed(),
                pretended_sql: logged.into_iter().map(|q| q.sql).collect(),
            });
        }

        if migration.within_transaction() {
            connection.begin_transaction().await?;
            match migration.up(&connection).await {
                Ok(()) => connection.commit().await?,
                Err(e) => {
                    connection.roll_back(None).await?;
                    return Err(e);
                }
            }
        } else {
            migration.up(&connection).await?;
        }

        self.repository.log(migration.name(), batch).await?;
        Ok(MigrationReport { name: migration.name().to_string(), elapsed: started.elapsed(), pretended_sql: vec![] })
    }

    async fn run_down(&self, migration: &dyn Migration, id: i64, pretend: bool) -> OrmResult<MigrationReport> {
        let connection = self.connection_for(migration).await?;
        let started = Instant::now();

        if pretend {
            let logged = connection.pretend(|| migration.down(&connection)).await?;
            return Ok(MigrationReport {
                name: migration.name().to_string(),
                elapsed: started.elapsed(),
                pretended_sql: logged.into_iter().map(|q| q.sql).collect(),
            });
        }

        if migration.within_transaction() {
            connection.begin_transaction().await?;
            match migration.down(&connection).await {
                Ok(()) => connection.commit().await?,
                Err(e) => {
                    connection.roll_back(None).await?;
                    return Err(e);
                }
            }
        } else {
            migration.down(&connection).await?;
        }

        self.repository.delete_migration(id).await?;
        Ok(MigrationReport { name: migration.name().to_string(), elapsed: started.elapsed(), pretended_sql: vec![] })
    }

    /// Runs every migration not yet recorded, in registry order.
    pub async fn run(&self, options: RunOptions) -> OrmResult<Vec<MigrationReport>> {
        if !self.repository.repository_exists().await? {
            self.repository.create_repository().await?;
        }
        let ran: std::collections::HashSet<String> = self.repository.get_ran_simple().await?.into_iter().collect();
        let mut next_batch = self.repository.get_next_batch_number().await?;
        let mut reports = Vec::new();
        for migration in &self.registry {
            if ran.contains(migration.name()) {
                continue;
            }
            let batch = next_batch;
            #[cfg(feature = "tracing")]
            tracing::info!(target: "ironorm::migrator", migration = migration.name(), batch, "running migration");
            reports.push(self.run_up(migration.as_ref(), batch, options.pretend).await?);
            if options.step {
                next_batch += 1;
            }
        }
        Ok(reports)
    }

    /// Rolls back the most recent batch(es): `step_value` batches if
    /// positive, else the single most recent batch via `getLast`.
    pub async fn rollback(&self, options: RollbackOptions) -> OrmResult<Vec<MigrationReport>> {
        let pulled = if options.step_value > 0 {
            self.repository.get_migrations(options.step_value).await?
        } else {
            self.repository.get_last().await?
        };
        if pulled.is_empty() {
            return Ok(Vec::new());
        }
        let by_name: HashMap<&str, i64> = pulled.iter().map(|m| (m.migration.as_str(), m.id)).collect();
        let mut reports = Vec::new();
        for migration in self.registry.iter().rev() {
            let Some(&id) = by_name.get(migration.name()) else { continue };
            #[cfg(feature = "tracing")]
            tracing::info!(target: "ironorm::migrator", migration = migration.name(), "rolling back migration");
            reports.push(self.run_down(migration.as_ref(), id, options.pretend).await?);
        }
        Ok(reports)
    }

    /// Rolls back every migration that has ever run, in reverse registry
    /// order, regardless of batch.
    pub async fn reset(&self, pretend: bool) -> OrmResult<Vec<MigrationReport>> {
        let ran_names: std::collections::HashSet<String> =
            self.repository.get_ran(SortOrder::Desc).await?.into_iter().collect();
        let id_by_name: HashMap<String, i64> = self
            .repository
            .get_all()
            .await?
            .into_iter()
            .map(|r| (r.migration, r.id))
            .collect();
        let mut reports = Vec::new();
        for migration in self.registry.iter().rev() {
            if !ran_names.contains(migration.name()) {
                continue;
            }
            let Some(&id) = id_by_name.get(migration.name()) else { continue };
            reports.push(self.run_down(migration.as_ref(), id, pretend).await?);
        }
        Ok(reports)
    }

    pub fn registry_len(&self) -> usize {
        self.registry.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, DbClient, PretendDbClient};
    use crate::connection::config::{CommonConfig, SqliteOptions};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Noop(&'static str, Arc<AtomicBool>);

    #[async_trait]
    impl Migration for Noop {
        fn name(&self) -> &str {
            self.0
        }
        async fn up(&self, _connection: &Connection) -> OrmResult<()> {
            self.1.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn down(&self, _connection: &Connection) -> OrmResult<()> {
            self.1.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn within_transaction(&self) -> bool {
            false
        }
    }

    fn manager() -> Arc<ConnectionManager> {
        let factory: crate::manager::ClientFactory =
            Arc::new(|_cfg: &ConnectionConfig| Ok(Arc::new(PretendDbClient) as Arc<dyn DbClient>));
        Arc::new(ConnectionManager::new(factory))
    }

    #[tokio::test]
    async fn unsorted_registry_is_rejected() {
        let flag = Arc::new(AtomicBool::new(false));
        let registry: Vec<Arc<dyn Migration>> = vec![
            Arc::new(Noop("2024_02", flag.clone())),
            Arc::new(Noop("2024_01", flag.clone())),
        ];
        let conn = Arc::new(Connection::new("t", crate::ident::Dialect::Sqlite, Arc::new(PretendDbClient)));
        let repo = MigrationRepository::new(conn);
        let err = Migrator::new(registry, repo, manager()).unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }

    #[tokio::test]
    async fn run_applies_pending_migrations_in_order() {
        let flag = Arc::new(AtomicBool::new(false));
        let registry: Vec<Arc<dyn Migration>> = vec![
            Arc::new(Noop("2024_01_create", flag.clone())),
            Arc::new(Noop("2024_02_alter", flag.clone())),
        ];
        let manager = manager();
        manager
            .add_connection(
                ConnectionConfig::Sqlite(
                    CommonConfig { database: ":memory:".into(), ..Default::default() },
                    SqliteOptions::default(),
                ),
                "default",
            )
            .await
            .unwrap();
        let conn = manager.connection(None).await.unwrap();
        let repo = MigrationRepository::new(conn);
        let migrator = Migrator::new(registry, repo, manager).unwrap();
        let reports = migrator.run(RunOptions::default()).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(flag.load(Ordering::SeqCst));
    }
}

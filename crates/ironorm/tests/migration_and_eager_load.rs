//! Integration tests exercising the migrator and the eager-loader against
//! a `pretend`-mode connection, so neither needs a live database.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;

use ironorm::connection::config::{CommonConfig, SqliteOptions};
use ironorm::connection::{ConnectionConfig, PretendDbClient};
use ironorm::ident::Dialect;
use ironorm::manager::ClientFactory;
use ironorm::migration::{Migration, MigrationRepository, Migrator, RollbackOptions, RunOptions};
use ironorm::model::{ModelMeta, Record, Relation};
use ironorm::{Connection, ConnectionManager, DbClient};

fn pretend_factory() -> ClientFactory {
    Arc::new(|_cfg: &ConnectionConfig| Ok(Arc::new(PretendDbClient) as Arc<dyn DbClient>))
}

struct CountingMigration {
    name: &'static str,
    order: Arc<std::sync::Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Migration for CountingMigration {
    fn name(&self) -> &str {
        self.name
    }

    async fn up(&self, _connection: &Connection) -> ironorm::OrmResult<()> {
        self.order.lock().unwrap().push(self.name);
        Ok(())
    }

    async fn down(&self, _connection: &Connection) -> ironorm::OrmResult<()> {
        self.order.lock().unwrap().retain(|n| *n != self.name);
        Ok(())
    }

    fn within_transaction(&self) -> bool {
        false
    }
}

/// A migration whose body issues a real statement through the connection,
/// so pretend mode has something to capture.
struct StatementMigration {
    name: &'static str,
}

#[async_trait]
impl Migration for StatementMigration {
    fn name(&self) -> &str {
        self.name
    }

    async fn up(&self, connection: &Connection) -> ironorm::OrmResult<()> {
        connection.statement(&format!("create table {}(id integer)", self.name), &[]).await
    }

    async fn down(&self, connection: &Connection) -> ironorm::OrmResult<()> {
        connection.statement(&format!("drop table {}", self.name), &[]).await
    }

    fn within_transaction(&self) -> bool {
        false
    }
}

async fn sqlite_manager_and_repository() -> (Arc<ConnectionManager>, MigrationRepository) {
    let manager = Arc::new(ConnectionManager::new(pretend_factory()));
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
    let connection = manager.connection(None).await.unwrap();
    let repository = MigrationRepository::new(connection);
    (manager, repository)
}

#[tokio::test]
async fn migrator_runs_pending_migrations_in_registry_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let registry: Vec<Arc<dyn Migration>> = vec![
        Arc::new(CountingMigration { name: "2024_01_01_create_users", order: order.clone() }),
        Arc::new(CountingMigration { name: "2024_02_01_add_index", order: order.clone() }),
        Arc::new(CountingMigration { name: "2024_03_01_seed_data", order: order.clone() }),
    ];

    let (manager, repository) = sqlite_manager_and_repository().await;
    let migrator = Migrator::new(registry, repository, manager).unwrap();

    let reports = migrator.run(RunOptions::default()).await.unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(
        reports.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        vec!["2024_01_01_create_users", "2024_02_01_add_index", "2024_03_01_seed_data"]
    );
    assert_eq!(*order.lock().unwrap(), vec!["2024_01_01_create_users", "2024_02_01_add_index", "2024_03_01_seed_data"]);
}

#[tokio::test]
async fn migrator_pretend_run_captures_sql_without_logging_it() {
    let registry: Vec<Arc<dyn Migration>> = vec![Arc::new(StatementMigration { name: "widgets" })];
    let (manager, repository) = sqlite_manager_and_repository().await;
    let migrator = Migrator::new(registry, repository, manager).unwrap();

    let reports = migrator.run(RunOptions { pretend: true, ..Default::default() }).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].pretended_sql, vec!["create table widgets(id integer)".to_string()]);
}

#[tokio::test]
async fn migrator_rollback_on_an_empty_log_is_a_no_op() {
    let registry: Vec<Arc<dyn Migration>> = vec![Arc::new(StatementMigration { name: "widgets" })];
    let (manager, repository) = sqlite_manager_and_repository().await;
    let migrator = Migrator::new(registry, repository, manager).unwrap();

    let rolled_back = migrator.rollback(RollbackOptions::default()).await.unwrap();
    assert!(rolled_back.is_empty());
}

fn parent_meta() -> Arc<ModelMeta> {
    Arc::new(ModelMeta::new("authors"))
}

fn child_meta() -> Arc<ModelMeta> {
    Arc::new(ModelMeta::new("books"))
}

#[tokio::test]
async fn eager_load_has_many_honors_the_connection_table_prefix() {
    let mut parent = Record::new(parent_meta());
    parent.attributes.set("id", Json::from(7));

    let relation = Relation::has_many(&parent, child_meta(), "author_id", "id");

    let connection =
        Connection::new("default", Dialect::Pgsql, Arc::new(PretendDbClient)).with_prefix("app_");

    let logged = connection
        .pretend(|| async { Relation::load_many(&[relation], &connection).await })
        .await
        .unwrap();

    assert_eq!(logged.len(), 1);
    assert!(
        logged[0].sql.contains("\"app_books\""),
        "expected the prefixed, quoted table name in: {}",
        logged[0].sql
    );
    assert!(logged[0].sql.contains("\"author_id\""));
}

#[tokio::test]
async fn eager_load_belongs_to_honors_the_connection_table_prefix() {
    let mut child = Record::new(child_meta());
    child.attributes.set("id", Json::from(7));
    child.attributes.set("author_id", Json::from(7));

    let relation = Relation::belongs_to(&child, parent_meta(), "author_id", "id");

    let connection =
        Connection::new("default", Dialect::Pgsql, Arc::new(PretendDbClient)).with_prefix("app_");

    let logged = connection
        .pretend(|| async { Relation::load_many(&[relation], &connection).await })
        .await
        .unwrap();

    assert_eq!(logged.len(), 1);
    assert!(
        logged[0].sql.contains("\"app_authors\""),
        "expected the prefixed, quoted table name in: {}",
        logged[0].sql
    );
}

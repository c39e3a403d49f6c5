//! Migration repository (component H): CRUD over the log table
//! `migrations { id, migration, batch }`.

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::OrmResult;
use crate::ident::Dialect;
use crate::value::Value;

/// One applied-migration row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub id: i64,
    pub migration: String,
    pub batch: i64,
}

/// The log table itself, named so the migrator and a schema dump agree:
/// `migrations { id: auto, migration: string unique, batch: integer }`.
pub struct MigrationRepository {
    connection: Arc<Connection>,
    table: String,
}

impl MigrationRepository {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection, table: "migrations".to_string() }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    fn create_table_sql(&self) -> String {
        match self.connection.dialect() {
            Dialect::MySql => format!(
                "create table if not exists `{}` (\
                 `id` integer primary key auto_increment, \
                 `migration` varchar(255) not null unique, \
                 `batch` integer not null)",
                self.table
            ),
            Dialect::Pgsql => format!(
                "create table if not exists \"{}\" (\
                 \"id\" bigserial primary key, \
                 \"migration\" varchar(255) not null unique, \
                 \"batch\" integer not null)",
                self.table
            ),
            Dialect::Sqlite => format!(
                "create table if not exists \"{}\" (\
                 \"id\" integer primary key autoincrement, \
                 \"migration\" varchar(255) not null unique, \
                 \"batch\" integer not null)",
                self.table
            ),
        }
    }

    pub async fn create_repository(&self) -> OrmResult<()> {
        self.connection.unprepared(&self.create_table_sql()).await
    }

    pub async fn repository_exists(&self) -> OrmResult<bool> {
        let sql = match self.connection.dialect() {
            Dialect::MySql | Dialect::Pgsql => "select 1 from information_schema.tables where table_name = ?",
            Dialect::Sqlite => "select 1 from sqlite_master where type = 'table' and name = ?",
        };
        let row = self
            .connection
            .select_one(sql, &[Value::bound(self.table.clone())])
            .await?;
        Ok(row.is_some())
    }

    pub async fn log(&self, migration: &str, batch: i64) -> OrmResult<()> {
        let sql = format!(
            "insert into {} (migration, batch) values (?, ?)",
            self.quoted_table()
        );
        self.connection
            .insert(&sql, &[Value::bound(migration.to_string()), Value::bound(batch)])
            .await?;
        Ok(())
    }

    pub async fn delete_migration(&self, id: i64) -> OrmResult<()> {
        let sql = format!("delete from {} where id = ?", self.quoted_table());
        self.connection.remove(&sql, &[Value::bound(id)]).await?;
        Ok(())
    }

    /// All rows at `max(batch)`, ordered `id desc`.
    pub async fn get_last(&self) -> OrmResult<Vec<MigrationRecord>> {
        let sql = format!(
            "select id, migration, batch from {t} where batch = (select max(batch) from {t}) order by id desc",
            t = self.quoted_table()
        );
        self.fetch(&sql, &[]).await
    }

    /// Rows in the last `steps` distinct batches, ordered `batch desc, id desc`.
    pub async fn get_migrations(&self, steps: i64) -> OrmResult<Vec<MigrationRecord>> {
        let sql = format!(
            "select id, migration, batch from {t} \
             where batch in (select distinct batch from {t} order by batch desc limit ?) \
             order by batch desc, id desc",
            t = self.quoted_table()
        );
        self.fetch(&sql, &[Value::bound(steps)]).await
    }

    /// All migration names, in ascending (`Asc`) or descending (`Desc`)
    /// batch/id order.
    pub async fn get_ran(&self, order: SortOrder) -> OrmResult<Vec<String>> {
        let dir = match order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        let sql = format!(
            "select migration from {} order by batch {dir}, id {dir}",
            self.quoted_table()
        );
        let rows = self.connection.select(&sql, &[]).await?;
        rows.iter()
            .map(|r| r.try_get::<_, String>("migration").map_err(crate::error::OrmError::from_db_error))
            .collect()
    }

    /// Names in any stable order (no ordering guarantee beyond repeatability).
    pub async fn get_ran_simple(&self) -> OrmResult<Vec<String>> {
        self.get_ran(SortOrder::Asc).await
    }

    pub async fn get_next_batch_number(&self) -> OrmResult<i64> {
        let sql = format!("select max(batch) as max_batch from {}", self.quoted_table());
        let row = self.connection.select_one(&sql, &[]).await?;
        let max = match row {
            Some(r) => r.try_get::<_, Option<i64>>("max_batch").map_err(crate::error::OrmError::from_db_error)?,
            None => None,
        };
        Ok(max.unwrap_or(0) + 1)
    }

    /// Every logged row, ordered `batch desc, id desc`. Used by `reset()`,
    /// which rolls back everything regardless of batch.
    pub async fn get_all(&self) -> OrmResult<Vec<MigrationRecord>> {
        let sql = format!(
            "select id, migration, batch from {} order by batch desc, id desc",
            self.quoted_table()
        );
        self.fetch(&sql, &[]).await
    }

    pub async fn delete_repository(&self) -> OrmResult<()> {
        let sql = format!("drop table if exists {}", self.quoted_table());
        self.connection.unprepared(&sql).await
    }

    fn quoted_table(&self) -> String {
        let q = self.connection.dialect().quote_char();
        format!("{q}{}{q}", self.table)
    }

    async fn fetch(&self, sql: &str, bindings: &[Value]) -> OrmResult<Vec<MigrationRecord>> {
        let rows = self.connection.select(sql, bindings).await?;
        rows.iter()
            .map(|r| {
                Ok(MigrationRecord {
                    id: r.try_get("id").map_err(crate::error::OrmError::from_db_error)?,
                    migration: r.try_get("migration").map_err(crate::error::OrmError::from_db_error)?,
                    batch: r.try_get("batch").map_err(crate::error::OrmError::from_db_error)?,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PretendDbClient;
    use std::sync::Arc;

    fn repo(dialect: Dialect) -> MigrationRepository {
        let conn = Arc::new(Connection::new("default", dialect, Arc::new(PretendDbClient)));
        MigrationRepository::new(conn)
    }

    #[test]
    fn create_table_sql_is_dialect_specific() {
        assert!(repo(Dialect::MySql).create_table_sql().contains("auto_increment"));
        assert!(repo(Dialect::Pgsql).create_table_sql().contains("bigserial"));
        assert!(repo(Dialect::Sqlite).create_table_sql().contains("autoincrement"));
    }

    #[test]
    fn quoted_table_uses_dialect_quote_char() {
        assert_eq!(repo(Dialect::MySql).quoted_table(), "`migrations`");
        assert_eq!(repo(Dialect::Pgsql).quoted_table(), "\"migrations\"");
    }

    #[test]
    fn with_table_overrides_default_name() {
        let r = repo(Dialect::Sqlite).with_table("custom_migrations");
        assert_eq!(r.quoted_table(), "\"custom_migrations\"");
    }

    #[tokio::test]
    async fn next_batch_number_defaults_to_one_when_table_empty() {
        // PretendDbClient returns no rows, so `max(batch)` reads back as
        // absent and the next batch is 1 — same as a freshly created table.
        let r = repo(Dialect::Sqlite);
        assert_eq!(r.get_next_batch_number().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repository_exists_is_false_with_no_rows() {
        let r = repo(Dialect::Pgsql);
        assert!(!r.repository_exists().await.unwrap());
    }
}

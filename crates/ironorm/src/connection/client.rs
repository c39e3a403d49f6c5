//! The `DbClient` capability: the one seam marked "external collaborator,
//! interface only" in the top-level scope. [`Connection`](super::Connection)
//! is generic over it so the grammar/query-builder/migrator/model layers
//! never talk to a concrete driver directly.
//!
//! This crate ships one concrete, fully wired adapter — [`PostgresDbClient`]
//! — built on the teacher's existing [`crate::client::GenericClient`]
//! abstraction over `tokio-postgres`/`deadpool-postgres`. MySQL and SQLite
//! connections type-check and compile against the same trait; wiring their
//! concrete driver crates is the out-of-scope capability boundary the spec
//! calls out, so [`PretendDbClient`] stands in for them in tests (and for
//! `pretend` mode on any dialect).

use async_trait::async_trait;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use crate::client::GenericClient;
use crate::error::OrmResult;

/// Object-safe database client capability. `Connection` stores `Arc<dyn
/// DbClient>` so it can hold a direct client, a pooled client, or (for
/// dialects whose concrete driver is out of scope) a pretend-only stub,
/// uniformly.
#[async_trait]
pub trait DbClient: Send + Sync {
    async fn query_raw(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>>;
    async fn execute_raw(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64>;
}

/// Adapts any [`GenericClient`] (a live `tokio_postgres::Client`,
/// `Transaction`, or `PoolClient`) into the object-safe [`DbClient`].
pub struct PostgresDbClient<C: GenericClient>(pub C);

#[async_trait]
impl<C: GenericClient> DbClient for PostgresDbClient<C> {
    async fn query_raw(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        let sql = positional_placeholders(sql);
        self.0.query(&sql, params).await
    }

    async fn execute_raw(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        let sql = positional_placeholders(sql);
        self.0.execute(&sql, params).await
    }
}

/// Rewrites `?` placeholders into postgres's `$1, $2, ...` form. The
/// grammar always emits `?` (per its module docs) and leaves this
/// conversion to the driver boundary; `tokio_postgres` is the one driver
/// here that actually needs it. Skips `?` inside single-quoted string
/// literals and double-quoted identifiers so a literal question mark in
/// data never gets mistaken for a parameter.
fn positional_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_quote: Option<char> = None;
    let mut n = 0u32;
    for ch in sql.chars() {
        match in_quote {
            Some(q) if ch == q => {
                in_quote = None;
                out.push(ch);
            }
            Some(_) => out.push(ch),
            None if ch == '\'' || ch == '"' => {
                in_quote = Some(ch);
                out.push(ch);
            }
            None if ch == '?' => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            None => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_placeholders_numbers_in_order() {
        assert_eq!(
            positional_placeholders("select * from t where a = ? and b = ?"),
            "select * from t where a = $1 and b = $2"
        );
    }

    #[test]
    fn positional_placeholders_ignores_quoted_question_marks() {
        assert_eq!(
            positional_placeholders("select * from t where a = ? and b = '??'"),
            "select * from t where a = $1 and b = '??'"
        );
    }
}

/// Executes nothing; used by `pretend` mode and by dialects without a
/// concretely wired driver. Returns empty results for queries and `0` for
/// execute, which is exactly the contract pretend mode wants: callers
/// observe the captured SQL, never a row.
#[derive(Debug, Clone, Copy, Default)]
pub struct PretendDbClient;

#[async_trait]
impl DbClient for PretendDbClient {
    async fn query_raw(&self, _sql: &str, _params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn execute_raw(&self, _sql: &str, _params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        Ok(0)
    }
}

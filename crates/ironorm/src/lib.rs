//! # ironorm
//!
//! A multi-dialect query toolkit and active-record layer: a fluent query
//! builder, a dialect grammar for MySQL/PostgreSQL/SQLite, a named
//! connection manager, a migration engine, and a dynamic active-record
//! model with eager-loadable relations.
//!
//! ## Layout
//!
//! - [`value`] / [`ident`] — the bound-parameter and identifier-quoting
//!   primitives everything else is built on.
//! - [`builder`] — [`QueryBuilder`], the fluent API; [`grammar`] compiles
//!   what it accumulates into `(sql, bindings)` per dialect.
//! - [`connection`] — [`Connection`], the transactional execution seam
//!   over the [`connection::DbClient`] capability.
//! - [`manager`] — [`ConnectionManager`], a named connection registry.
//! - [`migration`] — the schema-migration log and runner.
//! - [`model`] — the active-record [`Model`] trait, attribute storage, and
//!   relation graph.
//! - [`client`] / [`row`] / [`pool`] — the concrete `tokio-postgres` /
//!   `deadpool-postgres` plumbing the rest of the crate is built on.

pub mod builder;
pub mod client;
pub mod connection;
pub mod error;
pub mod grammar;
pub mod ident;
pub mod manager;
pub mod migration;
pub mod model;
pub mod row;
pub mod value;

pub use builder::{JoinClause, QueryBuilder};
pub use client::GenericClient;
pub use connection::{Connection, DbClient};
pub use error::{OrmError, OrmResult};
pub use grammar::{Grammar, MySqlGrammar, PostgresGrammar, SqliteGrammar};
pub use ident::{Dialect, Identifier};
pub use manager::{ClientFactory, ConnectionManager};
pub use migration::{Migration, MigrationRepository, Migrator};
pub use model::{Model, ModelMeta, Record, Relation, RelationValue};
pub use row::{FromRow, RowExt};
pub use value::Value;

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use client::PoolClient;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_config};

#[cfg(feature = "derive")]
pub use ironorm_derive::FromRow;

pub mod prelude;

//! Convenient imports for typical `ironorm` usage.
//!
//! ```ignore
//! use ironorm::prelude::*;
//! ```

// ── Core value/identifier primitives ────────────────────────────────────────
pub use crate::ident::{Dialect, Identifier, IntoIdentifier};
pub use crate::value::Value;

// ── Row mapping ──────────────────────────────────────────────────────────────
pub use crate::{FromRow, RowExt};

// ── Query building ───────────────────────────────────────────────────────────
pub use crate::builder::{BoolConn, Direction, JoinClause, JoinKind, QueryBuilder, QueryState};
pub use crate::grammar::{Grammar, MySqlGrammar, PostgresGrammar, SqliteGrammar};

// ── Connections ──────────────────────────────────────────────────────────────
pub use crate::connection::{Connection, ConnectionConfig, DbClient};
pub use crate::manager::{ClientFactory, ConnectionManager};

// ── Migrations ───────────────────────────────────────────────────────────────
pub use crate::migration::{Migration, MigrationReport, MigrationRepository, Migrator, RollbackOptions, RunOptions};

// ── Active record ────────────────────────────────────────────────────────────
pub use crate::model::{AttributeStore, Guard, Model, ModelMeta, Pivot, Record, Relation, RelationValue};

// ── Errors ───────────────────────────────────────────────────────────────────
pub use crate::error::{OrmError, OrmResult};

// ── Connection pooling (feature: pool) ──────────────────────────────────────
#[cfg(feature = "pool")]
pub use crate::pool::{create_pool, create_pool_with_config};

// ── Derive macros (feature: derive) ─────────────────────────────────────────
#[cfg(feature = "derive")]
pub use ironorm_derive::FromRow as DeriveFromRow;

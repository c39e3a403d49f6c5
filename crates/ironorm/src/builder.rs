//! Query builder (components C/E): [`state`] holds the plain-data
//! [`state::QueryState`] a query accumulates; [`query::QueryBuilder`] is the
//! fluent API that mutates it and hands it to [`crate::grammar::Grammar`]
//! to compile.

pub mod query;
pub mod state;

pub use query::{JoinClause, QueryBuilder};
pub use state::*;

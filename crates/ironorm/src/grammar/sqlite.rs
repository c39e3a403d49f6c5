use super::Grammar;
use crate::ident::Dialect;

const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "like", "not like", "glob", "not glob", "in", "not in",
    "between", "not between", "is", "is not", "match",
];

/// SQLite shares PostgreSQL's double-quote identifier style but has no row
/// locking (`compile_lock` is a no-op) and needs an extra statement to
/// truncate an autoincrement sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteGrammar;

impl Grammar for SqliteGrammar {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn operators(&self) -> &'static [&'static str] {
        OPERATORS
    }
}

use super::Grammar;
use crate::ident::Dialect;

const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "like", "not like", "ilike", "not ilike", "similar to",
    "not similar to", "~", "~*", "!~", "!~*", "in", "not in", "between", "not between", "is",
    "is not", "@>", "<@", "&&", "?", "?|", "?&",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresGrammar;

impl Grammar for PostgresGrammar {
    fn dialect(&self) -> Dialect {
        Dialect::Pgsql
    }

    fn operators(&self) -> &'static [&'static str] {
        OPERATORS
    }
}

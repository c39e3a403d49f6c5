use super::Grammar;
use crate::ident::Dialect;

const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "<=>", "like", "like binary", "not like", "in", "not in",
    "between", "not between", "is", "is not", "regexp", "not regexp", "&", "|", "^", "<<", ">>",
];

/// MySQL/MariaDB grammar. Historical share-lock syntax (`lock in share
/// mode`) is kept rather than the newer `for share`, matching what the
/// driver actually accepts — see the design notes on the source's
/// inconsistent comments about this.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlGrammar;

impl Grammar for MySqlGrammar {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn operators(&self) -> &'static [&'static str] {
        OPERATORS
    }
}

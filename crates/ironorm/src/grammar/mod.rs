//! Grammar (component D): compiles [`QueryState`] into `(sql, bindings)`.
//!
//! The base pipeline lives here as default trait methods; each dialect is a
//! zero-sized struct that implements [`Grammar`] and overrides only the
//! handful of hooks that actually differ (`operators`, `compile_lock`,
//! `compile_insert_or_ignore`, the join-rewrite strategy for
//! `update`/`delete`, `compile_truncate`). This is the Rust realization of
//! the "dispatch table keyed by enum" the design notes call for: a trait
//! object's vtable *is* that table, so most hooks are simply a `match
//! self.dialect()` inside one shared default body rather than three
//! hand-duplicated overrides.
//!
//! Placeholder style is always `?`; the grammar never emits `$n`. Per
//! spec §6.4 that rewrite, if a driver needs it, is the connection's job.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlGrammar;
pub use postgres::PostgresGrammar;
pub use sqlite::SqliteGrammar;

use crate::builder::state::*;
use crate::error::{OrmError, OrmResult};
use crate::ident::{Dialect, Identifier, columnize, quote_string};
use crate::value::Value;

/// A compiled statement: SQL text plus its bindings, in emission order.
#[derive(Debug, Clone, Default)]
pub struct Compiled {
    pub sql: String,
    pub bindings: Vec<Value>,
}

impl Compiled {
    pub fn new(sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }
}

/// How `update`/`delete` with joins (or a limit) is rewritten, since
/// MySQL supports multi-table DML directly but PostgreSQL/SQLite don't.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRewriteStrategy {
    /// `update t join j on ... set ... where ...` / `delete t from ...`
    Inline,
    /// `update t set ... where pk in (select pk from t join j ... where ...)`
    SubselectOnPrimaryKey,
}

pub trait Grammar: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Operators this dialect's `where`/`having` calls may use. The builder
    /// rejects anything outside this set at call time.
    fn operators(&self) -> &'static [&'static str];

    fn validate_operator(&self, op: &str) -> OrmResult<()> {
        let lower = op.to_ascii_lowercase();
        if self.operators().iter().any(|o| *o == lower) {
            Ok(())
        } else {
            Err(OrmError::validation(format!(
                "operator '{op}' is not supported by this dialect"
            )))
        }
    }

    fn how_update_joins(&self) -> JoinRewriteStrategy {
        match self.dialect() {
            Dialect::MySql => JoinRewriteStrategy::Inline,
            Dialect::Pgsql | Dialect::Sqlite => JoinRewriteStrategy::SubselectOnPrimaryKey,
        }
    }

    fn how_delete_joins(&self) -> JoinRewriteStrategy {
        self.how_update_joins()
    }

    // ---- SELECT pipeline -------------------------------------------------

    fn compile_select(&self, state: &QueryState) -> OrmResult<Compiled> {
        let mut parts = Vec::new();
        parts.push(self.compile_columns(state)?);
        parts.push(self.compile_from(state)?);
        if let Some(j) = self.compile_joins(state)? {
            parts.push(j);
        }
        if let Some(w) = self.compile_wheres(&state.wheres)? {
            parts.push(format!("where {w}"));
        }
        if let Some(g) = self.compile_groups(state) {
            parts.push(g);
        }
        if let Some(h) = self.compile_havings(state)? {
            parts.push(h);
        }
        if let Some(o) = self.compile_orders(state)? {
            parts.push(o);
        }
        if let Some(l) = state.limit {
            parts.push(format!("limit {l}"));
        }
        if let Some(o) = state.offset {
            parts.push(format!("offset {o}"));
        }
        if let Some(u) = self.compile_unions(state)? {
            parts.push(u);
        }
        let lock = self.compile_lock(&state.lock);
        if !lock.is_empty() {
            parts.push(lock);
        }
        Ok(Compiled::new(parts.join(" "), state.all_bindings()))
    }

    /// `count|min|max|sum|avg` terminal ops: replaces the column list,
    /// drops order/limit/offset, and — if the query groups or has havings
    /// — wraps the inner select in a subquery the same way a plain count
    /// over a grouped query must.
    fn compile_aggregate(&self, state: &QueryState, func: &str, column: &str) -> OrmResult<Compiled> {
        let needs_wrap = !state.groups.is_empty() || !state.havings.is_empty();
        if !needs_wrap {
            let mut inner = state.clone();
            inner.columns = vec![Column::Raw {
                sql: format!("{func}({column}) as aggregate"),
                bindings: vec![],
            }];
            inner.orders.clear();
            inner.limit = None;
            inner.offset = None;
            return self.compile_select(&inner);
        }
        let mut inner = state.clone();
        inner.orders.clear();
        inner.limit = None;
        inner.offset = None;
        let subquery = self.compile_select(&inner)?;
        Ok(Compiled::new(
            format!("select {func}({column}) as aggregate from ({}) as t", subquery.sql),
            subquery.bindings,
        ))
    }

    fn compile_columns(&self, state: &QueryState) -> OrmResult<String> {
        let d = self.dialect();
        let distinct = match &state.distinct {
            Distinct::No => "",
            Distinct::Yes => "distinct ",
            Distinct::On(cols) => {
                if d != Dialect::Pgsql {
                    return Err(OrmError::validation(
                        "distinct on (cols) is only supported on PostgreSQL",
                    ));
                }
                return Ok(format!(
                    "select distinct on ({}) {}",
                    columnize(&cols.iter().map(|c| c.wrap(d)).collect::<Vec<_>>()),
                    self.columnize_columns(state)?
                ));
            }
        };
        Ok(format!("select {distinct}{}", self.columnize_columns(state)?))
    }

    fn columnize_columns(&self, state: &QueryState) -> OrmResult<String> {
        if state.columns.is_empty() {
            return Ok("*".to_string());
        }
        let d = self.dialect();
        let mut rendered = Vec::with_capacity(state.columns.len());
        for c in &state.columns {
            rendered.push(match c {
                Column::Ident(i) => i.wrap(d),
                Column::Raw { sql, .. } => sql.clone(),
                Column::Subquery { state, alias } => {
                    let compiled = self.compile_select(state)?;
                    format!("({}) as {}", compiled.sql, Identifier::quoted(alias)?.wrap(d))
                }
            });
        }
        Ok(columnize(&rendered))
    }

    fn compile_from(&self, state: &QueryState) -> OrmResult<String> {
        let d = self.dialect();
        match &state.from {
            FromClause::None => Err(OrmError::validation("query has no from clause")),
            FromClause::Name(ident) => Ok(format!("from {}", ident.wrap_table(d, &state.table_prefix))),
            FromClause::Raw { sql, .. } => Ok(format!("from {sql}")),
            FromClause::Subquery { state: inner, alias } => {
                let compiled = self.compile_select(inner)?;
                Ok(format!(
                    "from ({}) as {}",
                    compiled.sql,
                    Identifier::quoted(alias)?.wrap(d)
                ))
            }
        }
    }

    fn compile_joins(&self, state: &QueryState) -> OrmResult<Option<String>> {
        if state.joins.is_empty() {
            return Ok(None);
        }
        let d = self.dialect();
        let mut out = Vec::new();
        for join in &state.joins {
            let kind = match join.kind {
                JoinKind::Inner => "inner join",
                JoinKind::Left => "left join",
                JoinKind::Right => "right join",
                JoinKind::Cross => "cross join",
            };
            let target = match &join.target {
                JoinTarget::Table(ident) => ident.wrap_table(d, &state.table_prefix),
                JoinTarget::Subquery { state: inner, alias } => {
                    let compiled = self.compile_select(inner)?;
                    format!("({}) as {}", compiled.sql, Identifier::quoted(alias)?.wrap(d))
                }
            };
            if join.wheres.is_empty() {
                out.push(format!("{kind} {target}"));
            } else {
                let on = self
                    .compile_wheres(&join.wheres)?
                    .unwrap_or_default();
                out.push(format!("{kind} {target} on {on}"));
            }
        }
        Ok(Some(out.join(" ")))
    }

    fn compile_wheres(&self, nodes: &[WhereNode]) -> OrmResult<Option<String>> {
        if nodes.is_empty() {
            return Ok(None);
        }
        let d = self.dialect();
        let mut out = String::new();
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                out.push_str(match node.conn() {
                    BoolConn::And => " and ",
                    BoolConn::Or => " or ",
                });
            }
            out.push_str(&self.render_where_node(node, d)?);
        }
        Ok(Some(out))
    }

    fn render_where_node(&self, node: &WhereNode, d: Dialect) -> OrmResult<String> {
        Ok(match node {
            WhereNode::Basic { column, op, value, .. } => {
                format!("{} {} {}", column.wrap(d), op, render_value(value))
            }
            WhereNode::ColumnCompare { left, op, right, .. } => {
                format!("{} {} {}", left.wrap(d), op, right.wrap(d))
            }
            WhereNode::In { column, values, negated, .. } => {
                if values.is_empty() {
                    return Ok(if *negated { "1 = 1".into() } else { "0 = 1".into() });
                }
                let placeholders = values.iter().map(render_value).collect::<Vec<_>>().join(", ");
                let kw = if *negated { "not in" } else { "in" };
                format!("{} {kw} ({placeholders})", column.wrap(d))
            }
            WhereNode::InSub { column, state, negated, .. } => {
                let compiled = self.compile_select(state)?;
                let kw = if *negated { "not in" } else { "in" };
                format!("{} {kw} ({})", column.wrap(d), compiled.sql)
            }
            WhereNode::Null { column, negated, .. } => {
                format!("{} is {}null", column.wrap(d), if *negated { "not " } else { "" })
            }
            WhereNode::Between { column, negated, .. } => {
                let kw = if *negated { "not between" } else { "between" };
                format!("{} {kw} ? and ?", column.wrap(d))
            }
            WhereNode::Nested { state, .. } => {
                let inner = self.compile_wheres(&state.wheres)?.unwrap_or_default();
                format!("({inner})")
            }
            WhereNode::Exists { state, negated, .. } => {
                let compiled = self.compile_select(state)?;
                format!("{}exists ({})", if *negated { "not " } else { "" }, compiled.sql)
            }
            WhereNode::Raw { sql, .. } => sql.clone(),
            WhereNode::RowValues { columns, op, values, .. } => {
                let cols = columns.iter().map(|c| c.wrap(d)).collect::<Vec<_>>().join(", ");
                let vals = values.iter().map(render_value).collect::<Vec<_>>().join(", ");
                format!("({cols}) {op} ({vals})")
            }
        })
    }

    fn compile_groups(&self, state: &QueryState) -> Option<String> {
        if state.groups.is_empty() {
            return None;
        }
        let d = self.dialect();
        let rendered: Vec<String> = state
            .groups
            .iter()
            .map(|g| match g {
                GroupNode::Column(ident) => ident.wrap(d),
                GroupNode::Raw(sql) => sql.clone(),
            })
            .collect();
        Some(format!("group by {}", columnize(&rendered)))
    }

    fn compile_havings(&self, state: &QueryState) -> OrmResult<Option<String>> {
        if state.havings.is_empty() {
            return Ok(None);
        }
        let d = self.dialect();
        let mut out = String::new();
        for (i, h) in state.havings.iter().enumerate() {
            let (conn, rendered) = match h {
                HavingNode::Basic { column, op, value, conn } => {
                    (*conn, format!("{} {} {}", column.wrap(d), op, render_value(value)))
                }
                HavingNode::Raw { sql, conn, .. } => (*conn, sql.clone()),
            };
            if i > 0 {
                out.push_str(match conn {
                    BoolConn::And => " and ",
                    BoolConn::Or => " or ",
                });
            }
            out.push_str(&rendered);
        }
        Ok(Some(format!("having {out}")))
    }

    fn compile_orders(&self, state: &QueryState) -> OrmResult<Option<String>> {
        if state.orders.is_empty() {
            return Ok(None);
        }
        let d = self.dialect();
        let mut rendered = Vec::new();
        for o in &state.orders {
            let dir = match o.direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            let target = match &o.target {
                OrderTarget::Column(ident) => ident.wrap(d),
                OrderTarget::Raw(sql) => {
                    rendered.push(sql.clone());
                    continue;
                }
                OrderTarget::Subquery(inner) => {
                    let compiled = self.compile_select(inner)?;
                    format!("({})", compiled.sql)
                }
            };
            rendered.push(format!("{target} {dir}"));
        }
        Ok(Some(format!("order by {}", rendered.join(", "))))
    }

    fn compile_unions(&self, state: &QueryState) -> OrmResult<Option<String>> {
        if state.unions.is_empty() {
            return Ok(None);
        }
        let mut out = Vec::new();
        for u in &state.unions {
            let compiled = self.compile_select(&u.state)?;
            let kw = if u.all { "union all" } else { "union" };
            out.push(format!("{kw} {}", compiled.sql));
        }
        Ok(Some(out.join(" ")))
    }

    fn compile_lock(&self, lock: &Lock) -> String {
        match (self.dialect(), lock) {
            (_, Lock::None) => String::new(),
            (_, Lock::Raw(s)) => s.clone(),
            (Dialect::Sqlite, _) => String::new(),
            (Dialect::MySql, Lock::ForUpdate) => "for update".to_string(),
            (Dialect::MySql, Lock::Shared) => "lock in share mode".to_string(),
            (Dialect::Pgsql, Lock::ForUpdate) => "for update".to_string(),
            (Dialect::Pgsql, Lock::Shared) => "for share".to_string(),
        }
    }

    // ---- INSERT / UPDATE / DELETE / TRUNCATE -----------------------------

    fn compile_insert(
        &self,
        table: &Identifier,
        columns: &[String],
        rows: &[Vec<Value>],
        prefix: &str,
    ) -> OrmResult<Compiled> {
        let d = self.dialect();
        if columns.is_empty() || rows.is_empty() {
            return Ok(Compiled::new(
                format!("insert into {} default values", table.wrap_table(d, prefix)),
                vec![],
            ));
        }
        for row in rows {
            if row.len() != columns.len() {
                return Err(OrmError::validation("all insert rows must share the same columns"));
            }
        }
        let cols = columnize(
            &columns
                .iter()
                .map(|c| Identifier::parse(c).map(|i| i.wrap(d)))
                .collect::<OrmResult<Vec<_>>>()?,
        );
        let row_sql: Vec<String> = rows
            .iter()
            .map(|row| format!("({})", row.iter().map(render_value).collect::<Vec<_>>().join(", ")))
            .collect();
        let bindings = rows
            .iter()
            .flat_map(|r| r.iter().filter(|v| !v.is_raw()).cloned())
            .collect();
        Ok(Compiled::new(
            format!(
                "insert into {} ({cols}) values {}",
                table.wrap_table(d, prefix),
                row_sql.join(", ")
            ),
            bindings,
        ))
    }

    fn compile_insert_or_ignore(
        &self,
        table: &Identifier,
        columns: &[String],
        rows: &[Vec<Value>],
        prefix: &str,
        conflict_columns: &[String],
    ) -> OrmResult<Compiled> {
        let d = self.dialect();
        let base = self.compile_insert(table, columns, rows, prefix)?;
        match d {
            Dialect::MySql => Ok(Compiled::new(
                base.sql.replacen("insert into", "insert ignore into", 1),
                base.bindings,
            )),
            Dialect::Sqlite => Ok(Compiled::new(
                base.sql.replacen("insert into", "insert or ignore into", 1),
                base.bindings,
            )),
            Dialect::Pgsql => {
                if conflict_columns.is_empty() {
                    return Err(OrmError::validation(
                        "insert_or_ignore on PostgreSQL requires explicit conflict target columns",
                    ));
                }
                let target = columnize(
                    &conflict_columns
                        .iter()
                        .map(|c| Identifier::parse(c).map(|i| i.wrap(d)))
                        .collect::<OrmResult<Vec<_>>>()?,
                );
                Ok(Compiled::new(
                    format!("{} on conflict ({target}) do nothing", base.sql),
                    base.bindings,
                ))
            }
        }
    }

    fn compile_insert_get_id(
        &self,
        table: &Identifier,
        columns: &[String],
        row: &[Value],
        prefix: &str,
        primary_key: &str,
    ) -> OrmResult<Compiled> {
        let row_vec = vec![row.to_vec()];
        let base = self.compile_insert(table, columns, &row_vec, prefix)?;
        match self.dialect() {
            Dialect::Pgsql => {
                let pk = Identifier::parse(primary_key)?.wrap(self.dialect());
                Ok(Compiled::new(format!("{} returning {pk}", base.sql), base.bindings))
            }
            _ => Ok(base),
        }
    }

    fn compile_update(
        &self,
        table: &Identifier,
        assignments: &[(String, Value)],
        state: &QueryState,
        primary_key: Option<&str>,
    ) -> OrmResult<Compiled> {
        if assignments.is_empty() {
            return Err(OrmError::validation("update requires at least one assignment"));
        }
        let d = self.dialect();
        let prefix = &state.table_prefix;
        let set_sql: Vec<String> = assignments
            .iter()
            .map(|(c, v)| Ok::<_, OrmError>(format!("{} = {}", Identifier::parse(c)?.wrap(d), render_value(v))))
            .collect::<OrmResult<Vec<_>>>()?;
        let mut bindings: Vec<Value> = assignments
            .iter()
            .filter(|(_, v)| !v.is_raw())
            .map(|(_, v)| v.clone())
            .collect();

        let has_joins = !state.joins.is_empty();
        if !has_joins {
            let where_sql = self.compile_wheres(&state.wheres)?;
            bindings.extend(state.bindings_for(BindingKind::Where));
            let mut sql = format!("update {} set {}", table.wrap_table(d, prefix), set_sql.join(", "));
            if let Some(w) = where_sql {
                sql.push_str(" where ");
                sql.push_str(&w);
            }
            return Ok(Compiled::new(sql, bindings));
        }

        match self.how_update_joins() {
            JoinRewriteStrategy::Inline => {
                let joins = self.compile_joins(state)?.unwrap_or_default();
                let where_sql = self.compile_wheres(&state.wheres)?;
                bindings.extend(state.bindings_for(BindingKind::Join));
                bindings.extend(state.bindings_for(BindingKind::Where));
                let mut sql = format!(
                    "update {} {joins} set {}",
                    table.wrap_table(d, prefix),
                    set_sql.join(", ")
                );
                if let Some(w) = where_sql {
                    sql.push_str(" where ");
                    sql.push_str(&w);
                }
                Ok(Compiled::new(sql, bindings))
            }
            JoinRewriteStrategy::SubselectOnPrimaryKey => {
                let Some(pk) = primary_key else {
                    return Err(OrmError::validation(
                        "update with joins requires a primary key column",
                    ));
                };
                let pk_ident = Identifier::parse(pk)?;
                let mut inner = state.clone();
                inner.columns = vec![Column::Ident(pk_ident.clone())];
                inner.orders.clear();
                inner.limit = None;
                inner.offset = None;
                let subselect = self.compile_select(&inner)?;
                bindings.extend(subselect.bindings);
                Ok(Compiled::new(
                    format!(
                        "update {} set {} where {} in ({})",
                        table.wrap_table(d, prefix),
                        set_sql.join(", "),
                        pk_ident.wrap(d),
                        subselect.sql
                    ),
                    bindings,
                ))
            }
        }
    }

    fn compile_delete(
        &self,
        table: &Identifier,
        state: &QueryState,
        primary_key: Option<&str>,
    ) -> OrmResult<Compiled> {
        let d = self.dialect();
        let prefix = &state.table_prefix;
        let has_joins = !state.joins.is_empty();
        if !has_joins {
            let where_sql = self.compile_wheres(&state.wheres)?;
            let mut sql = format!("delete from {}", table.wrap_table(d, prefix));
            if let Some(w) = where_sql {
                sql.push_str(" where ");
                sql.push_str(&w);
            }
            return Ok(Compiled::new(sql, state.bindings_for(BindingKind::Where)));
        }

        match self.how_delete_joins() {
            JoinRewriteStrategy::Inline => {
                let alias = match table.wrap_alias(d) {
                    Some(a) => a,
                    None => Identifier::parse(&table.unqualify())?.wrap(d),
                };
                let joins = self.compile_joins(state)?.unwrap_or_default();
                let where_sql = self.compile_wheres(&state.wheres)?;
                let mut bindings = state.bindings_for(BindingKind::Join);
                bindings.extend(state.bindings_for(BindingKind::Where));
                let mut sql = format!(
                    "delete {} from {} {joins}",
                    alias,
                    table.wrap_table(d, prefix)
                );
                if let Some(w) = where_sql {
                    sql.push_str(" where ");
                    sql.push_str(&w);
                }
                Ok(Compiled::new(sql, bindings))
            }
            JoinRewriteStrategy::SubselectOnPrimaryKey => {
                let Some(pk) = primary_key else {
                    return Err(OrmError::validation(
                        "delete with joins requires a primary key column",
                    ));
                };
                let pk_ident = Identifier::parse(pk)?;
                let mut inner = state.clone();
                inner.columns = vec![Column::Ident(pk_ident.clone())];
                inner.orders.clear();
                inner.limit = None;
                inner.offset = None;
                let subselect = self.compile_select(&inner)?;
                Ok(Compiled::new(
                    format!(
                        "delete from {} where {} in ({})",
                        table.wrap_table(d, prefix),
                        pk_ident.wrap(d),
                        subselect.sql
                    ),
                    subselect.bindings,
                ))
            }
        }
    }

    /// `insert ... on conflict/duplicate update`. `unique_by` names the
    /// conflict target (ignored by MySQL, which infers it from the table's
    /// own unique indexes); `update_columns` is the set re-written on
    /// conflict — the rest of the row is left untouched.
    fn compile_upsert(
        &self,
        table: &Identifier,
        columns: &[String],
        rows: &[Vec<Value>],
        prefix: &str,
        unique_by: &[String],
        update_columns: &[String],
    ) -> OrmResult<Compiled> {
        if update_columns.is_empty() {
            return Err(OrmError::validation("upsert requires at least one update column"));
        }
        let d = self.dialect();
        let base = self.compile_insert(table, columns, rows, prefix)?;
        match d {
            Dialect::MySql => {
                let assignments = update_columns
                    .iter()
                    .map(|c| Identifier::parse(c).map(|i| format!("{0} = values({0})", i.wrap(d))))
                    .collect::<OrmResult<Vec<_>>>()?
                    .join(", ");
                Ok(Compiled::new(
                    format!("{} on duplicate key update {assignments}", base.sql),
                    base.bindings,
                ))
            }
            Dialect::Pgsql | Dialect::Sqlite => {
                if unique_by.is_empty() {
                    return Err(OrmError::validation("upsert requires explicit conflict target columns"));
                }
                let target = columnize(
                    &unique_by
                        .iter()
                        .map(|c| Identifier::parse(c).map(|i| i.wrap(d)))
                        .collect::<OrmResult<Vec<_>>>()?,
                );
                let assignments = update_columns
                    .iter()
                    .map(|c| Identifier::parse(c).map(|i| format!("{0} = excluded.{0}", i.wrap(d))))
                    .collect::<OrmResult<Vec<_>>>()?
                    .join(", ");
                Ok(Compiled::new(
                    format!("{} on conflict ({target}) do update set {assignments}", base.sql),
                    base.bindings,
                ))
            }
        }
    }

    /// Returns one statement per entry; SQLite needs three: clear the
    /// autoincrement sequence, delete the rows, then vacuum.
    fn compile_truncate(&self, table: &Identifier, prefix: &str) -> Vec<Compiled> {
        let d = self.dialect();
        let wrapped = table.wrap_table(d, prefix);
        match d {
            Dialect::MySql => vec![Compiled::new(format!("truncate table {wrapped}"), vec![])],
            Dialect::Pgsql => vec![Compiled::new(
                format!("truncate {wrapped} restart identity cascade"),
                vec![],
            )],
            Dialect::Sqlite => {
                let name = table.unqualify();
                vec![
                    Compiled::new(
                        "delete from sqlite_sequence where name = ?".to_string(),
                        vec![Value::bound(name)],
                    ),
                    Compiled::new(format!("delete from {wrapped}"), vec![]),
                    Compiled::new("vacuum".to_string(), vec![]),
                ]
            }
        }
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::Bound(_) => "?".to_string(),
        Value::Raw(sql) => sql.clone(),
    }
}

/// Build a `Grammar` for the given dialect.
pub fn for_dialect(dialect: Dialect) -> Box<dyn Grammar> {
    match dialect {
        Dialect::MySql => Box::new(MySqlGrammar),
        Dialect::Pgsql => Box::new(PostgresGrammar),
        Dialect::Sqlite => Box::new(SqliteGrammar),
    }
}

pub(crate) fn quote_string_literal(s: &str) -> String {
    quote_string(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_for(table: &str) -> QueryState {
        let mut s = QueryState::new();
        s.from = FromClause::Name(Identifier::parse(table).unwrap());
        s
    }

    #[test]
    fn scenario_minimal_select_with_binding_postgres() {
        let g = PostgresGrammar;
        let mut s = state_for("torrents");
        s.columns = vec![
            Column::Ident(Identifier::parse("id").unwrap()),
            Column::Ident(Identifier::parse("name").unwrap()),
        ];
        s.wheres.push(WhereNode::Basic {
            column: Identifier::parse("id").unwrap(),
            op: "=".into(),
            value: Value::bound(3_i64),
            conn: BoolConn::And,
        });
        let compiled = g.compile_select(&s).unwrap();
        assert_eq!(
            compiled.sql,
            r#"select "id", "name" from "torrents" where "id" = ?"#
        );
        assert_eq!(compiled.bindings.len(), 1);
    }

    #[test]
    fn scenario_insert_with_raw_expression_postgres() {
        let g = PostgresGrammar;
        let table = Identifier::parse("torrents").unwrap();
        let compiled = g
            .compile_insert(
                &table,
                &["name".into(), "progress".into(), "size".into()],
                &[vec![Value::raw("'xyz'"), Value::raw("2"), Value::bound(6_i64)]],
                "",
            )
            .unwrap();
        assert_eq!(
            compiled.sql,
            r#"insert into "torrents" ("name", "progress", "size") values ('xyz', 2, ?)"#
        );
        assert_eq!(compiled.bindings.len(), 1);
    }

    #[test]
    fn scenario_where_in_empty_set() {
        let g = PostgresGrammar;
        let mut s = state_for("t");
        s.wheres.push(WhereNode::In {
            column: Identifier::parse("id").unwrap(),
            values: vec![],
            negated: false,
            conn: BoolConn::And,
        });
        let compiled = g.compile_select(&s).unwrap();
        assert_eq!(compiled.sql, r#"select * from "t" where 0 = 1"#);

        let mut s2 = state_for("t");
        s2.wheres.push(WhereNode::In {
            column: Identifier::parse("id").unwrap(),
            values: vec![],
            negated: true,
            conn: BoolConn::And,
        });
        let compiled2 = g.compile_select(&s2).unwrap();
        assert_eq!(compiled2.sql, r#"select * from "t" where 1 = 1"#);
    }

    #[test]
    fn scenario_nested_group_or_where() {
        let g = PostgresGrammar;
        let mut s = state_for("t");
        s.wheres.push(WhereNode::Basic {
            column: Identifier::parse("a").unwrap(),
            op: ">".into(),
            value: Value::bound(1_i64),
            conn: BoolConn::And,
        });
        let mut nested = QueryState::new();
        nested.wheres.push(WhereNode::Basic {
            column: Identifier::parse("b").unwrap(),
            op: "=".into(),
            value: Value::bound(2_i64),
            conn: BoolConn::And,
        });
        nested.wheres.push(WhereNode::Basic {
            column: Identifier::parse("c").unwrap(),
            op: "=".into(),
            value: Value::bound(3_i64),
            conn: BoolConn::And,
        });
        s.wheres.push(WhereNode::Nested {
            state: Box::new(nested),
            conn: BoolConn::Or,
        });
        let compiled = g.compile_select(&s).unwrap();
        assert_eq!(
            compiled.sql,
            r#"select * from "t" where "a" > ? or ("b" = ? and "c" = ?)"#
        );
        assert_eq!(compiled.bindings.len(), 3);
    }

    #[test]
    fn mysql_emits_backtick_quoting() {
        let g = MySqlGrammar;
        let mut s = state_for("torrents");
        s.columns = vec![
            Column::Ident(Identifier::parse("id").unwrap()),
            Column::Ident(Identifier::parse("name").unwrap()),
        ];
        s.wheres.push(WhereNode::Basic {
            column: Identifier::parse("id").unwrap(),
            op: "=".into(),
            value: Value::bound(3_i64),
            conn: BoolConn::And,
        });
        let compiled = g.compile_select(&s).unwrap();
        assert_eq!(compiled.sql, "select `id`, `name` from `torrents` where `id` = ?");
    }

    #[test]
    fn insert_or_ignore_pgsql_requires_conflict_columns() {
        let g = PostgresGrammar;
        let table = Identifier::parse("t").unwrap();
        let err = g
            .compile_insert_or_ignore(&table, &["a".into()], &[vec![Value::bound(1_i64)]], "", &[])
            .unwrap_err();
        assert!(matches!(err, OrmError::Validation(_)));
    }

    #[test]
    fn update_with_joins_no_pk_is_rejected_on_postgres() {
        let g = PostgresGrammar;
        let table = Identifier::parse("t").unwrap();
        let mut s = state_for("t");
        s.joins.push(Join {
            kind: JoinKind::Inner,
            target: JoinTarget::Table(Identifier::parse("u").unwrap()),
            wheres: vec![],
        });
        let err = g
            .compile_update(&table, &[("x".into(), Value::bound(1_i64))], &s, None)
            .unwrap_err();
        assert!(matches!(err, OrmError::Validation(_)));
    }

    #[test]
    fn sqlite_lock_is_noop() {
        let g = SqliteGrammar;
        assert_eq!(g.compile_lock(&Lock::ForUpdate), "");
    }

    #[test]
    fn mysql_shared_lock_uses_historical_syntax() {
        let g = MySqlGrammar;
        assert_eq!(g.compile_lock(&Lock::Shared), "lock in share mode");
    }

    #[test]
    fn upsert_pgsql_uses_on_conflict_do_update() {
        let g = PostgresGrammar;
        let table = Identifier::parse("t").unwrap();
        let compiled = g
            .compile_upsert(
                &table,
                &["id".into(), "name".into()],
                &[vec![Value::bound(1_i64), Value::bound("a")]],
                "",
                &["id".into()],
                &["name".into()],
            )
            .unwrap();
        assert_eq!(
            compiled.sql,
            r#"insert into "t" ("id", "name") values (?, ?) on conflict ("id") do update set "name" = excluded."name""#
        );
    }

    #[test]
    fn upsert_mysql_uses_on_duplicate_key_update() {
        let g = MySqlGrammar;
        let table = Identifier::parse("t").unwrap();
        let compiled = g
            .compile_upsert(
                &table,
                &["id".into(), "name".into()],
                &[vec![Value::bound(1_i64), Value::bound("a")]],
                "",
                &[],
                &["name".into()],
            )
            .unwrap();
        assert_eq!(
            compiled.sql,
            "insert into `t` (`id`, `name`) values (?, ?) on duplicate key update `name` = values(`name`)"
        );
    }

    #[test]
    fn upsert_pgsql_requires_conflict_target() {
        let g = PostgresGrammar;
        let table = Identifier::parse("t").unwrap();
        let err = g
            .compile_upsert(
                &table,
                &["id".into()],
                &[vec![Value::bound(1_i64)]],
                "",
                &[],
                &["id".into()],
            )
            .unwrap_err();
        assert!(matches!(err, OrmError::Validation(_)));
    }
}

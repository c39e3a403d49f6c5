//! Fluent query builder (component E): the public surface applications
//! call. Every method mutates [`QueryState`]; `to_sql`/`get_bindings` and
//! the terminal `get`/`first`/.../`insert`/`update`/`remove` ask the
//! dialect's [`Grammar`] to compile it and, when a [`Connection`] is
//! attached, run it.

use std::sync::Arc;

use crate::builder::state::*;
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::grammar::{self, Compiled, Grammar};
use crate::ident::{Dialect, Identifier, IntoIdentifier};
use crate::row::FromRow;
use crate::value::Value;

/// The fluent query builder. Cheap to clone: `state` is plain data and
/// `grammar`/`connection` are reference-counted.
#[derive(Clone)]
pub struct QueryBuilder {
    pub(crate) state: QueryState,
    grammar: Arc<dyn Grammar>,
    connection: Option<Arc<Connection>>,
}

/// A join under construction via the callback form
/// (`join_sub`/advanced `join` with a closure).
pub struct JoinClause {
    kind: JoinKind,
    target: JoinTarget,
    wheres: Vec<WhereNode>,
    dialect: Dialect,
}

impl JoinClause {
    fn new(dialect: Dialect, kind: JoinKind, target: JoinTarget) -> Self {
        Self { kind, target, wheres: Vec::new(), dialect }
    }

    pub fn on(mut self, left: &str, op: &str, right: &str) -> OrmResult<Self> {
        self.wheres.push(WhereNode::ColumnCompare {
            left: Identifier::parse(left)?,
            op: op.to_string(),
            right: Identifier::parse(right)?,
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn or_on(mut self, left: &str, op: &str, right: &str) -> OrmResult<Self> {
        self.wheres.push(WhereNode::ColumnCompare {
            left: Identifier::parse(left)?,
            op: op.to_string(),
            right: Identifier::parse(right)?,
            conn: BoolConn::Or,
        });
        Ok(self)
    }

    fn into_join(self) -> Join {
        let _ = self.dialect;
        Join { kind: self.kind, target: self.target, wheres: self.wheres }
    }
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            state: QueryState::new(),
            grammar: grammar::for_dialect(dialect),
            connection: None,
        }
    }

    /// Builds a `QueryBuilder` bound to a live connection; terminal methods
    /// (`get`, `insert`, ...) run against it.
    pub fn for_connection(connection: Arc<Connection>) -> Self {
        let dialect = connection.dialect();
        Self {
            state: QueryState::new().with_prefix(connection.prefix()),
            grammar: grammar::for_dialect(dialect),
            connection: Some(connection),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.grammar.dialect()
    }

    fn clone_empty(&self) -> Self {
        Self {
            state: QueryState::new().with_prefix(&self.state.table_prefix),
            grammar: self.grammar.clone(),
            connection: self.connection.clone(),
        }
    }

    // ---- source -----------------------------------------------------------

    pub fn from(mut self, table: impl IntoIdentifier) -> OrmResult<Self> {
        self.state.from = FromClause::Name(table.into_identifier()?);
        Ok(self)
    }

    pub fn table(self, table: impl IntoIdentifier) -> OrmResult<Self> {
        self.from(table)
    }

    pub fn from_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.state.from = FromClause::Raw { sql: sql.into(), bindings };
        self
    }

    pub fn from_sub(mut self, sub: QueryBuilder, alias: impl Into<String>) -> Self {
        self.state.from = FromClause::Subquery {
            state: Box::new(sub.state),
            alias: alias.into(),
        };
        self
    }

    // ---- projection ---------------------------------------------------------

    pub fn select(mut self, columns: &[&str]) -> OrmResult<Self> {
        self.state.columns = columns
            .iter()
            .map(|c| Identifier::parse(c).map(Column::Ident))
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(self)
    }

    pub fn add_select(mut self, column: &str) -> OrmResult<Self> {
        self.state.columns.push(Column::Ident(Identifier::parse(column)?));
        Ok(self)
    }

    pub fn select_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.state.columns.push(Column::Raw { sql: sql.into(), bindings });
        self
    }

    pub fn select_sub(mut self, sub: QueryBuilder, alias: impl Into<String>) -> Self {
        self.state.columns.push(Column::Subquery {
            state: Box::new(sub.state),
            alias: alias.into(),
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.state.distinct = Distinct::Yes;
        self
    }

    pub fn distinct_on(mut self, columns: &[&str]) -> OrmResult<Self> {
        self.state.distinct = Distinct::On(
            columns.iter().map(|c| Identifier::parse(c)).collect::<OrmResult<Vec<_>>>()?,
        );
        Ok(self)
    }

    // ---- joins --------------------------------------------------------------

    fn push_join(&mut self, kind: JoinKind, table: &str, left: &str, op: &str, right: &str) -> OrmResult<()> {
        self.grammar.validate_operator(op)?;
        self.state.joins.push(Join {
            kind,
            target: JoinTarget::Table(Identifier::parse(table)?),
            wheres: vec![WhereNode::ColumnCompare {
                left: Identifier::parse(left)?,
                op: op.to_string(),
                right: Identifier::parse(right)?,
                conn: BoolConn::And,
            }],
        });
        Ok(())
    }

    pub fn join(mut self, table: &str, left: &str, op: &str, right: &str) -> OrmResult<Self> {
        self.push_join(JoinKind::Inner, table, left, op, right)?;
        Ok(self)
    }

    pub fn left_join(mut self, table: &str, left: &str, op: &str, right: &str) -> OrmResult<Self> {
        self.push_join(JoinKind::Left, table, left, op, right)?;
        Ok(self)
    }

    pub fn right_join(mut self, table: &str, left: &str, op: &str, right: &str) -> OrmResult<Self> {
        self.push_join(JoinKind::Right, table, left, op, right)?;
        Ok(self)
    }

    pub fn cross_join(mut self, table: &str) -> OrmResult<Self> {
        self.state.joins.push(Join {
            kind: JoinKind::Cross,
            target: JoinTarget::Table(Identifier::parse(table)?),
            wheres: vec![],
        });
        Ok(self)
    }

    /// Advanced join form: build the `on` clauses with a callback that gets
    /// its own [`JoinClause`].
    pub fn join_advanced(
        mut self,
        kind: JoinKind,
        table: &str,
        build: impl FnOnce(JoinClause) -> OrmResult<JoinClause>,
    ) -> OrmResult<Self> {
        let clause = JoinClause::new(
            self.grammar.dialect(),
            kind,
            JoinTarget::Table(Identifier::parse(table)?),
        );
        self.state.joins.push(build(clause)?.into_join());
        Ok(self)
    }

    pub fn join_sub(
        mut self,
        sub: QueryBuilder,
        alias: impl Into<String>,
        kind: JoinKind,
        build: impl FnOnce(JoinClause) -> OrmResult<JoinClause>,
    ) -> OrmResult<Self> {
        let target = JoinTarget::Subquery { state: Box::new(sub.state), alias: alias.into() };
        let clause = JoinClause::new(self.grammar.dialect(), kind, target);
        self.state.joins.push(build(clause)?.into_join());
        Ok(self)
    }

    // ---- where --------------------------------------------------------------

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> OrmResult<Self> {
        self.where_op(column, "=", value)
    }

    pub fn or_where_eq(self, column: &str, value: impl Into<Value>) -> OrmResult<Self> {
        self.or_where_op(column, "=", value)
    }

    pub fn where_op(mut self, column: &str, op: &str, value: impl Into<Value>) -> OrmResult<Self> {
        self.grammar.validate_operator(op)?;
        self.state.wheres.push(WhereNode::Basic {
            column: Identifier::parse(column)?,
            op: op.to_string(),
            value: value.into(),
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn or_where_op(mut self, column: &str, op: &str, value: impl Into<Value>) -> OrmResult<Self> {
        self.grammar.validate_operator(op)?;
        self.state.wheres.push(WhereNode::Basic {
            column: Identifier::parse(column)?,
            op: op.to_string(),
            value: value.into(),
            conn: BoolConn::Or,
        });
        Ok(self)
    }

    pub fn where_column(mut self, left: &str, op: &str, right: &str) -> OrmResult<Self> {
        self.grammar.validate_operator(op)?;
        self.state.wheres.push(WhereNode::ColumnCompare {
            left: Identifier::parse(left)?,
            op: op.to_string(),
            right: Identifier::parse(right)?,
            conn: BoolConn::And,
        });
        Ok(self)
    }

    fn push_in(&mut self, column: &str, values: Vec<Value>, negated: bool, conn: BoolConn) -> OrmResult<()> {
        self.state.wheres.push(WhereNode::In {
            column: Identifier::parse(column)?,
            values,
            negated,
            conn,
        });
        Ok(())
    }

    pub fn where_in(mut self, column: &str, values: Vec<Value>) -> OrmResult<Self> {
        self.push_in(column, values, false, BoolConn::And)?;
        Ok(self)
    }

    pub fn where_not_in(mut self, column: &str, values: Vec<Value>) -> OrmResult<Self> {
        self.push_in(column, values, true, BoolConn::And)?;
        Ok(self)
    }

    pub fn or_where_in(mut self, column: &str, values: Vec<Value>) -> OrmResult<Self> {
        self.push_in(column, values, false, BoolConn::Or)?;
        Ok(self)
    }

    pub fn where_in_sub(mut self, column: &str, sub: QueryBuilder, negated: bool) -> OrmResult<Self> {
        self.state.wheres.push(WhereNode::InSub {
            column: Identifier::parse(column)?,
            state: Box::new(sub.state),
            negated,
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn where_null(mut self, column: &str) -> OrmResult<Self> {
        self.state.wheres.push(WhereNode::Null {
            column: Identifier::parse(column)?,
            negated: false,
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn where_not_null(mut self, column: &str) -> OrmResult<Self> {
        self.state.wheres.push(WhereNode::Null {
            column: Identifier::parse(column)?,
            negated: true,
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn where_between(mut self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> OrmResult<Self> {
        self.state.wheres.push(WhereNode::Between {
            column: Identifier::parse(column)?,
            low: low.into(),
            high: high.into(),
            negated: false,
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn where_not_between(mut self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> OrmResult<Self> {
        self.state.wheres.push(WhereNode::Between {
            column: Identifier::parse(column)?,
            low: low.into(),
            high: high.into(),
            negated: true,
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.state.wheres.push(WhereNode::Raw { sql: sql.into(), bindings, conn: BoolConn::And });
        self
    }

    pub fn or_where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.state.wheres.push(WhereNode::Raw { sql: sql.into(), bindings, conn: BoolConn::Or });
        self
    }

    pub fn where_row_values(mut self, columns: &[&str], op: &str, values: Vec<Value>) -> OrmResult<Self> {
        if columns.len() != values.len() {
            return Err(OrmError::validation("whereRowValues requires matching column/value counts"));
        }
        self.grammar.validate_operator(op)?;
        self.state.wheres.push(WhereNode::RowValues {
            columns: columns.iter().map(|c| Identifier::parse(c)).collect::<OrmResult<Vec<_>>>()?,
            op: op.to_string(),
            values,
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn where_exists(mut self, sub: QueryBuilder) -> Self {
        self.state.wheres.push(WhereNode::Exists {
            state: Box::new(sub.state),
            negated: false,
            conn: BoolConn::And,
        });
        self
    }

    pub fn where_not_exists(mut self, sub: QueryBuilder) -> Self {
        self.state.wheres.push(WhereNode::Exists {
            state: Box::new(sub.state),
            negated: true,
            conn: BoolConn::And,
        });
        self
    }

    /// Nested `where` group: the callback builds against a fresh builder
    /// sharing this one's dialect/prefix, and the resulting wheres are
    /// wrapped in parentheses as one node.
    pub fn where_group(mut self, conn: BoolConn, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        let inner = build(self.clone_empty());
        self.state.wheres.push(WhereNode::Nested { state: Box::new(inner.state), conn });
        self
    }

    pub fn or_where_group(self, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.where_group(BoolConn::Or, build)
    }

    // ---- group / having -------------------------------------------------------

    pub fn group_by(mut self, columns: &[&str]) -> OrmResult<Self> {
        for c in columns {
            self.state.groups.push(GroupNode::Column(Identifier::parse(c)?));
        }
        Ok(self)
    }

    pub fn group_by_raw(mut self, sql: impl Into<String>) -> Self {
        self.state.groups.push(GroupNode::Raw(sql.into()));
        self
    }

    pub fn having(mut self, column: &str, op: &str, value: impl Into<Value>) -> OrmResult<Self> {
        self.grammar.validate_operator(op)?;
        self.state.havings.push(HavingNode::Basic {
            column: Identifier::parse(column)?,
            op: op.to_string(),
            value: value.into(),
            conn: BoolConn::And,
        });
        Ok(self)
    }

    pub fn or_having(mut self, column: &str, op: &str, value: impl Into<Value>) -> OrmResult<Self> {
        self.grammar.validate_operator(op)?;
        self.state.havings.push(HavingNode::Basic {
            column: Identifier::parse(column)?,
            op: op.to_string(),
            value: value.into(),
            conn: BoolConn::Or,
        });
        Ok(self)
    }

    pub fn having_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.state.havings.push(HavingNode::Raw { sql: sql.into(), bindings, conn: BoolConn::And });
        self
    }

    // ---- order / paging ---------------------------------------------------------

    pub fn order_by(mut self, column: &str, direction: Direction) -> OrmResult<Self> {
        self.state.orders.push(OrderNode {
            target: OrderTarget::Column(Identifier::parse(column)?),
            direction,
        });
        Ok(self)
    }

    pub fn order_by_desc(self, column: &str) -> OrmResult<Self> {
        self.order_by(column, Direction::Desc)
    }

    pub fn latest(self, column: &str) -> OrmResult<Self> {
        self.order_by(column, Direction::Desc)
    }

    pub fn oldest(self, column: &str) -> OrmResult<Self> {
        self.order_by(column, Direction::Asc)
    }

    pub fn order_by_raw(mut self, sql: impl Into<String>) -> Self {
        self.state.orders.push(OrderNode { target: OrderTarget::Raw(sql.into()), direction: Direction::Asc });
        self
    }

    /// Clears all existing orders, optionally replacing them with one.
    pub fn reorder(mut self, column: Option<&str>, direction: Direction) -> OrmResult<Self> {
        self.state.orders.clear();
        if let Some(c) = column {
            self.state.orders.push(OrderNode { target: OrderTarget::Column(Identifier::parse(c)?), direction });
        }
        Ok(self)
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.state.limit = Some(n.max(0));
        self
    }

    pub fn take(self, n: i64) -> Self {
        self.limit(n)
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.state.offset = Some(n.max(0));
        self
    }

    pub fn skip(self, n: i64) -> Self {
        self.offset(n)
    }

    pub fn for_page(self, page: i64, per_page: i64) -> Self {
        let page = page.max(1);
        self.offset((page - 1) * per_page).limit(per_page)
    }

    // ---- union / lock -----------------------------------------------------------

    pub fn union(mut self, other: QueryBuilder, all: bool) -> Self {
        self.state.unions.push(UnionNode { state: Box::new(other.state), all });
        self
    }

    pub fn lock_for_update(mut self) -> Self {
        self.state.lock = Lock::ForUpdate;
        self
    }

    pub fn shared_lock(mut self) -> Self {
        self.state.lock = Lock::Shared;
        self
    }

    pub fn lock_raw(mut self, sql: impl Into<String>) -> Self {
        self.state.lock = Lock::Raw(sql.into());
        self
    }

    // ---- compile ------------------------------------------------------------------

    pub fn to_sql(&self) -> OrmResult<String> {
        Ok(self.grammar.compile_select(&self.state)?.sql)
    }

    pub fn get_bindings(&self) -> Vec<Value> {
        self.state.all_bindings()
    }

    fn compiled(&self) -> OrmResult<Compiled> {
        self.grammar.compile_select(&self.state)
    }

    fn connection(&self) -> OrmResult<&Connection> {
        self.connection
            .as_deref()
            .ok_or_else(|| OrmError::validation("this query builder has no attached connection"))
    }

    // ---- terminal: read -------------------------------------------------------------

    pub async fn get(&self) -> OrmResult<Vec<crate::connection::Row>> {
        let compiled = self.compiled()?;
        self.connection()?.select(&compiled.sql, &compiled.bindings).await
    }

    pub async fn get_as<T: FromRow>(&self) -> OrmResult<Vec<T>> {
        self.get().await?.iter().map(T::from_row).collect()
    }

    pub async fn first(&self) -> OrmResult<Option<crate::connection::Row>> {
        let compiled = self.clone().limit(1).compiled()?;
        self.connection()?.select_one(&compiled.sql, &compiled.bindings).await
    }

    pub async fn first_as<T: FromRow>(&self) -> OrmResult<Option<T>> {
        match self.first().await? {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// `sole()`: exactly one row, else `RecordsNotFound`/`MultipleRecordsFound`.
    pub async fn sole_as<T: FromRow>(&self) -> OrmResult<T> {
        let mut rows = self.clone().limit(2).get_as::<T>().await?;
        match rows.len() {
            0 => Err(OrmError::RecordsNotFound),
            1 => Ok(rows.remove(0)),
            _ => Err(OrmError::MultipleRecordsFound),
        }
    }

    pub async fn exists(&self) -> OrmResult<bool> {
        let mut inner = self.state.clone();
        inner.columns = vec![Column::Raw { sql: "1".into(), bindings: vec![] }];
        inner.limit = Some(1);
        inner.orders.clear();
        let compiled = self.grammar.compile_select(&inner)?;
        let wrapped = format!("select exists ({}) as exists_result", compiled.sql);
        let row = self
            .connection()?
            .select_one(&wrapped, &compiled.bindings)
            .await?
            .ok_or_else(|| OrmError::validation("exists query returned no row"))?;
        row.try_get::<_, bool>("exists_result")
            .map_err(OrmError::from_db_error)
    }

    pub async fn count(&self) -> OrmResult<i64> {
        self.aggregate("count", "*").await
    }

    pub async fn min(&self, column: &str) -> OrmResult<i64> {
        self.aggregate("min", column).await
    }

    pub async fn max(&self, column: &str) -> OrmResult<i64> {
        self.aggregate("max", column).await
    }

    pub async fn sum(&self, column: &str) -> OrmResult<i64> {
        self.aggregate("sum", column).await
    }

    pub async fn avg(&self, column: &str) -> OrmResult<i64> {
        self.aggregate("avg", column).await
    }

    async fn aggregate(&self, func: &str, column: &str) -> OrmResult<i64> {
        let compiled = self.grammar.compile_aggregate(&self.state, func, column)?;
        let row = self
            .connection()?
            .select_one(&compiled.sql, &compiled.bindings)
            .await?
            .ok_or_else(|| OrmError::validation("aggregate query returned no row"))?;
        row.try_get::<_, i64>("aggregate").map_err(OrmError::from_db_error)
    }

    // ---- terminal: write ------------------------------------------------------------

    fn table_identifier(&self) -> OrmResult<Identifier> {
        match &self.state.from {
            FromClause::Name(ident) => Ok(ident.clone()),
            _ => Err(OrmError::validation("insert/update/delete require a plain table name")),
        }
    }

    pub async fn insert(&self, columns: &[&str], rows: Vec<Vec<Value>>) -> OrmResult<u64> {
        let table = self.table_identifier()?;
        let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let compiled = self.grammar.compile_insert(&table, &cols, &rows, &self.state.table_prefix)?;
        self.connection()?.insert(&compiled.sql, &compiled.bindings).await
    }

    pub async fn insert_or_ignore(
        &self,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
        conflict_columns: &[&str],
    ) -> OrmResult<u64> {
        let table = self.table_identifier()?;
        let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let conflict: Vec<String> = conflict_columns.iter().map(|c| c.to_string()).collect();
        let compiled = self.grammar.compile_insert_or_ignore(
            &table,
            &cols,
            &rows,
            &self.state.table_prefix,
            &conflict,
        )?;
        self.connection()?.insert(&compiled.sql, &compiled.bindings).await
    }

    pub async fn insert_get_id(&self, columns: &[&str], row: Vec<Value>, primary_key: &str) -> OrmResult<i64> {
        let table = self.table_identifier()?;
        let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let compiled =
            self.grammar
                .compile_insert_get_id(&table, &cols, &row, &self.state.table_prefix, primary_key)?;
        match self.grammar.dialect() {
            Dialect::Pgsql => {
                let result = self
                    .connection()?
                    .select_one(&compiled.sql, &compiled.bindings)
                    .await?
                    .ok_or_else(|| OrmError::validation("insert did not return an id"))?;
                result.try_get::<_, i64>(primary_key).map_err(OrmError::from_db_error)
            }
            _ => {
                self.connection()?.insert(&compiled.sql, &compiled.bindings).await?;
                Err(OrmError::validation(
                    "insert_get_id's last-insert-id retrieval is driver-specific and not wired for this dialect",
                ))
            }
        }
    }

    pub async fn update(&self, assignments: &[(&str, Value)], primary_key: Option<&str>) -> OrmResult<u64> {
        let table = self.table_identifier()?;
        let owned: Vec<(String, Value)> =
            assignments.iter().map(|(c, v)| (c.to_string(), v.clone())).collect();
        let compiled = self.grammar.compile_update(&table, &owned, &self.state, primary_key)?;
        self.connection()?.update(&compiled.sql, &compiled.bindings).await
    }

    pub async fn increment(&self, column: &str, by: i64, primary_key: Option<&str>) -> OrmResult<u64> {
        let ident = Identifier::parse(column)?.wrap(self.grammar.dialect());
        self.update(&[(column, Value::raw(format!("{ident} + {by}")))], primary_key).await
    }

    pub async fn decrement(&self, column: &str, by: i64, primary_key: Option<&str>) -> OrmResult<u64> {
        self.increment(column, -by, primary_key).await
    }

    pub async fn delete(&self, primary_key: Option<&str>) -> OrmResult<u64> {
        let table = self.table_identifier()?;
        let compiled = self.grammar.compile_delete(&table, &self.state, primary_key)?;
        self.connection()?.remove(&compiled.sql, &compiled.bindings).await
    }

    pub async fn truncate(&self) -> OrmResult<()> {
        let table = self.table_identifier()?;
        for compiled in self.grammar.compile_truncate(&table, &self.state.table_prefix) {
            self.connection()?.statement(&compiled.sql, &compiled.bindings).await?;
        }
        Ok(())
    }

    pub async fn upsert(
        &self,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
        unique_by: &[&str],
        update_columns: &[&str],
    ) -> OrmResult<u64> {
        let table = self.table_identifier()?;
        let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let unique: Vec<String> = unique_by.iter().map(|c| c.to_string()).collect();
        let update: Vec<String> = update_columns.iter().map(|c| c.to_string()).collect();
        let compiled = self.grammar.compile_upsert(
            &table,
            &cols,
            &rows,
            &self.state.table_prefix,
            &unique,
            &update,
        )?;
        self.connection()?.insert(&compiled.sql, &compiled.bindings).await
    }

    // ---- terminal: single value / single row ---------------------------------------

    /// `find(id)`: fetch the row whose `primary_key` equals `id`, or `None`.
    pub async fn find(&self, id: impl Into<Value>, primary_key: &str) -> OrmResult<Option<crate::connection::Row>> {
        self.clone().where_eq(primary_key, id)?.first().await
    }

    /// `value(col)`: the `col` of the first matching row, or `None`.
    pub async fn value<T>(&self, column: &str) -> OrmResult<Option<T>>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>,
    {
        match self.clone().select(&[column])?.first().await? {
            Some(row) => row.try_get::<_, T>(0).map(Some).map_err(OrmError::from_db_error),
            None => Ok(None),
        }
    }

    /// `pluck(col)`: every `col` value across the matched rows, in row order.
    pub async fn pluck<T>(&self, column: &str) -> OrmResult<Vec<T>>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>,
    {
        let rows = self.clone().select(&[column])?.get().await?;
        rows.iter()
            .map(|r| r.try_get::<_, T>(0).map_err(OrmError::from_db_error))
            .collect()
    }

    /// `pluck(col, key)`: `(key, col)` pairs across the matched rows, in row
    /// order — callers needing a map build one from the pairs themselves,
    /// since ordering (and duplicate keys) is otherwise silently lost.
    pub async fn pluck_with_key<K, V>(&self, column: &str, key: &str) -> OrmResult<Vec<(K, V)>>
    where
        K: for<'a> tokio_postgres::types::FromSql<'a>,
        V: for<'a> tokio_postgres::types::FromSql<'a>,
    {
        let rows = self.clone().select(&[column, key])?.get().await?;
        rows.iter()
            .map(|r| {
                let v = r.try_get::<_, V>(0).map_err(OrmError::from_db_error)?;
                let k = r.try_get::<_, K>(1).map_err(OrmError::from_db_error)?;
                Ok((k, v))
            })
            .collect()
    }

    // ---- chunking & lazy iteration ---------------------------------------------------

    /// Walks the result set one page of `size` rows at a time, ordering by
    /// `id` if no order was given (so each page makes progress). `callback`
    /// returning `Ok(false)` stops iteration early; the overall result is
    /// `false` in that case, `true` if every page ran.
    pub async fn chunk<F, Fut>(&self, size: i64, callback: F) -> OrmResult<bool>
    where
        F: Fn(Vec<crate::connection::Row>) -> Fut,
        Fut: std::future::Future<Output = OrmResult<bool>>,
    {
        let mut base = self.clone();
        if base.state.orders.is_empty() {
            base = base.order_by("id", Direction::Asc)?;
        }
        let mut page = 1_i64;
        loop {
            let rows = base.clone().for_page(page, size).get().await?;
            if rows.is_empty() {
                return Ok(true);
            }
            let count = rows.len() as i64;
            if !callback(rows).await? {
                return Ok(false);
            }
            if count < size {
                return Ok(true);
            }
            page += 1;
        }
    }

    /// Cursor-based chunking: `where <column> > last_id order by <column>
    /// limit size`, replacing offset-pagination with a monotonically
    /// increasing key so a page is stable under concurrent inserts — a row
    /// already emitted is never reordered past the cursor.
    pub async fn chunk_by_id<F, Fut>(&self, size: i64, column: &str, callback: F) -> OrmResult<bool>
    where
        F: Fn(Vec<crate::connection::Row>) -> Fut,
        Fut: std::future::Future<Output = OrmResult<bool>>,
    {
        let mut cursor: Option<i64> = None;
        loop {
            let mut qb = self.clone().reorder(Some(column), Direction::Asc)?.limit(size);
            if let Some(id) = cursor {
                qb = qb.where_op(column, ">", id)?;
            }
            let rows = qb.get().await?;
            if rows.is_empty() {
                return Ok(true);
            }
            let count = rows.len() as i64;
            let next_cursor = rows
                .last()
                .unwrap()
                .try_get::<_, i64>(column)
                .map_err(OrmError::from_db_error)?;
            if !callback(rows).await? {
                return Ok(false);
            }
            cursor = Some(next_cursor);
            if count < size {
                return Ok(true);
            }
        }
    }

    /// `each`: `chunk` with a per-row callback instead of a per-page one.
    pub async fn each<F, Fut>(&self, size: i64, callback: F) -> OrmResult<bool>
    where
        F: Fn(crate::connection::Row) -> Fut,
        Fut: std::future::Future<Output = OrmResult<bool>>,
    {
        self.chunk(size, |rows| async move {
            for row in rows {
                if !callback(row).await? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
        .await
    }

    /// `chunkMap`: runs `callback` over every row, page by page, and
    /// materializes the transformed results in row order.
    pub async fn chunk_map<T>(
        &self,
        size: i64,
        mut callback: impl FnMut(crate::connection::Row) -> T,
    ) -> OrmResult<Vec<T>> {
        let mut base = self.clone();
        if base.state.orders.is_empty() {
            base = base.order_by("id", Direction::Asc)?;
        }
        let mut page = 1_i64;
        let mut out = Vec::new();
        loop {
            let rows = base.clone().for_page(page, size).get().await?;
            if rows.is_empty() {
                break;
            }
            let count = rows.len() as i64;
            out.extend(rows.into_iter().map(&mut callback));
            if count < size {
                break;
            }
            page += 1;
        }
        Ok(out)
    }
}

impl QueryState {
    pub(crate) fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_where_compiles_with_binding() {
        let qb = QueryBuilder::new(Dialect::Pgsql)
            .from("users")
            .unwrap()
            .select(&["id", "name"])
            .unwrap()
            .where_eq("id", 3_i64)
            .unwrap();
        assert_eq!(qb.to_sql().unwrap(), r#"select "id", "name" from "users" where "id" = ?"#);
        assert_eq!(qb.get_bindings().len(), 1);
    }

    #[test]
    fn for_page_sets_limit_and_offset() {
        let qb = QueryBuilder::new(Dialect::Pgsql).from("t").unwrap().for_page(3, 10);
        assert_eq!(qb.state.limit, Some(10));
        assert_eq!(qb.state.offset, Some(20));
    }

    #[test]
    fn nested_where_group_wraps_in_parens() {
        let qb = QueryBuilder::new(Dialect::Pgsql)
            .from("t")
            .unwrap()
            .where_eq("a", 1_i64)
            .unwrap()
            .or_where_group(|b| b.where_eq("b", 2_i64).unwrap().where_eq("c", 3_i64).unwrap());
        assert_eq!(
            qb.to_sql().unwrap(),
            r#"select * from "t" where "a" = ? or ("b" = ? and "c" = ?)"#
        );
    }

    #[test]
    fn unsupported_operator_is_rejected() {
        let err = QueryBuilder::new(Dialect::Pgsql)
            .from("t")
            .unwrap()
            .where_op("a", "<=>", 1_i64)
            .unwrap_err();
        assert!(matches!(err, OrmError::Validation(_)));
    }

    #[test]
    fn mysql_allows_spaceship_operator() {
        let qb = QueryBuilder::new(Dialect::MySql)
            .from("t")
            .unwrap()
            .where_op("a", "<=>", 1_i64)
            .unwrap();
        assert!(qb.to_sql().unwrap().contains("<=>"));
    }

    #[tokio::test]
    async fn terminal_ops_without_a_connection_fail_validation() {
        let qb = QueryBuilder::new(Dialect::Pgsql).from("t").unwrap();
        assert!(matches!(qb.get().await.unwrap_err(), OrmError::Validation(_)));
        assert!(matches!(qb.find(1_i64, "id").await.unwrap_err(), OrmError::Validation(_)));
        assert!(matches!(qb.chunk(10, |_| async { Ok(true) }).await.unwrap_err(), OrmError::Validation(_)));
    }
}

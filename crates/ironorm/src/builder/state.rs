//! Query-builder state (component C): plain data, consumed by the grammar.
//!
//! `QueryState` never touches a connection or does I/O; `grammar::compile`
//! is a pure function of it. The fluent builder in [`super::query`] is the
//! only thing that mutates it.

use crate::ident::Identifier;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolConn {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Debug, Clone)]
pub enum FromClause {
    None,
    Name(Identifier),
    Subquery {
        state: Box<QueryState>,
        alias: String,
    },
    Raw {
        sql: String,
        bindings: Vec<Value>,
    },
}

#[derive(Debug, Clone)]
pub enum Column {
    Ident(Identifier),
    Raw { sql: String, bindings: Vec<Value> },
    Subquery {
        state: Box<QueryState>,
        alias: String,
    },
}

#[derive(Debug, Clone)]
pub enum Distinct {
    No,
    Yes,
    /// PostgreSQL `distinct on (cols)`; an error on other dialects.
    On(Vec<Identifier>),
}

#[derive(Debug, Clone)]
pub enum JoinTarget {
    Table(Identifier),
    Subquery {
        state: Box<QueryState>,
        alias: String,
    },
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub target: JoinTarget,
    /// `on` clauses, compiled by the same where-compiler, restricted in
    /// practice to basic/column-compare/nested/raw/nullity variants.
    pub wheres: Vec<WhereNode>,
}

/// One node of the `where`/`on`/`having` tree. Each variant owns its own
/// connector (`and`/`or` to the *previous* sibling); the grammar strips the
/// leading connector when rendering the first node of a list.
#[derive(Debug, Clone)]
pub enum WhereNode {
    Basic {
        column: Identifier,
        op: String,
        value: Value,
        conn: BoolConn,
    },
    ColumnCompare {
        left: Identifier,
        op: String,
        right: Identifier,
        conn: BoolConn,
    },
    In {
        column: Identifier,
        values: Vec<Value>,
        negated: bool,
        conn: BoolConn,
    },
    InSub {
        column: Identifier,
        state: Box<QueryState>,
        negated: bool,
        conn: BoolConn,
    },
    Null {
        column: Identifier,
        negated: bool,
        conn: BoolConn,
    },
    Between {
        column: Identifier,
        low: Value,
        high: Value,
        negated: bool,
        conn: BoolConn,
    },
    /// A parenthesized sub-group; only `state.wheres` is rendered.
    Nested { state: Box<QueryState>, conn: BoolConn },
    Exists {
        state: Box<QueryState>,
        negated: bool,
        conn: BoolConn,
    },
    Raw {
        sql: String,
        bindings: Vec<Value>,
        conn: BoolConn,
    },
    RowValues {
        columns: Vec<Identifier>,
        op: String,
        values: Vec<Value>,
        conn: BoolConn,
    },
}

impl WhereNode {
    pub fn conn(&self) -> BoolConn {
        match self {
            WhereNode::Basic { conn, .. }
            | WhereNode::ColumnCompare { conn, .. }
            | WhereNode::In { conn, .. }
            | WhereNode::InSub { conn, .. }
            | WhereNode::Null { conn, .. }
            | WhereNode::Between { conn, .. }
            | WhereNode::Nested { conn, .. }
            | WhereNode::Exists { conn, .. }
            | WhereNode::Raw { conn, .. }
            | WhereNode::RowValues { conn, .. } => *conn,
        }
    }
}

#[derive(Debug, Clone)]
pub enum GroupNode {
    Column(Identifier),
    Raw(String),
}

#[derive(Debug, Clone)]
pub enum HavingNode {
    Basic {
        column: Identifier,
        op: String,
        value: Value,
        conn: BoolConn,
    },
    Raw {
        sql: String,
        bindings: Vec<Value>,
        conn: BoolConn,
    },
}

#[derive(Debug, Clone)]
pub enum OrderTarget {
    Column(Identifier),
    Subquery(Box<QueryState>),
    Raw(String),
}

#[derive(Debug, Clone)]
pub struct OrderNode {
    pub target: OrderTarget,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub enum Lock {
    None,
    ForUpdate,
    Shared,
    Raw(String),
}

#[derive(Debug, Clone)]
pub struct UnionNode {
    pub state: Box<QueryState>,
    pub all: bool,
}

/// The kind a binding belongs to; the grammar emits placeholders and the
/// connection binds values in this declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Select,
    From,
    Join,
    Where,
    GroupBy,
    Having,
    Order,
    Union,
}

pub const BINDING_KIND_ORDER: [BindingKind; 8] = [
    BindingKind::Select,
    BindingKind::From,
    BindingKind::Join,
    BindingKind::Where,
    BindingKind::GroupBy,
    BindingKind::Having,
    BindingKind::Order,
    BindingKind::Union,
];

/// Plain data accumulated by the fluent builder and consumed by the
/// grammar. No method on this type performs I/O.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub from: FromClause,
    pub columns: Vec<Column>,
    pub distinct: Distinct,
    pub joins: Vec<Join>,
    pub wheres: Vec<WhereNode>,
    pub groups: Vec<GroupNode>,
    pub havings: Vec<HavingNode>,
    pub orders: Vec<OrderNode>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub unions: Vec<UnionNode>,
    pub lock: Lock,
    pub table_prefix: String,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            from: FromClause::None,
            columns: Vec::new(),
            distinct: Distinct::No,
            joins: Vec::new(),
            wheres: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            unions: Vec::new(),
            lock: Lock::None,
            table_prefix: String::new(),
        }
    }
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings that belong to `kind`, in the order they were added. This is
    /// a pure, computed view over the tree rather than a second store, so
    /// there is exactly one place a binding can live and no risk of the two
    /// drifting apart.
    pub fn bindings_for(&self, kind: BindingKind) -> Vec<Value> {
        match kind {
            BindingKind::Select => self
                .columns
                .iter()
                .flat_map(|c| match c {
                    Column::Raw { bindings, .. } => bindings.clone(),
                    Column::Subquery { state, .. } => state.all_bindings(),
                    Column::Ident(_) => Vec::new(),
                })
                .collect(),
            BindingKind::From => match &self.from {
                FromClause::Raw { bindings, .. } => bindings.clone(),
                FromClause::Subquery { state, .. } => state.all_bindings(),
                _ => Vec::new(),
            },
            BindingKind::Join => self
                .joins
                .iter()
                .flat_map(|j| {
                    let mut v = Vec::new();
                    if let JoinTarget::Subquery { state, .. } = &j.target {
                        v.extend(state.all_bindings());
                    }
                    v.extend(where_node_bindings(&j.wheres));
                    v
                })
                .collect(),
            BindingKind::Where => where_node_bindings(&self.wheres),
            BindingKind::GroupBy => Vec::new(),
            BindingKind::Having => self
                .havings
                .iter()
                .flat_map(|h| match h {
                    HavingNode::Basic { value, .. } => vec![value.clone()],
                    HavingNode::Raw { bindings, .. } => bindings.clone(),
                })
                .collect(),
            BindingKind::Order => self
                .orders
                .iter()
                .flat_map(|o| match &o.target {
                    OrderTarget::Subquery(state) => state.all_bindings(),
                    _ => Vec::new(),
                })
                .collect(),
            BindingKind::Union => self
                .unions
                .iter()
                .flat_map(|u| u.state.all_bindings())
                .collect(),
        }
    }

    /// All bindings for `getBindings()`, concatenated in declared kind
    /// order (select, from, join, where, group_by, having, order, union).
    pub fn all_bindings(&self) -> Vec<Value> {
        BINDING_KIND_ORDER
            .iter()
            .flat_map(|k| self.bindings_for(*k))
            .collect()
    }
}

fn where_node_bindings(nodes: &[WhereNode]) -> Vec<Value> {
    nodes
        .iter()
        .flat_map(|w| match w {
            WhereNode::Basic { value, .. } => vec![value.clone()],
            WhereNode::ColumnCompare { .. } => Vec::new(),
            WhereNode::In { values, .. } => values.clone(),
            WhereNode::InSub { state, .. } => state.all_bindings(),
            WhereNode::Null { .. } => Vec::new(),
            WhereNode::Between { low, high, .. } => vec![low.clone(), high.clone()],
            WhereNode::Nested { state, .. } => where_node_bindings(&state.wheres),
            WhereNode::Exists { state, .. } => state.all_bindings(),
            WhereNode::Raw { bindings, .. } => bindings.clone(),
            WhereNode::RowValues { values, .. } => values.clone(),
        })
        .collect()
}

impl Default for Distinct {
    fn default() -> Self {
        Distinct::No
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_collect_in_kind_order() {
        let mut state = QueryState::new();
        state.columns.push(Column::Raw {
            sql: "? + 1".into(),
            bindings: vec![Value::bound(1_i64)],
        });
        state.wheres.push(WhereNode::Basic {
            column: Identifier::parse("id").unwrap(),
            op: "=".into(),
            value: Value::bound(2_i64),
            conn: BoolConn::And,
        });
        let all = state.all_bindings();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn empty_in_list_has_no_bindings() {
        let state_node = WhereNode::In {
            column: Identifier::parse("id").unwrap(),
            values: vec![],
            negated: false,
            conn: BoolConn::And,
        };
        assert_eq!(where_node_bindings(&[state_node]).len(), 0);
    }
}

//! Expression & value model (component A).
//!
//! A [`Value`] is either a bound parameter — a dynamically typed value that
//! the grammar renders as a placeholder and the connection binds at execute
//! time — or a [`Value::Raw`] fragment spliced verbatim into the compiled
//! SQL. Raw fragments never contribute a binding; that is the one invariant
//! this module exists to protect.

use std::fmt;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// A bound parameter: a type-erased value plus the machinery to hand it to
/// the driver at bind time. Cloneable and `Send + Sync` so builders can be
/// composed and shared across `.await` points.
#[derive(Clone)]
pub struct BoundValue(pub(crate) Arc<dyn ToSql + Send + Sync>);

impl BoundValue {
    pub fn new<T>(value: T) -> Self
    where
        T: ToSql + Send + Sync + 'static,
    {
        Self(Arc::new(value))
    }

    pub fn as_ref(&self) -> &(dyn ToSql + Sync) {
        self.0.as_ref()
    }
}

impl fmt::Debug for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundValue(..)")
    }
}

/// Tagged value consumed by the query builder and grammar.
///
/// `Raw` bypasses quoting *and* binding: it is spliced into the SQL text
/// exactly as given. Callers are responsible for not splicing untrusted
/// input through `Value::raw`.
#[derive(Clone, Debug)]
pub enum Value {
    Bound(BoundValue),
    Raw(String),
}

impl Value {
    pub fn bound<T>(value: T) -> Self
    where
        T: ToSql + Send + Sync + 'static,
    {
        Self::Bound(BoundValue::new(value))
    }

    pub fn raw(fragment: impl Into<String>) -> Self {
        Self::Raw(fragment.into())
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

impl<T> From<T> for Value
where
    T: ToSql + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Value::bound(value)
    }
}

/// An ordered list of bound parameters, plus the running placeholder count
/// used to assign `$n`/`?` positions while compiling.
#[derive(Default, Clone)]
pub struct ParamList {
    values: Vec<BoundValue>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a [`Value`]; returns `Some(1-based index)` for a bound value, or
    /// `None` for a raw fragment (it contributes no binding).
    pub fn push(&mut self, value: &Value) -> Option<usize> {
        match value {
            Value::Bound(b) => {
                self.values.push(b.clone());
                Some(self.values.len())
            }
            Value::Raw(_) => None,
        }
    }

    pub fn extend(&mut self, other: ParamList) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values.iter().map(|v| v.as_ref()).collect()
    }

    pub fn into_values(self) -> Vec<BoundValue> {
        self.values
    }
}

impl fmt::Debug for ParamList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamList")
            .field("len", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_contributes_no_binding() {
        let mut params = ParamList::new();
        let idx = params.push(&Value::raw("now()"));
        assert_eq!(idx, None);
        assert_eq!(params.len(), 0);
    }

    #[test]
    fn bound_value_gets_sequential_index() {
        let mut params = ParamList::new();
        assert_eq!(params.push(&Value::bound(1_i64)), Some(1));
        assert_eq!(params.push(&Value::bound("x")), Some(2));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn from_impl_wraps_bound() {
        let v: Value = 42_i64.into();
        assert!(!v.is_raw());
    }
}

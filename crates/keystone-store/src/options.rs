//! Composable query options.
//!
//! [`QueryOptions`] describes which rows an operation touches: equality
//! filters, typed or raw conditions, ordering clauses and a page window.
//! Every mutator consumes and returns the options, so a description is
//! built in one expression and handed to the store:
//!
//! ```
//! use keystone_store::{Clause, Condition, QueryOptions};
//!
//! let opts = QueryOptions::new()
//!     .with_filter("owner_id", "user-1")
//!     .with_condition(Condition::like("title", "%rust%"))
//!     .with_clause(Clause::order_by("created_at", true))
//!     .page(2, 10);
//!
//! assert_eq!(opts.offset(), 10);
//! assert_eq!(opts.limit(), 10);
//! ```
//!
//! Backends apply the parts in a fixed order: filters, then conditions,
//! then clauses, then offset and limit.

use crate::tenant::TenantRegistry;
use indexmap::IndexMap;
use keystone_core::Context;
use serde_json::Value;
use std::fmt;

/// Limit value meaning "no limit".
pub const UNBOUNDED: i64 = -1;

/// Comparison operator for [`Condition::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// SQL spelling of the operator.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A predicate richer than equality.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column <op> value`
    Compare {
        /// Column name.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand value.
        value: Value,
    },
    /// `column IN (values...)`
    In {
        /// Column name.
        column: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// `column LIKE pattern`, with `%` and `_` wildcards.
    Like {
        /// Column name.
        column: String,
        /// LIKE pattern.
        pattern: String,
    },
    /// A SQL fragment with `?` placeholders. Only SQL backends evaluate it.
    Raw {
        /// SQL text.
        sql: String,
        /// Placeholder values, in order.
        args: Vec<Value>,
    },
}

impl Condition {
    /// Creates a comparison.
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// `column != value`
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    /// `column <= value`
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    /// `column >= value`
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    /// `column IN (values...)`
    pub fn in_list<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `column LIKE pattern`
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    /// A raw SQL fragment such as `"created_at > ?::timestamptz"`.
    ///
    /// String arguments are bound as text, so compare them with non-text
    /// columns through an explicit cast. Typed comparisons need no cast.
    pub fn raw(sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Self::Raw {
            sql: sql.into(),
            args: args.into_iter().collect(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { column, op, value } => write!(f, "{column} {} {value}", op.as_sql()),
            Self::In { column, values } => {
                write!(f, "{column} IN (")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
            Self::Like { column, pattern } => write!(f, "{column} LIKE {pattern:?}"),
            Self::Raw { sql, args } => write!(f, "{sql} {args:?}"),
        }
    }
}

/// A clause that shapes the result rather than filtering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Orders by a column. Several clauses sort by each in turn.
    OrderBy {
        /// Column name.
        column: String,
        /// Sort descending.
        descending: bool,
    },
    /// Locks selected rows until the transaction ends.
    ForUpdate,
}

impl Clause {
    /// Creates an ordering clause.
    pub fn order_by(column: impl Into<String>, descending: bool) -> Self {
        Self::OrderBy {
            column: column.into(),
            descending,
        }
    }
}

/// Filter, condition, clause and paging description for one store call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    offset: i64,
    limit: i64,
    filters: IndexMap<String, Value>,
    clauses: Vec<Clause>,
    conditions: Vec<Condition>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: UNBOUNDED,
            filters: IndexMap::new(),
            clauses: Vec::new(),
            conditions: Vec::new(),
        }
    }
}

impl QueryOptions {
    /// Creates options that match every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `QueryOptions::new().with_filter(key, value)`.
    pub fn filter(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with_filter(key, value)
    }

    /// Sets the offset. Negative values become 0.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset.max(0);
        self
    }

    /// Sets the limit. Zero or negative values mean unbounded.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = if limit <= 0 { UNBOUNDED } else { limit };
        self
    }

    /// Selects page `page` (1-based) of `page_size` rows.
    ///
    /// A page below 1 is treated as 1. A page size of zero or less removes
    /// the window entirely.
    pub fn page(self, page: i64, page_size: i64) -> Self {
        if page_size <= 0 {
            return self.with_offset(0).with_limit(UNBOUNDED);
        }
        let page = page.max(1);
        self.with_offset((page - 1).saturating_mul(page_size))
            .with_limit(page_size)
    }

    /// Adds an equality filter. A later filter on the same key replaces it.
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Adds several equality filters, last write wins.
    pub fn filter_pairs<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in pairs {
            self.filters.insert(key.into(), value.into());
        }
        self
    }

    /// Appends a clause.
    pub fn with_clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Appends a condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Appends a raw SQL condition with `?` placeholders.
    pub fn with_raw_condition(self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.with_condition(Condition::raw(sql, args))
    }

    /// Scopes the options to the caller's tenant.
    ///
    /// No-op when `registry` has no binding.
    pub fn with_tenant_scope(self, registry: &TenantRegistry, ctx: &Context) -> Self {
        registry.scope(self, ctx)
    }

    /// Row offset.
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Row limit, [`UNBOUNDED`] when there is none.
    pub const fn limit(&self) -> i64 {
        self.limit
    }

    /// Returns true if no limit is set.
    pub const fn is_unbounded(&self) -> bool {
        self.limit == UNBOUNDED
    }

    /// Equality filters in insertion order.
    pub const fn filters(&self) -> &IndexMap<String, Value> {
        &self.filters
    }

    /// Clauses in insertion order.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Conditions in insertion order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Ordering clauses as `(column, descending)` pairs.
    pub fn ordering(&self) -> impl Iterator<Item = (&str, bool)> {
        self.clauses.iter().filter_map(|clause| match clause {
            Clause::OrderBy { column, descending } => Some((column.as_str(), *descending)),
            Clause::ForUpdate => None,
        })
    }

    /// Returns true if a [`Clause::ForUpdate`] is present.
    pub fn locks_rows(&self) -> bool {
        self.clauses.contains(&Clause::ForUpdate)
    }
}

impl fmt::Display for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("filters={")?;
        for (i, (key, value)) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")?;
        if !self.conditions.is_empty() {
            f.write_str(" conditions=[")?;
            for (i, condition) in self.conditions.iter().enumerate() {
                if i > 0 {
                    f.write_str("; ")?;
                }
                write!(f, "{condition}")?;
            }
            f.write_str("]")?;
        }
        write!(f, " offset={} limit={}", self.offset, self.limit)
    }
}

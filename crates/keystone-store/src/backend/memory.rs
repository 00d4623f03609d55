//! In-memory backend.
//!
//! Tables live in one map behind a `tokio::sync::Mutex`. A transaction
//! holds that mutex for its whole lifetime, so transactions are fully
//! serialized against every other operation on the backend. The state at
//! `begin` is snapshotted and restored on rollback, or when the handle is
//! dropped without being finished.
//!
//! Anything outside a transaction waits at most the lock timeout for the
//! mutex and then fails with [`BackendError::Busy`]. A task that calls the
//! backend without its own open transaction handle gets that error instead
//! of waiting on itself forever.
//!
//! Raw SQL conditions are not evaluated and fail with
//! [`BackendError::Unsupported`].

use super::{key_is_unset, Backend, Row, Table, TxHandle};
use crate::error::{BackendError, BackendResult};
use crate::options::{CompareOp, Condition, QueryOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tracing::debug;

const NAME: &str = "memory";

/// How long a call waits for an open transaction by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
struct Tables(HashMap<&'static str, TableData>);

#[derive(Debug, Clone, Default)]
struct TableData {
    /// `(insertion sequence, row)` in insertion order.
    rows: Vec<(u64, Row)>,
    next_seq: u64,
    last_id: i64,
}

impl TableData {
    fn position(&self, key: &str, value: &Value) -> Option<usize> {
        self.rows
            .iter()
            .position(|(_, row)| row.get(key).is_some_and(|v| values_equal(v, value)))
    }

    fn push(&mut self, row: Row) {
        self.next_seq += 1;
        self.rows.push((self.next_seq, row));
    }

    fn insert(&mut self, table: Table, mut row: Row) -> BackendResult<Row> {
        if key_is_unset(row.get(table.key)) {
            self.last_id += 1;
            row.insert(table.key.to_string(), Value::from(self.last_id));
        } else {
            let key = row.get(table.key).cloned().unwrap_or(Value::Null);
            if self.position(table.key, &key).is_some() {
                return Err(BackendError::Conflict {
                    table: table.name.to_string(),
                    key: key.to_string(),
                });
            }
            if let Some(id) = key.as_i64() {
                self.last_id = self.last_id.max(id);
            }
        }
        self.push(row.clone());
        Ok(row)
    }

    fn upsert(&mut self, table: Table, row: Row) -> BackendResult<Row> {
        let existing = row
            .get(table.key)
            .filter(|key| !key_is_unset(Some(key)))
            .and_then(|key| self.position(table.key, key));
        match existing {
            Some(index) => {
                self.rows[index].1 = row.clone();
                Ok(row)
            }
            None => self.insert(table, row),
        }
    }

    fn matching<'a>(
        &'a self,
        opts: &'a QueryOptions,
    ) -> BackendResult<impl Iterator<Item = &'a (u64, Row)> + 'a> {
        check_supported(opts)?;
        Ok(self.rows.iter().filter(move |(_, row)| row_matches(row, opts)))
    }
}

struct MemoryTx {
    tables: OwnedMutexGuard<Tables>,
    snapshot: Option<Tables>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.tables = snapshot;
        }
    }
}

/// A backend that keeps every table in process memory.
///
/// Clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<Tables>>,
    lock_timeout: Duration,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long calls outside a transaction, and `begin`, wait for an
    /// open transaction. Zero fails at once.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn busy(&self) -> BackendError {
        debug!(backend = NAME, waited = ?self.lock_timeout, "gave up waiting for transaction");
        BackendError::Busy {
            backend: NAME,
            waited: self.lock_timeout,
        }
    }

    async fn lock(&self) -> BackendResult<MutexGuard<'_, Tables>> {
        if let Ok(tables) = self.state.try_lock() {
            return Ok(tables);
        }
        tokio::time::timeout(self.lock_timeout, self.state.lock())
            .await
            .map_err(|_| self.busy())
    }

    async fn lock_owned(&self) -> BackendResult<OwnedMutexGuard<Tables>> {
        if let Ok(tables) = Arc::clone(&self.state).try_lock_owned() {
            return Ok(tables);
        }
        tokio::time::timeout(self.lock_timeout, Arc::clone(&self.state).lock_owned())
            .await
            .map_err(|_| self.busy())
    }

    fn owns(&self, tx: &MemoryTx) -> BackendResult<()> {
        if Arc::ptr_eq(OwnedMutexGuard::mutex(&tx.tables), &self.state) {
            Ok(())
        } else {
            Err(BackendError::ForeignTransaction)
        }
    }

    async fn with_tables<R, F>(&self, tx: Option<&TxHandle>, f: F) -> BackendResult<R>
    where
        F: FnOnce(&mut Tables) -> BackendResult<R> + Send,
    {
        match tx {
            Some(tx) => {
                let mut guard = tx.lock().await;
                let state = guard.state_mut::<MemoryTx>()?;
                self.owns(state)?;
                f(&mut state.tables)
            }
            None => {
                let mut tables = self.lock().await?;
                f(&mut tables)
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn begin(&self) -> BackendResult<TxHandle> {
        let tables = self.lock_owned().await?;
        let snapshot = tables.clone();
        debug!(backend = NAME, "transaction started");
        Ok(TxHandle::new(
            NAME,
            MemoryTx {
                tables,
                snapshot: Some(snapshot),
            },
        ))
    }

    /// Holding the mutex is already a stable view, so no snapshot is taken.
    async fn begin_read(&self) -> BackendResult<TxHandle> {
        let tables = self.lock_owned().await?;
        Ok(TxHandle::new(
            NAME,
            MemoryTx {
                tables,
                snapshot: None,
            },
        ))
    }

    async fn commit(&self, tx: &TxHandle) -> BackendResult<()> {
        {
            let mut guard = tx.lock().await;
            self.owns(guard.state_mut::<MemoryTx>()?)?;
        }
        let mut state = tx.finish::<MemoryTx>().await?;
        state.snapshot = None;
        Ok(())
    }

    async fn rollback(&self, tx: &TxHandle) -> BackendResult<()> {
        {
            let mut guard = tx.lock().await;
            self.owns(guard.state_mut::<MemoryTx>()?)?;
        }
        // Dropping the state restores the snapshot.
        drop(tx.finish::<MemoryTx>().await?);
        Ok(())
    }

    async fn insert(&self, tx: Option<&TxHandle>, table: Table, row: Row) -> BackendResult<Row> {
        self.with_tables(tx, move |tables| {
            tables.0.entry(table.name).or_default().insert(table, row)
        })
        .await
    }

    async fn upsert(&self, tx: Option<&TxHandle>, table: Table, row: Row) -> BackendResult<Row> {
        self.with_tables(tx, move |tables| {
            tables.0.entry(table.name).or_default().upsert(table, row)
        })
        .await
    }

    async fn delete(
        &self,
        tx: Option<&TxHandle>,
        table: Table,
        opts: &QueryOptions,
    ) -> BackendResult<u64> {
        self.with_tables(tx, |tables| {
            check_supported(opts)?;
            let Some(data) = tables.0.get_mut(table.name) else {
                return Ok(0);
            };
            let before = data.rows.len();
            data.rows.retain(|(_, row)| !row_matches(row, opts));
            Ok((before - data.rows.len()) as u64)
        })
        .await
    }

    async fn select(
        &self,
        tx: Option<&TxHandle>,
        table: Table,
        opts: &QueryOptions,
    ) -> BackendResult<Vec<Row>> {
        self.with_tables(tx, |tables| {
            let Some(data) = tables.0.get(table.name) else {
                check_supported(opts)?;
                return Ok(Vec::new());
            };
            let mut rows: Vec<&(u64, Row)> = data.matching(opts)?.collect();

            let ordering: Vec<(&str, bool)> = opts.ordering().collect();
            if ordering.is_empty() {
                rows.sort_by(|a, b| b.0.cmp(&a.0));
            } else {
                rows.sort_by(|(_, a), (_, b)| {
                    ordering
                        .iter()
                        .map(|(column, descending)| {
                            let ord = sort_cmp(a.get(*column), b.get(*column));
                            if *descending {
                                ord.reverse()
                            } else {
                                ord
                            }
                        })
                        .find(|ord| ord.is_ne())
                        .unwrap_or(Ordering::Equal)
                });
            }

            let offset = usize::try_from(opts.offset()).unwrap_or(usize::MAX);
            let limit = if opts.is_unbounded() {
                usize::MAX
            } else {
                usize::try_from(opts.limit()).unwrap_or(usize::MAX)
            };
            Ok(rows
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|(_, row)| row.clone())
                .collect())
        })
        .await
    }

    async fn count(
        &self,
        tx: Option<&TxHandle>,
        table: Table,
        opts: &QueryOptions,
    ) -> BackendResult<u64> {
        self.with_tables(tx, |tables| match tables.0.get(table.name) {
            Some(data) => Ok(data.matching(opts)?.count() as u64),
            None => check_supported(opts).map(|()| 0),
        })
        .await
    }
}

fn check_supported(opts: &QueryOptions) -> BackendResult<()> {
    if opts
        .conditions()
        .iter()
        .any(|c| matches!(c, Condition::Raw { .. }))
    {
        return Err(BackendError::unsupported(NAME, "raw SQL conditions"));
    }
    Ok(())
}

fn row_matches(row: &Row, opts: &QueryOptions) -> bool {
    let filters_match = opts
        .filters()
        .iter()
        .all(|(key, expected)| values_equal(row.get(key).unwrap_or(&Value::Null), expected));
    filters_match && opts.conditions().iter().all(|c| condition_matches(row, c))
}

fn condition_matches(row: &Row, condition: &Condition) -> bool {
    match condition {
        Condition::Compare { column, op, value } => {
            let actual = row.get(column).unwrap_or(&Value::Null);
            match op {
                CompareOp::Eq => values_equal(actual, value),
                CompareOp::Ne => !values_equal(actual, value),
                CompareOp::Lt => compare(actual, value) == Some(Ordering::Less),
                CompareOp::Le => compare(actual, value).is_some_and(Ordering::is_le),
                CompareOp::Gt => compare(actual, value) == Some(Ordering::Greater),
                CompareOp::Ge => compare(actual, value).is_some_and(Ordering::is_ge),
            }
        }
        Condition::In { column, values } => {
            let actual = row.get(column).unwrap_or(&Value::Null);
            values.iter().any(|v| values_equal(actual, v))
        }
        Condition::Like { column, pattern } => match row.get(column) {
            Some(Value::String(actual)) => {
                let pattern: Vec<char> = pattern.chars().collect();
                let actual: Vec<char> = actual.chars().collect();
                like_match(&pattern, &actual)
            }
            _ => false,
        },
        Condition::Raw { .. } => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting: missing and null first, then by type, then by value.
fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// SQL LIKE: `%` matches any run, `_` matches one character.
fn like_match(pattern: &[char], value: &[char]) -> bool {
    let (mut p, mut v) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some('_') => {
                p += 1;
                v += 1;
            }
            Some(&c) if c == value[v] => {
                p += 1;
                v += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    v = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '%')
}

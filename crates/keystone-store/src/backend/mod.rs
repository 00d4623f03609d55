//! Storage backends.
//!
//! A [`Backend`] executes row-level operations described by
//! [`QueryOptions`]. Rows travel as JSON objects so the generic store never
//! needs to know an entity's columns.

use crate::error::{BackendError, BackendResult};
use crate::options::QueryOptions;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// A row as a JSON object keyed by column name.
pub type Row = Map<String, Value>;

/// Table descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Table {
    /// Table name, optionally schema-qualified.
    pub name: &'static str,
    /// Primary key column.
    pub key: &'static str,
}

impl Table {
    /// Creates a descriptor.
    pub const fn new(name: &'static str, key: &'static str) -> Self {
        Self { name, key }
    }
}

/// Returns true if `value` does not identify a row yet.
///
/// Zero numbers, empty strings and null all count as unset, so entities
/// can default their key field.
pub fn key_is_unset(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

type TxSlot = Option<Box<dyn Any + Send>>;

/// An open transaction.
///
/// The handle is opaque to callers: backends put their own state inside and
/// take it back out to commit or roll back. Clones refer to the same
/// transaction. A handle belongs to the request that began it.
#[derive(Clone)]
pub struct TxHandle {
    backend: &'static str,
    slot: Arc<Mutex<TxSlot>>,
}

impl TxHandle {
    /// Wraps backend-specific transaction state.
    pub fn new<S: Any + Send>(backend: &'static str, state: S) -> Self {
        Self {
            backend,
            slot: Arc::new(Mutex::new(Some(Box::new(state)))),
        }
    }

    /// Name of the backend that began the transaction.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Locks the transaction state for one operation.
    pub async fn lock(&self) -> TxGuard<'_> {
        TxGuard {
            slot: self.slot.lock().await,
        }
    }

    /// Removes the state so the backend can finish the transaction.
    pub async fn finish<S: Any + Send>(&self) -> BackendResult<S> {
        let mut slot = self.slot.lock().await;
        let state = slot.take().ok_or(BackendError::TransactionClosed)?;
        match state.downcast::<S>() {
            Ok(state) => Ok(*state),
            Err(state) => {
                *slot = Some(state);
                Err(BackendError::ForeignTransaction)
            }
        }
    }
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a transaction's state.
pub struct TxGuard<'a> {
    slot: MutexGuard<'a, TxSlot>,
}

impl TxGuard<'_> {
    /// Returns the state as `S`.
    pub fn state_mut<S: Any + Send>(&mut self) -> BackendResult<&mut S> {
        self.slot
            .as_mut()
            .ok_or(BackendError::TransactionClosed)?
            .downcast_mut::<S>()
            .ok_or(BackendError::ForeignTransaction)
    }
}

/// Row-level storage operations.
///
/// Every data method takes an optional transaction. With `None` the
/// operation runs on its own; with `Some` it joins that transaction.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Begins a transaction.
    async fn begin(&self) -> BackendResult<TxHandle>;

    /// Begins a transaction for reads only, in which every statement sees
    /// the same snapshot. Finish it with [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback) like any other.
    async fn begin_read(&self) -> BackendResult<TxHandle> {
        self.begin().await
    }

    /// Commits a transaction.
    async fn commit(&self, tx: &TxHandle) -> BackendResult<()>;

    /// Rolls back a transaction.
    async fn rollback(&self, tx: &TxHandle) -> BackendResult<()>;

    /// Inserts `row` and returns it as stored, including an assigned key.
    async fn insert(&self, tx: Option<&TxHandle>, table: Table, row: Row) -> BackendResult<Row>;

    /// Inserts `row`, or replaces the row with the same key.
    async fn upsert(&self, tx: Option<&TxHandle>, table: Table, row: Row) -> BackendResult<Row>;

    /// Deletes matching rows and returns how many were removed. Offset and
    /// limit are ignored.
    async fn delete(
        &self,
        tx: Option<&TxHandle>,
        table: Table,
        opts: &QueryOptions,
    ) -> BackendResult<u64>;

    /// Returns matching rows in order, within the offset and limit.
    async fn select(
        &self,
        tx: Option<&TxHandle>,
        table: Table,
        opts: &QueryOptions,
    ) -> BackendResult<Vec<Row>>;

    /// Counts matching rows. Offset and limit are ignored.
    async fn count(
        &self,
        tx: Option<&TxHandle>,
        table: Table,
        opts: &QueryOptions,
    ) -> BackendResult<u64>;
}

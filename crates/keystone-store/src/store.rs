//! The generic store and transaction scoping.

use crate::backend::memory::MemoryBackend;
use crate::backend::{Backend, Row, Table, TxHandle};
use crate::entity::Entity;
use crate::error::{BackendError, BackendResult};
use crate::options::QueryOptions;
use keystone_core::{Context, Error, KeystoneResult};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// The transaction a context participates in.
///
/// Stored as a [`Context`] extension by [`Datastore::run_in_transaction`].
#[derive(Debug, Clone)]
pub struct ActiveTransaction(TxHandle);

impl ActiveTransaction {
    /// Returns the handle.
    pub fn handle(&self) -> &TxHandle {
        &self.0
    }
}

fn active_tx(ctx: &Context) -> Option<&TxHandle> {
    ctx.extension::<ActiveTransaction>().map(ActiveTransaction::handle)
}

#[derive(Clone, Copy)]
enum Operation {
    Create,
    Update,
    Delete,
    Get,
    List,
}

impl Operation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Get => "get",
            Self::List => "list",
        }
    }

    const fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// Typed CRUD over one entity.
///
/// All methods observe the context's deadline and cancellation signal and
/// join the context's transaction, if any. Backend errors are logged with
/// the entity and filter description and surface as `ReadFailure` or
/// `WriteFailure`.
pub struct Store<T> {
    backend: Arc<dyn Backend>,
    table: Table,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            table: self.table,
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.backend.name())
            .field("table", &self.table)
            .finish()
    }
}

impl<T: Entity> Store<T> {
    /// Creates a store over `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            table: T::table(),
            _entity: PhantomData,
        }
    }

    /// Inserts `obj`. Fields assigned by the backend, such as an
    /// auto-incremented key, are written back into `obj`.
    #[instrument(skip_all, fields(entity = T::TABLE))]
    pub async fn create(&self, ctx: &Context, obj: &mut T) -> KeystoneResult<()> {
        let row = to_row::<T>(obj)?;
        let stored = ctx
            .guard(self.backend.insert(active_tx(ctx), self.table, row))
            .await?
            .map_err(|err| self.fail(Operation::Create, None, err))?;
        *obj = from_row::<T>(stored)?;
        Ok(())
    }

    /// Writes every field of `obj`, inserting it if its key is new.
    #[instrument(skip_all, fields(entity = T::TABLE))]
    pub async fn update(&self, ctx: &Context, obj: &T) -> KeystoneResult<()> {
        let row = to_row::<T>(obj)?;
        ctx.guard(self.backend.upsert(active_tx(ctx), self.table, row))
            .await?
            .map_err(|err| self.fail(Operation::Update, None, err))?;
        Ok(())
    }

    /// Deletes matching rows. Matching nothing is not an error.
    #[instrument(skip_all, fields(entity = T::TABLE, filters = %opts))]
    pub async fn delete(&self, ctx: &Context, opts: &QueryOptions) -> KeystoneResult<()> {
        let removed = ctx
            .guard(self.backend.delete(active_tx(ctx), self.table, opts))
            .await?
            .map_err(|err| self.fail(Operation::Delete, Some(opts), err))?;
        debug!(removed, "rows deleted");
        Ok(())
    }

    /// Returns the first matching row.
    ///
    /// Fails with `NotFound` if nothing matches.
    #[instrument(skip_all, fields(entity = T::TABLE, filters = %opts))]
    pub async fn get(&self, ctx: &Context, opts: &QueryOptions) -> KeystoneResult<T> {
        let first = opts.clone().with_limit(1);
        let rows = ctx
            .guard(self.backend.select(active_tx(ctx), self.table, &first))
            .await?
            .map_err(|err| self.fail(Operation::Get, Some(opts), err))?;
        match rows.into_iter().next() {
            Some(row) => from_row::<T>(row),
            None => Err(Error::not_found(format!("{} not found", T::TABLE))),
        }
    }

    /// Returns the number of matching rows, ignoring offset and limit,
    /// together with the requested page.
    ///
    /// Rows are ordered newest first unless `opts` carries an ordering clause.
    /// The page and the count are read from one snapshot: the caller's
    /// transaction if `ctx` carries one, or a read transaction opened for
    /// this call.
    #[instrument(skip_all, fields(entity = T::TABLE, filters = %opts))]
    pub async fn list(&self, ctx: &Context, opts: &QueryOptions) -> KeystoneResult<(u64, Vec<T>)> {
        let (count, rows) = match active_tx(ctx) {
            Some(tx) => ctx.guard(self.read_page(tx, opts)).await?,
            None => ctx.guard(self.read_page_in_snapshot(opts)).await?,
        }
        .map_err(|err| self.fail(Operation::List, Some(opts), err))?;

        let items = rows
            .into_iter()
            .map(from_row::<T>)
            .collect::<KeystoneResult<Vec<_>>>()?;
        Ok((count, items))
    }

    async fn read_page(&self, tx: &TxHandle, opts: &QueryOptions) -> BackendResult<(u64, Vec<Row>)> {
        let rows = self.backend.select(Some(tx), self.table, opts).await?;
        let count = self.backend.count(Some(tx), self.table, opts).await?;
        Ok((count, rows))
    }

    async fn read_page_in_snapshot(&self, opts: &QueryOptions) -> BackendResult<(u64, Vec<Row>)> {
        let tx = self.backend.begin_read().await?;
        let page = self.read_page(&tx, opts).await;
        let finished = match page {
            Ok(_) => self.backend.commit(&tx).await,
            Err(_) => self.backend.rollback(&tx).await,
        };
        let page = page?;
        finished?;
        Ok(page)
    }

    fn fail(&self, operation: Operation, opts: Option<&QueryOptions>, err: BackendError) -> Error {
        let filters = opts.map(ToString::to_string).unwrap_or_default();
        error!(
            entity = T::TABLE,
            operation = operation.as_str(),
            backend = self.backend.name(),
            filters = %filters,
            error = %err,
            "store operation failed"
        );
        metrics::counter!(
            "keystone_store_errors_total",
            "entity" => T::TABLE,
            "operation" => operation.as_str()
        )
        .increment(1);

        let base = if operation.is_write() {
            Error::write_failure()
        } else {
            Error::read_failure()
        };
        base.with_source(err)
    }
}

fn to_row<T: Entity>(obj: &T) -> KeystoneResult<Row> {
    match serde_json::to_value(obj) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(Error::internal(format!(
            "{} does not serialize to an object",
            T::TABLE
        ))),
        Err(err) => Err(Error::internal(format!("cannot serialize {}", T::TABLE)).with_source(err)),
    }
}

fn from_row<T: Entity>(row: Row) -> KeystoneResult<T> {
    serde_json::from_value(Value::Object(row))
        .map_err(|err| Error::internal(format!("cannot decode {}", T::TABLE)).with_source(err))
}

/// Entry point to persistence: owns the backend and hands out stores.
///
/// ```
/// use keystone_store::Datastore;
///
/// let datastore = Datastore::memory();
/// assert_eq!(datastore.backend().name(), "memory");
/// ```
#[derive(Clone)]
pub struct Datastore {
    backend: Arc<dyn Backend>,
}

impl Datastore {
    /// Creates a datastore over `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Creates a datastore over a fresh [`MemoryBackend`].
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Returns a store for `T`.
    pub fn store<T: Entity>(&self) -> Store<T> {
        Store::new(Arc::clone(&self.backend))
    }

    /// Runs `f` inside a transaction.
    ///
    /// `f` receives a context carrying the transaction; every store call made
    /// with it joins the transaction. The transaction commits if `f` returns
    /// `Ok` and rolls back otherwise. If `ctx` already carries a transaction,
    /// `f` runs in it and nothing is committed here.
    ///
    /// Store calls made with a context that does not carry the transaction
    /// wait for it to finish. The memory backend bounds that wait by its lock
    /// timeout and then fails the call, which is what a call made inside `f`
    /// with the outer `ctx` runs into.
    pub async fn run_in_transaction<F, Fut, R>(&self, ctx: &Context, f: F) -> KeystoneResult<R>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = KeystoneResult<R>>,
    {
        if ctx.extension::<ActiveTransaction>().is_some() {
            return f(ctx.clone()).await;
        }

        let handle = ctx
            .guard(self.backend.begin())
            .await?
            .map_err(|err| transaction_error("begin", err))?;
        let tx_ctx = ctx.clone().with_extension(ActiveTransaction(handle.clone()));

        match f(tx_ctx).await {
            Ok(value) => {
                self.backend
                    .commit(&handle)
                    .await
                    .map_err(|err| transaction_error("commit", err))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.backend.rollback(&handle).await {
                    warn!(error = %rollback, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

fn transaction_error(stage: &str, err: BackendError) -> Error {
    error!(stage, error = %err, "transaction failed");
    Error::write_failure().with_source(err)
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::ErrorKind;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        #[serde(default)]
        id: i64,
        username: String,
    }

    impl Entity for User {
        const TABLE: &'static str = "users";
    }

    fn user(name: &str) -> User {
        User {
            id: 0,
            username: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_writes_back_key() {
        let users = Datastore::memory().store::<User>();
        let ctx = Context::new();
        let mut alice = user("alice");
        users.create(&ctx, &mut alice).await.unwrap();
        assert_eq!(alice.id, 1);

        let fetched = users
            .get(&ctx, &QueryOptions::filter("username", "alice"))
            .await
            .unwrap();
        assert_eq!(fetched, alice);
    }

    #[tokio::test]
    async fn test_update_replaces_record() {
        let users = Datastore::memory().store::<User>();
        let ctx = Context::new();
        let mut alice = user("alice");
        users.create(&ctx, &mut alice).await.unwrap();

        alice.username = "alicia".to_string();
        users.update(&ctx, &alice).await.unwrap();
        let (count, items) = users.list(&ctx, &QueryOptions::new()).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(items[0].username, "alicia");
    }

    #[tokio::test]
    async fn test_get_not_found_vs_read_failure() {
        let users = Datastore::memory().store::<User>();
        let ctx = Context::new();

        let err = users.get(&ctx, &QueryOptions::filter("id", 9)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let raw = QueryOptions::new().with_raw_condition("id > ?", [Value::from(1)]);
        let err = users.get(&ctx, &raw).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailure);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_write_failure() {
        let users = Datastore::memory().store::<User>();
        let ctx = Context::new();
        let mut first = User {
            id: 5,
            username: "a".to_string(),
        };
        users.create(&ctx, &mut first).await.unwrap();
        let err = users.create(&ctx, &mut first.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailure);
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts() {
        let users = Datastore::memory().store::<User>();
        let ctx = Context::new();
        ctx.cancel();
        let err = users.list(&ctx, &QueryOptions::new()).await.unwrap_err();
        assert_eq!(err.reason(), "InternalError.Cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_blocked_operation() {
        let datastore = Datastore::memory();
        let users = datastore.store::<User>();

        // A transaction holds the tables, so a call outside it blocks.
        let tx = datastore.backend().begin().await.unwrap();
        let ctx = Context::new().with_timeout(Duration::from_millis(100));
        let err = users.list(&ctx, &QueryOptions::new()).await.unwrap_err();
        assert_eq!(err.message(), "request deadline exceeded");
        datastore.backend().rollback(&tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_commits() {
        let datastore = Datastore::memory();
        let users = datastore.store::<User>();
        let ctx = Context::new();

        let id = datastore
            .run_in_transaction(&ctx, |tx_ctx| {
                let users = users.clone();
                async move {
                    let mut alice = user("alice");
                    users.create(&tx_ctx, &mut alice).await?;
                    let mut bob = user("bob");
                    users.create(&tx_ctx, &mut bob).await?;
                    Ok(bob.id)
                }
            })
            .await
            .unwrap();
        assert_eq!(id, 2);

        let (count, _) = users.list(&ctx, &QueryOptions::new()).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let datastore = Datastore::memory();
        let users = datastore.store::<User>();
        let ctx = Context::new();

        let result: KeystoneResult<()> = datastore
            .run_in_transaction(&ctx, |tx_ctx| {
                let users = users.clone();
                async move {
                    users.create(&tx_ctx, &mut user("alice")).await?;
                    Err(Error::validation("username taken"))
                }
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ValidationFailure);

        let (count, _) = users.list(&ctx, &QueryOptions::new()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_nested_transaction_reuses_handle() {
        let datastore = Datastore::memory();
        let users = datastore.store::<User>();
        let ctx = Context::new();

        let inner_store = datastore.clone();
        let result: KeystoneResult<()> = datastore
            .run_in_transaction(&ctx, |tx_ctx| {
                let users = users.clone();
                async move {
                    inner_store
                        .run_in_transaction(&tx_ctx, |nested| {
                            let users = users.clone();
                            async move { users.create(&nested, &mut user("alice")).await }
                        })
                        .await?;
                    Err(Error::internal("outer failure"))
                }
            })
            .await;
        assert!(result.is_err());

        // The inner call did not commit on its own.
        let (count, _) = users.list(&ctx, &QueryOptions::new()).await.unwrap();
        assert_eq!(count, 0);
    }

    /// Delegates to a memory backend and records which calls reach it.
    struct Recording {
        inner: MemoryBackend,
        calls: parking_lot::Mutex<Vec<&'static str>>,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryBackend::new(),
                calls: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().push(call);
        }
    }

    #[async_trait::async_trait]
    impl Backend for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn begin(&self) -> BackendResult<TxHandle> {
            self.record("begin");
            self.inner.begin().await
        }

        async fn begin_read(&self) -> BackendResult<TxHandle> {
            self.record("begin_read");
            self.inner.begin_read().await
        }

        async fn commit(&self, tx: &TxHandle) -> BackendResult<()> {
            self.record("commit");
            self.inner.commit(tx).await
        }

        async fn rollback(&self, tx: &TxHandle) -> BackendResult<()> {
            self.record("rollback");
            self.inner.rollback(tx).await
        }

        async fn insert(&self, tx: Option<&TxHandle>, table: Table, row: Row) -> BackendResult<Row> {
            self.inner.insert(tx, table, row).await
        }

        async fn upsert(&self, tx: Option<&TxHandle>, table: Table, row: Row) -> BackendResult<Row> {
            self.inner.upsert(tx, table, row).await
        }

        async fn delete(
            &self,
            tx: Option<&TxHandle>,
            table: Table,
            opts: &QueryOptions,
        ) -> BackendResult<u64> {
            self.inner.delete(tx, table, opts).await
        }

        async fn select(
            &self,
            tx: Option<&TxHandle>,
            table: Table,
            opts: &QueryOptions,
        ) -> BackendResult<Vec<Row>> {
            self.record(if tx.is_some() { "select in tx" } else { "select" });
            self.inner.select(tx, table, opts).await
        }

        async fn count(
            &self,
            tx: Option<&TxHandle>,
            table: Table,
            opts: &QueryOptions,
        ) -> BackendResult<u64> {
            self.record(if tx.is_some() { "count in tx" } else { "count" });
            self.inner.count(tx, table, opts).await
        }
    }

    #[tokio::test]
    async fn test_list_reads_page_and_count_from_one_snapshot() {
        let backend = Recording::new();
        let datastore = Datastore::new(Arc::clone(&backend) as Arc<dyn Backend>);
        let users = datastore.store::<User>();
        let ctx = Context::new();
        users.create(&ctx, &mut user("alice")).await.unwrap();

        let (count, items) = users.list(&ctx, &QueryOptions::new()).await.unwrap();
        assert_eq!((count, items.len()), (1, 1));
        assert_eq!(
            *backend.calls.lock(),
            ["begin_read", "select in tx", "count in tx", "commit"]
        );

        backend.calls.lock().clear();
        datastore
            .run_in_transaction(&ctx, |tx_ctx| {
                let users = users.clone();
                async move { users.list(&tx_ctx, &QueryOptions::new()).await.map(|_| ()) }
            })
            .await
            .unwrap();
        assert_eq!(
            *backend.calls.lock(),
            ["begin", "select in tx", "count in tx", "commit"]
        );
    }

    #[tokio::test]
    async fn test_failed_list_rolls_back_read_transaction() {
        let backend = Recording::new();
        let users = Datastore::new(Arc::clone(&backend) as Arc<dyn Backend>).store::<User>();

        let raw = QueryOptions::new().with_raw_condition("id > ?", [Value::from(1)]);
        let err = users.list(&Context::new(), &raw).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailure);
        assert_eq!(*backend.calls.lock(), ["begin_read", "select in tx", "rollback"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_context_inside_transaction_fails_instead_of_hanging() {
        let backend = MemoryBackend::new().with_lock_timeout(Duration::from_millis(50));
        let datastore = Datastore::new(Arc::new(backend));
        let users = datastore.store::<User>();
        let ctx = Context::new();

        let result: KeystoneResult<()> = datastore
            .run_in_transaction(&ctx, |tx_ctx| {
                let users = users.clone();
                let outer = ctx.clone();
                async move {
                    users.create(&tx_ctx, &mut user("alice")).await?;
                    users.list(&outer, &QueryOptions::new()).await?;
                    Ok(())
                }
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ReadFailure);

        let (count, _) = users.list(&ctx, &QueryOptions::new()).await.unwrap();
        assert_eq!(count, 0);
    }
}

//! Asynchronous connection pool.
//!
//! Bookkeeping lives in one mutex per pool and is never held across an
//! await. Waiting checkouts park on a `Notify`.

use std::collections::{HashMap, VecDeque};
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};
use crate::opts::{Opts, PoolKey};
use crate::pool::{TransactionId, is_expired};

use super::Conn;

struct IdleConn {
    conn: Conn,
    idle_since: Instant,
}

struct HeldConn {
    conn: Conn,
    generation: u64,
}

#[derive(Default)]
struct PoolInner {
    idle: VecDeque<IdleConn>,
    /// Open connections: idle, checked out and held
    total: usize,
    generation: u64,
    held: HashMap<TransactionId, HeldConn>,
}

enum Checkout {
    Idle(Conn),
    Create,
}

/// A bounded pool of connections sharing one set of options.
pub struct Pool {
    opts: Opts,
    inner: Mutex<PoolInner>,
    available: Notify,
}

impl Pool {
    pub fn new(opts: Opts) -> Self {
        Self {
            opts,
            inner: Mutex::new(PoolInner::default()),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Open connections, including checked-out and held ones.
    pub fn size(&self) -> usize {
        self.lock().total
    }

    /// Idle connections ready for checkout.
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// Check out a connection, waiting up to `Opts::pool_timeout`.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConn> {
        self.get_timeout(self.opts.pool_timeout).await
    }

    /// Check out a connection, waiting up to `timeout` for one to be released.
    ///
    /// A zero timeout fails with [`Error::PoolExhausted`] right away when the
    /// pool is at its maximum size and nothing is idle. A timeout too large
    /// to represent as an instant waits without limit.
    pub async fn get_timeout(self: &Arc<Self>, timeout: Duration) -> Result<PooledConn> {
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            // enabled before looking, so a release in between is not missed
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();
            let mut evicted = Vec::new();
            let checkout = {
                let mut inner = self.lock();
                self.prune(&mut inner, &mut evicted);
                if let Some(idle) = inner.idle.pop_back() {
                    Some((Checkout::Idle(idle.conn), inner.generation))
                } else if inner.total < self.opts.pool_max_size {
                    inner.total += 1;
                    Some((Checkout::Create, inner.generation))
                } else {
                    None
                }
            };
            drop(evicted);

            match checkout {
                Some((Checkout::Idle(mut conn), generation)) => {
                    if conn.ping().await.is_ok() {
                        debug!(connection_id = conn.connection_id(), "checkout idle connection");
                        return Ok(PooledConn::new(Arc::clone(self), conn, generation));
                    }
                    debug!(connection_id = conn.connection_id(), "idle connection failed ping");
                    self.discard(conn);
                }
                Some((Checkout::Create, generation)) => match Conn::new(self.opts.clone()).await {
                    Ok(conn) => {
                        debug!(connection_id = conn.connection_id(), "checkout new connection");
                        return Ok(PooledConn::new(Arc::clone(self), conn, generation));
                    }
                    Err(e) => {
                        self.release_slot();
                        return Err(e);
                    }
                },
                None => {
                    if timeout.is_zero() {
                        return Err(Error::PoolExhausted);
                    }
                    match deadline {
                        Some(deadline) => {
                            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                                return Err(Error::PoolExhausted);
                            }
                        }
                        None => notified.await,
                    }
                }
            }
        }
    }

    /// Check out the connection held for `transaction`, or a fresh one
    /// enlisted in it.
    pub async fn get_for_transaction(
        self: &Arc<Self>,
        transaction: TransactionId,
    ) -> Result<PooledConn> {
        let held = self.lock().held.remove(&transaction);
        if let Some(held) = held {
            let mut conn = PooledConn::new(Arc::clone(self), held.conn, held.generation);
            conn.transaction = Some(transaction);
            return Ok(conn);
        }
        let mut conn = self.get().await?;
        conn.enlist(transaction);
        Ok(conn)
    }

    /// Release the connection held for `transaction` back to the pool.
    pub async fn complete_transaction(&self, transaction: TransactionId) {
        let held = self.lock().held.remove(&transaction);
        if let Some(held) = held {
            debug!(?transaction, "transaction complete, releasing connection");
            self.check_in(held.conn, held.generation, None).await;
        }
    }

    /// Open connections until the pool holds `pool_min_size` of them.
    pub async fn warm_up(&self) -> Result<()> {
        loop {
            let generation = {
                let mut inner = self.lock();
                if inner.total >= self.opts.pool_min_size || inner.total >= self.opts.pool_max_size {
                    return Ok(());
                }
                inner.total += 1;
                inner.generation
            };
            match Conn::new(self.opts.clone()).await {
                Ok(conn) => self.return_idle(conn, generation),
                Err(e) => {
                    self.release_slot();
                    return Err(e);
                }
            }
        }
    }

    /// Close idle connections and retire checked-out ones on release.
    pub fn clear(&self) {
        let evicted: Vec<IdleConn> = {
            let mut inner = self.lock();
            inner.generation += 1;
            let evicted: Vec<IdleConn> = inner.idle.drain(..).collect();
            inner.total -= evicted.len();
            evicted
        };
        self.available.notify_waiters();
        debug!(evicted = evicted.len(), "pool cleared");
    }

    fn prune(&self, inner: &mut PoolInner, evicted: &mut Vec<Conn>) {
        let min_size = self.opts.pool_min_size;
        let mut i = 0;
        while i < inner.idle.len() {
            let idle = &inner.idle[i];
            let stale = idle.idle_since.elapsed() > self.opts.connection_idle_timeout
                && inner.total > min_size;
            if stale || is_expired(&self.opts, idle.conn.created_at()) {
                if let Some(idle) = inner.idle.remove(i) {
                    debug!(connection_id = idle.conn.connection_id(), "evict idle connection");
                    inner.total -= 1;
                    evicted.push(idle.conn);
                }
            } else {
                i += 1;
            }
        }
    }

    fn release_slot(&self) {
        self.lock().total -= 1;
        self.available.notify_one();
    }

    fn discard(&self, conn: Conn) {
        debug!(connection_id = conn.connection_id(), broken = conn.is_broken(), "discard connection");
        self.release_slot();
        drop(conn);
    }

    async fn check_in(&self, mut conn: Conn, generation: u64, transaction: Option<TransactionId>) {
        if let Some(transaction) = transaction
            && !conn.is_broken()
        {
            debug!(connection_id = conn.connection_id(), ?transaction, "hold connection for transaction");
            let replaced = self
                .lock()
                .held
                .insert(transaction, HeldConn { conn, generation });
            if let Some(replaced) = replaced {
                self.discard(replaced.conn);
            }
            return;
        }

        if conn.saw_fatal_server_error() {
            self.clear();
        }
        let current = self.lock().generation;
        if conn.is_broken() || generation != current || is_expired(&self.opts, conn.created_at()) {
            self.discard(conn);
            return;
        }
        if let Err(e) = conn.finish_pending_result().await {
            debug!(connection_id = conn.connection_id(), error = %e, "draining dropped result failed");
            self.discard(conn);
            return;
        }
        let reset = if self.opts.connection_reset {
            conn.reset().await
        } else if conn.in_transaction() {
            conn.query_drop("ROLLBACK").await.map(|_| ())
        } else {
            Ok(())
        };
        if let Err(e) = reset {
            debug!(connection_id = conn.connection_id(), error = %e, "reset on checkin failed");
            self.discard(conn);
            return;
        }
        self.return_idle(conn, generation);
    }

    fn return_idle(&self, conn: Conn, generation: u64) {
        let rejected = {
            let mut inner = self.lock();
            if generation != inner.generation || inner.idle.len() >= self.opts.effective_max_idle() {
                inner.total -= 1;
                Some(conn)
            } else {
                debug!(connection_id = conn.connection_id(), "checkin");
                inner.idle.push_back(IdleConn {
                    conn,
                    idle_since: Instant::now(),
                });
                None
            }
        };
        self.available.notify_one();
        drop(rejected);
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Pool")
            .field("size", &inner.total)
            .field("idle", &inner.idle.len())
            .field("held", &inner.held.len())
            .field("generation", &inner.generation)
            .finish()
    }
}

/// A connection checked out of a [`Pool`]. Returns itself on drop.
///
/// The check-in (reset and return to the idle set) runs on a spawned task.
#[derive(Debug)]
pub struct PooledConn {
    pool: Arc<Pool>,
    conn: ManuallyDrop<Conn>,
    generation: u64,
    transaction: Option<TransactionId>,
}

impl PooledConn {
    fn new(pool: Arc<Pool>, conn: Conn, generation: u64) -> Self {
        Self {
            pool,
            conn: ManuallyDrop::new(conn),
            generation,
            transaction: None,
        }
    }

    /// Keep this connection out of the idle set until
    /// [`Pool::complete_transaction`] is called for `transaction`.
    pub fn enlist(&mut self, transaction: TransactionId) {
        self.transaction = Some(transaction);
    }

    /// The transaction this connection is enlisted in.
    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    /// The pool this connection returns to.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}

impl Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // SAFETY: conn is never accessed after this
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        let pool = Arc::clone(&self.pool);
        let generation = self.generation;
        let transaction = self.transaction;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.check_in(conn, generation, transaction).await;
                });
            }
            // no runtime left to reset it on
            Err(_) => pool.discard(conn),
        }
    }
}

/// Pools keyed by connection identity.
///
/// Options that differ only in logging, timeouts or pool sizing map to the
/// same pool; the first options seen for a key configure it.
#[derive(Default)]
pub struct PoolManager {
    pools: Mutex<HashMap<PoolKey, Arc<Pool>>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool for `opts`, created on first use.
    pub fn get_pool(&self, opts: &Opts) -> Arc<Pool> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            pools
                .entry(opts.pool_key())
                .or_insert_with(|| Arc::new(Pool::new(opts.clone()))),
        )
    }

    /// Check out a connection from the pool for `opts`.
    pub async fn get_conn(&self, opts: &Opts) -> Result<PooledConn> {
        self.get_pool(opts).get().await
    }

    /// Clear the pool for `opts`, if one exists.
    pub fn clear_pool(&self, opts: &Opts) {
        let pool = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&opts.pool_key())
            .cloned();
        if let Some(pool) = pool {
            pool.clear();
        }
    }

    /// Clear every pool.
    pub fn clear_all_pools(&self) {
        let pools: Vec<Arc<Pool>> = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for pool in pools {
            pool.clear();
        }
    }
}

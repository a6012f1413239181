use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use gwdb::{
    r#async::{Connection, Driver, RecordStream},
    DatabaseConfig, Error, PoolConfig, Statement,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, trace, warn};

use crate::driver::TokioPostgresDriver;

struct Idle<C> {
    conn: C,
    since: Instant,
}

struct Shared<D: Driver> {
    name: String,
    driver: D,
    // one permit per connection that may exist, checked out or being opened
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Idle<D::Connection>>>,
    connections: AtomicU32,
    closed: AtomicBool,
    acquire_timeout: Duration,
    idle_timeout: Option<Duration>,
    test_on_checkout: bool,
    search_path: Option<String>,
}

impl<D: Driver> Shared<D> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pop_idle(&self) -> Option<Idle<D::Connection>> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_back()
    }

    fn discard(&self, conn: D::Connection, reason: &str) {
        drop(conn);
        self.connections.fetch_sub(1, Ordering::SeqCst);
        info!(target: "gwdb", pool = %self.name, reason, "connection closed");
    }

    fn check_in(&self, conn: D::Connection, poisoned: bool) {
        if poisoned {
            return self.discard(conn, "operation did not complete");
        }
        if conn.has_broken() {
            warn!(target: "gwdb", pool = %self.name, "discarding connection that cannot be reused");
            return self.discard(conn, "broken");
        }

        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        // checked under the lock: `shutdown` drains the queue after setting the flag
        if self.is_closed() {
            drop(idle);
            return self.discard(conn, "pool shut down");
        }
        idle.push_back(Idle {
            conn,
            since: Instant::now(),
        });
        drop(idle);
        trace!(target: "gwdb", pool = %self.name, "connection checked in");
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dropping it checks the connection back in. The connection is closed instead when it is
/// broken or still inside a transaction block, when the pool has been shut down, or when an
/// operation on it was cancelled before it completed, since the protocol state of such a
/// connection is unknown. After a shutdown every operation fails and closes the connection.
pub struct PooledConnection<D: Driver> {
    conn: Option<D::Connection>,
    pool: Arc<Shared<D>>,
    // set while an operation runs; stays set if its future is dropped early
    poisoned: bool,
    // released after `conn` is back in the idle queue
    permit: Option<OwnedSemaphorePermit>,
}

fn released() -> Error {
    Error::connection("connection was already returned to the pool")
}

fn shut_down() -> Error {
    Error::connection("pool has been shut down")
}

impl<D: Driver> PooledConnection<D> {
    fn new(pool: &Arc<Shared<D>>, conn: D::Connection, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            pool: Arc::clone(pool),
            poisoned: false,
            permit: Some(permit),
        }
    }

    /// Closes the connection once the pool has been shut down, so a handle that outlives
    /// the pool cannot keep using it.
    fn ensure_open(&mut self) -> Result<(), Error> {
        if self.pool.is_closed() {
            if let Some(conn) = self.conn.take() {
                self.pool.discard(conn, "pool shut down");
            }
            return Err(shut_down());
        }
        Ok(())
    }

    /// Closes the connection and hands back its slot without releasing it.
    fn reclaim(mut self, reason: &str) -> Option<OwnedSemaphorePermit> {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn, reason);
        }
        self.permit.take()
    }

    pub async fn query(&mut self, statement: &Statement) -> Result<RecordStream, Error> {
        self.ensure_open()?;
        let conn = self.conn.as_mut().ok_or_else(released)?;
        self.poisoned = true;
        let result = conn.query(statement).await;
        self.poisoned = false;
        result
    }

    pub async fn execute(&mut self, statement: &Statement) -> Result<u64, Error> {
        self.ensure_open()?;
        let conn = self.conn.as_mut().ok_or_else(released)?;
        self.poisoned = true;
        let result = conn.execute(statement).await;
        self.poisoned = false;
        result
    }

    pub async fn batch_execute(&mut self, sql: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let conn = self.conn.as_mut().ok_or_else(released)?;
        self.poisoned = true;
        let result = conn.batch_execute(sql).await;
        self.poisoned = false;
        result
    }

    async fn is_valid(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        let conn = self.conn.as_mut().ok_or_else(released)?;
        self.poisoned = true;
        let result = conn.is_valid().await;
        self.poisoned = false;
        result
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn, self.poisoned);
        }
    }
}

/// Live and idle connection counts at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

/// A bounded pool of connections created on demand by an async [`Driver`].
///
/// Waiters are served in arrival order. A connection that fails to open frees its slot
/// immediately, so a waiter behind it can try again.
pub struct ConnectionPool<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl ConnectionPool<TokioPostgresDriver> {
    /// Validates the credentials and pool limits and builds a Postgres pool. No connection is
    /// opened until the first [`acquire`](Self::acquire).
    pub fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
        let credentials = config.credentials()?;
        let mut pool = config.pool.clone();
        if pool.name.is_none() {
            pool.name = Some(credentials.database.clone());
        }
        let driver = TokioPostgresDriver::from_credentials(&credentials, &pool);
        Self::new(driver, &pool)
    }
}

impl<D: Driver> ConnectionPool<D> {
    pub fn new(driver: D, config: &PoolConfig) -> Result<Self, Error> {
        config.validate()?;

        let shared = Arc::new(Shared {
            name: config.name.clone().unwrap_or_else(|| "gwdb".to_string()),
            driver,
            permits: Arc::new(Semaphore::new(config.max_size as usize)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_size as usize)),
            connections: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            acquire_timeout: config.acquire_timeout(),
            idle_timeout: config.idle_timeout(),
            test_on_checkout: config.test_on_checkout,
            search_path: config.search_path_statement(),
        });

        info!(
            target: "gwdb",
            pool = %shared.name,
            max_size = config.max_size,
            "connection pool initialized"
        );

        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Checks out an idle connection, opens a new one while under the size limit, or waits
    /// for one to be released.
    ///
    /// Only the wait for a free slot is bounded by the acquire timeout, which surfaces as
    /// [`Error::PoolExhausted`]. Opening a connection is bounded by the driver's own connect
    /// timeout and fails with [`Error::Connection`].
    pub async fn acquire(&self) -> Result<PooledConnection<D>, Error> {
        let shared = &self.shared;
        let started = Instant::now();
        let waiting = Arc::clone(&shared.permits).acquire_owned();
        let permit = match tokio::time::timeout(shared.acquire_timeout, waiting).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(shut_down()),
            Err(_) => {
                warn!(
                    target: "gwdb",
                    pool = %shared.name,
                    timeout = ?shared.acquire_timeout,
                    "timed out waiting for a connection"
                );
                return Err(Error::PoolExhausted(shared.acquire_timeout));
            }
        };

        let mut permit = permit;
        while let Some(idle) = shared.pop_idle() {
            if matches!(shared.idle_timeout, Some(limit) if idle.since.elapsed() > limit) {
                shared.discard(idle.conn, "idle timeout");
                continue;
            }
            let mut conn = PooledConnection::new(shared, idle.conn, permit);
            if shared.test_on_checkout {
                if let Err(error) = conn.is_valid().await {
                    warn!(target: "gwdb", pool = %shared.name, %error, "idle connection failed validation");
                    permit = conn.reclaim("failed validation").ok_or_else(released)?;
                    continue;
                }
            }
            trace!(target: "gwdb", pool = %shared.name, waited = ?started.elapsed(), "connection checked out");
            return Ok(conn);
        }

        let conn = shared.driver.connect().await.map_err(|error| {
            warn!(target: "gwdb", pool = %shared.name, %error, "failed to open connection");
            error
        })?;
        shared.connections.fetch_add(1, Ordering::SeqCst);
        info!(target: "gwdb", pool = %shared.name, "connection created");

        let mut conn = PooledConnection::new(shared, conn, permit);
        if let Some(sql) = &shared.search_path {
            if let Err(error) = conn.batch_execute(sql).await {
                conn.poisoned = true;
                return Err(error);
            }
        }
        trace!(target: "gwdb", pool = %shared.name, waited = ?started.elapsed(), "connection checked out");
        Ok(conn)
    }

    /// Checks a connection back in. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<D>) {
        drop(conn);
    }

    /// Closes every idle connection and refuses further checkouts. Waiting callers fail with
    /// [`Error::Connection`]. A connection that is checked out fails its next operation and
    /// is closed then, or when it comes back, whichever is first. Calling it again does
    /// nothing.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.permits.close();
        let idle: Vec<_> = shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for idle in idle {
            shared.discard(idle.conn, "pool shut down");
        }
        info!(target: "gwdb", pool = %shared.name, "connection pool shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn state(&self) -> PoolState {
        let idle = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        PoolState {
            connections: self.shared.connections.load(Ordering::SeqCst),
            idle_connections: idle as u32,
        }
    }
}

impl<D: Driver> Drop for ConnectionPool<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<D: Driver> fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use gwdb::Value;

    use super::*;
    use crate::testing::{FakeDriver, Reply};

    fn config(max_size: u32, acquire_timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            max_size,
            acquire_timeout_ms,
            search_path: Vec::new(),
            ..PoolConfig::default()
        }
    }

    fn select() -> Statement {
        Statement::bind("SELECT 1", ()).unwrap()
    }

    #[tokio::test]
    async fn connections_are_created_lazily_up_to_the_ceiling() {
        let driver = FakeDriver::new();
        let pool = ConnectionPool::new(driver.clone(), &config(2, 100)).unwrap();
        assert_eq!(driver.created(), 0);

        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();
        assert_eq!(pool.state().connections, 2);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted(_)), "{}", err);

        pool.release(first);
        pool.acquire().await.unwrap();
        assert_eq!(driver.created(), 2);
    }

    #[tokio::test]
    async fn waiter_gets_the_released_connection() {
        let driver = FakeDriver::new();
        let pool = Arc::new(ConnectionPool::new(driver.clone(), &config(1, 2_000)).unwrap());

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(driver.created(), 1);
    }

    #[tokio::test]
    async fn broken_connection_is_replaced() {
        let driver = FakeDriver::new();
        driver.on("pg_terminate_backend", |_| Reply::Break);
        let pool = ConnectionPool::new(driver.clone(), &config(1, 1_000)).unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let terminate = Statement::bind("SELECT pg_terminate_backend(pg_backend_pid())", ()).unwrap();
        let err = conn.execute(&terminate).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "{}", err);
        drop(conn);
        assert_eq!(driver.live(), 0);

        let mut conn = pool.acquire().await.unwrap();
        conn.execute(&select()).await.unwrap();
        assert_eq!(driver.created(), 2);
    }

    #[tokio::test]
    async fn failed_connect_frees_its_slot() {
        let driver = FakeDriver::new();
        driver.refuse_connections(true);
        let pool = ConnectionPool::new(driver.clone(), &config(1, 1_000)).unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "{}", err);
        assert!(err.to_string().contains("connection refused"), "{}", err);

        driver.refuse_connections(false);
        pool.acquire().await.unwrap();
        assert_eq!(pool.state().connections, 1);
    }

    #[tokio::test]
    async fn cancelled_acquire_leaves_no_connection_behind() {
        let driver = FakeDriver::new();
        driver.connect_delay(Duration::from_secs(5));
        let pool = ConnectionPool::new(driver.clone(), &config(1, 1_000)).unwrap();

        let attempt = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(attempt.is_err());
        assert_eq!(pool.state().connections, 0);

        driver.connect_delay(Duration::from_millis(0));
        pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn search_path_is_set_once_per_connection() {
        let driver = FakeDriver::new();
        let pool_config = PoolConfig {
            max_size: 1,
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::new(driver.clone(), &pool_config).unwrap();

        for _ in 0..3 {
            let mut conn = pool.acquire().await.unwrap();
            conn.execute(&select()).await.unwrap();
        }
        assert_eq!(
            driver.session_log(),
            vec!["SET search_path = curation, extsrc, odestatic, production".to_string()]
        );
    }

    #[tokio::test]
    async fn shutdown_closes_connections_and_is_idempotent() {
        let driver = FakeDriver::new();
        let pool = ConnectionPool::new(driver.clone(), &config(2, 1_000)).unwrap();

        let held = pool.acquire().await.unwrap();
        drop(pool.acquire().await.unwrap());
        assert_eq!(driver.live(), 2);

        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_closed());
        assert_eq!(driver.live(), 1);

        drop(held);
        assert_eq!(driver.live(), 0);
        assert_eq!(pool.state(), PoolState { connections: 0, idle_connections: 0 });

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "{}", err);
    }

    #[tokio::test]
    async fn checked_out_connection_fails_after_shutdown() {
        let driver = FakeDriver::new();
        let pool = ConnectionPool::new(driver.clone(), &config(1, 1_000)).unwrap();

        let mut conn = pool.acquire().await.unwrap();
        pool.shutdown();
        assert_eq!(driver.live(), 1);

        let err = conn.execute(&select()).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "{}", err);
        assert_eq!(driver.live(), 0);
        assert!(conn.execute(&select()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn check_ins_racing_shutdown_leave_nothing_open() {
        let driver = FakeDriver::new();
        let pool = Arc::new(ConnectionPool::new(driver.clone(), &config(4, 1_000)).unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    while let Ok(conn) = pool.acquire().await {
                        tokio::task::yield_now().await;
                        drop(conn);
                    }
                })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(driver.live(), 0);
        assert_eq!(pool.state(), PoolState { connections: 0, idle_connections: 0 });
    }

    #[tokio::test]
    async fn connection_left_in_a_transaction_is_discarded() {
        let driver = FakeDriver::new();
        driver.on("1/0", |_| {
            Reply::Fail(Error::Query {
                message: "division by zero".into(),
                code: Some("22012".into()),
                source: None,
            })
        });
        let pool = ConnectionPool::new(driver.clone(), &config(1, 1_000)).unwrap();

        let mut conn = pool.acquire().await.unwrap();
        conn.batch_execute("BEGIN").await.unwrap();
        let division = Statement::bind("SELECT 1/0", ()).unwrap();
        assert!(conn.execute(&division).await.is_err());
        drop(conn);
        assert_eq!(driver.live(), 0);

        let mut conn = pool.acquire().await.unwrap();
        conn.batch_execute("BEGIN").await.unwrap();
        conn.batch_execute("COMMIT").await.unwrap();
        drop(conn);
        assert_eq!(driver.created(), 2);
        assert_eq!(pool.state().idle_connections, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_exceed_the_ceiling() {
        let driver = FakeDriver::new();
        driver.on("SELECT", |_| Reply::rows(&["one"], vec![vec![Value::Int(1)]]));
        let pool = Arc::new(ConnectionPool::new(driver.clone(), &config(3, 5_000)).unwrap());
        let served = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    for _ in 0..5 {
                        let mut conn = pool.acquire().await.unwrap();
                        conn.query(&select()).await.unwrap();
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        served.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(served.load(Ordering::SeqCst), 40);
        assert!(driver.peak() <= 3, "peak was {}", driver.peak());
    }

    #[tokio::test]
    async fn zero_max_size_is_rejected() {
        let err = ConnectionPool::new(FakeDriver::new(), &config(0, 1_000)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{}", err);
    }
}

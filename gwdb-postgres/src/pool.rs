use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use gwdb::{
    sync::{Connection, Driver},
    DatabaseConfig, Error, PoolConfig,
};
use r2d2_postgres::r2d2::{
    self, event, CustomizeConnection, HandleError, HandleEvent, ManageConnection,
};
use tracing::{info, trace, warn};

use crate::driver::PostgresDriver;

/// A connection checked out of a [`ConnectionPool`]. Dropping it checks the connection back
/// in, or closes it when it is broken, still inside a transaction block, or the pool has been
/// shut down.
pub type PooledConnection<D> = r2d2::PooledConnection<DriverManager<D>>;

// Longest single wait inside `acquire`. r2d2 only opens a replacement for a discarded
// connection when someone asks for one, so waiters re-ask periodically.
const ACQUIRE_SLICE: Duration = Duration::from_millis(250);

pub(crate) struct Shared {
    name: String,
    closed: AtomicBool,
    last_connect_error: Mutex<Option<(Instant, String)>>,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn connect_error_since(&self, start: Instant) -> Option<String> {
        let last = self
            .last_connect_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &*last {
            Some((at, message)) if *at >= start => Some(message.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Adapts a [`Driver`] to r2d2.
pub struct DriverManager<D> {
    driver: D,
    shared: Arc<Shared>,
}

impl<D: Driver> ManageConnection for DriverManager<D> {
    type Connection = D::Connection;
    type Error = Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if self.shared.is_closed() {
            return Err(Error::connection("pool has been shut down"));
        }
        self.driver.connect()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.is_valid()
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        if self.shared.is_closed() {
            return true;
        }
        let broken = conn.has_broken();
        if broken {
            warn!(
                target: "gwdb",
                pool = %self.shared.name,
                "discarding connection that cannot be reused"
            );
        }
        broken
    }
}

#[derive(Debug)]
struct ErrorHandler(Arc<Shared>);

impl HandleError<Error> for ErrorHandler {
    fn handle_error(&self, error: Error) {
        if self.0.is_closed() {
            return;
        }
        warn!(target: "gwdb", pool = %self.0.name, %error, "failed to open connection");
        *self
            .0
            .last_connect_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((Instant::now(), error.to_string()));
    }
}

#[derive(Debug)]
struct EventHandler(Arc<Shared>);

impl HandleEvent for EventHandler {
    fn handle_acquire(&self, event: event::AcquireEvent) {
        info!(target: "gwdb", pool = %self.0.name, id = event.connection_id(), "connection created");
    }

    fn handle_release(&self, event: event::ReleaseEvent) {
        info!(
            target: "gwdb",
            pool = %self.0.name,
            id = event.connection_id(),
            age = ?event.age(),
            "connection closed"
        );
    }

    fn handle_checkout(&self, event: event::CheckoutEvent) {
        trace!(
            target: "gwdb",
            pool = %self.0.name,
            id = event.connection_id(),
            waited = ?event.duration(),
            "connection checked out"
        );
    }

    fn handle_timeout(&self, event: event::TimeoutEvent) {
        trace!(target: "gwdb", pool = %self.0.name, timeout = ?event.timeout(), "still waiting");
    }

    fn handle_checkin(&self, event: event::CheckinEvent) {
        trace!(
            target: "gwdb",
            pool = %self.0.name,
            id = event.connection_id(),
            held = ?event.duration(),
            "connection checked in"
        );
    }
}

/// Runs session setup once on every new physical connection.
#[derive(Debug)]
struct SessionSetup {
    search_path: Option<String>,
}

impl<C: Connection> CustomizeConnection<C, Error> for SessionSetup {
    fn on_acquire(&self, conn: &mut C) -> Result<(), Error> {
        match &self.search_path {
            Some(sql) => conn.batch_execute(sql),
            None => Ok(()),
        }
    }
}

/// Live and idle connection counts at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

/// A bounded pool of connections created on demand by a [`Driver`].
pub struct ConnectionPool<D: Driver> {
    pool: RwLock<Option<r2d2::Pool<DriverManager<D>>>>,
    shared: Arc<Shared>,
    acquire_timeout: Duration,
}

impl ConnectionPool<PostgresDriver> {
    /// Validates the credentials and pool limits and builds a Postgres pool. No connection is
    /// opened until the first [`acquire`](Self::acquire).
    pub fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
        let credentials = config.credentials()?;
        let mut pool = config.pool.clone();
        if pool.name.is_none() {
            pool.name = Some(credentials.database.clone());
        }
        let driver = PostgresDriver::from_credentials(&credentials, &pool);
        Self::new(driver, &pool)
    }
}

impl<D: Driver> ConnectionPool<D> {
    pub fn new(driver: D, config: &PoolConfig) -> Result<Self, Error> {
        config.validate()?;

        let shared = Arc::new(Shared {
            name: config.name.clone().unwrap_or_else(|| "gwdb".to_string()),
            closed: AtomicBool::new(false),
            last_connect_error: Mutex::new(None),
        });
        let manager = DriverManager {
            driver,
            shared: Arc::clone(&shared),
        };
        let pool = r2d2::Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(config.acquire_timeout())
            .test_on_check_out(config.test_on_checkout)
            .idle_timeout(config.idle_timeout())
            .error_handler(Box::new(ErrorHandler(Arc::clone(&shared))))
            .event_handler(Box::new(EventHandler(Arc::clone(&shared))))
            .connection_customizer(Box::new(SessionSetup {
                search_path: config.search_path_statement(),
            }))
            .build_unchecked(manager);

        info!(
            target: "gwdb",
            pool = %shared.name,
            max_size = config.max_size,
            "connection pool initialized"
        );

        Ok(Self {
            pool: RwLock::new(Some(pool)),
            shared,
            acquire_timeout: config.acquire_timeout(),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    fn handle(&self) -> Result<r2d2::Pool<DriverManager<D>>, Error> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::connection("pool has been shut down"))
    }

    /// Checks out an idle connection, opens a new one while under the size limit, or waits
    /// for one to be released.
    ///
    /// Waiting is bounded by the acquire timeout. A failed connection attempt during the wait
    /// is reported as [`Error::Connection`]; otherwise the timeout surfaces as
    /// [`Error::PoolExhausted`].
    pub fn acquire(&self) -> Result<PooledConnection<D>, Error> {
        let pool = self.handle()?;
        let start = Instant::now();
        let deadline = start + self.acquire_timeout;

        loop {
            let now = Instant::now();
            let slice = deadline.saturating_duration_since(now).min(ACQUIRE_SLICE);
            if slice.is_zero() {
                break;
            }
            match pool.get_timeout(slice) {
                Ok(conn) => return Ok(conn),
                Err(_) if self.shared.is_closed() => {
                    return Err(Error::connection("pool has been shut down"));
                }
                Err(_) => {
                    if let Some(message) = self.shared.connect_error_since(start) {
                        return Err(Error::connection(message));
                    }
                }
            }
        }

        warn!(
            target: "gwdb",
            pool = %self.shared.name,
            timeout = ?self.acquire_timeout,
            "timed out waiting for a connection"
        );
        Err(Error::PoolExhausted(self.acquire_timeout))
    }

    /// Checks a connection back in. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<D>) {
        drop(conn);
    }

    /// Closes every idle connection and refuses further checkouts. A cursor whose connection
    /// is checked out fails its next operation and closes the connection then; connections
    /// held outside a cursor are closed as they come back. Calling it again does nothing.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            // checked back in right away, and discarded because the pool is closed
            while let Some(conn) = pool.try_get() {
                drop(conn);
            }
            info!(target: "gwdb", pool = %self.shared.name, "connection pool shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn state(&self) -> PoolState {
        match &*self.pool.read().unwrap_or_else(PoisonError::into_inner) {
            Some(pool) => {
                let state = pool.state();
                PoolState {
                    connections: state.connections,
                    idle_connections: state.idle_connections,
                }
            }
            None => PoolState {
                connections: 0,
                idle_connections: 0,
            },
        }
    }
}

impl<D: Driver> Drop for ConnectionPool<D> {
    fn drop(&mut self) {
        self.shutdown();
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

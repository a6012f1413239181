use crate::{Error, Record, Statement};

/// Lazily fetched result rows. Not restartable: once consumed, run the statement again.
pub type Rows<'a> = Box<dyn Iterator<Item = Result<Record, Error>> + 'a>;

/// Represents a database driver that can be shared between threads, and can therefore back
/// a connection pool.
pub trait Driver: Send + Sync + 'static {
    /// The type of connection created by this driver.
    type Connection: Connection;

    /// Create a connection to the database. Note that connections are intended to be used
    /// by one caller at a time since most database connections are not thread-safe.
    fn connect(&self) -> Result<Self::Connection, Error>;
}

/// Represents a connection to a database.
pub trait Connection: Send + 'static {
    /// Execute a statement that is expected to return rows, such as a `SELECT` statement or
    /// an `INSERT ... RETURNING`.
    fn query(&mut self, statement: &Statement) -> Result<Rows<'_>, Error>;

    /// Execute a statement that is expected to update some rows.
    fn execute(&mut self, statement: &Statement) -> Result<u64, Error>;

    /// Run one or more parameterless statements, such as session setup.
    fn batch_execute(&mut self, sql: &str) -> Result<(), Error>;

    /// Round-trip to the server to check the connection still works.
    fn is_valid(&mut self) -> Result<(), Error>;

    /// Whether the connection must not be handed to another caller: a previous failure left
    /// it unusable, or it is still inside a transaction block. Such connections are closed
    /// instead of being returned to a pool.
    fn has_broken(&self) -> bool;
}

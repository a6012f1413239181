use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;

use crate::{Error, Record, Statement};

pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Record, Error>> + Send>>;
pub type BatchStream<'a> = Pin<Box<dyn Stream<Item = Result<Vec<Record>, Error>> + Send + 'a>>;

/// Represents a database driver that can be shared between tasks, and can therefore back
/// a connection pool.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// The type of connection created by this driver.
    type Connection: Connection;

    /// Create a connection to the database. Note that connections are intended to be used
    /// by one task at a time since most database protocols are not safe for concurrent use.
    async fn connect(&self) -> Result<Self::Connection, Error>;
}

/// Represents a connection to a database
#[async_trait]
pub trait Connection: Send + 'static {
    /// Execute a statement that is expected to return rows. The returned stream fetches
    /// rows as it is polled.
    async fn query(&mut self, statement: &Statement) -> Result<RecordStream, Error>;

    /// Execute a statement that is expected to update some rows.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, Error>;

    /// Run one or more parameterless statements, such as session setup.
    async fn batch_execute(&mut self, sql: &str) -> Result<(), Error>;

    /// Round-trip to the server to check the connection still works.
    async fn is_valid(&mut self) -> Result<(), Error>;

    /// Whether the connection must not be handed to another caller: a previous failure left
    /// it unusable, or it is still inside a transaction block. Such connections are closed
    /// instead of being returned to a pool.
    fn has_broken(&self) -> bool;
}

//! Async Postgres GWDB Driver
//!
//! This crate implements the async GWDB API on top of the `tokio-postgres` crate, with a
//! bounded connection pool and scoped cursors.
//!
//! ```rust,no_run
//! use futures_util::stream::TryStreamExt;
//! use gwdb::prelude::*;
//! use gwdb_tokio_postgres::{ConnectionPool, PooledCursor};
//!
//! # async fn go() -> Result<(), GwdbError> {
//! let config = Config::load("gwdb.toml")?;
//! let pool = ConnectionPool::connect(&config.database)?;
//! let mut cursor = PooledCursor::open(&pool).await?;
//! let mut rows = cursor
//!     .query("SELECT sp_name, sp_id FROM odestatic.species WHERE sp_id = ?", params![1])
//!     .await?;
//! while let Some(record) = rows.try_next().await? {
//!     println!("{:?}", record.get::<String, _>("sp_name")?);
//! }
//! cursor.close();
//! pool.shutdown();
//! # Ok(())
//! # }
//! ```

mod cursor;
mod driver;
mod pool;

#[cfg(test)]
mod testing;

pub use cursor::PooledCursor;
pub use driver::{TokioPostgresConnection, TokioPostgresDriver};
pub use pool::{ConnectionPool, PoolState, PooledConnection};

//! The GWDB API provides a driver-agnostic programming interface for running parameterized
//! queries against the GeneWeaver database and fetching normalized results.
//!
//! Drivers exist for the blocking `postgres` client (`gwdb-postgres`) and for
//! `tokio-postgres` (`gwdb-tokio-postgres`). Both hand out pooled cursors that bind
//! parameters server-side and return [`Record`]s whose values are already mapped onto the
//! fixed set of [`Value`] types.
//!
//! The following example demonstrates how GWDB can be used to run a trivial query against
//! Postgres.
//!
//! ```rust,ignore
//! use gwdb::prelude::*;
//! use gwdb_postgres::{ConnectionPool, PooledCursor, PostgresDriver};
//!
//! let config = Config::load("gwdb.toml")?;
//! let pool = ConnectionPool::connect(&config.database)?;
//! let mut cursor = PooledCursor::open(&pool)?;
//! for record in cursor.query("SELECT sp_name, sp_id FROM odestatic.species WHERE sp_id = ?", params![1])? {
//!     let record = record?;
//!     println!("{:?}", record.get::<String, _>("sp_name"));
//! }
//! ```

pub mod config;
pub mod error;
pub mod params;
pub mod record;
pub mod shape;
pub mod transaction;
pub mod value;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "async")]
pub mod r#async;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use config::{Config, Credentials, DatabaseConfig, PoolConfig};
pub use error::{BoxDynError, Error};
pub use params::{Params, Statement};
pub use record::{ColumnIndex, Record};
pub use value::{FromValue, Value};

pub mod prelude {
    pub use super::{
        named_params, params, Config, Error as GwdbError, FromValue, Params, Record, Statement,
        Value,
    };
}

//! Postgres GWDB Driver
//!
//! This crate implements the blocking GWDB API on top of the `postgres` crate, with
//! connections pooled by `r2d2`, and the named-query catalog for the GeneWeaver schema.
//!
//! ```rust,no_run
//! use gwdb::prelude::*;
//! use gwdb_postgres::GeneWeaver;
//!
//! # fn main() -> Result<(), GwdbError> {
//! let config = Config::load("gwdb.toml")?;
//! let gw = GeneWeaver::connect(&config.database)?;
//! let species = gw.species(false)?;
//! println!("{:?}", species.get("Mus musculus"));
//! gw.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod catalog;
mod cursor;
mod driver;
mod pool;

#[cfg(test)]
mod testing;

pub use catalog::GeneWeaver;
pub use cursor::PooledCursor;
pub use driver::{PostgresConnection, PostgresDriver};
pub use pool::{ConnectionPool, DriverManager, PoolState, PooledConnection};

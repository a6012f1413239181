use std::sync::Arc;

use gwdb::{
    sync::{Connection, Driver, Rows},
    Error, FromValue, Params, Record, Statement, Value,
};
use tracing::{error, trace, warn};

use crate::pool::{ConnectionPool, PooledConnection, Shared};

fn observe<T>(result: Result<T, Error>, sql: &str) -> Result<T, Error> {
    if let Err(err) = &result {
        report(err, sql);
    }
    result
}

fn report(err: &Error, sql: &str) {
    match err {
        Error::Schema { .. } => error!(target: "gwdb", error = %err, sql, "schema mismatch"),
        _ => warn!(target: "gwdb", error = %err, sql, "query failed"),
    }
}

/// A connection checked out for one scoped unit of work.
///
/// Every statement binds its parameters server side. The connection goes back to the pool
/// on [`close`](Self::close) or when the cursor is dropped, whichever comes first. It is
/// closed instead if it is still inside a transaction block, so open transactions are
/// rolled back by the server.
pub struct PooledCursor<D: Driver> {
    conn: Option<PooledConnection<D>>,
    pool: Arc<Shared>,
}

impl<D: Driver> PooledCursor<D> {
    pub fn open(pool: &ConnectionPool<D>) -> Result<Self, Error> {
        let conn = pool.acquire()?;
        trace!(target: "gwdb", pool = pool.name(), "cursor opened");
        Ok(Self {
            conn: Some(conn),
            pool: pool.shared(),
        })
    }

    fn connection(&mut self) -> Result<&mut D::Connection, Error> {
        if self.pool.is_closed() {
            // closed on check-in, since the pool is shut down
            self.conn = None;
            return Err(Error::connection("pool has been shut down"));
        }
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::query("cursor is closed"))
    }

    /// Runs a statement and returns the number of rows it affected.
    pub fn execute(&mut self, template: &str, params: impl Into<Params>) -> Result<u64, Error> {
        let statement = observe(Statement::bind(template, params), template)?;
        self.execute_statement(&statement)
    }

    pub fn execute_statement(&mut self, statement: &Statement) -> Result<u64, Error> {
        let result = self.connection().and_then(|conn| conn.execute(statement));
        observe(result, statement.sql())
    }

    /// Runs a statement and returns its rows as they are fetched.
    ///
    /// The rows can be consumed once; run the statement again to re-read them.
    pub fn query(&mut self, template: &str, params: impl Into<Params>) -> Result<Rows<'_>, Error> {
        let statement = observe(Statement::bind(template, params), template)?;
        self.query_statement(statement)
    }

    pub fn query_statement(&mut self, statement: Statement) -> Result<Rows<'_>, Error> {
        let conn = observe(self.connection(), statement.sql())?;
        let rows = observe(conn.query(&statement), statement.sql())?;
        let sql = statement.into_parts().0;
        Ok(Box::new(rows.inspect(move |row| {
            if let Err(err) = row {
                report(err, &sql);
            }
        })))
    }

    pub fn fetch_all(
        &mut self,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<Vec<Record>, Error> {
        self.query(template, params)?.collect()
    }

    /// First row, or `None` when the statement returned nothing.
    pub fn fetch_optional(
        &mut self,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<Option<Record>, Error> {
        self.query(template, params)?.next().transpose()
    }

    /// First column of the first row, or `None` when the statement returned nothing.
    pub fn fetch_scalar<T: FromValue>(
        &mut self,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<Option<T>, Error> {
        match self.fetch_optional(template, params)? {
            Some(record) => record.get(0).map(Some),
            None => Ok(None),
        }
    }

    /// Inserts every row with a single statement: `prefix` followed by one `row_template`
    /// tuple per row. Returns the number of rows inserted; an empty batch runs nothing.
    pub fn execute_values(
        &mut self,
        prefix: &str,
        row_template: &str,
        rows: Vec<Vec<Value>>,
    ) -> Result<u64, Error> {
        if rows.is_empty() {
            return Ok(0);
        }
        let statement = observe(Statement::bind_rows(prefix, row_template, rows), prefix)?;
        self.execute_statement(&statement)
    }

    /// Returns the connection to the pool. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            trace!(target: "gwdb", "cursor closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

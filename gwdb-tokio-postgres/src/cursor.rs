use futures_util::stream::{StreamExt, TryStreamExt};
use gwdb::{
    r#async::{BatchStream, Driver, RecordStream},
    Error, FromValue, Params, Record, Statement, Value,
};
use tracing::{error, trace, warn};

use crate::pool::{ConnectionPool, PooledConnection};

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
/// The connection goes back to the pool on [`close`](Self::close) or when the cursor is
/// dropped. It is closed instead when one of the cursor's operations was still pending, or
/// when a transaction block it opened is still open.
pub struct PooledCursor<D: Driver> {
    conn: Option<PooledConnection<D>>,
}

impl<D: Driver> PooledCursor<D> {
    pub async fn open(pool: &ConnectionPool<D>) -> Result<Self, Error> {
        let conn = pool.acquire().await?;
        trace!(target: "gwdb", pool = pool.name(), "cursor opened");
        Ok(Self { conn: Some(conn) })
    }

    fn connection(&mut self) -> Result<&mut PooledConnection<D>, Error> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::query("cursor is closed"))
    }

    /// Runs a statement and returns the number of rows it affected.
    pub async fn execute(
        &mut self,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<u64, Error> {
        let statement = observe(Statement::bind(template, params), template)?;
        self.execute_statement(&statement).await
    }

    pub async fn execute_statement(&mut self, statement: &Statement) -> Result<u64, Error> {
        let conn = observe(self.connection(), statement.sql())?;
        observe(conn.execute(statement).await, statement.sql())
    }

    /// Runs a statement and returns a stream of its rows.
    ///
    /// The stream owns its rows and stays valid after the cursor is closed.
    pub async fn query(
        &mut self,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<RecordStream, Error> {
        let statement = observe(Statement::bind(template, params), template)?;
        self.query_statement(statement).await
    }

    pub async fn query_statement(&mut self, statement: Statement) -> Result<RecordStream, Error> {
        let conn = observe(self.connection(), statement.sql())?;
        let rows = observe(conn.query(&statement).await, statement.sql())?;
        let sql = statement.into_parts().0;
        Ok(Box::pin(rows.inspect_err(move |err| report(err, &sql))))
    }

    /// Runs a statement and returns its rows in batches of at most `capacity`, as they
    /// arrive.
    pub async fn query_batches(
        &mut self,
        template: &str,
        params: impl Into<Params>,
        capacity: usize,
    ) -> Result<BatchStream<'static>, Error> {
        let rows = self.query(template, params).await?;
        Ok(Box::pin(
            rows.ready_chunks(capacity.max(1))
                .map(|batch| batch.into_iter().collect::<Result<Vec<_>, _>>()),
        ))
    }

    pub async fn fetch_all(
        &mut self,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<Vec<Record>, Error> {
        self.query(template, params).await?.try_collect().await
    }

    /// First row, or `None` when the statement returned nothing.
    pub async fn fetch_optional(
        &mut self,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<Option<Record>, Error> {
        self.query(template, params).await?.try_next().await
    }

    /// First column of the first row, or `None` when the statement returned nothing.
    pub async fn fetch_scalar<T: FromValue>(
        &mut self,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<Option<T>, Error> {
        match self.fetch_optional(template, params).await? {
            Some(record) => record.get(0).map(Some),
            None => Ok(None),
        }
    }

    /// Inserts every row with a single statement: `prefix` followed by one `row_template`
    /// tuple per row. Returns the number of rows inserted; an empty batch runs nothing.
    pub async fn execute_values(
        &mut self,
        prefix: &str,
        row_template: &str,
        rows: Vec<Vec<Value>>,
    ) -> Result<u64, Error> {
        if rows.is_empty() {
            return Ok(0);
        }
        let statement = observe(Statement::bind_rows(prefix, row_template, rows), prefix)?;
        self.execute_statement(&statement).await
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

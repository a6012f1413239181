use std::sync::Arc;

use gwdb::{
    postgres::{
        classify, classify_connect, column_names, poisons_connection, record_from_row, PgParam,
    },
    sync::Rows,
    transaction::TransactionState,
    Credentials, Error, PoolConfig, Statement,
};
use r2d2_postgres::{
    postgres::{self, fallible_iterator::FallibleIterator, types::ToSql, Client, NoTls},
    r2d2::ManageConnection,
    PostgresConnectionManager,
};

/// Opens blocking connections with the `postgres` client.
pub struct PostgresDriver {
    manager: PostgresConnectionManager<NoTls>,
    target: String,
}

impl PostgresDriver {
    pub fn new(config: postgres::Config) -> Self {
        let target = describe(&config);
        Self {
            manager: PostgresConnectionManager::new(config, NoTls),
            target,
        }
    }

    /// Accepts either a `postgres://` URL or a key/value connection string.
    pub fn from_url(url: &str) -> Result<Self, Error> {
        let config = url
            .parse::<postgres::Config>()
            .map_err(|e| Error::Configuration(format!("invalid connection string: {}", e)))?;
        Ok(Self::new(config))
    }

    pub fn from_credentials(credentials: &Credentials, pool: &PoolConfig) -> Self {
        let mut config = postgres::Config::new();
        config
            .host(&credentials.host)
            .port(credentials.port)
            .dbname(&credentials.database)
            .user(&credentials.user)
            .password(&credentials.password)
            .connect_timeout(pool.connect_timeout())
            .application_name(pool.name.as_deref().unwrap_or("gwdb"));
        Self::new(config)
    }
}

fn describe(config: &postgres::Config) -> String {
    let host = config
        .get_hosts()
        .first()
        .map(|h| match h {
            postgres::config::Host::Tcp(host) => host.clone(),
            #[cfg(unix)]
            postgres::config::Host::Unix(path) => path.display().to_string(),
        })
        .unwrap_or_else(|| "localhost".to_string());
    let port = config.get_ports().first().copied().unwrap_or(5432);
    format!(
        "{}:{}/{}",
        host,
        port,
        config.get_dbname().unwrap_or_default()
    )
}

impl gwdb::sync::Driver for PostgresDriver {
    type Connection = PostgresConnection;

    fn connect(&self) -> Result<Self::Connection, Error> {
        let client = self
            .manager
            .connect()
            .map_err(|e| classify_connect(e, &self.target))?;
        Ok(PostgresConnection {
            client,
            broken: false,
            transaction: TransactionState::default(),
        })
    }
}

pub struct PostgresConnection {
    client: Client,
    broken: bool,
    transaction: TransactionState,
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

fn fail(broken: &mut bool, err: postgres::Error) -> Error {
    if poisons_connection(&err) {
        *broken = true;
    }
    classify(err)
}

impl gwdb::sync::Connection for PostgresConnection {
    fn query(&mut self, statement: &Statement) -> Result<Rows<'_>, Error> {
        let Self {
            client,
            broken,
            transaction,
        } = self;
        transaction.observe(statement.sql());
        let params: Vec<PgParam<'_>> = statement.params().iter().map(PgParam).collect();
        let rows = client
            .query_raw(
                statement.sql(),
                params.iter().map(|p| p as &(dyn ToSql + Sync)),
            )
            .map_err(|e| fail(broken, e))?;

        let mut columns: Option<Arc<[String]>> = None;
        Ok(Box::new(rows.iterator().map(move |row| {
            let row = row.map_err(|e| fail(broken, e))?;
            let columns = columns.get_or_insert_with(|| column_names(row.columns()));
            record_from_row(&row, columns)
        })))
    }

    fn execute(&mut self, statement: &Statement) -> Result<u64, Error> {
        self.transaction.observe(statement.sql());
        let params: Vec<PgParam<'_>> = statement.params().iter().map(PgParam).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.client
            .execute(statement.sql(), params.as_slice())
            .map_err(|e| fail(&mut self.broken, e))
    }

    fn batch_execute(&mut self, sql: &str) -> Result<(), Error> {
        self.transaction.observe(sql);
        self.client
            .batch_execute(sql)
            .map_err(|e| fail(&mut self.broken, e))
    }

    fn is_valid(&mut self) -> Result<(), Error> {
        self.client
            .simple_query("")
            .map(|_| ())
            .map_err(|e| fail(&mut self.broken, e))
    }

    fn has_broken(&self) -> bool {
        self.broken || self.transaction.is_open() || self.client.is_closed()
    }
}

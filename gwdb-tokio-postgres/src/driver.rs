use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use gwdb::{
    postgres::{
        classify, classify_connect, column_names, poisons_connection, record_from_row, PgParam,
    },
    r#async::RecordStream,
    transaction::TransactionState,
    Credentials, Error, PoolConfig, Statement,
};
use tokio_postgres::{config::Host, types::ToSql, Client, Config, NoTls};
use tracing::warn;

/// Opens connections with `tokio-postgres`. Each connection drives its socket on a task of
/// its own, so a runtime must be running when [`connect`](gwdb::r#async::Driver::connect) is
/// called.
pub struct TokioPostgresDriver {
    config: Config,
    target: String,
}

impl TokioPostgresDriver {
    pub fn new(config: Config) -> Self {
        let target = describe(&config);
        Self { config, target }
    }

    /// Accepts either a `postgres://` URL or a key/value connection string.
    pub fn from_url(url: &str) -> Result<Self, Error> {
        let config = url
            .parse::<Config>()
            .map_err(|e| Error::Configuration(format!("invalid connection string: {}", e)))?;
        Ok(Self::new(config))
    }

    pub fn from_credentials(credentials: &Credentials, pool: &PoolConfig) -> Self {
        let mut config = Config::new();
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

fn describe(config: &Config) -> String {
    let host = match config.get_hosts().first() {
        Some(Host::Tcp(host)) => host.clone(),
        #[cfg(unix)]
        Some(Host::Unix(path)) => path.display().to_string(),
        None => "localhost".to_string(),
    };
    let port = config.get_ports().first().copied().unwrap_or(5432);
    format!("{}:{}/{}", host, port, config.get_dbname().unwrap_or_default())
}

#[async_trait]
impl gwdb::r#async::Driver for TokioPostgresDriver {
    type Connection = TokioPostgresConnection;

    async fn connect(&self) -> Result<Self::Connection, Error> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| classify_connect(e, &self.target))?;

        let target = self.target.clone();
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                warn!(target: "gwdb", %target, %error, "connection ended with an error");
            }
        });

        Ok(TokioPostgresConnection {
            client,
            broken: Arc::new(AtomicBool::new(false)),
            transaction: TransactionState::default(),
        })
    }
}

pub struct TokioPostgresConnection {
    client: Client,
    // shared with the row streams handed out by `query`
    broken: Arc<AtomicBool>,
    transaction: TransactionState,
}

fn fail(broken: &AtomicBool, err: tokio_postgres::Error) -> Error {
    if poisons_connection(&err) {
        broken.store(true, Ordering::SeqCst);
    }
    classify(err)
}

#[async_trait]
impl gwdb::r#async::Connection for TokioPostgresConnection {
    async fn query(&mut self, statement: &Statement) -> Result<RecordStream, Error> {
        self.transaction.observe(statement.sql());
        let params: Vec<PgParam<'_>> = statement.params().iter().map(PgParam).collect();
        let rows = self
            .client
            .query_raw(
                statement.sql(),
                params.iter().map(|p| p as &(dyn ToSql + Sync)),
            )
            .await
            .map_err(|e| fail(&self.broken, e))?;

        let broken = Arc::clone(&self.broken);
        let mut columns = None;
        Ok(Box::pin(rows.map(move |row| {
            let row = row.map_err(|e| fail(&broken, e))?;
            let columns = columns.get_or_insert_with(|| column_names(row.columns()));
            record_from_row(&row, columns)
        })))
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, Error> {
        self.transaction.observe(statement.sql());
        let params: Vec<PgParam<'_>> = statement.params().iter().map(PgParam).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.client
            .execute(statement.sql(), params.as_slice())
            .await
            .map_err(|e| fail(&self.broken, e))
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<(), Error> {
        self.transaction.observe(sql);
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| fail(&self.broken, e))
    }

    async fn is_valid(&mut self) -> Result<(), Error> {
        self.client
            .simple_query("")
            .await
            .map(|_| ())
            .map_err(|e| fail(&self.broken, e))
    }

    fn has_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst) || self.transaction.is_open() || self.client.is_closed()
    }
}

//! In-process async driver used by the unit tests. Statements are answered by closures
//! matched on a fragment of their SQL.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use gwdb::{
    r#async::{Connection, Driver, RecordStream},
    transaction::TransactionState,
    Error, Record, Statement, Value,
};

pub(crate) enum Reply {
    Rows(Vec<String>, Vec<Vec<Value>>),
    Affected(u64),
    Fail(Error),
    /// Fails with a connection error and leaves the connection unusable.
    Break,
    /// Never completes.
    Hang,
}

impl Reply {
    pub(crate) fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Reply::Rows(columns.iter().map(|c| (*c).to_string()).collect(), rows)
    }
}

type Responder = Arc<dyn Fn(&Statement) -> Reply + Send + Sync>;

#[derive(Default)]
struct State {
    live: AtomicUsize,
    peak: AtomicUsize,
    created: AtomicUsize,
    refuse: AtomicBool,
    connect_delay_ms: AtomicUsize,
    statements: Mutex<Vec<Statement>>,
    session: Mutex<Vec<String>>,
    responders: Mutex<Vec<(String, Responder)>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeDriver {
    state: Arc<State>,
}

impl FakeDriver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answers every statement whose SQL contains `fragment`. Later registrations win.
    pub(crate) fn on<F>(&self, fragment: &str, f: F)
    where
        F: Fn(&Statement) -> Reply + Send + Sync + 'static,
    {
        self.state
            .responders
            .lock()
            .unwrap()
            .insert(0, (fragment.to_string(), Arc::new(f)));
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn connect_delay(&self, delay: Duration) {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub(crate) fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub(crate) fn statements(&self) -> Vec<Statement> {
        self.state.statements.lock().unwrap().clone()
    }

    pub(crate) fn session_log(&self) -> Vec<String> {
        self.state.session.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, Error> {
        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(Error::connection(
                "could not connect to 127.0.0.1:5432/geneweaver: connection refused",
            ));
        }
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(live, Ordering::SeqCst);
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
            broken: false,
            transaction: TransactionState::default(),
        })
    }
}

pub(crate) struct FakeConnection {
    state: Arc<State>,
    broken: bool,
    transaction: TransactionState,
}

impl FakeConnection {
    async fn respond(&mut self, statement: &Statement) -> Result<Reply, Error> {
        if self.broken {
            return Err(Error::connection("connection closed"));
        }
        self.transaction.observe(statement.sql());
        self.state.statements.lock().unwrap().push(statement.clone());
        let responder = self
            .state
            .responders
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| statement.sql().contains(fragment.as_str()))
            .map(|(_, f)| Arc::clone(f));
        match responder.map(|f| f(statement)) {
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Break) => {
                self.broken = true;
                Err(Error::connection("server closed the connection unexpectedly"))
            }
            Some(Reply::Hang) => futures_util::future::pending().await,
            Some(reply) => Ok(reply),
            None => Ok(Reply::Affected(0)),
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn query(&mut self, statement: &Statement) -> Result<RecordStream, Error> {
        match self.respond(statement).await? {
            Reply::Rows(columns, rows) => {
                let columns: Arc<[String]> = columns.into();
                let records: Vec<Result<Record, Error>> = rows
                    .into_iter()
                    .map(|values| Record::new(Arc::clone(&columns), values))
                    .collect();
                Ok(Box::pin(stream::iter(records)))
            }
            _ => Ok(Box::pin(stream::empty())),
        }
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, Error> {
        match self.respond(statement).await? {
            Reply::Rows(_, rows) => Ok(rows.len() as u64),
            Reply::Affected(n) => Ok(n),
            _ => Ok(0),
        }
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<(), Error> {
        self.transaction.observe(sql);
        self.state.session.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    async fn is_valid(&mut self) -> Result<(), Error> {
        if self.broken {
            Err(Error::connection("connection closed"))
        } else {
            Ok(())
        }
    }

    fn has_broken(&self) -> bool {
        self.broken || self.transaction.is_open()
    }
}

//! In-process driver used by the unit tests. Statements are answered by closures matched on
//! a fragment of their SQL.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gwdb::{
    sync::{Connection, Driver, Rows},
    transaction::TransactionState,
    Error, Record, Statement, Value,
};

pub(crate) enum Reply {
    Rows(Vec<String>, Vec<Vec<Value>>),
    Affected(u64),
    Fail(Error),
    /// Fails with a connection error and leaves the connection unusable.
    Break,
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

impl Driver for FakeDriver {
    type Connection = FakeConnection;

    fn connect(&self) -> Result<FakeConnection, Error> {
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

impl std::fmt::Debug for FakeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl FakeConnection {
    fn respond(&mut self, statement: &Statement) -> Result<Reply, Error> {
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

impl Connection for FakeConnection {
    fn query(&mut self, statement: &Statement) -> Result<Rows<'_>, Error> {
        match self.respond(statement)? {
            Reply::Rows(columns, rows) => {
                let columns: Arc<[String]> = columns.into();
                Ok(Box::new(
                    rows.into_iter()
                        .map(move |values| Record::new(Arc::clone(&columns), values)),
                ))
            }
            _ => Ok(Box::new(std::iter::empty())),
        }
    }

    fn execute(&mut self, statement: &Statement) -> Result<u64, Error> {
        match self.respond(statement)? {
            Reply::Rows(_, rows) => Ok(rows.len() as u64),
            Reply::Affected(n) => Ok(n),
            _ => Ok(0),
        }
    }

    fn batch_execute(&mut self, sql: &str) -> Result<(), Error> {
        self.transaction.observe(sql);
        self.state.session.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    fn is_valid(&mut self) -> Result<(), Error> {
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

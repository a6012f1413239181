//! Transaction-block tracking.
//!
//! A pooled connection must not reach its next caller inside a transaction block, aborted or
//! not. Drivers feed every statement they run through a [`TransactionState`] and report the
//! connection as unusable while a block is open.

use sqlparser::{
    dialect::PostgreSqlDialect,
    tokenizer::{Token, Tokenizer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionControl {
    /// Opens a transaction block (`BEGIN`, `START TRANSACTION`, `COMMIT AND CHAIN`).
    Begin,
    /// Ends it (`COMMIT`, `END`, `ROLLBACK`, `ABORT`, `PREPARE TRANSACTION`).
    End,
}

/// The transaction-control command that decides the session's state once `sql` has run,
/// i.e. the last one among its statements. SQL that cannot be tokenized counts as
/// [`TransactionControl::Begin`].
pub fn transaction_control(sql: &str) -> Option<TransactionControl> {
    let dialect = PostgreSqlDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => return Some(TransactionControl::Begin),
    };

    tokens
        .split(|t| matches!(t, Token::SemiColon))
        .filter_map(statement_control)
        .last()
}

fn statement_control(tokens: &[Token]) -> Option<TransactionControl> {
    let mut words = tokens
        .iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .map(|t| match t {
            Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
            _ => None,
        });
    let first = words.next()??;
    let rest: Vec<String> = words.flatten().collect();
    let next = rest.first().map(String::as_str);
    let chained = rest.iter().any(|w| w == "CHAIN") && !rest.iter().any(|w| w == "NO");

    match first.as_str() {
        "BEGIN" | "START" => Some(TransactionControl::Begin),
        "ROLLBACK" if next == Some("TO") => None,
        "COMMIT" | "ROLLBACK" if next == Some("PREPARED") => None,
        "COMMIT" | "END" | "ROLLBACK" | "ABORT" if chained => Some(TransactionControl::Begin),
        "COMMIT" | "END" | "ROLLBACK" | "ABORT" => Some(TransactionControl::End),
        "PREPARE" if next == Some("TRANSACTION") => Some(TransactionControl::End),
        _ => None,
    }
}

/// Whether the session is inside a transaction block, as far as the statements it has run
/// tell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionState {
    open: bool,
}

impl TransactionState {
    /// Records `sql`. Call it before the statement runs: a failed `BEGIN` still counts as
    /// open, and a failed `COMMIT` or `ROLLBACK` still ends the block on the server.
    pub fn observe(&mut self, sql: &str) {
        match transaction_control(sql) {
            Some(TransactionControl::Begin) => self.open = true,
            Some(TransactionControl::End) => self.open = false,
            None => {}
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionControl::*;

    #[test]
    fn recognizes_block_boundaries() {
        assert_eq!(transaction_control("BEGIN"), Some(Begin));
        assert_eq!(transaction_control("begin isolation level serializable"), Some(Begin));
        assert_eq!(transaction_control("START TRANSACTION"), Some(Begin));
        assert_eq!(transaction_control("COMMIT"), Some(End));
        assert_eq!(transaction_control("end"), Some(End));
        assert_eq!(transaction_control("ROLLBACK"), Some(End));
        assert_eq!(transaction_control("ABORT"), Some(End));
        assert_eq!(transaction_control("COMMIT AND CHAIN"), Some(Begin));
        assert_eq!(transaction_control("COMMIT AND NO CHAIN"), Some(End));
    }

    #[test]
    fn other_statements_leave_the_state_alone() {
        assert_eq!(transaction_control("SELECT 1"), None);
        assert_eq!(transaction_control("SELECT 'BEGIN'"), None);
        assert_eq!(transaction_control("ROLLBACK TO SAVEPOINT before_insert"), None);
        assert_eq!(transaction_control("SAVEPOINT before_insert"), None);
        assert_eq!(transaction_control("COMMIT PREPARED 'gs_load'"), None);
        assert_eq!(
            transaction_control("SET search_path = curation, extsrc, odestatic, production"),
            None
        );
    }

    #[test]
    fn last_statement_of_a_batch_wins() {
        assert_eq!(transaction_control("BEGIN; SELECT 1"), Some(Begin));
        assert_eq!(transaction_control("BEGIN; UPDATE t SET a = 1; COMMIT;"), Some(End));
        assert_eq!(
            transaction_control("-- load\nBEGIN; /* rows */ INSERT INTO t VALUES (1)"),
            Some(Begin)
        );
    }

    #[test]
    fn state_follows_the_statements() {
        let mut state = TransactionState::default();
        state.observe("SELECT 1");
        assert!(!state.is_open());
        state.observe("BEGIN");
        state.observe("SELECT 1/0");
        assert!(state.is_open());
        state.observe("ROLLBACK");
        assert!(!state.is_open());
    }
}

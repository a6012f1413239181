//! Parameter binding.
//!
//! Statement templates are written with `?` (positional) or `:name` (named) placeholders
//! and are rewritten into PostgreSQL `$n` bind parameters. Values travel separately from
//! the SQL text.

use std::collections::HashMap;
use std::ops::Range;

use crate::{Error, Value};

/// Maximum number of bind parameters a single PostgreSQL statement may carry.
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Values bound into a statement template.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Positional(v) => v.len(),
            Self::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::none()
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl From<Vec<(String, Value)>> for Params {
    fn from(values: Vec<(String, Value)>) -> Self {
        Self::Named(values)
    }
}

/// Builds positional [`Params`]: `params![gs_id, "normal"]`.
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::none()
    };
    ($($value: expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Value::from($value)),+])
    };
}

/// Builds named [`Params`]: `named_params! { sp_id: 1, gdb_id: None::<i64> }`.
#[macro_export]
macro_rules! named_params {
    ($($name: ident : $value: expr),+ $(,)?) => {
        $crate::Params::Named(vec![$((stringify!($name).to_string(), $crate::Value::from($value))),+])
    };
}

/// A statement ready for execution: SQL with `$n` placeholders plus its values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

enum Style {
    Unknown,
    Positional,
    Named,
}

impl Statement {
    /// Rewrites the placeholders of `template` and binds `params` to them.
    pub fn bind(template: &str, params: impl Into<Params>) -> Result<Self, Error> {
        let params = params.into();

        let mut style = Style::Unknown;
        let mut sql = String::with_capacity(template.len() + 8);
        let mut copied = 0;
        let mut positional = 0_usize;
        let mut highest = 0_usize;
        let mut names: Vec<&str> = Vec::new();

        for (span, placeholder) in placeholders(template)? {
            sql.push_str(&template[copied..span.start]);
            copied = span.end;
            let index = match placeholder {
                Placeholder::Next => {
                    style = check_style(style, Style::Positional)?;
                    positional += 1;
                    highest = highest.max(positional);
                    positional
                }
                Placeholder::Numbered(n) => {
                    style = check_style(style, Style::Positional)?;
                    highest = highest.max(n);
                    n
                }
                Placeholder::Named(name) => {
                    style = check_style(style, Style::Named)?;
                    match names.iter().position(|n| *n == name) {
                        Some(i) => i + 1,
                        None => {
                            names.push(name);
                            names.len()
                        }
                    }
                }
            };
            sql.push('$');
            sql.push_str(&index.to_string());
        }
        sql.push_str(&template[copied..]);

        let expected = match style {
            Style::Named => names.len(),
            _ => highest,
        };
        let params = match (style, params) {
            (Style::Named, Params::Named(values)) => order_named(&names, values)?,
            (Style::Named, Params::Positional(values)) if values.is_empty() => {
                return Err(Error::query(format!(
                    "statement expects named parameters {:?} but none were supplied",
                    names
                )))
            }
            (Style::Named, Params::Positional(_)) => {
                return Err(Error::query(
                    "statement uses named placeholders but positional parameters were supplied",
                ))
            }
            (_, Params::Named(values)) if values.is_empty() => Vec::new(),
            (_, Params::Named(_)) => {
                return Err(Error::query(
                    "named parameters supplied to a statement without named placeholders",
                ))
            }
            (_, Params::Positional(values)) => values,
        };

        if params.len() != expected {
            return Err(Error::query(format!(
                "statement expects {} parameters but {} were supplied",
                expected,
                params.len()
            )));
        }
        if params.len() > MAX_BIND_PARAMS {
            return Err(Error::query(format!(
                "statement binds {} parameters, more than the maximum of {}",
                params.len(),
                MAX_BIND_PARAMS
            )));
        }

        Ok(Self { sql, params })
    }

    /// Builds a single multi-row statement: `prefix` followed by one `row_template`
    /// tuple per row, e.g. `INSERT INTO t (a, b) VALUES` + `(?, ?)`.
    pub fn bind_rows(prefix: &str, row_template: &str, rows: Vec<Vec<Value>>) -> Result<Self, Error> {
        if rows.is_empty() {
            return Err(Error::query("multi-row statement has no rows"));
        }
        let arity = count_positional(row_template)?;

        let mut sql = String::from(prefix.trim_end());
        let mut values = Vec::with_capacity(rows.len() * arity);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != arity {
                return Err(Error::query(format!(
                    "row {} has {} values but the row template expects {}",
                    i,
                    row.len(),
                    arity
                )));
            }
            sql.push_str(if i == 0 { "\n    " } else { ",\n    " });
            sql.push_str(row_template.trim());
            values.extend(row);
        }

        Self::bind(&sql, Params::Positional(values))
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

fn check_style(current: Style, next: Style) -> Result<Style, Error> {
    match (current, next) {
        (Style::Positional, Style::Named) | (Style::Named, Style::Positional) => Err(
            Error::query("statement mixes positional and named placeholders"),
        ),
        (_, next) => Ok(next),
    }
}

/// Whether `s` is a plain, unquoted SQL identifier.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn count_positional(template: &str) -> Result<usize, Error> {
    let found = placeholders(template)?;
    if found.iter().any(|(_, p)| *p != Placeholder::Next) {
        return Err(Error::query("row template may only use `?` placeholders"));
    }
    Ok(found.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder<'a> {
    /// `?`
    Next,
    /// `$3` or `?3`
    Numbered(usize),
    /// `:name`
    Named(&'a str),
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Finds the placeholders of `template`. String literals, quoted identifiers, comments,
/// dollar-quoted bodies, `::` casts, array slices (`[lo:hi]`) and the `?|`, `?&`, `?#`
/// and `?-|` operators are left alone.
fn placeholders(template: &str) -> Result<Vec<(Range<usize>, Placeholder<'_>)>, Error> {
    let bytes = template.as_bytes();
    let mut found = Vec::new();
    let mut brackets = 0_usize;
    let mut i = 0;

    while i < bytes.len() {
        let after_word = i > 0 && is_word_byte(bytes[i - 1]);
        match bytes[i] {
            b'\'' => {
                // E'...' allows backslash escapes
                let escapes = after_word
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && !(i > 1 && is_word_byte(bytes[i - 2]));
                i = skip_quoted(bytes, i, b'\'', escapes)
                    .ok_or_else(|| Error::query("statement has an unterminated string literal"))?;
            }
            b'"' => {
                i = skip_quoted(bytes, i, b'"', false).ok_or_else(|| {
                    Error::query("statement has an unterminated quoted identifier")
                })?;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = match bytes[i..].iter().position(|b| *b == b'\n') {
                    Some(n) => i + n + 1,
                    None => bytes.len(),
                };
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i)
                    .ok_or_else(|| Error::query("statement has an unterminated comment"))?;
            }
            b'$' if !after_word => {
                let n = digits(&bytes[i + 1..]);
                if n > 0 {
                    let end = i + 1 + n;
                    found.push((i..end, Placeholder::Numbered(number(&template[i..end])?)));
                    i = end;
                } else {
                    i = skip_dollar_quoted(bytes, i)?;
                }
            }
            b'?' => match bytes.get(i + 1) {
                Some(b'|') | Some(b'&') | Some(b'#') => i += 2,
                Some(b'-') if bytes.get(i + 2) == Some(&b'|') => i += 3,
                _ => {
                    let n = digits(&bytes[i + 1..]);
                    if n > 0 {
                        let end = i + 1 + n;
                        found.push((i..end, Placeholder::Numbered(number(&template[i..end])?)));
                        i = end;
                    } else {
                        found.push((i..i + 1, Placeholder::Next));
                        i += 1;
                    }
                }
            },
            b':' => match bytes.get(i + 1) {
                Some(b':') => i += 2,
                Some(b) if brackets == 0 && is_name_start(*b) => {
                    let len = bytes[i + 1..]
                        .iter()
                        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                        .count();
                    let end = i + 1 + len;
                    found.push((i..end, Placeholder::Named(&template[i + 1..end])));
                    i = end;
                }
                _ => i += 1,
            },
            b'[' => {
                brackets += 1;
                i += 1;
            }
            b']' => {
                brackets = brackets.saturating_sub(1);
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(found)
}

fn number(placeholder: &str) -> Result<usize, Error> {
    placeholder[1..]
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| Error::query(format!("invalid placeholder `{}`", placeholder)))
}

/// Index just past the literal opened by `quote` at `start`. A doubled quote is part of the
/// literal.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, escapes: bool) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if escapes => i += 2,
            b if b == quote && bytes.get(i + 1) == Some(&quote) => i += 2,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Block comments nest in PostgreSQL.
fn skip_block_comment(bytes: &[u8], start: usize) -> Option<usize> {
    let mut nesting = 0_usize;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"/*") {
            nesting += 1;
            i += 2;
        } else if bytes[i..].starts_with(b"*/") {
            nesting -= 1;
            i += 2;
            if nesting == 0 {
                return Some(i);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Skips a `$tag$ ... $tag$` body opened at `start`. A `$` that does not open one is
/// stepped over.
fn skip_dollar_quoted(bytes: &[u8], start: usize) -> Result<usize, Error> {
    let tag = bytes[start + 1..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    let close = start + 1 + tag;
    if bytes.get(close) != Some(&b'$') {
        return Ok(start + 1);
    }
    let delimiter = &bytes[start..=close];
    bytes[close + 1..]
        .windows(delimiter.len())
        .position(|w| w == delimiter)
        .map(|n| close + 1 + n + delimiter.len())
        .ok_or_else(|| Error::query("statement has an unterminated dollar-quoted string"))
}

fn order_named(names: &[&str], values: Vec<(String, Value)>) -> Result<Vec<Value>, Error> {
    let mut supplied: HashMap<String, Value> = HashMap::with_capacity(values.len());
    for (name, value) in values {
        if supplied.insert(name.clone(), value).is_some() {
            return Err(Error::query(format!("parameter `{}` supplied twice", name)));
        }
    }

    let mut ordered = Vec::with_capacity(names.len());
    for name in names {
        match supplied.remove(*name) {
            Some(value) => ordered.push(value),
            None => return Err(Error::query(format!("missing value for parameter `{}`", name))),
        }
    }

    if let Some(unused) = supplied.keys().next() {
        return Err(Error::query(format!(
            "parameter `{}` is not used by the statement",
            unused
        )));
    }
    Ok(ordered)
}

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::{Error, FromValue, Value};

/// One result row: column names shared across the result set plus normalized values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    /// Builds a record. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Result<Self, Error> {
        if columns.len() != values.len() {
            return Err(Error::query(format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of a column, by position or by name.
    pub fn value<I: ColumnIndex>(&self, index: I) -> Result<&Value, Error> {
        let i = index.index(&self.columns)?;
        Ok(&self.values[i])
    }

    /// Converts a column into `T`.
    pub fn get<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<T, Error> {
        let i = index.index(&self.columns)?;
        T::from_value(&self.values[i]).map_err(|err| match err {
            Error::Query { message, code, source } => Error::Query {
                message: format!("column `{}`: {}", self.columns[i], message),
                code,
                source,
            },
            other => other,
        })
    }

    /// Column name → value, ordered by column name.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// A column position or a column name.
pub trait ColumnIndex {
    fn index(&self, columns: &[String]) -> Result<usize, Error>;
}

impl ColumnIndex for usize {
    fn index(&self, columns: &[String]) -> Result<usize, Error> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(Error::query(format!(
                "column index {} out of range for {} columns",
                self,
                columns.len()
            )))
        }
    }
}

impl ColumnIndex for &str {
    fn index(&self, columns: &[String]) -> Result<usize, Error> {
        columns
            .iter()
            .position(|c| c == self)
            .ok_or_else(|| Error::schema(format!("result has no column named `{}`", self)))
    }
}

use std::any::type_name;
use std::convert::TryFrom;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::Error;

/// A normalized column value or statement parameter.
///
/// Drivers map every native type onto one of these variants before a row leaves the
/// cursor, so callers never see driver-specific integer widths or decimal wrappers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TextArray(Vec<String>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    BoolArray(Vec<bool>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the semantic type, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Timestamp(_) => "timestamp",
            Self::TextArray(_) => "text[]",
            Self::IntArray(_) => "integer[]",
            Self::FloatArray(_) => "float[]",
            Self::BoolArray(_) => "bool[]",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{}", d),
            Self::Timestamp(t) => write!(f, "{}", t),
            Self::TextArray(v) => write!(f, "{{{}}}", v.join(",")),
            Self::IntArray(v) => write_list(f, v),
            Self::FloatArray(v) => write_list(f, v),
            Self::BoolArray(v) => write_list(f, v),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("{")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("}")
}

macro_rules! impl_from_for_value {
    ($($ty: ty => $variant: ident $(as $cast: ty)?),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float,
    String => Text,
    NaiveDate => Date,
    NaiveDateTime => Timestamp,
    Vec<String> => TextArray,
    Vec<i64> => IntArray,
    Vec<f64> => FloatArray,
    Vec<bool> => BoolArray,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Self::TextArray(v.into_iter().map(str::to_owned).collect())
    }
}

impl From<&[&str]> for Value {
    fn from(v: &[&str]) -> Self {
        Self::TextArray(v.iter().map(|s| (*s).to_owned()).collect())
    }
}

impl From<&[String]> for Value {
    fn from(v: &[String]) -> Self {
        Self::TextArray(v.to_vec())
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Self::IntArray(v.into_iter().map(i64::from).collect())
    }
}

impl From<&[i64]> for Value {
    fn from(v: &[i64]) -> Self {
        Self::IntArray(v.to_vec())
    }
}

impl From<&[i32]> for Value {
    fn from(v: &[i32]) -> Self {
        Self::IntArray(v.iter().copied().map(i64::from).collect())
    }
}

impl From<&[f64]> for Value {
    fn from(v: &[f64]) -> Self {
        Self::FloatArray(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Conversion out of a normalized [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, Error>;
}

fn mismatch<T>(value: &Value) -> Error {
    Error::query(format!(
        "cannot convert {} value to `{}`",
        value.type_name(),
        type_name::<T>()
    ))
}

fn narrow<T, S>(n: S) -> Result<T, Error>
where
    T: TryFrom<S>,
    S: Copy + fmt::Display,
{
    T::try_from(n).map_err(|_| {
        Error::query(format!("integer {} is out of range for `{}`", n, type_name::<T>()))
    })
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, Error> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Int(n) => Ok(*n),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Int(n) => narrow(*n),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Float(n) => Ok(*n),
            Value::Int(n) => Ok(*n as f64),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Date(d) => Ok(*d),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Timestamp(t) => Ok(*t),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for Vec<String> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::TextArray(v) => Ok(v.clone()),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for Vec<i64> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::IntArray(v) => Ok(v.clone()),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for Vec<i32> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::IntArray(v) => v.iter().map(|n| narrow(*n)).collect(),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for Vec<f64> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::FloatArray(v) => Ok(v.clone()),
            Value::IntArray(v) => Ok(v.iter().map(|n| *n as f64).collect()),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl FromValue for Vec<bool> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::BoolArray(v) => Ok(v.clone()),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

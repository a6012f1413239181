//! Value mapping and error classification shared by the Postgres drivers.
//!
//! Both `postgres` and `tokio-postgres` speak the same wire types, so binding a [`Value`] and
//! normalizing a result row happen here once.

use std::sync::Arc;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use tokio_postgres::{
    types::{to_sql_checked, FromSql, IsNull, ToSql, Type, WrongType},
    Column, Row,
};

use crate::{BoxDynError, Error, Record, Value};

/// Binds a [`Value`] to whatever type the server inferred for the placeholder.
///
/// Integers and floats are narrowed or widened to the target column type; anything that does
/// not fit is rejected client side before the statement runs.
#[derive(Debug)]
pub struct PgParam<'a>(pub &'a Value);

fn checked<T: ToSql>(value: T, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxDynError> {
    if !T::accepts(ty) {
        return Err(Box::new(WrongType::new::<T>(ty.clone())));
    }
    value.to_sql(ty, out)
}

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxDynError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => checked(*b, ty, out),
            Value::Int(i) => match *ty {
                Type::INT2 => checked(i16::try_from(*i)?, ty, out),
                Type::INT4 => checked(i32::try_from(*i)?, ty, out),
                Type::OID => checked(u32::try_from(*i)?, ty, out),
                Type::FLOAT4 => checked(*i as f32, ty, out),
                Type::FLOAT8 => checked(*i as f64, ty, out),
                Type::NUMERIC => checked(Decimal::from(*i), ty, out),
                _ => checked(*i, ty, out),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => checked(*f as f32, ty, out),
                Type::NUMERIC => checked(Decimal::try_from(*f)?, ty, out),
                _ => checked(*f, ty, out),
            },
            Value::Text(s) => checked(s.as_str(), ty, out),
            Value::Date(d) => checked(*d, ty, out),
            Value::Timestamp(ts) => match *ty {
                Type::TIMESTAMPTZ => {
                    checked(DateTime::<Utc>::from_naive_utc_and_offset(*ts, Utc), ty, out)
                }
                _ => checked(*ts, ty, out),
            },
            Value::TextArray(values) => checked(values.as_slice(), ty, out),
            Value::IntArray(values) => match *ty {
                Type::INT4_ARRAY => {
                    let narrowed = values
                        .iter()
                        .map(|i| i32::try_from(*i))
                        .collect::<Result<Vec<_>, _>>()?;
                    checked(narrowed, ty, out)
                }
                Type::INT2_ARRAY => {
                    let narrowed = values
                        .iter()
                        .map(|i| i16::try_from(*i))
                        .collect::<Result<Vec<_>, _>>()?;
                    checked(narrowed, ty, out)
                }
                _ => checked(values.as_slice(), ty, out),
            },
            Value::FloatArray(values) => match *ty {
                Type::FLOAT4_ARRAY => {
                    checked(values.iter().map(|f| *f as f32).collect::<Vec<_>>(), ty, out)
                }
                Type::NUMERIC_ARRAY => {
                    let decimals = values
                        .iter()
                        .map(|f| Decimal::try_from(*f))
                        .collect::<Result<Vec<_>, _>>()?;
                    checked(decimals, ty, out)
                }
                _ => checked(values.as_slice(), ty, out),
            },
            Value::BoolArray(values) => checked(values.as_slice(), ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Column names of a result set, shared by every record it produces.
pub fn column_names(columns: &[Column]) -> Arc<[String]> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, i: usize) -> Result<Option<T>, Error> {
    row.try_get::<_, Option<T>>(i).map_err(|e| {
        Error::query_with(
            format!("could not decode column `{}`", row.columns()[i].name()),
            e,
        )
    })
}

fn numeric_to_f64(d: &Decimal, column: &Column) -> Result<f64, Error> {
    d.to_f64().ok_or_else(|| {
        Error::query(format!(
            "numeric {} in column `{}` does not fit a float",
            d,
            column.name()
        ))
    })
}

fn normalize(row: &Row, i: usize) -> Result<Value, Error> {
    let column = &row.columns()[i];
    let value = match *column.type_() {
        Type::BOOL => get::<bool>(row, i)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, i)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, i)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, i)?.map(Value::Int),
        Type::OID => get::<u32>(row, i)?.map(|v| Value::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, i)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, i)?.map(Value::Float),
        Type::NUMERIC => match get::<Decimal>(row, i)? {
            Some(d) => Some(Value::Float(numeric_to_f64(&d, column)?)),
            None => None,
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, i)?.map(Value::Text)
        }
        Type::DATE => get::<NaiveDate>(row, i)?.map(Value::Date),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, i)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => {
            get::<DateTime<Utc>>(row, i)?.map(|v| Value::Timestamp(v.naive_utc()))
        }
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            get::<Vec<String>>(row, i)?.map(Value::TextArray)
        }
        Type::BOOL_ARRAY => get::<Vec<bool>>(row, i)?.map(Value::BoolArray),
        Type::INT2_ARRAY => get::<Vec<i16>>(row, i)?
            .map(|v| Value::IntArray(v.into_iter().map(i64::from).collect())),
        Type::INT4_ARRAY => get::<Vec<i32>>(row, i)?
            .map(|v| Value::IntArray(v.into_iter().map(i64::from).collect())),
        Type::INT8_ARRAY => get::<Vec<i64>>(row, i)?.map(Value::IntArray),
        Type::FLOAT4_ARRAY => get::<Vec<f32>>(row, i)?
            .map(|v| Value::FloatArray(v.into_iter().map(f64::from).collect())),
        Type::FLOAT8_ARRAY => get::<Vec<f64>>(row, i)?.map(Value::FloatArray),
        Type::NUMERIC_ARRAY => match get::<Vec<Decimal>>(row, i)? {
            Some(v) => Some(Value::FloatArray(
                v.iter()
                    .map(|d| numeric_to_f64(d, column))
                    .collect::<Result<_, _>>()?,
            )),
            None => None,
        },
        ref other => {
            return Err(Error::query(format!(
                "column `{}` has unsupported type {}",
                column.name(),
                other
            )))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Converts a driver row into a [`Record`] of normalized values.
pub fn record_from_row(row: &Row, columns: &Arc<[String]>) -> Result<Record, Error> {
    let values = (0..row.len())
        .map(|i| normalize(row, i))
        .collect::<Result<Vec<_>, _>>()?;
    Record::new(Arc::clone(columns), values)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Connection,
    Schema,
    Query,
}

fn kind_of(code: Option<&str>, lost: bool) -> Kind {
    match code {
        _ if lost => Kind::Connection,
        Some("42P01") | Some("42703") | Some("3F000") => Kind::Schema,
        Some("3D000") => Kind::Connection,
        Some(code) if ["08", "28", "57"].contains(&&code[..2.min(code.len())]) => {
            Kind::Connection
        }
        // raised by the client on an open connection: parameter encoding, result decoding,
        // parameter counts
        Some(_) | None => Kind::Query,
    }
}

/// Whether `err` means the connection itself is gone: the client saw it close, or the
/// socket failed.
fn connection_lost(err: &tokio_postgres::Error) -> bool {
    err.is_closed()
        || std::error::Error::source(err).map_or(false, |source| source.is::<std::io::Error>())
}

/// Maps a driver error raised by a statement onto the GWDB taxonomy.
pub fn classify(err: tokio_postgres::Error) -> Error {
    let code = err.code().map(|c| c.code().to_string());
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };
    match kind_of(code.as_deref(), connection_lost(&err)) {
        Kind::Connection => Error::connection_with(message, err),
        Kind::Schema => Error::Schema {
            message,
            source: Some(Box::new(err)),
        },
        Kind::Query => Error::Query {
            message,
            code,
            source: Some(Box::new(err)),
        },
    }
}

/// Maps a failure to open a connection. Whatever the cause, it is a [`Error::Connection`]
/// whose message names `target`.
pub fn classify_connect(err: tokio_postgres::Error, target: &str) -> Error {
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };
    Error::connection_with(format!("could not connect to {}: {}", target, message), err)
}

// SQLSTATE classes reported for a statement that failed cleanly, leaving the session usable.
const STATEMENT_CLASSES: &[&str] = &["21", "22", "23", "2B", "3F", "42", "44", "0A", "P0"];

fn poisons(code: Option<&str>, lost: bool) -> bool {
    if lost {
        return true;
    }
    match code {
        Some(code) if code.len() == 5 => !STATEMENT_CLASSES.contains(&&code[..2]),
        Some(_) => true,
        None => false,
    }
}

/// Whether the connection that produced `err` must be discarded rather than reused: the
/// connection is gone, or the server reported anything other than a statement-level
/// error. Client-side encoding and decoding failures leave it usable.
pub fn poisons_connection(err: &tokio_postgres::Error) -> bool {
    let code = err.as_db_error().map(|db| db.code().code());
    poisons(code, connection_lost(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &Type) -> Result<(IsNull, BytesMut), BoxDynError> {
        let mut buf = BytesMut::new();
        let is_null = PgParam(value).to_sql(ty, &mut buf)?;
        Ok((is_null, buf))
    }

    #[test]
    fn integers_follow_the_target_width() {
        let (_, buf) = encode(&Value::Int(7), &Type::INT4).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 7]);

        let (_, buf) = encode(&Value::Int(7), &Type::INT8).unwrap();
        assert_eq!(buf.len(), 8);

        let (_, buf) = encode(&Value::Int(7), &Type::INT2).unwrap();
        assert_eq!(&buf[..], &[0, 7]);
    }

    #[test]
    fn overflowing_integer_is_rejected() {
        assert!(encode(&Value::Int(i64::from(i32::MAX) + 1), &Type::INT4).is_err());
        assert!(encode(&Value::IntArray(vec![1, 70_000]), &Type::INT2_ARRAY).is_err());
    }

    #[test]
    fn null_binds_for_any_type() {
        for ty in &[Type::INT4, Type::TEXT, Type::DATE, Type::TEXT_ARRAY] {
            let (is_null, buf) = encode(&Value::Null, ty).unwrap();
            assert!(matches!(is_null, IsNull::Yes));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn mismatched_type_is_an_error() {
        assert!(encode(&Value::Text("Pax6".into()), &Type::INT4).is_err());
        assert!(encode(&Value::Bool(true), &Type::TEXT).is_err());
    }

    #[test]
    fn text_and_arrays_bind() {
        let (_, buf) = encode(&Value::Text("Ccr4".into()), &Type::VARCHAR).unwrap();
        assert_eq!(&buf[..], b"Ccr4");

        let genes = Value::TextArray(vec!["Ccr4".into(), "Pax6".into()]);
        assert!(encode(&genes, &Type::TEXT_ARRAY).is_ok());
        assert!(encode(&Value::IntArray(vec![1, 2]), &Type::INT4_ARRAY).is_ok());
        assert!(encode(&Value::IntArray(vec![1, 2]), &Type::INT8_ARRAY).is_ok());
        assert!(encode(&Value::FloatArray(vec![0.5]), &Type::NUMERIC_ARRAY).is_ok());
        assert!(encode(&Value::BoolArray(vec![true, false]), &Type::BOOL_ARRAY).is_ok());
        assert!(encode(&Value::BoolArray(vec![true]), &Type::INT4_ARRAY).is_err());
    }

    #[test]
    fn float_binds_to_numeric() {
        assert!(encode(&Value::Float(0.05), &Type::NUMERIC).is_ok());
        assert!(encode(&Value::Float(f64::NAN), &Type::NUMERIC).is_err());
    }

    #[test]
    fn sqlstate_classification() {
        assert_eq!(kind_of(Some("42P01"), false), Kind::Schema);
        assert_eq!(kind_of(Some("42703"), false), Kind::Schema);
        assert_eq!(kind_of(Some("42601"), false), Kind::Query);
        assert_eq!(kind_of(Some("23505"), false), Kind::Query);
        assert_eq!(kind_of(Some("08006"), false), Kind::Connection);
        assert_eq!(kind_of(Some("28P01"), false), Kind::Connection);
        assert_eq!(kind_of(Some("57P01"), false), Kind::Connection);
        assert_eq!(kind_of(Some("3D000"), false), Kind::Connection);
        assert_eq!(kind_of(Some("42601"), true), Kind::Connection);
        assert_eq!(kind_of(None, false), Kind::Query);
        assert_eq!(kind_of(None, true), Kind::Connection);
    }

    #[test]
    fn only_clean_statement_failures_keep_the_connection() {
        assert!(!poisons(Some("42601"), false));
        assert!(!poisons(Some("22003"), false));
        assert!(!poisons(Some("23505"), false));
        assert!(!poisons(Some("P0001"), false));
        assert!(poisons(Some("57014"), false));
        assert!(poisons(Some("08006"), false));
        assert!(poisons(Some("42601"), true));
        assert!(!poisons(None, false));
        assert!(poisons(None, true));
    }
}

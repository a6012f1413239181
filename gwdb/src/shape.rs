//! Reshaping result sets into the mappings the query catalog returns.

use std::collections::HashMap;
use std::hash::Hash;

use crate::{ColumnIndex, Error, FromValue, Record};

/// First column → second column. Later duplicates overwrite earlier ones.
pub fn biject<K, V, I>(records: I) -> Result<HashMap<K, V>, Error>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
    I: IntoIterator<Item = Record>,
{
    biject_by(records, 0, 1)
}

/// `key` column → `value` column.
pub fn biject_by<K, V, I, A, B>(records: I, key: A, value: B) -> Result<HashMap<K, V>, Error>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
    I: IntoIterator<Item = Record>,
    A: ColumnIndex + Copy,
    B: ColumnIndex + Copy,
{
    records
        .into_iter()
        .map(|r| -> Result<(K, V), Error> { Ok((r.get(key)?, r.get(value)?)) })
        .collect()
}

/// First column → every second-column value, in row order (1:N).
pub fn associate<K, V, I>(records: I) -> Result<HashMap<K, Vec<V>>, Error>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
    I: IntoIterator<Item = Record>,
{
    let mut map: HashMap<K, Vec<V>> = HashMap::new();
    for record in records {
        map.entry(record.get(0)?)
            .or_default()
            .push(record.get(1)?);
    }
    Ok(map)
}

/// First column → the whole record.
pub fn map_by_first<K, I>(records: I) -> Result<HashMap<K, Record>, Error>
where
    K: FromValue + Eq + Hash,
    I: IntoIterator<Item = Record>,
{
    records
        .into_iter()
        .map(|r| -> Result<(K, Record), Error> { Ok((r.get(0)?, r)) })
        .collect()
}

/// One column of every record.
pub fn column<T, I, C>(records: I, index: C) -> Result<Vec<T>, Error>
where
    T: FromValue,
    I: IntoIterator<Item = Record>,
    C: ColumnIndex + Copy,
{
    records.into_iter().map(|r| r.get(index)).collect()
}

/// First column of the first record, `None` when there are no records.
pub fn scalar<T, I>(records: I) -> Result<Option<T>, Error>
where
    T: FromValue,
    I: IntoIterator<Item = Record>,
{
    records.into_iter().next().map(|r| r.get(0)).transpose()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::Value;

    fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Vec<Record> {
        let columns: Arc<[String]> = columns.iter().map(|c| (*c).to_string()).collect();
        rows.into_iter()
            .map(|values| Record::new(Arc::clone(&columns), values).unwrap())
            .collect()
    }

    #[test]
    fn biject_keeps_last_duplicate() {
        let records = rows(
            &["ode_ref_id", "ode_gene_id"],
            vec![
                vec!["Ccr4".into(), 1.into()],
                vec!["Pax6".into(), 2.into()],
                vec!["Ccr4".into(), 3.into()],
            ],
        );
        let map: HashMap<String, i64> = biject(records).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["Ccr4"], 3);
        assert_eq!(map["Pax6"], 2);
    }

    #[test]
    fn biject_by_names() {
        let records = rows(
            &["sp_id", "sp_name", "sp_taxid"],
            vec![vec![1.into(), "Mus musculus".into(), 10090.into()]],
        );
        let map: HashMap<i64, i64> = biject_by(records, "sp_taxid", "sp_id").unwrap();
        assert_eq!(map[&10090], 1);
    }

    #[test]
    fn associate_collects_in_row_order() {
        let records = rows(
            &["ode_gene_id", "ode_ref_id"],
            vec![
                vec![7.into(), "MGI:104755".into()],
                vec![8.into(), "Pax6".into()],
                vec![7.into(), "Ccr4".into()],
            ],
        );
        let map: HashMap<i64, Vec<String>> = associate(records).unwrap();
        assert_eq!(map[&7], vec!["MGI:104755".to_string(), "Ccr4".to_string()]);
        assert_eq!(map[&8], vec!["Pax6".to_string()]);
    }

    #[test]
    fn map_by_first_keeps_whole_record() {
        let records = rows(
            &["sp_name", "sp_id"],
            vec![vec!["Homo sapiens".into(), 2.into()]],
        );
        let map: HashMap<String, Record> = map_by_first(records).unwrap();
        assert_eq!(map["Homo sapiens"].get::<i64, _>("sp_id").unwrap(), 2);
    }

    #[test]
    fn scalar_and_column() {
        let records = rows(&["gs_id"], vec![vec![10.into()], vec![11.into()]]);
        assert_eq!(scalar::<i64, _>(records.clone()).unwrap(), Some(10));
        assert_eq!(column::<i64, _, _>(records, 0).unwrap(), vec![10, 11]);
        assert_eq!(scalar::<i64, _>(Vec::new()).unwrap(), None);
    }

    #[test]
    fn null_keys_are_errors_not_silently_dropped() {
        let records = rows(&["at_abbrev", "at_id"], vec![vec![Value::Null, 1.into()]]);
        assert!(biject::<String, i64, _>(records).is_err());
    }
}

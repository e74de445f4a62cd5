//! Generic per-table reads shared by every handler.
//!
//! Table and column names come from this crate, never from callers; values
//! are always bound as parameters.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};

use super::{CacheDb, CacheError};

/// Column/value pairs joined with `AND`.
pub type Predicate<'a> = &'a [(&'a str, Value)];

/// A detached row snapshot. It does not track later changes to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.0.get(column)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        match self.0.get(column)? {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.0.get(column)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_blob(&self, column: &str) -> Option<&[u8]> {
        match self.0.get(column)? {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Storage adapter bound to one table.
#[derive(Clone)]
pub struct Table {
    db: Arc<CacheDb>,
    name: &'static str,
}

impl Table {
    pub fn new(db: Arc<CacheDb>, name: &'static str) -> Self {
        Self { db, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn db(&self) -> &Arc<CacheDb> {
        &self.db
    }

    /// Number of rows in the table.
    pub fn count(&self) -> Result<u64, CacheError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.name);
        let count: i64 = self.db.read(|conn| conn.query_row(&sql, [], |row| row.get(0)))?;
        Ok(count as u64)
    }

    /// Number of rows matching `predicate`.
    pub fn count_where(&self, predicate: Predicate<'_>) -> Result<u64, CacheError> {
        let (where_clause, values) = build_where_clause(predicate);
        let sql = format!("SELECT COUNT(*) FROM {} {}", self.name, where_clause);
        let count: i64 = self.db.read(|conn| {
            conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
        })?;
        Ok(count as u64)
    }

    /// Fetch `columns` of the first row matching `predicate`.
    pub fn fetch_one(
        &self,
        columns: &[&str],
        predicate: Predicate<'_>,
    ) -> Result<Option<Record>, CacheError> {
        let (where_clause, values) = build_where_clause(predicate);
        let sql = format!(
            "SELECT {} FROM {} {} LIMIT 1",
            columns.join(", "),
            self.name,
            where_clause
        );

        self.db.read(|conn| {
            conn.query_row(&sql, params_from_iter(values.iter()), |row| {
                let mut record = BTreeMap::new();
                for (i, column) in columns.iter().enumerate() {
                    record.insert(column.to_string(), row.get::<_, Value>(i)?);
                }
                Ok(Record(record))
            })
            .optional()
        })
    }

    /// Fetch a single column of the first row matching `predicate`.
    ///
    /// A matching row whose column is NULL also yields `None`.
    pub fn get_one(
        &self,
        column: &str,
        predicate: Predicate<'_>,
    ) -> Result<Option<Value>, CacheError> {
        Ok(self
            .fetch_one(&[column], predicate)?
            .and_then(|record| record.0.into_values().next())
            .filter(|value| *value != Value::Null))
    }

    /// Whether any row matches `predicate`.
    pub fn exists(&self, predicate: Predicate<'_>) -> Result<bool, CacheError> {
        let (where_clause, values) = build_where_clause(predicate);
        let sql = format!("SELECT 1 FROM {} {} LIMIT 1", self.name, where_clause);
        let found = self.db.read(|conn| {
            conn.query_row(&sql, params_from_iter(values.iter()), |_| Ok(()))
                .optional()
        })?;
        Ok(found.is_some())
    }
}

fn build_where_clause(predicate: Predicate<'_>) -> (String, Vec<Value>) {
    if predicate.is_empty() {
        return (String::new(), Vec::new());
    }

    let conditions: Vec<String> = predicate
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .collect();
    let values = predicate.iter().map(|(_, value)| value.clone()).collect();

    (format!("WHERE {}", conditions.join(" AND ")), values)
}

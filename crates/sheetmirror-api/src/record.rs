//! Records as stored in the mirror.
//!
//! A record is the dynamic, column-keyed form of one sheet row. Columns are
//! kept in a `BTreeMap` so two records with the same cells serialize to the
//! same JSON regardless of header order, which is what the reconciler's
//! change detection relies on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::Value;

/// Column name → cell value
pub type Fields = BTreeMap<String, Value>;

/// Prefix of every locally generated identifier
pub const TEMP_ID_PREFIX: &str = "temp_";

/// One row of a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Fields,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Fields) -> Self {
        Self { fields }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).map(Value::as_key)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Identifier of this record under the given id column, if non-blank
    pub fn id(&self, id_field: &str) -> Option<String> {
        self.get(id_field)
            .filter(|v| !v.is_blank())
            .map(Value::as_key)
    }

    /// Overwrite the given columns, leaving the rest untouched
    pub fn merge(&mut self, patch: &Fields) {
        for (name, value) in patch {
            self.fields.insert(name.clone(), value.clone());
        }
    }
}

/// Locally generated identifier for a record awaiting its server id.
///
/// Returned from `create()` as the correlation token, so the coordinator can
/// find the optimistic record again without scanning for the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId(String);

impl TempId {
    /// `temp_<unix-millis>_<sequence>`; the sequence separates creates that
    /// land in the same millisecond.
    pub fn generate(now_millis: i64, sequence: u64) -> Self {
        Self(format!("{}{}_{}", TEMP_ID_PREFIX, now_millis, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_temp(id: &str) -> bool {
        id.starts_with(TEMP_ID_PREFIX)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convert a sheet read (header row followed by data rows) into records.
///
/// Cells missing from a short row default to the empty string; a sheet with
/// no data rows yields nothing.
pub fn rows_to_records(rows: &[Vec<Value>]) -> Vec<Record> {
    if rows.len() < 2 {
        return Vec::new();
    }

    let headers: Vec<String> = rows[0].iter().map(Value::as_key).collect();
    rows[1..]
        .iter()
        .map(|row| {
            let fields = headers
                .iter()
                .enumerate()
                .filter(|(_, header)| !header.is_empty())
                .map(|(index, header)| {
                    let cell = match row.get(index) {
                        Some(Value::Null) | None => Value::String(String::new()),
                        Some(value) => value.clone(),
                    };
                    (header.clone(), cell)
                })
                .collect();
            Record::from_fields(fields)
        })
        .collect()
}

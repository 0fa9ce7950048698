//! Table metadata and the mapping between SQLite values and JSON records.
//! Records stay schemaless JSON so the gateway layer can hand them to any
//! typed model; the schema only validates identifiers and restores booleans.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

use medtrip_types::Record;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub declared_type: String,
}

impl Column {
    pub fn is_boolean(&self) -> bool {
        self.declared_type.eq_ignore_ascii_case("BOOLEAN")
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| anyhow!("unknown column {}.{}", self.name, name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

pub fn load_schema(conn: &Connection) -> Result<HashMap<String, TableSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut tables = HashMap::new();
    for name in names {
        let mut info = conn.prepare(&format!("PRAGMA table_info({})", quote(&name)))?;
        let columns = info
            .query_map([], |row| {
                Ok(Column {
                    name: row.get(1)?,
                    declared_type: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tables.insert(name.clone(), TableSchema { name, columns });
    }

    Ok(tables)
}

/// Quote an identifier for interpolation into SQL.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested JSON is stored as text.
        other => SqlValue::Text(other.to_string()),
    }
}

pub fn from_sql(value: ValueRef<'_>, column: Option<&Column>) -> Result<Value> {
    let is_boolean = column.is_some_and(Column::is_boolean);
    let json = match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if is_boolean => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => {
            return Err(anyhow!(
                "blob column {} cannot be represented as JSON",
                column.map(|c| c.name.as_str()).unwrap_or("?")
            ));
        }
    };
    Ok(json)
}

/// Read the columns of the current row, starting at `offset`, into a record.
pub fn read_record(
    row: &rusqlite::Row<'_>,
    names: &[String],
    offset: usize,
    table: &TableSchema,
) -> Result<Record> {
    let mut record = Record::new();
    for (idx, name) in names.iter().enumerate().skip(offset) {
        let column = table.columns.iter().find(|c| &c.name == name);
        record.insert(name.clone(), from_sql(row.get_ref(idx)?, column)?);
    }
    Ok(record)
}

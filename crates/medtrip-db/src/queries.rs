use anyhow::{Result, anyhow, bail};
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use uuid::Uuid;

use medtrip_types::{Filter, Record, Select, timestamp};

use crate::Database;
use crate::models::{TableSchema, quote, read_record, to_sql};

/// One row touched by a mutation.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub record: Record,
    pub old_record: Option<Record>,
}

impl Database {
    pub fn select(&self, query: &Select) -> Result<Vec<Record>> {
        let table = self.table(&query.table)?;

        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM {}", quote(&table.name));
        sql.push_str(&where_clause(table, &query.filters, &mut params)?);

        let mut order = Vec::with_capacity(query.order.len() + 1);
        for o in &query.order {
            let column = table.column(&o.column)?;
            order.push(format!(
                "{} {}",
                quote(&column.name),
                if o.ascending { "ASC" } else { "DESC" }
            ));
        }
        // Insertion order breaks ties, in the direction of the last sort key.
        let ascending = query.order.last().is_none_or(|o| o.ascending);
        order.push(format!("rowid {}", if ascending { "ASC" } else { "DESC" }));
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        self.with_conn(|conn| {
            Ok(query_rows(conn, &sql, &params, table)?
                .into_iter()
                .map(|(_, record)| record)
                .collect())
        })
    }

    pub fn insert(&self, table: &str, mut record: Record) -> Result<Record> {
        let table = self.table(table)?;
        if table.has_column("id") && !record.contains_key("id") {
            record.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }

        let mut params = Vec::new();
        let sql = insert_sql(table, &record, &mut params)? + " RETURNING rowid, *";

        self.with_conn(|conn| {
            query_rows(conn, &sql, &params, table)?
                .into_iter()
                .next()
                .map(|(_, record)| record)
                .ok_or_else(|| anyhow!("insert into {} returned no row", table.name))
        })
    }

    /// Apply `patch` to every row matching `filters`.
    pub fn update(&self, table: &str, filters: &[Filter], mut patch: Record) -> Result<Vec<RowChange>> {
        let table = self.table(table)?;
        if patch.is_empty() {
            bail!("update of {} has no columns", table.name);
        }
        touch_updated_at(table, &mut patch);

        let mut params = Vec::new();
        let mut sets = Vec::with_capacity(patch.len());
        for (name, value) in &patch {
            let column = table.column(name)?;
            params.push(to_sql(value));
            sets.push(format!("{} = ?{}", quote(&column.name), params.len()));
        }
        let filter_sql = where_clause(table, filters, &mut params)?;
        let sql = format!(
            "UPDATE {} SET {}{} RETURNING rowid, *",
            quote(&table.name),
            sets.join(", "),
            filter_sql
        );

        let mut before_params = Vec::new();
        let before_sql = format!(
            "SELECT rowid, * FROM {}{}",
            quote(&table.name),
            where_clause(table, filters, &mut before_params)?
        );

        self.with_conn(|conn| {
            let before = query_rows(conn, &before_sql, &before_params, table)?;
            let after = query_rows(conn, &sql, &params, table)?;
            Ok(pair_with_previous(after, before))
        })
    }

    pub fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<RowChange>> {
        let table = self.table(table)?;

        let mut params = Vec::new();
        let sql = format!(
            "DELETE FROM {}{} RETURNING rowid, *",
            quote(&table.name),
            where_clause(table, filters, &mut params)?
        );

        self.with_conn(|conn| {
            Ok(query_rows(conn, &sql, &params, table)?
                .into_iter()
                .map(|(_, record)| RowChange {
                    old_record: Some(record.clone()),
                    record,
                })
                .collect())
        })
    }

    /// Insert `record`, or overwrite the row that shares its `on_conflict` key.
    /// `old_record` is `None` when the row was newly inserted.
    pub fn upsert(&self, table: &str, mut record: Record, on_conflict: &[&str]) -> Result<RowChange> {
        let table = self.table(table)?;
        if on_conflict.is_empty() {
            bail!("upsert into {} needs a conflict key", table.name);
        }

        let mut key_filters = Vec::with_capacity(on_conflict.len());
        for key in on_conflict {
            let value = record
                .get(*key)
                .ok_or_else(|| anyhow!("upsert into {} is missing key column {}", table.name, key))?;
            key_filters.push(Filter::Eq(key.to_string(), value.clone()));
        }
        if table.has_column("id") && !record.contains_key("id") && !on_conflict.contains(&"id") {
            record.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }
        touch_updated_at(table, &mut record);

        let mut params = Vec::new();
        let mut sql = insert_sql(table, &record, &mut params)?;
        let keys: Vec<String> = on_conflict
            .iter()
            .map(|k| table.column(k).map(|c| quote(&c.name)))
            .collect::<Result<_>>()?;
        let updates: Vec<String> = record
            .keys()
            .filter(|k| !on_conflict.contains(&k.as_str()) && k.as_str() != "id")
            .map(|k| format!("{0} = excluded.{0}", quote(k)))
            .collect();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", keys.join(", ")));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                keys.join(", "),
                updates.join(", ")
            ));
        }
        sql.push_str(" RETURNING rowid, *");

        let mut key_params = Vec::new();
        let key_sql = format!(
            "SELECT rowid, * FROM {}{}",
            quote(&table.name),
            where_clause(table, &key_filters, &mut key_params)?
        );

        self.with_conn(|conn| {
            let previous = query_rows(conn, &key_sql, &key_params, table)?
                .into_iter()
                .next()
                .map(|(_, record)| record);
            let written = query_rows(conn, &sql, &params, table)?
                .into_iter()
                .next()
                .map(|(_, record)| record);

            match (written, previous) {
                (Some(record), old_record) => Ok(RowChange { record, old_record }),
                // DO NOTHING on an existing row: nothing changed.
                (None, Some(existing)) => Ok(RowChange {
                    old_record: Some(existing.clone()),
                    record: existing,
                }),
                (None, None) => Err(anyhow!("upsert into {} returned no row", table.name)),
            }
        })
    }
}

fn touch_updated_at(table: &TableSchema, record: &mut Record) {
    if table.has_column("updated_at") && !record.contains_key("updated_at") {
        record.insert(
            "updated_at".into(),
            Value::String(timestamp(chrono::Utc::now())),
        );
    }
}

fn insert_sql(table: &TableSchema, record: &Record, params: &mut Vec<SqlValue>) -> Result<String> {
    if record.is_empty() {
        return Ok(format!("INSERT INTO {} DEFAULT VALUES", quote(&table.name)));
    }

    let mut columns = Vec::with_capacity(record.len());
    let mut placeholders = Vec::with_capacity(record.len());
    for (name, value) in record {
        let column = table.column(name)?;
        columns.push(quote(&column.name));
        params.push(to_sql(value));
        placeholders.push(format!("?{}", params.len()));
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&table.name),
        columns.join(", "),
        placeholders.join(", ")
    ))
}

/// Build ` WHERE ...` (with leading space) or an empty string when there are no filters.
/// Parameters are numbered after whatever `params` already holds.
fn where_clause(table: &TableSchema, filters: &[Filter], params: &mut Vec<SqlValue>) -> Result<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }

    let mut parts = Vec::with_capacity(filters.len());
    for filter in filters {
        let column = quote(&table.column(filter.column())?.name);
        let part = match filter {
            Filter::IsNull(_) | Filter::Eq(_, Value::Null) => format!("{} IS NULL", column),
            Filter::Neq(_, Value::Null) => format!("{} IS NOT NULL", column),
            Filter::Eq(_, value) => bind(params, value, |n| format!("{} = ?{}", column, n)),
            Filter::Neq(_, value) => bind(params, value, |n| format!("{} != ?{}", column, n)),
            Filter::Gt(_, value) => bind(params, value, |n| format!("{} > ?{}", column, n)),
            Filter::Lt(_, value) => bind(params, value, |n| format!("{} < ?{}", column, n)),
            Filter::In(_, values) if values.is_empty() => "0".to_string(),
            Filter::In(_, values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| bind(params, v, |n| format!("?{}", n)))
                    .collect();
                format!("{} IN ({})", column, placeholders.join(", "))
            }
        };
        parts.push(part);
    }

    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

fn bind(params: &mut Vec<SqlValue>, value: &Value, render: impl FnOnce(usize) -> String) -> String {
    params.push(to_sql(value));
    render(params.len())
}

/// Run a statement whose result set starts with `rowid` (or not) and map each row.
fn query_rows(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    table: &TableSchema,
) -> Result<Vec<(Option<i64>, Record)>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
    let has_rowid = names.first().is_some_and(|n| n == "rowid");

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if has_rowid {
            let rowid: i64 = row.get(0)?;
            let record = read_record(row, &names, 1, table)?;
            out.push((Some(rowid), record));
        } else {
            out.push((None, read_record(row, &names, 0, table)?));
        }
    }

    Ok(out)
}

fn pair_with_previous(
    after: Vec<(Option<i64>, Record)>,
    before: Vec<(Option<i64>, Record)>,
) -> Vec<RowChange> {
    after
        .into_iter()
        .map(|(rowid, record)| {
            let old_record = before
                .iter()
                .find(|(id, _)| id.is_some() && *id == rowid)
                .map(|(_, r)| r.clone());
            RowChange { record, old_record }
        })
        .collect()
}

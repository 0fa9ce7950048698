use serde::Serialize;
use serde_json::Value;

/// A table row as the gateway sees it: column name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Convert any serializable value into a filter or column value.
pub fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Build a record from a `json!({ ... })` object. Anything else yields an empty record.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Lt(String, Value),
    IsNull(String),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Self::Eq(c, _)
            | Self::Neq(c, _)
            | Self::In(c, _)
            | Self::Gt(c, _)
            | Self::Lt(c, _)
            | Self::IsNull(c) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A table-scoped read: filters are ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<u32>,
}

impl Select {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn eq<T: Serialize>(mut self, column: &str, value: T) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), to_value(value)));
        self
    }

    pub fn neq<T: Serialize>(mut self, column: &str, value: T) -> Self {
        self.filters.push(Filter::Neq(column.to_string(), to_value(value)));
        self
    }

    pub fn in_list<T: Serialize>(mut self, column: &str, values: impl IntoIterator<Item = T>) -> Self {
        let values = values.into_iter().map(to_value).collect();
        self.filters.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn gt<T: Serialize>(mut self, column: &str, value: T) -> Self {
        self.filters.push(Filter::Gt(column.to_string(), to_value(value)));
        self
    }

    pub fn lt<T: Serialize>(mut self, column: &str, value: T) -> Self {
        self.filters.push(Filter::Lt(column.to_string(), to_value(value)));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::IsNull(column.to_string()));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

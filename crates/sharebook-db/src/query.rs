use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use sharebook_types::events::ChangeEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field == value`
    Eq { field: String, value: Value },
    /// The array at `field` contains `value`.
    ArrayContains { field: String, value: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A query over one collection. Built up with chained calls:
///
/// ```ignore
/// Query::collection("messages")
///     .where_array_contains("participants", user_id.to_string())
///     .order_by("timestamp", Direction::Asc)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: String,
    filters: Vec<Filter>,
    order_by: Option<(String, Direction)>,
    limit: Option<u32>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Whether `event` can change this query's result.
    pub fn is_affected_by(&self, event: &ChangeEvent) -> bool {
        event.touches(&self.collection)
    }

    /// Render to SQL over the `documents` table. Field paths are bound as
    /// parameters, never spliced into the statement.
    pub(crate) fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT id, data FROM documents WHERE collection = {}",
            bind(&mut params, SqlValue::Text(self.collection.clone()))
        );

        for filter in &self.filters {
            match filter {
                Filter::Eq { field, value: Value::Null } => {
                    let path = bind(&mut params, json_path(field));
                    sql.push_str(&format!(" AND json_extract(data, {}) IS NULL", path));
                }
                Filter::Eq { field, value } => {
                    let path = bind(&mut params, json_path(field));
                    let value = bind(&mut params, to_sql_value(value));
                    sql.push_str(&format!(" AND json_extract(data, {}) = {}", path, value));
                }
                Filter::ArrayContains { field, value } => {
                    let path = bind(&mut params, json_path(field));
                    let value = bind(&mut params, to_sql_value(value));
                    sql.push_str(&format!(
                        " AND EXISTS (SELECT 1 FROM json_each(documents.data, {}) WHERE json_each.value = {})",
                        path, value
                    ));
                }
            }
        }

        match &self.order_by {
            Some((field, direction)) => {
                let path = bind(&mut params, json_path(field));
                let dir = match direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                // Insertion order breaks ties between equal keys.
                sql.push_str(&format!(" ORDER BY json_extract(data, {}) {}, seq {}", path, dir, dir));
            }
            None => sql.push_str(" ORDER BY seq ASC"),
        }

        if let Some(limit) = self.limit {
            let limit = bind(&mut params, SqlValue::Integer(i64::from(limit)));
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        (sql, params)
    }
}

fn bind(params: &mut Vec<SqlValue>, value: SqlValue) -> String {
    params.push(value);
    format!("?{}", params.len())
}

fn json_path(field: &str) -> SqlValue {
    SqlValue::Text(format!("$.{}", field))
}

/// `json_extract` yields 1/0 for booleans and JSON text for containers, so
/// bind values the same way.
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

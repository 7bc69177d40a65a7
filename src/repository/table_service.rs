use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &["invoices", "leases", "tenants"];

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Uuid(uuid::Uuid),
    Date(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Lt,
    Lte,
    Gte,
}

impl FilterOperator {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Lt => " < ",
            Self::Lte => " <= ",
            Self::Gte => " >= ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Compare {
        column: &'static str,
        operator: FilterOperator,
        value: FilterValue,
    },
    AnyText {
        column: &'static str,
        values: Vec<String>,
    },
}

/// AND-ed column conditions for `list_rows`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    conditions: Vec<Condition>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq_text(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Compare {
            column,
            operator: FilterOperator::Eq,
            value: FilterValue::Text(value.into()),
        });
        self
    }

    /// Id columns are bound as uuid when the value parses, as text otherwise.
    pub fn eq_id(mut self, column: &'static str, value: &str) -> Self {
        let value = match uuid::Uuid::parse_str(value.trim()) {
            Ok(parsed) => FilterValue::Uuid(parsed),
            Err(_) => FilterValue::Text(value.to_string()),
        };
        self.conditions.push(Condition::Compare {
            column,
            operator: FilterOperator::Eq,
            value,
        });
        self
    }

    pub fn date(mut self, column: &'static str, operator: FilterOperator, value: NaiveDate) -> Self {
        self.conditions.push(Condition::Compare {
            column,
            operator,
            value: FilterValue::Date(value),
        });
        self
    }

    /// Skipped entirely when `values` is empty.
    pub fn any_text(mut self, column: &'static str, values: Vec<String>) -> Self {
        if !values.is_empty() {
            self.conditions.push(Condition::AnyText { column, values });
        }
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrderBy {
    pub column: &'static str,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filter: &RowFilter,
    order: OrderBy,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>, AppError> {
    let mut query = build_select(table, filter, order)?;
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
) -> Result<Option<Value>, AppError> {
    let filter = RowFilter::new().eq_id("id", row_id);
    let mut query = build_select(table, &filter, OrderBy::asc("id"))?;
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    Ok(row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten()))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = build_insert(table, payload)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = build_update(table, row_id, payload)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table} record not found.")))
}

fn build_select<'a>(
    table: &str,
    filter: &RowFilter,
    order: OrderBy,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = validate_identifier(order.column)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    for condition in &filter.conditions {
        push_condition(&mut query, condition)?;
    }

    let direction = if order.ascending { " ASC" } else { " DESC" };
    query.push(" ORDER BY t.").push(order_name).push(direction);
    if order_name != "id" {
        // Stable order across pages when the sort column ties.
        query.push(", t.id").push(direction);
    }
    Ok(query)
}

// jsonb_populate_record lets PostgreSQL resolve column types (uuid, date,
// numeric) from the table definition, so decimals travel as strings.
fn build_insert<'a>(
    table: &str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let columns = sorted_columns(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push(*column);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push("r.");
            separated.push_unseparated(*column);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");
    Ok(query)
}

fn build_update<'a>(
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let columns = sorted_columns(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push(*column);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*column);
        }
    }
    query.push(", updated_at = now()");
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE 1=1");
    push_condition(
        &mut query,
        &RowFilter::new().eq_id("id", row_id).conditions[0],
    )?;
    query.push(" RETURNING row_to_json(t) AS row");
    Ok(query)
}

fn push_condition(query: &mut QueryBuilder<Postgres>, condition: &Condition) -> Result<(), AppError> {
    match condition {
        Condition::Compare {
            column,
            operator,
            value,
        } => {
            let column = validate_identifier(column)?;
            query.push(" AND t.").push(column);
            match value {
                FilterValue::Text(text) => {
                    query.push("::text").push(operator.sql()).push_bind(text.clone());
                }
                FilterValue::Uuid(id) => {
                    query.push(operator.sql()).push_bind(*id);
                }
                FilterValue::Date(date) => {
                    query.push(operator.sql()).push_bind(*date);
                }
            }
        }
        Condition::AnyText { column, values } => {
            let column = validate_identifier(column)?;
            query
                .push(" AND t.")
                .push(column)
                .push("::text = ANY(")
                .push_bind(values.clone())
                .push(")");
        }
    }
    Ok(())
}

fn sorted_columns(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut columns = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    columns.sort_unstable();
    Ok(columns)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::BadRequest(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    let valid = !trimmed.is_empty()
        && trimmed.chars().all(|character| {
            character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
        })
        && !trimmed.starts_with(|first: char| first.is_ascii_digit());
    if valid {
        Ok(trimmed)
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )))
    }
}

pub fn map_db_error(error: sqlx::Error) -> AppError {
    if let Some(db_error) = error.as_database_error() {
        if db_error.code().as_deref() == Some("23505") {
            return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
        }
    }
    tracing::error!(db_error = %error, "Database query failed");
    AppError::Dependency("Database operation failed.".to_string())
}

/// Trimmed text column, empty when missing, null or non-text.
pub fn val_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

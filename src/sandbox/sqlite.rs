use super::{Bindings, ExecutionOutcome, ExecutionSandbox, SandboxError};
use crate::config::QuerySettings;
use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, OpenFlags, Statement};
use serde_json::{Number, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Executes generated SQL against a SQLite database opened read-only.
#[derive(Debug, Clone)]
pub struct SqliteQuerySandbox {
    db_path: PathBuf,
    row_limit: usize,
    display_rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    /// Values in column order; result sets may repeat a column name.
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("only read-only statements may be executed")]
    NotReadOnly,
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl QueryError {
    fn interrupted(&self) -> bool {
        matches!(self, QueryError::Sqlite(err) if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted))
    }

    fn error_type(&self) -> String {
        match self {
            QueryError::NotReadOnly => "NotReadOnly".to_string(),
            QueryError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => {
                format!("SqliteError({:?})", failure.code)
            }
            QueryError::Sqlite(_) => "SqliteError".to_string(),
        }
    }
}

impl SqliteQuerySandbox {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self::from_settings(db_path, &QuerySettings::default())
    }

    pub fn from_settings(db_path: impl Into<PathBuf>, settings: &QuerySettings) -> Self {
        Self {
            db_path: db_path.into(),
            row_limit: settings.row_limit,
            display_rows: settings.display_rows,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection, SandboxError> {
        if !self.db_path.is_file() {
            return Err(SandboxError::Connection {
                target: self.db_path.display().to_string(),
                reason: "database file does not exist".to_string(),
            });
        }
        Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| SandboxError::Connection {
            target: self.db_path.display().to_string(),
            reason: err.to_string(),
        })
    }

    /// Outer `Err` is a sandbox setup failure; inner `Err` is a failure of the query.
    pub fn query(
        &self,
        sql: &str,
        bindings: &Bindings,
        timeout: Duration,
    ) -> Result<Result<QueryResult, QueryError>, SandboxError> {
        let conn = self.open()?;
        let deadline = Instant::now() + timeout;
        conn.progress_handler(1_000, Some(move || Instant::now() >= deadline));
        Ok(run_query(
            &conn,
            &apply_row_limit(sql, self.row_limit),
            bindings,
        ))
    }
}

impl ExecutionSandbox for SqliteQuerySandbox {
    fn execute(
        &self,
        source: &str,
        bindings: &Bindings,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, SandboxError> {
        Ok(match self.query(source, bindings, timeout)? {
            Ok(result) => {
                ExecutionOutcome::succeeded(format_query_result(&result, self.display_rows))
            }
            Err(err) if err.interrupted() => ExecutionOutcome::timed_out(timeout, String::new()),
            Err(err) => ExecutionOutcome::raised(err.error_type(), err.to_string(), String::new()),
        })
    }
}

fn run_query(conn: &Connection, sql: &str, bindings: &Bindings) -> Result<QueryResult, QueryError> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(QueryError::NotReadOnly);
    }
    bind_named(&mut stmt, bindings)?;
    let columns = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    let mut cursor = stmt.raw_query();
    while let Some(row) = cursor.next()? {
        let record = (0..columns.len())
            .map(|index| row.get_ref(index).map(json_from_sql))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(record);
    }
    Ok(QueryResult { columns, rows })
}

/// Bindings fill `:name` parameters present in the statement; others are ignored.
fn bind_named(stmt: &mut Statement<'_>, bindings: &Bindings) -> Result<(), QueryError> {
    for (name, value) in bindings {
        if let Some(index) = stmt.parameter_index(&format!(":{name}"))? {
            stmt.raw_bind_parameter(index, sql_from_json(value))?;
        }
    }
    Ok(())
}

fn sql_from_json(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

pub(crate) fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn limit_keyword() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\blimit\b").expect("limit pattern compiles"))
}

/// Appends `LIMIT <row_limit>` unless the statement already limits itself.
pub fn apply_row_limit(sql: &str, row_limit: usize) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if limit_keyword().is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("{trimmed} LIMIT {row_limit}")
    }
}

pub fn format_query_result(result: &QueryResult, display_rows: usize) -> String {
    if result.rows.is_empty() {
        return "query returned 0 rows\n".to_string();
    }
    let mut lines = vec![
        format!("rows: {}", result.rows.len()),
        result.columns.join(" | "),
        result
            .columns
            .iter()
            .map(|_| "---")
            .collect::<Vec<_>>()
            .join(" | "),
    ];
    for row in result.rows.iter().take(display_rows) {
        lines.push(
            (0..result.columns.len())
                .map(|index| match row.get(index) {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Null) | None => "NULL".to_string(),
                    Some(other) => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" | "),
        );
    }
    if result.rows.len() > display_rows {
        lines.push(format!(
            "... ({} more rows not shown)",
            result.rows.len() - display_rows
        ));
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_limit_is_appended_once() {
        assert_eq!(
            apply_row_limit("SELECT * FROM sales;", 100),
            "SELECT * FROM sales LIMIT 100"
        );
        assert_eq!(
            apply_row_limit("select * from sales limit 5", 100),
            "select * from sales limit 5"
        );
        assert_eq!(
            apply_row_limit("SELECT speed_limit FROM roads", 10),
            "SELECT speed_limit FROM roads LIMIT 10"
        );
    }

    #[test]
    fn formats_tables_with_overflow_note() {
        let rows = (0..3).map(|i| vec![Value::from(i), Value::Null]).collect();
        let text = format_query_result(
            &QueryResult {
                columns: vec!["id".to_string(), "name".to_string()],
                rows,
            },
            2,
        );
        assert_eq!(
            text,
            "rows: 3\nid | name\n--- | ---\n0 | NULL\n1 | NULL\n... (1 more rows not shown)\n"
        );
    }
}

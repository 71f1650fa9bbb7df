use super::{CapabilityError, SchemaInfo, SchemaReader, TableSchema};
use crate::sandbox::sqlite::json_from_sql;
use rusqlite::{Connection, OpenFlags};
use serde_json::Map;
use std::collections::BTreeMap;
use std::path::Path;

/// Reads table layout, counts and sample rows from a SQLite database file.
///
/// With a single table, top-level column names are bare; with several they are
/// qualified as `table.column`.
#[derive(Debug, Clone)]
pub struct SqliteSchemaReader {
    sample_rows: usize,
}

impl Default for SqliteSchemaReader {
    fn default() -> Self {
        Self { sample_rows: 3 }
    }
}

impl SqliteSchemaReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }
}

impl SchemaReader for SqliteSchemaReader {
    fn read(&self, source_ref: &str) -> Result<SchemaInfo, CapabilityError> {
        let path = Path::new(source_ref);
        if !path.is_file() {
            return Err(CapabilityError::Unavailable(format!(
                "database file {source_ref} does not exist"
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|err| CapabilityError::Unavailable(format!("{source_ref}: {err}")))?;
        read_schema(&conn, source_ref, self.sample_rows)
            .map_err(|err| CapabilityError::Failed(format!("{source_ref}: {err}")))
    }
}

struct TableDetail {
    table: TableSchema,
    null_counts: BTreeMap<String, u64>,
    numeric_columns: Vec<String>,
}

fn read_schema(
    conn: &Connection,
    source_ref: &str,
    sample_rows: usize,
) -> rusqlite::Result<SchemaInfo> {
    let names = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let names = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        names
    };

    let mut details = Vec::with_capacity(names.len());
    for name in &names {
        details.push(read_table(conn, name, sample_rows)?);
    }

    let qualify = details.len() > 1;
    let key = |table: &str, column: &str| {
        if qualify {
            format!("{table}.{column}")
        } else {
            column.to_string()
        }
    };

    let mut schema = SchemaInfo {
        source: source_ref.to_string(),
        ..SchemaInfo::default()
    };
    for detail in &details {
        let table = &detail.table;
        schema.row_count += table.row_count;
        for column in &table.columns {
            let qualified = key(&table.name, column);
            if let Some(kind) = table.types.get(column) {
                schema.types.insert(qualified.clone(), kind.clone());
            }
            if let Some(nulls) = detail.null_counts.get(column) {
                schema.null_counts.insert(qualified.clone(), *nulls);
            }
            if detail.numeric_columns.contains(column) {
                schema.numeric_columns.push(qualified.clone());
            }
            schema.columns.push(qualified);
        }
    }
    if let [only] = details.as_slice() {
        schema.sample_rows = only.table.sample_rows.clone();
    }
    schema.tables = details.into_iter().map(|detail| detail.table).collect();
    Ok(schema)
}

fn read_table(conn: &Connection, name: &str, sample_rows: usize) -> rusqlite::Result<TableDetail> {
    let quoted = quote_identifier(name);
    let mut columns = Vec::new();
    let mut types = BTreeMap::new();
    {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({quoted})"))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        for row in rows {
            let (column, declared) = row?;
            types.insert(column.clone(), declared);
            columns.push(column);
        }
    }

    let row_count: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM {quoted}"), [], |row| row.get(0))?;

    let mut null_counts = BTreeMap::new();
    for column in &columns {
        let nulls: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {quoted} WHERE {} IS NULL",
                quote_identifier(column)
            ),
            [],
            |row| row.get(0),
        )?;
        null_counts.insert(column.clone(), nulls.max(0) as u64);
    }

    let mut samples = Vec::new();
    {
        let mut stmt = conn.prepare(&format!("SELECT * FROM {quoted} LIMIT {sample_rows}"))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut record = Map::new();
            for (index, column) in columns.iter().enumerate() {
                record.insert(column.clone(), json_from_sql(row.get_ref(index)?));
            }
            samples.push(record);
        }
    }

    let numeric_columns = columns
        .iter()
        .filter(|column| {
            types
                .get(*column)
                .map(|declared| is_numeric_type(declared))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    Ok(TableDetail {
        table: TableSchema {
            name: name.to_string(),
            row_count: row_count.max(0) as u64,
            columns,
            types,
            sample_rows: samples,
        },
        null_counts,
        numeric_columns,
    })
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite affinity rules for INTEGER, REAL and NUMERIC declared types.
fn is_numeric_type(declared: &str) -> bool {
    let upper = declared.to_ascii_uppercase();
    ["INT", "REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL"]
        .iter()
        .any(|marker| upper.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_affinity_follows_declared_type() {
        assert!(is_numeric_type("INTEGER"));
        assert!(is_numeric_type("double precision"));
        assert!(is_numeric_type("DECIMAL(10,2)"));
        assert!(!is_numeric_type("TEXT"));
        assert!(!is_numeric_type(""));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("order \"items\""), "\"order \"\"items\"\"\"");
    }
}

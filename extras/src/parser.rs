//! Loading dataset content into stores a language model can draw on: a
//! SQLite database for tabular data and a TF-IDF index for text.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto_from_rs, Data as ExcelData, Reader};
use futures::future::join_all;
use nyx_client::Data;
use rusqlite::{types::ToSqlOutput, Connection, ToSql};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::vectors::{chunk_text, Metadata, VectorIndex, VectorResult};

/// Name of the table listing every loaded dataset.
pub const SUBSCRIPTIONS_TABLE: &str = "nyx_subscriptions";

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// What to do when a table being written already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IfExists {
    Fail,
    #[default]
    Replace,
    Append,
}

/// Lowercases `value` and replaces characters that are awkward in SQL
/// identifiers (space, `.`, `-`, `(`, `)`) with `_`.
pub fn normalise_name(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '.' | '-' | '(' | ')' => '_',
            c => c,
        })
        .collect()
}

/// A single SQLite value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    /// Parses a CSV field, preferring numbers over text.
    fn infer(field: &str) -> Self {
        if field.is_empty() {
            Cell::Null
        } else if let Ok(i) = field.parse() {
            Cell::Integer(i)
        } else if let Ok(f) = field.parse::<f64>() {
            Cell::Real(f)
        } else {
            Cell::Text(field.to_string())
        }
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Integer(b.into()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Integer(i),
                None => n.as_f64().map_or(Cell::Null, Cell::Real),
            },
            Value::String(s) => Cell::Text(s),
            nested => Cell::Text(nested.to_string()),
        }
    }
}

impl Cell {
    fn from_excel(cell: &ExcelData) -> Self {
        match cell {
            ExcelData::Empty | ExcelData::Error(_) => Cell::Null,
            ExcelData::Int(i) => Cell::Integer(*i),
            ExcelData::Float(f) => Cell::Real(*f),
            ExcelData::Bool(b) => Cell::Integer((*b).into()),
            ExcelData::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Cell::Null => rusqlite::types::Null.to_sql(),
            Cell::Integer(i) => i.to_sql(),
            Cell::Real(f) => f.to_sql(),
            Cell::Text(s) => s.to_sql(),
        }
    }
}

/// Rows with named columns, ready to be written to SQLite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Parses CSV with a header row. Rows that do not match the header are
    /// skipped.
    pub fn from_csv(content: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(content);
        let columns = normalise_columns(reader.headers()?.iter());

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            match record {
                Ok(record) => rows.push(record.iter().map(Cell::infer).collect()),
                Err(e) => debug!(line = line + 2, "skipping malformed csv row: {e}"),
            }
        }
        Ok(Self { columns, rows })
    }

    /// Reads the first worksheet of an xlsx, xls or ods workbook, taking its
    /// first row as the header.
    pub fn from_excel(content: &[u8]) -> Result<Self> {
        let mut workbook = open_workbook_auto_from_rs(std::io::Cursor::new(content))
            .context("invalid spreadsheet")?;
        let range = match workbook.worksheet_range_at(0) {
            Some(range) => range.context("unreadable worksheet")?,
            None => bail!("spreadsheet has no worksheets"),
        };

        let mut rows = range.rows();
        let header: Vec<String> = match rows.next() {
            Some(header) => header.iter().map(ToString::to_string).collect(),
            None => return Ok(Self::default()),
        };
        Ok(Self {
            columns: normalise_columns(header.iter().map(String::as_str)),
            rows: rows
                .map(|row| row.iter().map(Cell::from_excel).collect())
                .collect(),
        })
    }

    /// Parses either an array of records or an object of columns, where each
    /// column is an array or an object keyed by row label.
    pub fn from_json(content: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(content).context("invalid json")?;
        match value {
            Value::Array(records) => Ok(Self::from_records(records)),
            Value::Object(columns) => Self::from_columns(columns),
            _ => bail!("json content is neither an array nor an object"),
        }
    }

    fn from_records(records: Vec<Value>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for record in &records {
            if let Value::Object(fields) = record {
                for key in fields.keys() {
                    if !names.contains(key) {
                        names.push(key.clone());
                    }
                }
            }
        }
        if names.is_empty() {
            names.push("value".to_string());
        }

        let rows = records
            .into_iter()
            .map(|record| match record {
                Value::Object(mut fields) => names
                    .iter()
                    .map(|name| Cell::from_json(fields.remove(name).unwrap_or(Value::Null)))
                    .collect(),
                scalar => {
                    let mut row = vec![Cell::from_json(scalar)];
                    row.resize(names.len(), Cell::Null);
                    row
                }
            })
            .collect();

        Self {
            columns: normalise_columns(names.iter().map(String::as_str)),
            rows,
        }
    }

    fn from_columns(columns: serde_json::Map<String, Value>) -> Result<Self> {
        let mut names = Vec::new();
        let mut values: Vec<Vec<Value>> = Vec::new();
        for (name, column) in columns {
            let column = match column {
                Value::Array(items) => items,
                Value::Object(by_label) => by_label.into_iter().map(|(_, v)| v).collect(),
                other => bail!("column '{name}' is not a list of values: {other}"),
            };
            names.push(name);
            values.push(column);
        }

        let len = values.iter().map(Vec::len).max().unwrap_or(0);
        let rows = (0..len)
            .map(|i| {
                values
                    .iter_mut()
                    .map(|column| {
                        column
                            .get_mut(i)
                            .map(Value::take)
                            .map_or(Cell::Null, Cell::from_json)
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            columns: normalise_columns(names.iter().map(String::as_str)),
            rows,
        })
    }

    /// SQLite type affinity of each column, from the values it holds.
    pub fn column_types(&self) -> Vec<&'static str> {
        (0..self.columns.len())
            .map(|i| {
                let mut affinity = "INTEGER";
                for row in &self.rows {
                    match row.get(i) {
                        Some(Cell::Text(_)) => return "TEXT",
                        Some(Cell::Real(_)) => affinity = "REAL",
                        _ => {}
                    }
                }
                affinity
            })
            .collect()
    }

    /// Writes the table to `name`, creating it as needed.
    pub fn write(&self, conn: &Connection, name: &str, if_exists: IfExists) -> Result<()> {
        let exists = table_exists(conn, name)?;
        match (exists, if_exists) {
            (true, IfExists::Fail) => bail!("table '{name}' already exists"),
            (true, IfExists::Replace) => {
                conn.execute_batch(&format!("DROP TABLE {}", quote(name)))?;
            }
            _ => {}
        }

        let tx = conn.unchecked_transaction()?;
        let columns: Vec<String> = self
            .columns
            .iter()
            .zip(self.column_types())
            .map(|(column, affinity)| format!("{} {affinity}", quote(column)))
            .collect();
        if !exists || if_exists == IfExists::Replace {
            tx.execute_batch(&format!("CREATE TABLE {} ({})", quote(name), columns.join(", ")))?;
        }

        let placeholders = vec!["?"; self.columns.len()].join(", ");
        let names: Vec<String> = self.columns.iter().map(|c| quote(c)).collect();
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                quote(name),
                names.join(", ")
            ))?;
            for row in &self.rows {
                insert.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Normalises column names, naming blank ones and de-duplicating clashes.
fn normalise_columns<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .enumerate()
        .map(|(i, name)| {
            let base = match normalise_name(name.trim()) {
                n if n.is_empty() => format!("column_{i}"),
                n => n,
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}_{}", *count - 1)
            }
        })
        .collect()
}

/// Excel and OpenDocument spreadsheet media types.
fn is_spreadsheet(content_type: &str) -> bool {
    content_type.contains("spreadsheet") || content_type.contains("ms-excel")
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Loads dataset content into SQLite and into a searchable text index.
#[derive(Debug, Default)]
pub struct Parser {
    index: Option<VectorIndex>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Downloads the content of every dataset and loads the tabular ones
    /// (CSV, JSON, spreadsheets) into SQLite tables named after their titles.
    ///
    /// Content that cannot be downloaded or parsed is logged and skipped.
    /// Chunks in `additional` become single row `context` tables. Every
    /// loaded table is listed in [`SUBSCRIPTIONS_TABLE`]. Without
    /// `sqlite_file` the database lives in memory.
    pub async fn data_as_db(
        data: &[Data],
        additional: Option<&VectorResult>,
        sqlite_file: Option<&Path>,
        if_exists: IfExists,
    ) -> Result<Connection> {
        let contents = join_all(data.iter().map(|d| d.as_bytes())).await;

        let conn = match sqlite_file {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };

        let mut index_rows: Vec<[String; 4]> = Vec::new();
        for (d, content) in data.iter().zip(contents) {
            let content = match content {
                Ok(content) => content,
                Err(e) => {
                    warn!("not adding table for {}: {e}", d.title);
                    continue;
                }
            };
            let table_name = table_name(d);
            let content_type = d.content_type();

            let table = if content_type.contains("csv") {
                Table::from_csv(&content)
            } else if content_type.contains("json") {
                Table::from_json(&content)
            } else if is_spreadsheet(content_type) {
                Table::from_excel(&content)
            } else {
                warn!("{} is unsupported type {}", d.title, d.media_type());
                continue;
            };

            let written = table.and_then(|t| t.write(&conn, &table_name, if_exists));
            if let Err(e) = written {
                warn!("{} could not be processed as {content_type}: {e:#}", d.title);
                continue;
            }
            info!(table = %table_name, "loaded {}", d.title);
            index_rows.push([
                d.title.clone(),
                d.url().to_string(),
                table_name,
                d.description.clone(),
            ]);
        }

        if let Some(additional) = additional {
            for (chunk, meta) in additional.chunks.iter().zip(&additional.metadata) {
                let table_name = normalise_name(&meta.title);
                let table = Table {
                    columns: vec!["context".into(), "title".into(), "url".into()],
                    rows: vec![vec![
                        Cell::Text(chunk.clone()),
                        Cell::Text(meta.title.clone()),
                        Cell::Text(meta.url.clone()),
                    ]],
                };
                table.write(&conn, &table_name, if_exists)?;
                index_rows.push([
                    meta.title.clone(),
                    meta.url.clone(),
                    table_name,
                    meta.description.clone(),
                ]);
            }
        }

        if !index_rows.is_empty() {
            let table = Table {
                columns: ["file_title", "url", "table_name", "description"]
                    .map(String::from)
                    .to_vec(),
                rows: index_rows
                    .into_iter()
                    .map(|row| row.into_iter().map(Cell::Text).collect())
                    .collect(),
            };
            table.write(&conn, SUBSCRIPTIONS_TABLE, if_exists)?;
        }

        Ok(conn)
    }

    /// Downloads the text content of the non-CSV datasets and indexes it in
    /// chunks of `chunk_size` words. Replaces any earlier index; leaves it
    /// untouched when no text was found.
    pub async fn data_as_vectors(&mut self, data: &[Data], chunk_size: usize) {
        let text_data: Vec<&Data> = data.iter().filter(|d| !d.content_type().contains("csv")).collect();
        let contents = join_all(text_data.iter().map(|d| d.as_string())).await;

        let mut chunks = Vec::new();
        let mut metadata = Vec::new();
        for (d, content) in text_data.into_iter().zip(contents) {
            let content = match content {
                Ok(content) => content,
                Err(e) => {
                    warn!("not indexing {}: {e}", d.title);
                    continue;
                }
            };
            for chunk in chunk_text(&content, chunk_size) {
                chunks.push(chunk);
                metadata.push(Metadata {
                    title: d.title.clone(),
                    url: d.url().to_string(),
                    description: d.description.clone(),
                });
            }
        }

        if chunks.is_empty() {
            debug!("no text content to index");
            return;
        }
        self.index = Some(VectorIndex::new(chunks, metadata));
    }

    /// The `k` indexed chunks most similar to `text`.
    pub fn query(&self, text: &str, k: usize) -> VectorResult {
        match &self.index {
            Some(index) => index.query(text, k),
            None => VectorResult::failed(
                "content not processed, or not present on the data (do you have access?)",
            ),
        }
    }
}

fn table_name(data: &Data) -> String {
    match normalise_name(&data.title) {
        name if name.is_empty() => normalise_name(&data.name),
        name => name,
    }
}

//! Answers questions about Nyx data with a language model that writes SQL
//! against the downloaded datasets.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Result};
use nyx_client::{Data, DataFilter, NyxClient};
use rusqlite::{types::ValueRef, Connection};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::llm::{ChatModel, Message};
use crate::parser::{IfExists, Parser, SUBSCRIPTIONS_TABLE};
use crate::prompts::{build_query, with_sources, SQL_PREFIX, SYSTEM_PREFIX};

const MAX_SQL_ATTEMPTS: usize = 3;
const MAX_ROWS: usize = 50;

pub struct NyxAgent {
    client: NyxClient,
    llm: Box<dyn ChatModel>,
    system_prompt: String,
}

impl NyxAgent {
    pub fn new(client: NyxClient, llm: Box<dyn ChatModel>) -> Self {
        Self {
            client,
            llm,
            system_prompt: SYSTEM_PREFIX.to_string(),
        }
    }

    /// Replaces the instructions given to the model when answering.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn client(&self) -> &NyxClient {
        &self.client
    }

    /// Answers `question` from `data`, or from the caller's current
    /// subscriptions (plus its own datasets with `include_own`) when no data
    /// is given.
    ///
    /// The datasets are loaded into SQLite, in memory or at `sqlite_file`.
    /// A file is removed again once the question is answered.
    #[instrument(skip_all)]
    pub async fn query(
        &self,
        question: &str,
        data: Option<Vec<Data>>,
        include_own: bool,
        sqlite_file: Option<&Path>,
    ) -> Result<String> {
        let data = match data {
            Some(data) => data,
            None => self.gather(include_own).await?,
        };
        info!("answering from {} datasets", data.len());

        let answer = self.answer(question, &data, sqlite_file).await;
        if let Some(path) = sqlite_file {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("failed to remove {}: {e}", path.display());
            }
        }
        answer
    }

    async fn gather(&self, include_own: bool) -> Result<Vec<Data>> {
        let mut data = self.client.my_subscriptions(&DataFilter::new()).await?;
        if include_own {
            data.extend(self.client.my_data(&DataFilter::new()).await?);
        }
        let mut seen = HashSet::new();
        data.retain(|d| seen.insert((d.creator.clone(), d.name.clone())));
        Ok(data)
    }

    async fn answer(&self, question: &str, data: &[Data], sqlite_file: Option<&Path>) -> Result<String> {
        let conn = Parser::data_as_db(data, None, sqlite_file, IfExists::Replace).await?;
        let schema = describe(&conn)?;

        if schema.is_empty() {
            debug!("no tables loaded, answering without data");
            return self
                .llm
                .chat(&[
                    Message::system(build_query(&self.system_prompt, "")),
                    Message::user(question),
                ])
                .await;
        }

        let rows = self.run_sql(&conn, question, &schema).await?;
        self.llm
            .chat(&[
                Message::system(with_sources(&self.system_prompt, &schema)),
                Message::user(format!("{question}\n\nQuery results:\n{rows}")),
            ])
            .await
    }

    /// Asks the model for SQL until a read-only query runs, feeding back
    /// each failure.
    async fn run_sql(&self, conn: &Connection, question: &str, schema: &str) -> Result<String> {
        let mut messages = vec![
            Message::system(format!("{SQL_PREFIX}\n\nDatabase information:\n{schema}")),
            Message::user(question),
        ];

        let mut last_error = String::new();
        for attempt in 1..=MAX_SQL_ATTEMPTS {
            let reply = self.llm.chat(&messages).await?;
            let sql = extract_sql(&reply);
            debug!(attempt, %sql, "running model query");

            match execute(conn, &sql) {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    warn!(attempt, "model query failed: {e:#}");
                    last_error = format!("{e:#}");
                    messages.push(Message::assistant(reply));
                    messages.push(Message::user(format!(
                        "That query failed: {last_error}. Reply with a corrected query."
                    )));
                }
            }
        }
        bail!("no usable query after {MAX_SQL_ATTEMPTS} attempts: {last_error}")
    }
}

/// The CREATE statements of every table, followed by the rows of the
/// subscriptions index. Empty when the database has no tables.
fn describe(conn: &Connection) -> Result<String> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND sql IS NOT NULL ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if tables.is_empty() {
        return Ok(String::new());
    }

    let mut info = format!("{};\n", tables.join(";\n"));
    let index = execute(conn, &format!("SELECT * FROM {SUBSCRIPTIONS_TABLE}"));
    if let Ok(rows) = index {
        info.push_str(&format!("\n{SUBSCRIPTIONS_TABLE} rows:\n{rows}"));
    }
    Ok(info)
}

/// Strips markdown fences and a trailing `;` from a model reply.
fn extract_sql(reply: &str) -> String {
    let mut sql = reply.trim();
    if let Some(fenced) = sql.strip_prefix("```") {
        let body = fenced.split_once('\n').map_or("", |(_, body)| body);
        sql = body.trim_end().trim_end_matches("```");
    }
    sql.trim().trim_end_matches(';').trim().to_string()
}

/// Runs one read-only statement and returns up to [`MAX_ROWS`] rows as a
/// JSON array of objects.
fn execute(conn: &Connection, sql: &str) -> Result<String> {
    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if keyword != "SELECT" && keyword != "WITH" {
        bail!("only SELECT queries are allowed");
    }
    if sql.contains(';') {
        bail!("only a single statement is allowed");
    }

    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        bail!("only read-only queries are allowed");
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if out.len() == MAX_ROWS {
            truncated = true;
            break;
        }
        let mut record = Map::new();
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), json_value(row.get_ref(i)?));
        }
        out.push(Value::Object(record));
    }

    let mut rows = serde_json::to_string(&out)?;
    if truncated {
        rows.push_str(&format!("\n(only the first {MAX_ROWS} rows are shown)"));
    }
    Ok(rows)
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => f.into(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned().into(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()).into(),
    }
}

//! ClickHouse HTTP interface client.
//!
//! Speaks the plain HTTP interface (default port 8123): the statement goes in
//! the `query` parameter, batch payloads travel as `TabSeparated` request
//! bodies, and credentials ride in `X-ClickHouse-*` headers. One client holds
//! one agent; workers that need isolated connections each build their own.

use std::time::Duration;

use itertools::Itertools;
use log::debug;

use crate::data::Value;
use crate::error::StoreError;
use crate::loader::BatchSink;
use crate::staging::quote_ident;

/// Connection settings for one ClickHouse endpoint and target table.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
}

impl ConnectionParams {
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

pub struct ClickHouseClient {
    agent: ureq::Agent,
    params: ConnectionParams,
}

impl ClickHouseClient {
    pub fn new(params: &ConnectionParams) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();
        Self {
            agent,
            params: params.clone(),
        }
    }

    /// Inserts one typed batch using `FORMAT TabSeparated`.
    pub fn insert_batch(&self, columns: &[String], rows: &[Vec<Value>]) -> Result<u64, StoreError> {
        let query = insert_statement(&self.params.database, &self.params.table, columns);
        let body = encode_tab_separated(rows);
        self.execute(&query, &[], &body)?;
        debug!(
            "Inserted batch of {} rows into {}.{}",
            rows.len(),
            self.params.database,
            self.params.table
        );
        Ok(rows.len() as u64)
    }

    /// Fetches `(name, type)` pairs for the target table from
    /// `system.columns`, in table position order.
    pub fn fetch_columns(&self) -> Result<Vec<(String, String)>, StoreError> {
        let query = "SELECT name, type FROM system.columns \
                     WHERE database = {db:String} AND table = {tbl:String} \
                     ORDER BY position FORMAT TabSeparated";
        let raw = self.execute(
            query,
            &[
                ("param_db", &self.params.database),
                ("param_tbl", &self.params.table),
            ],
            &[],
        )?;
        Ok(raw
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once('\t') {
                Some((name, ty)) => (name.to_string(), ty.to_string()),
                None => (line.to_string(), String::new()),
            })
            .collect())
    }

    fn execute(
        &self,
        query: &str,
        extra_params: &[(&str, &str)],
        body: &[u8],
    ) -> Result<String, StoreError> {
        let url = self.params.url();
        let mut request = self
            .agent
            .post(&url)
            .query("database", &self.params.database)
            .query("query", query)
            .set("X-ClickHouse-User", &self.params.user);
        if !self.params.password.is_empty() {
            request = request.set("X-ClickHouse-Key", &self.params.password);
        }
        for (name, value) in extra_params {
            request = request.query(name, value);
        }
        match request.send_bytes(body) {
            Ok(response) => response.into_string().map_err(|err| StoreError::Response {
                message: err.to_string(),
            }),
            Err(ureq::Error::Status(status, response)) => {
                let message = response
                    .into_string()
                    .unwrap_or_else(|_| String::from("<unreadable body>"));
                Err(StoreError::Server {
                    status,
                    message: trim_server_message(&message),
                })
            }
            Err(err) => Err(StoreError::Transport {
                url,
                message: err.to_string(),
            }),
        }
    }
}

impl BatchSink for ClickHouseClient {
    fn insert(&mut self, columns: &[String], rows: &[Vec<Value>]) -> Result<u64, StoreError> {
        self.insert_batch(columns, rows)
    }
}

fn insert_statement(database: &str, table: &str, columns: &[String]) -> String {
    let column_list = columns.iter().map(|c| quote_ident(c)).join(", ");
    format!(
        "INSERT INTO {}.{} ({}) FORMAT TabSeparated",
        quote_ident(database),
        quote_ident(table),
        column_list,
    )
}

/// Serializes typed rows into ClickHouse `TabSeparated` bytes.
pub fn encode_tab_separated(rows: &[Vec<Value>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows.len() * 32);
    for row in rows {
        for (idx, value) in row.iter().enumerate() {
            if idx > 0 {
                out.push(b'\t');
            }
            write_value(&mut out, value);
        }
        out.push(b'\n');
    }
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"\\N"),
        Value::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Value::Float(f) => out.extend_from_slice(f.to_string().as_bytes()),
        Value::Date(d) => out.extend_from_slice(d.format("%Y-%m-%d").to_string().as_bytes()),
        Value::String(s) => {
            for &byte in s.as_bytes() {
                match byte {
                    b'\t' => out.extend_from_slice(b"\\t"),
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    b'\\' => out.extend_from_slice(b"\\\\"),
                    _ => out.push(byte),
                }
            }
        }
    }
}

fn trim_server_message(message: &str) -> String {
    const MAX_CHARS: usize = 500;
    let trimmed = message.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let mut cut: String = trimmed.chars().take(MAX_CHARS).collect();
        cut.push_str("...");
        cut
    }
}

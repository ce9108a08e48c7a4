//! Downstream implementations speaking to the column store's SQL frontend.
//!
//! Replicated statements and decoded row batches both go through the store's
//! MySQL-protocol endpoint. Each participant owns its connection and opens
//! it lazily, so an idle replicator holds no downstream resources.

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::ConnectOptions;
use tracing::{debug, warn};

use cdc_config::shared::ColumnStoreConfig;
use secrecy::ExposeSecret;

use crate::bail;
use crate::destination::rows::{TableSchema, Value, decode_rows};
use crate::destination::{Destination, StatementExecutor, TableWriter};
use crate::error::{CdcResult, ErrorKind};
use crate::types::{QueryEvent, RowsEvent, TableMapEvent};

/// Rows per INSERT statement when flushing a bulk batch.
const INSERT_CHUNK_ROWS: usize = 1000;

async fn exec(conn: &mut MySqlConnection, statement: &str) -> CdcResult<()> {
    sqlx::raw_sql(sqlx::AssertSqlSafe(statement)).execute(conn).await?;
    Ok(())
}

fn connect_options(config: &ColumnStoreConfig) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(config.password.expose_secret())
}

/// Factory for bulk writers targeting the column store.
pub struct ColumnStoreDestination {
    options: MySqlConnectOptions,
}

impl ColumnStoreDestination {
    pub fn new(config: &ColumnStoreConfig) -> Self {
        Self {
            options: connect_options(config),
        }
    }
}

impl Destination for ColumnStoreDestination {
    type Writer = ColumnStoreTableWriter;

    async fn open_table(&self, table_map: &TableMapEvent) -> CdcResult<Self::Writer> {
        // An undecodable schema must fail here, before any rows are routed
        // to this table.
        let schema = TableSchema::from_table_map(table_map)?;

        debug!(
            table = %format_args!("{}.{}", table_map.database, table_map.table),
            columns = schema.column_count(),
            "opened bulk writer"
        );

        Ok(ColumnStoreTableWriter {
            database: table_map.database.clone(),
            table: table_map.table.clone(),
            schema,
            options: self.options.clone(),
            conn: None,
            pending: Vec::new(),
        })
    }
}

/// Bulk writer for one table, flushing batches as multi-row INSERTs inside
/// a single downstream transaction.
pub struct ColumnStoreTableWriter {
    database: String,
    table: String,
    schema: TableSchema,
    options: MySqlConnectOptions,
    conn: Option<MySqlConnection>,
    pending: Vec<RowsEvent>,
}

impl ColumnStoreTableWriter {
    async fn ensure_connection(&mut self) -> CdcResult<()> {
        if self.conn.is_none() {
            let mut conn = self.options.connect().await?;
            exec(&mut conn, "SET autocommit=0").await?;
            self.conn = Some(conn);
        }
        Ok(())
    }

    async fn flush(&mut self) -> CdcResult<()> {
        let mut rows = Vec::new();
        for event in &self.pending {
            rows.extend(decode_rows(&self.schema, event.kind, &event.payload)?);
        }

        let statements: Vec<String> = rows
            .chunks(INSERT_CHUNK_ROWS)
            .map(|chunk| build_insert(&self.database, &self.table, chunk))
            .collect();

        self.ensure_connection().await?;
        let Some(conn) = self.conn.as_mut() else {
            bail!(ErrorKind::ConnectionFailed, "bulk writer has no connection");
        };
        for statement in &statements {
            exec(&mut *conn, statement).await?;
        }
        exec(&mut *conn, "COMMIT").await?;

        Ok(())
    }
}

impl TableWriter for ColumnStoreTableWriter {
    fn database(&self) -> &str {
        &self.database
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn enqueue(&mut self, rows: RowsEvent) -> CdcResult<()> {
        // Replayed events within the uncommitted batch are dropped so a
        // re-delivered tail cannot duplicate rows.
        if !self.pending.contains(&rows) {
            self.pending.push(rows);
        }
        Ok(())
    }

    async fn commit(&mut self) -> CdcResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        match self.flush().await {
            Ok(()) => {
                debug!(
                    table = %format_args!("{}.{}", self.database, self.table),
                    events = self.pending.len(),
                    "bulk batch committed"
                );
                self.pending.clear();
                Ok(())
            }
            Err(err) => {
                // The connection state is unknown after a failed flush.
                self.conn = None;
                Err(err)
            }
        }
    }

    async fn rollback(&mut self) {
        if let Some(conn) = self.conn.as_mut()
            && let Err(err) = exec(conn, "ROLLBACK").await
        {
            warn!(error = %err, "rollback failed, dropping connection");
            self.conn = None;
        }
        self.pending.clear();
    }
}

/// Statement executor applying replicated queries through the SQL frontend.
///
/// Statements queue until commit, then run inside one transaction with the
/// column store as the default engine for created tables.
pub struct ColumnStoreExecutor {
    options: MySqlConnectOptions,
    conn: Option<MySqlConnection>,
    pending: Vec<QueryEvent>,
}

impl ColumnStoreExecutor {
    pub fn new(config: &ColumnStoreConfig) -> Self {
        Self {
            options: connect_options(config),
            conn: None,
            pending: Vec::new(),
        }
    }

    async fn ensure_connection(&mut self) -> CdcResult<()> {
        if self.conn.is_none() {
            let mut conn = self.options.connect().await?;
            exec(&mut conn, "SET default_storage_engine=COLUMNSTORE").await?;
            exec(&mut conn, "SET autocommit=0").await?;
            self.conn = Some(conn);
        }
        Ok(())
    }

    async fn apply_pending(&mut self) -> CdcResult<()> {
        let statements: Vec<(Option<String>, String)> = self
            .pending
            .iter()
            .map(|query| {
                let use_db = (!query.database.is_empty())
                    .then(|| format!("USE {}", quote_identifier(&query.database)));
                (use_db, query.statement.clone())
            })
            .collect();

        self.ensure_connection().await?;
        let Some(conn) = self.conn.as_mut() else {
            bail!(ErrorKind::ConnectionFailed, "executor has no connection");
        };
        for (use_db, statement) in &statements {
            // This is probably quite close to what the server itself does
            // to execute query events.
            if let Some(use_db) = use_db {
                exec(&mut *conn, use_db).await?;
            }
            exec(&mut *conn, statement).await?;
        }
        exec(&mut *conn, "COMMIT").await?;

        Ok(())
    }
}

impl StatementExecutor for ColumnStoreExecutor {
    fn enqueue(&mut self, query: QueryEvent) -> CdcResult<()> {
        self.pending.push(query);
        Ok(())
    }

    async fn commit(&mut self) -> CdcResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        match self.apply_pending().await {
            Ok(()) => {
                debug!(statements = self.pending.len(), "statement batch committed");
                self.pending.clear();
                Ok(())
            }
            Err(err) => {
                self.conn = None;
                Err(err)
            }
        }
    }

    async fn rollback(&mut self) {
        if let Some(conn) = self.conn.as_mut()
            && let Err(err) = exec(conn, "ROLLBACK").await
        {
            warn!(error = %err, "rollback failed, dropping connection");
            self.conn = None;
        }
        self.pending.clear();
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn build_insert(database: &str, table: &str, rows: &[Vec<Value>]) -> String {
    let mut sql = format!(
        "INSERT INTO {}.{} VALUES ",
        quote_identifier(database),
        quote_identifier(table)
    );

    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push('(');
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                sql.push(',');
            }
            push_literal(&mut sql, value);
        }
        sql.push(')');
    }

    sql
}

fn push_literal(sql: &mut String, value: &Value) {
    match value {
        Value::Null => sql.push_str("NULL"),
        Value::Int(v) => sql.push_str(&v.to_string()),
        Value::Float(v) => sql.push_str(&v.to_string()),
        Value::Text(text) => {
            sql.push('\'');
            for c in text.chars() {
                match c {
                    '\'' => sql.push_str("''"),
                    '\\' => sql.push_str("\\\\"),
                    _ => sql.push(c),
                }
            }
            sql.push('\'');
        }
        Value::Bytes(bytes) => {
            sql.push_str("x'");
            for byte in bytes {
                sql.push_str(&format!("{byte:02x}"));
            }
            sql.push('\'');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_statements_quote_identifiers_and_literals() {
        let rows = vec![
            vec![
                Value::Int(1),
                Value::Text("o'brien".to_owned()),
                Value::Null,
            ],
            vec![
                Value::Int(2),
                Value::Text("back\\slash".to_owned()),
                Value::Float(1.5),
            ],
        ];

        let sql = build_insert("db", "weird`name", &rows);

        assert_eq!(
            sql,
            "INSERT INTO `db`.`weird``name` VALUES \
             (1,'o''brien',NULL),(2,'back\\\\slash',1.5)"
        );
    }

    #[test]
    fn binary_values_render_as_hex_literals() {
        let mut sql = String::new();
        push_literal(&mut sql, &Value::Bytes(vec![0xde, 0xad, 0x00]));

        assert_eq!(sql, "x'dead00'");
    }

    #[test]
    fn empty_binary_values_are_valid_literals() {
        let mut sql = String::new();
        push_literal(&mut sql, &Value::Bytes(Vec::new()));

        assert_eq!(sql, "x''");
    }
}

//! MySQL source adapter.
//!
//! The legacy driver is not pooled: every [`MySQLConnector::connect`] opens
//! a fresh `mysql_async::Conn` that lives for one logical operation. Every
//! round-trip is bounded by the configured query timeout.

pub mod query;
pub mod schema;
pub mod value;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Params};
use std::time::Duration;

use sync_core::{
    ChangeFilter, Row, SourceConnector, SourceSession, SyncError, TableMapping, TableSchema,
    UniversalValue,
};

use crate::config::SourceConfig;
use crate::retry::with_deadline;

/// MySQL server errors worth retrying: lock wait timeout and deadlock.
const RETRYABLE_SERVER_ERRORS: [u16; 2] = [1205, 1213];

/// Map a driver error into the sync taxonomy.
pub fn map_error(error: mysql_async::Error) -> SyncError {
    match &error {
        mysql_async::Error::Server(server) if RETRYABLE_SERVER_ERRORS.contains(&server.code) => {
            SyncError::transient(format!("MySQL error {}: {}", server.code, server.message))
        }
        mysql_async::Error::Server(server) => {
            SyncError::data(format!("MySQL error {}: {}", server.code, server.message))
        }
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => {
            SyncError::transient(format!("MySQL connection error: {error}"))
        }
        mysql_async::Error::Url(_) => SyncError::Config(format!("invalid MySQL URL: {error}")),
        _ => SyncError::data(format!("MySQL error: {error}")),
    }
}

/// Opens one connection per logical operation.
pub struct MySQLConnector {
    opts: Opts,
    query_timeout: Duration,
}

impl MySQLConnector {
    pub fn new(config: &SourceConfig) -> Result<Self, SyncError> {
        let opts = Opts::from_url(&config.url)
            .map_err(|e| SyncError::Config(format!("invalid source.url: {e}")))?;
        if opts.db_name().is_none() {
            return Err(SyncError::Config(
                "source.url must name a database".to_string(),
            ));
        }
        Ok(Self {
            opts,
            query_timeout: config.query_timeout(),
        })
    }
}

#[async_trait]
impl SourceConnector for MySQLConnector {
    async fn connect(&self) -> Result<Box<dyn SourceSession>, SyncError> {
        let conn = Conn::new(self.opts.clone()).await.map_err(|e| {
            SyncError::ConnectionUnavailable(format!("cannot connect to {}: {e}", self.describe()))
        })?;
        Ok(Box::new(MySQLSession {
            conn,
            query_timeout: self.query_timeout,
        }))
    }

    fn describe(&self) -> String {
        format!(
            "mysql://{}:{}/{}",
            self.opts.ip_or_hostname(),
            self.opts.tcp_port(),
            self.opts.db_name().unwrap_or_default()
        )
    }
}

pub struct MySQLSession {
    conn: Conn,
    query_timeout: Duration,
}

impl MySQLSession {
    /// Run a row-returning statement and convert rows by the mapping's types.
    async fn fetch(
        &mut self,
        mapping: &TableMapping,
        sql: String,
        params: Vec<UniversalValue>,
    ) -> Result<Vec<Row>, SyncError> {
        tracing::debug!("MySQL query: {sql}");
        let params = if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params.iter().map(value::to_mysql).collect())
        };

        let conn = &mut self.conn;
        let raw: Vec<mysql_async::Row> = with_deadline(
            self.query_timeout,
            &format!("Read from {}", mapping.table),
            async move { conn.exec(sql, params).await.map_err(map_error) },
        )
        .await?;

        raw.iter()
            .map(|row| {
                mapping
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(index, column)| {
                        let raw = row.as_ref(index).ok_or_else(|| {
                            SyncError::data(format!(
                                "result for {} is missing column '{}'",
                                mapping.table, column.name
                            ))
                        })?;
                        let value = value::from_mysql(raw, &column.target_type, &column.name)?;
                        Ok((column.name.clone(), value))
                    })
                    .collect::<Result<Row, SyncError>>()
            })
            .collect()
    }
}

#[async_trait]
impl SourceSession for MySQLSession {
    async fn ping(&mut self) -> Result<(), SyncError> {
        let conn = &mut self.conn;
        with_deadline(self.query_timeout, "MySQL ping", async move {
            conn.ping().await.map_err(map_error)
        })
        .await
    }

    async fn list_tables(&mut self) -> Result<Vec<String>, SyncError> {
        let conn = &mut self.conn;
        with_deadline(
            self.query_timeout,
            "List source tables",
            schema::get_user_tables(conn),
        )
        .await
    }

    async fn describe_table(&mut self, table: &str) -> Result<TableSchema, SyncError> {
        let conn = &mut self.conn;
        with_deadline(
            self.query_timeout,
            &format!("Describe table {table}"),
            schema::describe_table(conn, table),
        )
        .await
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64, SyncError> {
        let conn = &mut self.conn;
        let sql = query::count_rows(table);
        let count: Option<u64> = with_deadline(
            self.query_timeout,
            &format!("Count rows of {table}"),
            async move { conn.query_first(sql).await.map_err(map_error) },
        )
        .await?;
        Ok(count.unwrap_or(0))
    }

    async fn read_batch(
        &mut self,
        table: &TableMapping,
        after: Option<&[UniversalValue]>,
        limit: usize,
    ) -> Result<Vec<Row>, SyncError> {
        let sql = query::select_batch(table, after.is_some(), limit);
        let params = after.map(<[UniversalValue]>::to_vec).unwrap_or_default();
        self.fetch(table, sql, params).await
    }

    async fn read_changes(
        &mut self,
        table: &TableMapping,
        filter: &ChangeFilter,
        limit: usize,
    ) -> Result<Vec<Row>, SyncError> {
        let (sql, params) = query::select_changes(table, filter, limit);
        self.fetch(table, sql, params).await
    }

    async fn close(self: Box<Self>) -> Result<(), SyncError> {
        let session = *self;
        session.conn.disconnect().await.map_err(map_error)
    }
}

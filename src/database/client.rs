// Copyright 2025 Adobe. All rights reserved.
// This file is licensed to you under the Apache License,
// Version 2.0 (http://www.apache.org/licenses/LICENSE-2.0)
// or the MIT license (http://opensource.org/licenses/MIT),
// at your option.
//
// Unless required by applicable law or agreed to in writing,
// this software is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR REPRESENTATIONS OF ANY KIND, either express or
// implied. See the LICENSE-MIT and LICENSE-APACHE files for the
// specific language governing permissions and limitations under
// each license.

use super::batch::{
    checked_table_name, column_types, insert_statement, rows_per_statement, validate_rows,
    COLUMN_TYPES_SQL,
};
use super::config::DatabaseConfig;
use super::value::{column_names, decode_row, QueryResult};
use crate::error::{ConnectorError, ConnectorResult};
use crate::util::retry::RetryPolicy;
use serde_json::{Map, Value};
use sqlx::postgres::PgConnection;
use sqlx::{Column, Connection, Executor, Statement};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use tracing::{debug, info, warn};

/// A single Postgres/Redshift connection.
///
/// With `autocommit` enabled every statement is durable as soon as it returns.
/// Without it, the first statement opens a transaction that stays open until
/// [`commit`](Self::commit) or [`rollback`](Self::rollback).
pub struct DatabaseClient {
    conn: PgConnection,
    config: DatabaseConfig,
    autocommit: bool,
    in_transaction: bool,
}

impl DatabaseClient {
    /// Validate `options` and open a connection.
    ///
    /// # Errors
    ///
    /// * `Configuration` if the options violate the database schema
    /// * `DatabaseConnection` if the server cannot be reached or rejects the login
    pub async fn connect(options: &Map<String, Value>, autocommit: bool) -> ConnectorResult<Self> {
        let config = DatabaseConfig::from_options(options)?;
        Self::connect_with_config(&config, autocommit).await
    }

    /// Open a connection, retrying failed attempts according to `policy`.
    ///
    /// Configuration errors are returned immediately.
    pub async fn connect_with_retry(
        options: &Map<String, Value>,
        autocommit: bool,
        policy: &RetryPolicy,
    ) -> ConnectorResult<Self> {
        let config = DatabaseConfig::from_options(options)?;
        policy
            .run("database connection", || {
                Self::connect_with_config(&config, autocommit)
            })
            .await
    }

    pub async fn connect_with_config(
        config: &DatabaseConfig,
        autocommit: bool,
    ) -> ConnectorResult<Self> {
        let options = config.connect_options();
        let conn = match tokio::time::timeout(
            config.connect_timeout(),
            PgConnection::connect_with(&options),
        )
        .await
        {
            Ok(result) => result.map_err(ConnectorError::DatabaseConnection)?,
            Err(_) => {
                return Err(ConnectorError::DatabaseConnection(sqlx::Error::Io(
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!(
                            "connection to {}:{} timed out after {}s",
                            config.host, config.port, config.connect_timeout
                        ),
                    ),
                )))
            }
        };

        info!(
            "Connected to database host={} port={} dbname={} autocommit={}",
            config.host, config.port, config.dbname, autocommit
        );
        Ok(Self {
            conn,
            config: config.clone(),
            autocommit,
            in_transaction: false,
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Whether a manual transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn begin_if_needed(&mut self) -> ConnectorResult<()> {
        if self.autocommit || self.in_transaction {
            return Ok(());
        }
        (&mut self.conn)
            .execute("BEGIN")
            .await
            .map_err(|e| ConnectorError::database("BEGIN", e))?;
        self.in_transaction = true;
        Ok(())
    }

    /// Run a query and return its columns and decoded rows.
    ///
    /// Column names are taken from the statement description, so a query
    /// returning no rows still reports them.
    ///
    /// # Errors
    ///
    /// `Database`, carrying `sql`, if the query fails or a value has a type
    /// that cannot be decoded.
    pub async fn query_fetch(&mut self, sql: &str) -> ConnectorResult<QueryResult> {
        self.begin_if_needed().await?;
        debug!("Fetching query={}", sql);

        let rows = sqlx::query(sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| ConnectorError::database(sql, e))?;

        let columns = match rows.first() {
            Some(row) => column_names(row),
            None => {
                let statement = (&mut self.conn)
                    .prepare(sql)
                    .await
                    .map_err(|e| ConnectorError::database(sql, e))?;
                statement
                    .columns()
                    .iter()
                    .map(|column| column.name().to_string())
                    .collect()
            }
        };
        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectorError::database(sql, e))?;

        Ok(QueryResult { columns, rows })
    }

    /// Run one or more statements that do not return rows.
    ///
    /// # Returns
    ///
    /// The number of rows affected.
    pub async fn query_mutate(&mut self, sql: &str) -> ConnectorResult<u64> {
        self.begin_if_needed().await?;
        debug!("Executing statement={}", sql);

        let result = (&mut self.conn)
            .execute(sql)
            .await
            .map_err(|e| ConnectorError::database(sql, e))?;
        Ok(result.rows_affected())
    }

    /// Insert `rows` into `table` with multi-row parameterised statements.
    ///
    /// Every row must be a flat mapping with the same keys as the first one.
    /// In autocommit mode the whole batch is written in its own transaction;
    /// otherwise it joins the open manual transaction.
    ///
    /// # Arguments
    ///
    /// * `table` - `table` or `schema.table`
    /// * `rows` - Rows keyed by column name
    /// * `batch_size` - Maximum number of rows per `INSERT`
    ///
    /// # Returns
    ///
    /// The number of rows inserted.
    ///
    /// # Errors
    ///
    /// * `DataStructure` if the rows are empty, nested or not uniform, or `batch_size` is 0
    /// * `InvalidArgument` if the table or a column is not a plain identifier
    /// * `Database` if an insert fails
    pub async fn write_batch(
        &mut self,
        table: &str,
        rows: &[Map<String, Value>],
        batch_size: usize,
    ) -> ConnectorResult<u64> {
        let columns = validate_rows(rows)?;
        let per_statement = rows_per_statement(batch_size, columns.len())?;
        let table = checked_table_name(table)?;

        if self.autocommit {
            let mut tx = self
                .conn
                .begin()
                .await
                .map_err(|e| ConnectorError::database("BEGIN", e))?;
            let types = column_types(&mut *tx, table)
                .await
                .map_err(|e| ConnectorError::database(COLUMN_TYPES_SQL, e))?;
            let mut inserted = 0;
            for chunk in rows.chunks(per_statement) {
                let mut builder = insert_statement(table, &columns, &types, chunk)?;
                let statement = builder.sql().to_string();
                inserted += builder
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| ConnectorError::database(statement, e))?
                    .rows_affected();
            }
            tx.commit()
                .await
                .map_err(|e| ConnectorError::database("COMMIT", e))?;
            info!("Wrote batch rows={} table={}", inserted, table);
            return Ok(inserted);
        }

        self.begin_if_needed().await?;
        let types = column_types(&mut self.conn, table)
            .await
            .map_err(|e| ConnectorError::database(COLUMN_TYPES_SQL, e))?;
        let mut inserted = 0;
        for chunk in rows.chunks(per_statement) {
            let mut builder = insert_statement(table, &columns, &types, chunk)?;
            let statement = builder.sql().to_string();
            inserted += builder
                .build()
                .execute(&mut self.conn)
                .await
                .map_err(|e| ConnectorError::database(statement, e))?
                .rows_affected();
        }
        info!(
            "Wrote batch rows={} table={} (uncommitted)",
            inserted, table
        );
        Ok(inserted)
    }

    /// Commit the open manual transaction, if any.
    pub async fn commit(&mut self) -> ConnectorResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        (&mut self.conn)
            .execute("COMMIT")
            .await
            .map_err(|e| ConnectorError::database("COMMIT", e))?;
        self.in_transaction = false;
        Ok(())
    }

    /// Roll back the open manual transaction, if any.
    pub async fn rollback(&mut self) -> ConnectorResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        (&mut self.conn)
            .execute("ROLLBACK")
            .await
            .map_err(|e| ConnectorError::database("ROLLBACK", e))?;
        self.in_transaction = false;
        Ok(())
    }

    pub async fn ping(&mut self) -> ConnectorResult<()> {
        self.conn
            .ping()
            .await
            .map_err(ConnectorError::DatabaseConnection)
    }

    /// Close the connection. An open manual transaction is discarded.
    pub async fn close(self) -> ConnectorResult<()> {
        if self.in_transaction {
            warn!(
                "Closing connection to dbname={} with an uncommitted transaction",
                self.config.dbname
            );
        }
        self.conn
            .close()
            .await
            .map_err(ConnectorError::DatabaseConnection)
    }
}

impl Debug for DatabaseClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DatabaseClient")
            .field("config", &self.config)
            .field("autocommit", &self.autocommit)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

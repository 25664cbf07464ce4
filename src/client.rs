//! Database client abstraction
//!
//! The persistence engine talks to the database exclusively through
//! [`DatabaseClient`]: parameterized statements, transactions, schema
//! introspection and the advisory lock that serializes schema changes.
//! [`MySqlClient`] is the production implementation over a single sqlx
//! MySQL connection.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Executor, MySql, Row, TypeInfo, ValueRef};
use tracing::{debug, trace};

use crate::error::{PersistenceError, Result};
use crate::sql::sanitize::schema_lock_name;

/// A statement parameter or a decoded result cell
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Decimal(Decimal),
    Double(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Interpret the cell as a row id
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SqlValue::UInt(u) => Some(*u),
            SqlValue::Int(i) => u64::try_from(*i).ok(),
            SqlValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Outcome of a non-query statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

/// A result row with named cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    pub columns: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(cells: Vec<(impl Into<String>, SqlValue)>) -> Self {
        let mut row = SqlRow::default();
        for (name, value) in cells {
            row.columns.push(name.into());
            row.values.push(value);
        }
        row
    }

    /// Cell by column name
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|idx| &self.values[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// A column as reported by the live database, in ordinal order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    /// Full column type as reported by the server, e.g. `varchar(20)`
    pub column_type: String,
    pub nullable: bool,
    /// Whether a single-column unique key covers the column
    pub unique: bool,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Capabilities the persistence engine needs from a database connection
#[async_trait]
pub trait DatabaseClient: Send {
    /// Run a parameterized statement that returns no rows
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecResult>;

    /// Run a parameterized query and fetch every row
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Live columns of `table` in ordinal order
    async fn describe_table(&mut self, table: &str) -> Result<Vec<RawColumn>>;

    /// Take the advisory lock serializing schema changes of `table`
    async fn acquire_schema_lock(&mut self, table: &str, timeout_secs: u32) -> Result<()>;

    async fn release_schema_lock(&mut self, table: &str) -> Result<()>;

    /// Message of the most recent failed statement, if any
    fn last_error(&self) -> Option<&str>;
}

/// [`DatabaseClient`] over a single MySQL/MariaDB connection
pub struct MySqlClient {
    conn: MySqlConnection,
    last_error: Option<String>,
}

impl MySqlClient {
    /// Open a connection from a `mysql://` URL
    pub async fn connect(database_url: &str) -> Result<Self> {
        let conn = MySqlConnection::connect(database_url)
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: MySqlConnection) -> Self {
        Self {
            conn,
            last_error: None,
        }
    }

    /// Get a reference to the underlying connection
    pub fn connection(&mut self) -> &mut MySqlConnection {
        &mut self.conn
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    fn record<T>(&mut self, result: std::result::Result<T, sqlx::Error>) -> Result<T> {
        result.map_err(|e| {
            self.last_error = Some(e.to_string());
            PersistenceError::from(e)
        })
    }

    async fn run_plain(&mut self, sql: &str) -> Result<()> {
        trace!(sql = %sql, "Executing statement");
        let result = (&mut self.conn).execute(sql).await.map(|_| ());
        self.record(result)
    }
}

fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::UInt(v) => query.bind(*v),
            SqlValue::Decimal(v) => query.bind(*v),
            SqlValue::Double(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::DateTime(v) => query.bind(*v),
        };
    }
    query
}

fn decode_row(row: &MySqlRow) -> std::result::Result<SqlRow, sqlx::Error> {
    let mut out = SqlRow::default();

    for (idx, column) in row.columns().iter().enumerate() {
        let is_null = row.try_get_raw(idx)?.is_null();
        let value = if is_null {
            SqlValue::Null
        } else {
            let type_name = column.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                    SqlValue::Int(row.try_get::<i64, _>(idx)?)
                }
                name if name.ends_with("UNSIGNED") => SqlValue::UInt(row.try_get::<u64, _>(idx)?),
                "DECIMAL" => SqlValue::Decimal(row.try_get::<Decimal, _>(idx)?),
                "FLOAT" | "DOUBLE" => SqlValue::Double(row.try_get::<f64, _>(idx)?),
                "DATETIME" => SqlValue::DateTime(row.try_get::<NaiveDateTime, _>(idx)?),
                "TIMESTAMP" => SqlValue::DateTime(
                    row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?
                        .naive_utc(),
                ),
                _ => SqlValue::Text(row.try_get::<String, _>(idx).or_else(|_| {
                    row.try_get::<Vec<u8>, _>(idx)
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                })?),
            }
        };
        out.columns.push(column.name().to_string());
        out.values.push(value);
    }

    Ok(out)
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecResult> {
        trace!(sql = %sql, params = params.len(), "Executing statement");
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut self.conn)
            .await
            .map(|done| ExecResult {
                rows_affected: done.rows_affected(),
                last_insert_id: done.last_insert_id(),
            });
        self.record(result)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        trace!(sql = %sql, params = params.len(), "Running query");
        let result = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut self.conn)
            .await
            .and_then(|rows| rows.iter().map(decode_row).collect());
        self.record(result)
    }

    async fn begin(&mut self) -> Result<()> {
        self.run_plain("START TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.run_plain("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.run_plain("ROLLBACK").await
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let result = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
        )
        .bind(table)
        .fetch_one(&mut self.conn)
        .await;
        Ok(self.record(result)? > 0)
    }

    async fn describe_table(&mut self, table: &str) -> Result<Vec<RawColumn>> {
        let result = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR), \
             CAST(IS_NULLABLE AS CHAR), CAST(COLUMN_KEY AS CHAR) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(table)
        .fetch_all(&mut self.conn)
        .await;

        let columns = self
            .record(result)?
            .into_iter()
            .map(|(name, column_type, nullable, key)| RawColumn {
                name,
                column_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
                unique: key.eq_ignore_ascii_case("UNI"),
            })
            .collect();
        Ok(columns)
    }

    async fn acquire_schema_lock(&mut self, table: &str, timeout_secs: u32) -> Result<()> {
        let lock = schema_lock_name(table);
        let result = sqlx::query_scalar::<_, Option<i64>>("SELECT GET_LOCK(?, ?)")
            .bind(&lock)
            .bind(timeout_secs)
            .fetch_one(&mut self.conn)
            .await;

        match self.record(result)? {
            Some(1) => {
                debug!(lock = %lock, "Acquired schema lock");
                Ok(())
            }
            _ => {
                let msg = format!(
                    "Timed out after {}s waiting for schema lock '{}'",
                    timeout_secs, lock
                );
                self.last_error = Some(msg.clone());
                Err(PersistenceError::Database(msg))
            }
        }
    }

    async fn release_schema_lock(&mut self, table: &str) -> Result<()> {
        let lock = schema_lock_name(table);
        let result = sqlx::query_scalar::<_, Option<i64>>("SELECT RELEASE_LOCK(?)")
            .bind(&lock)
            .fetch_one(&mut self.conn)
            .await;
        self.record(result)?;
        debug!(lock = %lock, "Released schema lock");
        Ok(())
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

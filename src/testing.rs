//! Scripted in-memory database client for orchestrator tests
//!
//! Tables are tracked from the DDL the engine executes, so introspection
//! reflects earlier saves. Query results are scripted in FIFO order.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::{DatabaseClient, ExecResult, RawColumn, SqlRow, SqlValue};
use crate::config::StoreConfig;
use crate::error::{PersistenceError, Result};
use crate::object::{ObjectDescriptor, PropertyDescriptor};
use crate::store::ObjectManager;

type Failure = Box<dyn Fn() -> PersistenceError + Send>;

#[derive(Default)]
pub(crate) struct MockClient {
    tables: BTreeMap<String, Vec<RawColumn>>,
    executed: Vec<(String, Vec<SqlValue>)>,
    results: VecDeque<Vec<SqlRow>>,
    affected: VecDeque<u64>,
    next_insert_id: u64,
    held_locks: HashSet<String>,
    failure: Option<(String, Failure)>,
    last_error: Option<String>,
    pub(crate) begins: usize,
    pub(crate) commits: usize,
    pub(crate) rollbacks: usize,
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self {
            next_insert_id: 1,
            ..Self::default()
        }
    }

    pub(crate) fn with_table(mut self, name: &str, columns: Vec<RawColumn>) -> Self {
        self.tables.insert(name.to_string(), columns);
        self
    }

    /// Script the rows returned by the next query
    pub(crate) fn push_rows(&mut self, rows: Vec<Vec<(&str, SqlValue)>>) {
        self.results
            .push_back(rows.into_iter().map(SqlRow::new).collect());
    }

    /// Script the affected-row count of the next data statement
    pub(crate) fn affect_next(&mut self, rows: u64) {
        self.affected.push_back(rows);
    }

    /// Fail the next statement starting with `prefix`
    pub(crate) fn fail_on(
        &mut self,
        prefix: &str,
        failure: impl Fn() -> PersistenceError + Send + 'static,
    ) {
        self.failure = Some((prefix.to_string(), Box::new(failure)));
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub(crate) fn clear_statements(&mut self) {
        self.executed.clear();
    }

    pub(crate) fn find_statement(&self, prefix: &str) -> Option<(String, Vec<SqlValue>)> {
        self.executed
            .iter()
            .find(|(sql, _)| sql.starts_with(prefix))
            .cloned()
    }

    pub(crate) fn last_statement(&self, prefix: &str) -> Option<(String, Vec<SqlValue>)> {
        self.executed
            .iter()
            .rev()
            .find(|(sql, _)| sql.starts_with(prefix))
            .cloned()
    }

    pub(crate) fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub(crate) fn column_type(&self, table: &str, column: &str) -> Option<String> {
        self.tables
            .get(table)?
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.column_type.clone())
    }

    pub(crate) fn locks_balanced(&self) -> bool {
        self.held_locks.is_empty()
    }

    fn record(&mut self, sql: &str, params: &[SqlValue]) -> Result<()> {
        self.executed.push((sql.to_string(), params.to_vec()));

        let failing = matches!(&self.failure, Some((prefix, _)) if sql.starts_with(prefix.as_str()));
        if failing {
            if let Some((_, failure)) = self.failure.take() {
                let err = failure();
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply_ddl(&mut self, sql: &str) {
        if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let (name, rest) = split_identifier(rest);
            let body = rest
                .find('(')
                .map(|start| &rest[start + 1..])
                .and_then(|body| body.rfind(')').map(|end| &body[..end]))
                .unwrap_or_default();
            let parts = split_top_level(body);
            let mut columns: Vec<RawColumn> = parts
                .iter()
                .filter(|part| part.starts_with('`'))
                .map(|part| parse_column(part))
                .collect();
            for part in parts.iter().filter_map(|part| part.strip_prefix("UNIQUE KEY ")) {
                mark_unique(&mut columns, part);
            }
            self.tables.entry(name).or_insert(columns);
        } else if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
            let (name, rest) = split_identifier(rest);
            let rest = rest.trim_start();
            let Some(columns) = self.tables.get_mut(&name) else {
                return;
            };
            if let Some(def) = rest.strip_prefix("ADD COLUMN ") {
                let mut parts = def.split(", ADD ");
                let def = parts.next().unwrap_or(def);
                columns.push(parse_column(def));
                for key in parts.filter_map(|part| part.strip_prefix("UNIQUE KEY ")) {
                    mark_unique(columns, key);
                }
            } else if let Some(key) = rest.strip_prefix("ADD UNIQUE KEY ") {
                mark_unique(columns, key);
            } else if let Some(def) = rest.strip_prefix("MODIFY COLUMN ") {
                let mut column = parse_column(def);
                if let Some(existing) = columns.iter_mut().find(|c| c.name == column.name) {
                    column.unique = existing.unique;
                    *existing = column;
                }
            } else if let Some(def) = rest.strip_prefix("DROP COLUMN ") {
                let (dropped, _) = split_identifier(def);
                columns.retain(|c| c.name != dropped);
            }
        }
    }
}

/// Split a leading backtick-quoted identifier from the rest
fn split_identifier(input: &str) -> (String, &str) {
    let input = input.trim_start();
    let inner = input.strip_prefix('`').unwrap_or(input);
    match inner.find('`') {
        Some(end) => (inner[..end].to_string(), &inner[end + 1..]),
        None => (inner.to_string(), ""),
    }
}

/// Flag the column named in "`uq_x` (`x`)" as unique
fn mark_unique(columns: &mut [RawColumn], key: &str) {
    let (_, rest) = split_identifier(key);
    let target = rest.trim().trim_start_matches('(');
    let (column, _) = split_identifier(target);
    if let Some(existing) = columns.iter_mut().find(|c| c.name == column) {
        existing.unique = true;
    }
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(body[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(body[start..].trim());
    parts
}

/// Column definition in the form the engine generates it
fn parse_column(def: &str) -> RawColumn {
    let (name, rest) = split_identifier(def);
    let rest = rest.trim();
    let (sql_type, nullable) = match rest.find(" NOT NULL") {
        Some(idx) => (&rest[..idx], false),
        None => (rest.find(" NULL").map_or(rest, |idx| &rest[..idx]), true),
    };
    RawColumn::new(name, sql_type.to_lowercase(), nullable)
}

#[async_trait]
impl DatabaseClient for MockClient {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecResult> {
        self.record(sql, params)?;

        if sql.starts_with("CREATE") || sql.starts_with("ALTER") {
            self.apply_ddl(sql);
            return Ok(ExecResult::default());
        }

        let rows_affected = self.affected.pop_front().unwrap_or(if sql.starts_with("DELETE") {
            params.len() as u64
        } else {
            1
        });

        let generates_id = sql.starts_with("INSERT")
            && !sql.contains("(`id`,")
            && !sql.contains("(`ownerId`,");
        let last_insert_id = if generates_id {
            let id = self.next_insert_id;
            self.next_insert_id += 1;
            id
        } else {
            0
        };

        Ok(ExecResult {
            rows_affected,
            last_insert_id,
        })
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.record(sql, params)?;
        Ok(self.results.pop_front().unwrap_or_default())
    }

    async fn begin(&mut self) -> Result<()> {
        self.begins += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.rollbacks += 1;
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    async fn describe_table(&mut self, table: &str) -> Result<Vec<RawColumn>> {
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }

    async fn acquire_schema_lock(&mut self, table: &str, _timeout_secs: u32) -> Result<()> {
        if !self.held_locks.insert(table.to_string()) {
            return Err(PersistenceError::database(format!(
                "Schema lock of '{}' is already held",
                table
            )));
        }
        Ok(())
    }

    async fn release_schema_lock(&mut self, table: &str) -> Result<()> {
        self.held_locks.remove(table);
        Ok(())
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

pub(crate) fn customer_descriptor() -> Arc<ObjectDescriptor> {
    Arc::new(ObjectDescriptor::new("Customer").property(PropertyDescriptor::scalar("name")))
}

/// Reserved columns of a main table as introspection reports them
pub(crate) fn main_columns() -> Vec<RawColumn> {
    vec![
        RawColumn::new("id", "bigint unsigned", false),
        RawColumn::new("uuid", "varchar(36)", false).unique(),
        RawColumn::new("createdAt", "datetime(6)", false),
        RawColumn::new("modifiedAt", "datetime(6)", false),
        RawColumn::new("deletedAt", "datetime(6)", true),
    ]
}

pub(crate) fn manager(client: MockClient) -> ObjectManager<MockClient> {
    ObjectManager::new(client, StoreConfig::builder("mysql://localhost/test").build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column() {
        let column = parse_column("`price` DECIMAL(5,2) NULL");
        assert_eq!(column, RawColumn::new("price", "decimal(5,2)", true));

        let column = parse_column("`id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT");
        assert_eq!(column, RawColumn::new("id", "bigint unsigned", false));
    }

    #[tokio::test]
    async fn test_ddl_tracking() {
        let mut client = MockClient::new();
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS `t` (`id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT, \
                 `a` DECIMAL(5,2) NULL, PRIMARY KEY (`id`), UNIQUE KEY `uq_a` (`a`)) ENGINE=InnoDB",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(client.column_type("t", "a").as_deref(), Some("decimal(5,2)"));

        client
            .execute("ALTER TABLE `t` ADD COLUMN `b` INT NULL", &[])
            .await
            .unwrap();
        client
            .execute("ALTER TABLE `t` MODIFY COLUMN `a` DECIMAL(8,2) NULL", &[])
            .await
            .unwrap();
        client
            .execute("ALTER TABLE `t` DROP COLUMN `b`", &[])
            .await
            .unwrap();

        let columns = client.describe_table("t").await.unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].column_type, "decimal(8,2)");
        assert!(columns[1].unique);
        assert!(!columns[0].unique);

        client
            .execute("ALTER TABLE `t` ADD UNIQUE KEY `uq_id` (`id`)", &[])
            .await
            .unwrap();
        let columns = client.describe_table("t").await.unwrap();
        assert!(columns[0].unique);
    }
}

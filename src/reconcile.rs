//! Schema reconciliation
//!
//! Compares the table an object needs with the table that exists and plans
//! the forward-only DDL that converges them: create missing tables, add
//! missing columns, widen columns that are too small and, when allowed, drop
//! columns nothing declares anymore. Planning is pure; applying runs the plan
//! through a [`DatabaseClient`].

use tracing::{info, warn};

use crate::client::DatabaseClient;
use crate::config::SchemaPolicy;
use crate::error::{PersistenceError, Result};
use crate::schema::{ColumnSpec, LiveTable, TableDefinition};
use crate::sql::DdlGenerator;
use crate::types::{ColumnType, Fit};

/// One forward-only schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaAction {
    CreateTable(TableDefinition),
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    WidenColumn {
        table: String,
        column: ColumnSpec,
        from: ColumnType,
    },
    DropColumn {
        table: String,
        column: String,
    },
    AddUniqueKey {
        table: String,
        column: String,
    },
}

/// Plan the changes that make `live` able to store rows of `required`
///
/// Fails on the first column that cannot be converged under `policy`.
pub fn plan(
    required: &TableDefinition,
    live: Option<&LiveTable>,
    policy: &SchemaPolicy,
) -> Result<Vec<SchemaAction>> {
    let Some(live) = live else {
        return Ok(vec![SchemaAction::CreateTable(required.clone())]);
    };

    let mut actions = Vec::new();

    for column in &required.columns {
        let Some(existing) = live.column(&column.name) else {
            actions.push(SchemaAction::AddColumn {
                table: required.name.clone(),
                column: column.clone(),
            });
            continue;
        };

        let Some(live_type) = existing.column_type else {
            return Err(PersistenceError::ColumnTypeMismatch {
                table: required.name.clone(),
                column: column.name.clone(),
                live: existing.raw_type.clone(),
                required: column.descriptor.to_string(),
            });
        };

        match live_type.fit(column.column_type()) {
            Fit::Fits => {}
            Fit::KindMismatch => {
                return Err(PersistenceError::ColumnTypeMismatch {
                    table: required.name.clone(),
                    column: column.name.clone(),
                    live: existing.raw_type.clone(),
                    required: column.descriptor.to_string(),
                });
            }
            Fit::TooSmall => {
                if !policy.resize_on_grow {
                    return Err(PersistenceError::ColumnTooSmall {
                        table: required.name.clone(),
                        column: column.name.clone(),
                        live: existing.raw_type.clone(),
                        required: column.descriptor.to_string(),
                    });
                }
                // Never shrink another dimension of the live column
                let widened = live_type
                    .widen(column.column_type())
                    .unwrap_or(*column.column_type());
                let mut target = column.clone();
                target.descriptor.column_type = widened;
                target.descriptor.nullable = column.descriptor.nullable || existing.nullable;
                actions.push(SchemaAction::WidenColumn {
                    table: required.name.clone(),
                    column: target,
                    from: live_type,
                });
            }
        }

        if column.unique && !existing.unique {
            actions.push(SchemaAction::AddUniqueKey {
                table: required.name.clone(),
                column: column.name.clone(),
            });
        }
    }

    let extra: Vec<String> = live
        .columns
        .iter()
        .filter(|c| required.column(&c.name).is_none() && !required.tolerates(&c.name))
        .map(|c| c.name.clone())
        .collect();

    if !extra.is_empty() {
        if !policy.delete_missing_columns {
            return Err(PersistenceError::UnexpectedColumns {
                table: required.name.clone(),
                columns: extra,
            });
        }
        actions.extend(extra.into_iter().map(|column| SchemaAction::DropColumn {
            table: required.name.clone(),
            column,
        }));
    }

    Ok(actions)
}

/// Read the live state of `table`, `None` when it does not exist
pub async fn inspect<C: DatabaseClient + ?Sized>(
    client: &mut C,
    table: &str,
) -> Result<Option<LiveTable>> {
    if !client.table_exists(table).await? {
        return Ok(None);
    }
    let columns = client.describe_table(table).await?;
    Ok(Some(LiveTable::from_raw(table, columns)))
}

/// Execute a plan
pub async fn apply<C: DatabaseClient + ?Sized>(
    client: &mut C,
    actions: &[SchemaAction],
) -> Result<()> {
    for action in actions {
        match action {
            SchemaAction::CreateTable(table) => {
                info!(table = %table.name, columns = table.columns.len(), "Creating table");
            }
            SchemaAction::AddColumn { table, column } => {
                info!(table = %table, column = %column.name, sql_type = %column.descriptor, "Adding column");
            }
            SchemaAction::WidenColumn {
                table,
                column,
                from,
            } => {
                info!(table = %table, column = %column.name, from = %from, to = %column.descriptor, "Widening column");
            }
            SchemaAction::DropColumn { table, column } => {
                warn!(table = %table, column = %column, "Dropping column no longer declared");
            }
            SchemaAction::AddUniqueKey { table, column } => {
                info!(table = %table, column = %column, "Adding unique key");
            }
        }

        for statement in DdlGenerator::statements(action) {
            client.execute(&statement, &[]).await?;
        }
    }
    Ok(())
}

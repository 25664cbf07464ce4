//! DDL Generation for Schema Reconciliation
//!
//! Generates MySQL DDL statements for the tables backing persisted kinds.

use crate::reconcile::SchemaAction;
use crate::schema::{ColumnSpec, TableDefinition};
use crate::sql::sanitize::{MAX_IDENTIFIER_LENGTH, quote_identifier};

const TABLE_OPTIONS: &str = "ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

/// DDL Generator for object tables
pub struct DdlGenerator;

impl DdlGenerator {
    /// Statements carrying out one reconciliation action
    pub fn statements(action: &SchemaAction) -> Vec<String> {
        match action {
            SchemaAction::CreateTable(table) => vec![Self::generate_create_table(table)],
            SchemaAction::AddColumn { table, column } => {
                vec![Self::generate_add_column(table, column)]
            }
            SchemaAction::WidenColumn { table, column, .. } => {
                vec![Self::generate_modify_column(table, column)]
            }
            SchemaAction::DropColumn { table, column } => {
                vec![Self::generate_drop_column(table, column)]
            }
            SchemaAction::AddUniqueKey { table, column } => {
                vec![Self::generate_add_unique_key(table, column)]
            }
        }
    }

    /// Generate CREATE TABLE statement
    ///
    /// Creates a table with:
    /// - Every column of the definition, in order
    /// - The primary key
    /// - One unique key per unique column
    /// - The foreign key of side tables to their owner
    pub fn generate_create_table(table: &TableDefinition) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(Self::format_column_definition)
            .collect();

        let pk = table
            .primary_key
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("PRIMARY KEY ({})", pk));

        for column in table.columns.iter().filter(|c| c.unique) {
            parts.push(Self::format_unique_key(&column.name));
        }

        if let Some(fk) = &table.foreign_key {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_identifier(&fk.column),
                quote_identifier(&fk.references_table),
                quote_identifier(&fk.references_column)
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}) {}",
            quote_identifier(&table.name),
            parts.join(", "),
            TABLE_OPTIONS
        )
    }

    /// Generate ALTER TABLE ADD COLUMN, adding the unique key in the same statement
    pub fn generate_add_column(table: &str, column: &ColumnSpec) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_identifier(table),
            Self::format_column_definition(column)
        );
        if column.unique {
            sql.push_str(", ADD ");
            sql.push_str(&Self::format_unique_key(&column.name));
        }
        sql
    }

    /// Generate ALTER TABLE MODIFY COLUMN with the widened definition
    pub fn generate_modify_column(table: &str, column: &ColumnSpec) -> String {
        format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            quote_identifier(table),
            Self::format_column_definition(column)
        )
    }

    /// Generate ALTER TABLE DROP COLUMN
    pub fn generate_drop_column(table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_identifier(table),
            quote_identifier(column)
        )
    }

    /// Generate ALTER TABLE ADD UNIQUE KEY for an existing column
    pub fn generate_add_unique_key(table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} ADD {}",
            quote_identifier(table),
            Self::format_unique_key(column)
        )
    }

    /// Format a single column definition
    pub fn format_column_definition(column: &ColumnSpec) -> String {
        let mut def = format!(
            "{} {}",
            quote_identifier(&column.name),
            column.descriptor.to_sql_type()
        );

        if column.unsigned {
            def.push_str(" UNSIGNED");
        }

        if column.descriptor.nullable {
            def.push_str(" NULL");
        } else {
            def.push_str(" NOT NULL");
        }

        if column.auto_increment {
            def.push_str(" AUTO_INCREMENT");
        }

        def
    }

    fn format_unique_key(column: &str) -> String {
        let name: String = format!("uq_{}", column)
            .chars()
            .take(MAX_IDENTIFIER_LENGTH)
            .collect();
        format!(
            "UNIQUE KEY {} ({})",
            quote_identifier(&name),
            quote_identifier(column)
        )
    }
}

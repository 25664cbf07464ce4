//! DML statement builders
//!
//! Every statement is parameterized with `?` placeholders; only identifiers
//! are interpolated, always through [`quote_identifier`].

use crate::schema::{ARRAY_INDEX_COLUMN, DELETED_AT_COLUMN, ID_COLUMN, OWNER_ID_COLUMN};
use crate::sql::sanitize::quote_identifier;

/// Most `?` placeholders MySQL accepts in one prepared statement
pub const MAX_PLACEHOLDERS: usize = 65_535;

/// Rows of `params_per_row` parameters that fit in one statement
pub fn batch_rows(params_per_row: usize) -> usize {
    (MAX_PLACEHOLDERS / params_per_row.max(1)).max(1)
}

/// `?, ?, ?` for `count` parameters
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT INTO t (a, b) VALUES (?, ?), (?, ?)` for `rows` rows
pub fn insert(table: &str, columns: &[&str], rows: usize) -> String {
    let row = format!("({})", placeholders(columns.len()));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(table),
        column_list(columns),
        vec![row; rows.max(1)].join(", ")
    )
}

/// Insert one row or overwrite the listed columns of the row with the same key
pub fn upsert(table: &str, columns: &[&str], key: &str) -> String {
    let updates = columns
        .iter()
        .filter(|c| **c != key)
        .map(|c| {
            let quoted = quote_identifier(c);
            format!("{} = VALUES({})", quoted, quoted)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} ON DUPLICATE KEY UPDATE {}",
        insert(table, columns, 1),
        updates
    )
}

/// `UPDATE t SET a = ?, b = ? WHERE id = ?`
pub fn update_by_id(table: &str, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .map(|c| format!("{} = ?", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_identifier(table),
        assignments,
        quote_identifier(ID_COLUMN)
    )
}

/// Lock existing rows among `count` ids for the rest of the transaction
pub fn lock_ids(table: &str, count: usize) -> String {
    format!(
        "SELECT {id} FROM {} WHERE {id} IN ({}) FOR UPDATE",
        quote_identifier(table),
        placeholders(count),
        id = quote_identifier(ID_COLUMN)
    )
}

/// Select `columns` of the rows with the given ids, or of every row
pub fn select_rows(
    table: &str,
    columns: &[&str],
    id_count: Option<usize>,
    exclude_soft_deleted: bool,
) -> String {
    let mut conditions = Vec::new();
    if let Some(count) = id_count {
        conditions.push(format!(
            "{} IN ({})",
            quote_identifier(ID_COLUMN),
            placeholders(count)
        ));
    }
    if exclude_soft_deleted {
        conditions.push(format!("{} IS NULL", quote_identifier(DELETED_AT_COLUMN)));
    }

    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(columns),
        quote_identifier(table)
    );
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY {}", quote_identifier(ID_COLUMN)));
    sql
}

/// `SELECT COUNT(*) AS total FROM t`
pub fn count_rows(table: &str, exclude_soft_deleted: bool) -> String {
    let mut sql = format!("SELECT COUNT(*) AS total FROM {}", quote_identifier(table));
    if exclude_soft_deleted {
        sql.push_str(&format!(
            " WHERE {} IS NULL",
            quote_identifier(DELETED_AT_COLUMN)
        ));
    }
    sql
}

/// Side table rows of `count` owners; array rows come back in element order
pub fn select_side_rows(table: &str, count: usize, ordered: bool) -> String {
    let mut sql = format!(
        "SELECT * FROM {} WHERE {} IN ({})",
        quote_identifier(table),
        quote_identifier(OWNER_ID_COLUMN),
        placeholders(count)
    );
    if ordered {
        sql.push_str(&format!(
            " ORDER BY {}, {}",
            quote_identifier(OWNER_ID_COLUMN),
            quote_identifier(ARRAY_INDEX_COLUMN)
        ));
    }
    sql
}

/// Ids of rows whose `column` matches one of `count` values
pub fn select_ids_where_in(table: &str, column: &str, count: usize) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} IN ({})",
        quote_identifier(ID_COLUMN),
        quote_identifier(table),
        quote_identifier(column),
        placeholders(count)
    )
}

/// Ids of rows matching every `(column, is_null)` condition
///
/// NULL conditions compile to `IS NULL` and take no parameter.
pub fn select_ids_matching(table: &str, conditions: &[(&str, bool)]) -> String {
    let clauses = conditions
        .iter()
        .map(|(column, is_null)| {
            if *is_null {
                format!("{} IS NULL", quote_identifier(column))
            } else {
                format!("{} = ?", quote_identifier(column))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        quote_identifier(ID_COLUMN),
        quote_identifier(table),
        clauses,
        quote_identifier(ID_COLUMN)
    )
}

/// `DELETE FROM t WHERE column IN (?, ...)`
pub fn delete_where_in(table: &str, column: &str, count: usize) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        quote_identifier(table),
        quote_identifier(column),
        placeholders(count)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_batch_rows() {
        assert_eq!(batch_rows(1), MAX_PLACEHOLDERS);
        assert_eq!(batch_rows(3), 21_845);
        assert!(batch_rows(3) * 3 <= MAX_PLACEHOLDERS);
        assert_eq!(batch_rows(100_000), 1);
    }

    #[test]
    fn test_insert_single_row() {
        assert_eq!(
            insert("customer", &["uuid", "name"], 1),
            "INSERT INTO `customer` (`uuid`, `name`) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_insert_multiple_rows() {
        assert_eq!(
            insert("customer_tags", &["ownerId", "arrayIndex", "value"], 2),
            "INSERT INTO `customer_tags` (`ownerId`, `arrayIndex`, `value`) VALUES (?, ?, ?), (?, ?, ?)"
        );
    }

    #[test]
    fn test_upsert() {
        assert_eq!(
            upsert("product_title", &["ownerId", "value", "value_en"], "ownerId"),
            "INSERT INTO `product_title` (`ownerId`, `value`, `value_en`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `value` = VALUES(`value`), `value_en` = VALUES(`value_en`)"
        );
    }

    #[test]
    fn test_update_by_id() {
        assert_eq!(
            update_by_id("customer", &["modifiedAt", "name"]),
            "UPDATE `customer` SET `modifiedAt` = ?, `name` = ? WHERE `id` = ?"
        );
    }

    #[test]
    fn test_lock_ids() {
        assert_eq!(
            lock_ids("customer", 2),
            "SELECT `id` FROM `customer` WHERE `id` IN (?, ?) FOR UPDATE"
        );
    }

    #[test]
    fn test_select_rows() {
        assert_eq!(
            select_rows("customer", &["id", "name"], Some(2), true),
            "SELECT `id`, `name` FROM `customer` WHERE `id` IN (?, ?) AND `deletedAt` IS NULL ORDER BY `id`"
        );
        assert_eq!(
            select_rows("customer", &["id"], None, false),
            "SELECT `id` FROM `customer` ORDER BY `id`"
        );
    }

    #[test]
    fn test_count_rows() {
        assert_eq!(
            count_rows("customer", true),
            "SELECT COUNT(*) AS total FROM `customer` WHERE `deletedAt` IS NULL"
        );
        assert_eq!(
            count_rows("customer", false),
            "SELECT COUNT(*) AS total FROM `customer`"
        );
    }

    #[test]
    fn test_select_side_rows() {
        assert_eq!(
            select_side_rows("customer_tags", 2, true),
            "SELECT * FROM `customer_tags` WHERE `ownerId` IN (?, ?) ORDER BY `ownerId`, `arrayIndex`"
        );
    }

    #[test]
    fn test_select_ids_matching() {
        assert_eq!(
            select_ids_matching("customer", &[("name", false), ("email", true)]),
            "SELECT `id` FROM `customer` WHERE `name` = ? AND `email` IS NULL ORDER BY `id`"
        );
    }

    #[test]
    fn test_delete_where_in() {
        assert_eq!(
            delete_where_in("customer_tags", "ownerId", 3),
            "DELETE FROM `customer_tags` WHERE `ownerId` IN (?, ?, ?)"
        );
    }
}

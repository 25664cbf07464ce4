//! Table definitions for persisted object kinds
//!
//! Every kind maps to a main table holding the reserved columns plus one
//! column per scalar property. Array and multi-language properties each get a
//! side table named `<table>_<property>` keyed by the owner's id.

use std::fmt;

use crate::client::RawColumn;
use crate::types::{ColumnType, TypeDescriptor};

/// Surrogate primary key, `BIGINT UNSIGNED AUTO_INCREMENT`
pub const ID_COLUMN: &str = "id";
/// Globally unique identifier assigned on insert
pub const UUID_COLUMN: &str = "uuid";
pub const CREATED_AT_COLUMN: &str = "createdAt";
pub const MODIFIED_AT_COLUMN: &str = "modifiedAt";
/// Soft-delete marker, NULL while the row is live
pub const DELETED_AT_COLUMN: &str = "deletedAt";

/// Engine-owned columns of every main table; property names may not use them
pub const RESERVED_COLUMNS: [&str; 5] = [
    ID_COLUMN,
    UUID_COLUMN,
    CREATED_AT_COLUMN,
    MODIFIED_AT_COLUMN,
    DELETED_AT_COLUMN,
];

/// Side table column referencing the owner row
pub const OWNER_ID_COLUMN: &str = "ownerId";
/// Array side table position column
pub const ARRAY_INDEX_COLUMN: &str = "arrayIndex";
/// Side table value column; holds the fallback value of multi-language tables
pub const VALUE_COLUMN: &str = "value";

const LOCALE_COLUMN_PREFIX: &str = "value_";

/// Sub-second digits of the engine-managed timestamp columns
pub const TIMESTAMP_FRACTION: u8 = 6;

/// Column holding the value of `locale` in a multi-language side table
pub fn locale_column(locale: &str) -> String {
    format!("{}{}", LOCALE_COLUMN_PREFIX, locale)
}

/// Locale stored in a multi-language column, `None` for non-locale columns
pub fn column_locale(column: &str) -> Option<&str> {
    column
        .strip_prefix(LOCALE_COLUMN_PREFIX)
        .filter(|locale| !locale.is_empty())
}

/// Name of the side table of `property` owned by `table`
pub fn side_table_name(table: &str, property: &str) -> String {
    format!("{}_{}", table, property)
}

/// What a table stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRole {
    Main,
    Array { owner: String },
    MultiLanguage { owner: String },
}

/// A required column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub unique: bool,
    pub unsigned: bool,
    pub auto_increment: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            unique: false,
            unsigned: false,
            auto_increment: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn row_id(name: &str) -> Self {
        let mut spec = Self::new(
            name,
            TypeDescriptor::int(crate::types::BIGINT_DIGITS).not_null(),
        );
        spec.unsigned = true;
        spec
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.descriptor.column_type
    }
}

/// Foreign key from a side table to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// The shape a table must have to store an object's current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub role: TableRole,
    /// Columns in creation order
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub foreign_key: Option<ForeignKey>,
}

impl TableDefinition {
    /// Main table: reserved columns followed by `properties` in declaration order
    pub fn main(name: impl Into<String>, properties: Vec<ColumnSpec>) -> Self {
        let mut id = ColumnSpec::row_id(ID_COLUMN);
        id.auto_increment = true;

        let timestamp = TypeDescriptor::datetime(TIMESTAMP_FRACTION);
        let mut columns = vec![
            id,
            ColumnSpec::new(UUID_COLUMN, TypeDescriptor::string(36).not_null()).unique(),
            ColumnSpec::new(CREATED_AT_COLUMN, timestamp.not_null()),
            ColumnSpec::new(MODIFIED_AT_COLUMN, timestamp.not_null()),
            ColumnSpec::new(DELETED_AT_COLUMN, timestamp),
        ];
        columns.extend(properties);

        Self {
            name: name.into(),
            role: TableRole::Main,
            columns,
            primary_key: vec![ID_COLUMN.to_string()],
            foreign_key: None,
        }
    }

    /// Array side table: one row per element, ordered by `arrayIndex`
    pub fn array(name: impl Into<String>, owner: &str, element: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            role: TableRole::Array {
                owner: owner.to_string(),
            },
            columns: vec![
                ColumnSpec::row_id(OWNER_ID_COLUMN),
                ColumnSpec::new(ARRAY_INDEX_COLUMN, TypeDescriptor::int(9).not_null()),
                ColumnSpec::new(VALUE_COLUMN, element),
            ],
            primary_key: vec![OWNER_ID_COLUMN.to_string(), ARRAY_INDEX_COLUMN.to_string()],
            foreign_key: Some(ForeignKey::to_owner(owner)),
        }
    }

    /// Multi-language side table: one row per owner, one column per locale
    pub fn multi_language(
        name: impl Into<String>,
        owner: &str,
        value: TypeDescriptor,
        locales: &[String],
    ) -> Self {
        let mut columns = vec![
            ColumnSpec::row_id(OWNER_ID_COLUMN),
            ColumnSpec::new(VALUE_COLUMN, value),
        ];
        for locale in locales {
            columns.push(ColumnSpec::new(locale_column(locale), value));
        }

        Self {
            name: name.into(),
            role: TableRole::MultiLanguage {
                owner: owner.to_string(),
            },
            columns,
            primary_key: vec![OWNER_ID_COLUMN.to_string()],
            foreign_key: Some(ForeignKey::to_owner(owner)),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether a live column absent from this definition is still expected
    ///
    /// Locale columns of multi-language tables stay when an object is saved
    /// with fewer configured locales.
    pub fn tolerates(&self, column: &str) -> bool {
        matches!(self.role, TableRole::MultiLanguage { .. }) && column_locale(column).is_some()
    }
}

impl ForeignKey {
    fn to_owner(owner: &str) -> Self {
        Self {
            column: OWNER_ID_COLUMN.to_string(),
            references_table: owner.to_string(),
            references_column: ID_COLUMN.to_string(),
        }
    }
}

/// A column of an existing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    /// Type string as reported by the server
    pub raw_type: String,
    /// Parsed type, `None` when the engine cannot map the server type
    pub column_type: Option<ColumnType>,
    pub nullable: bool,
    pub unique: bool,
}

impl From<RawColumn> for LiveColumn {
    fn from(raw: RawColumn) -> Self {
        Self {
            column_type: ColumnType::parse_sql_type(&raw.column_type),
            name: raw.name,
            raw_type: raw.column_type,
            nullable: raw.nullable,
            unique: raw.unique,
        }
    }
}

impl LiveColumn {
    pub fn descriptor(&self) -> Option<TypeDescriptor> {
        self.column_type.map(|column_type| TypeDescriptor {
            column_type,
            nullable: self.nullable,
        })
    }
}

impl fmt::Display for LiveColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.raw_type)
    }
}

/// The state of an existing table as read from the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<LiveColumn>,
}

impl LiveTable {
    pub fn from_raw(name: impl Into<String>, columns: Vec<RawColumn>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(LiveColumn::from).collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&LiveColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Parsed type of a live column
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column(name).and_then(|c| c.column_type)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

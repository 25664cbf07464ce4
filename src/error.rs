//! Error types for persistence operations

use std::fmt;

use thiserror::Error;

/// Why a value was rejected against a type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// Value kind does not match the declared kind
    Incompatible,
    /// Timestamp carries an offset other than UTC
    NonUtcTimestamp,
    /// Fractional-second digits differ from the declared precision
    PrecisionMismatch,
    /// Value is larger than the declared size allows
    SizeExceeded,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MismatchReason::Incompatible => "incompatible value",
            MismatchReason::NonUtcTimestamp => "non-UTC timestamp",
            MismatchReason::PrecisionMismatch => "precision mismatch",
            MismatchReason::SizeExceeded => "size exceeded",
        };
        f.write_str(label)
    }
}

/// Errors that can occur while saving, loading or deleting objects
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Cannot infer type of property '{property}': {detail}")]
    CannotInferType { property: String, detail: String },

    #[error("Type mismatch for property '{property}' ({reason}): {detail}")]
    TypeMismatch {
        property: String,
        reason: MismatchReason,
        detail: String,
    },

    #[error("Column '{table}.{column}' has type {live}, expected {required}")]
    ColumnTypeMismatch {
        table: String,
        column: String,
        live: String,
        required: String,
    },

    #[error("Column '{table}.{column}' is too small: {live} cannot hold {required}")]
    ColumnTooSmall {
        table: String,
        column: String,
        live: String,
        required: String,
    },

    #[error("Table '{table}' has unexpected columns: {}", columns.join(", "))]
    UnexpectedColumns { table: String, columns: Vec<String> },

    #[error("Object kind '{kind}' declares disallowed method '{method}'")]
    DisallowedMethod { kind: String, method: String },

    #[error("Property '{property}' of '{kind}' starts with a reserved underscore prefix")]
    UnderscoreProperty { kind: String, property: String },

    #[error("Invalid reserved field '{field}': {detail}")]
    InvalidReservedField { field: String, detail: String },

    #[error("Row {id} not found in '{table}'")]
    RowNotFound { table: String, id: u64 },

    #[error("Objects not found in '{table}': {}", format_ids(ids))]
    ObjectNotFound { table: String, ids: Vec<u64> },

    #[error("Duplicate entry in '{table}': {detail}")]
    DuplicateEntry { table: String, detail: String },

    #[error("Invalid foreign reference '{kind}.{property}': {detail}")]
    InvalidForeignReference {
        kind: String,
        property: String,
        detail: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PersistenceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn cannot_infer(property: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CannotInferType {
            property: property.into(),
            detail: detail.into(),
        }
    }

    pub fn mismatch(
        property: impl Into<String>,
        reason: MismatchReason,
        detail: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            property: property.into(),
            reason,
            detail: detail.into(),
        }
    }

    pub fn reserved(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidReservedField {
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// Re-label a type error raised for a nested value (array element, locale)
    /// with the name of the owning property
    pub(crate) fn for_property(self, property: &str) -> Self {
        match self {
            Self::TypeMismatch { reason, detail, .. } => Self::TypeMismatch {
                property: property.to_string(),
                reason,
                detail,
            },
            Self::CannotInferType { detail, .. } => Self::CannotInferType {
                property: property.to_string(),
                detail,
            },
            other => other,
        }
    }

    /// Attach the table a failing statement ran against, turning unique-key
    /// violations into `DuplicateEntry`
    pub(crate) fn in_table(self, table: &str) -> Self {
        match self {
            Self::Sql(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Self::DuplicateEntry {
                    table: table.to_string(),
                    detail: db_err.message().to_string(),
                }
            }
            Self::DuplicateEntry { table: t, detail } if t.is_empty() => Self::DuplicateEntry {
                table: table.to_string(),
                detail,
            },
            other => other,
        }
    }

    /// Whether this error is a unique-key violation
    pub fn is_duplicate(&self) -> bool {
        match self {
            Self::DuplicateEntry { .. } => true,
            Self::Sql(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

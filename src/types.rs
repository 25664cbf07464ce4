//! Core type definitions for the persistence engine
//!
//! Includes column kinds, sized column types, type descriptors and the mapping
//! between them and MySQL column type strings.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest string stored as `VARCHAR` (utf8mb4 row limit)
pub const MAX_VARCHAR_LENGTH: u32 = 16_383;
/// Capacity of a `TEXT` column
pub const TEXT_LENGTH: u32 = 65_535;
/// Capacity of a `MEDIUMTEXT` column
pub const MEDIUMTEXT_LENGTH: u32 = 16_777_215;
/// Capacity of a `LONGTEXT` column
pub const LONGTEXT_LENGTH: u32 = u32::MAX;

/// Decimal digits an `INT` column always holds
pub const INT_DIGITS: u8 = 9;
/// Decimal digits of the widest `BIGINT` value
pub const BIGINT_DIGITS: u8 = 19;

/// Largest `DECIMAL` precision MySQL accepts
pub const MAX_DECIMAL_PRECISION: u8 = 65;
/// Largest `DECIMAL` scale MySQL accepts
pub const MAX_DECIMAL_SCALE: u8 = 30;

/// Fractional-second precisions allowed for timestamps
pub const DATETIME_FRACTIONS: [u8; 3] = [0, 3, 6];

// ============================================================================
// Column kinds and sized column types
// ============================================================================

/// Storage kind of a column, independent of its size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    String,
    Int,
    Double,
    Bool,
    DateTime,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::String => "STRING",
            ColumnKind::Int => "INT",
            ColumnKind::Double => "DOUBLE",
            ColumnKind::Bool => "BOOL",
            ColumnKind::DateTime => "DATETIME",
        };
        f.write_str(name)
    }
}

/// Column type with its size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ColumnType {
    /// Text of at most `length` characters
    String { length: u32 },

    /// Whole number of at most `digits` decimal digits
    Int { digits: u8 },

    /// Fixed-point number with `precision` total and `scale` fractional digits
    Double { precision: u8, scale: u8 },

    /// Boolean flag
    Bool,

    /// UTC timestamp with `fraction` sub-second digits (0, 3 or 6)
    #[serde(rename = "datetime")]
    DateTime { fraction: u8 },
}

/// How a live column relates to a required one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// Same kind and at least as large
    Fits,
    /// Same kind but smaller in at least one dimension
    TooSmall,
    /// Different kind
    KindMismatch,
}

impl ColumnType {
    pub fn string(length: u32) -> Self {
        ColumnType::String { length }
    }

    pub fn int(digits: u8) -> Self {
        ColumnType::Int { digits }
    }

    pub fn double(precision: u8, scale: u8) -> Self {
        ColumnType::Double { precision, scale }
    }

    pub fn datetime(fraction: u8) -> Self {
        ColumnType::DateTime { fraction }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnType::String { .. } => ColumnKind::String,
            ColumnType::Int { .. } => ColumnKind::Int,
            ColumnType::Double { .. } => ColumnKind::Double,
            ColumnType::Bool => ColumnKind::Bool,
            ColumnType::DateTime { .. } => ColumnKind::DateTime,
        }
    }

    /// Convert column type to MySQL type string
    pub fn to_sql_type(&self) -> String {
        match self {
            ColumnType::String { length } => {
                if *length <= MAX_VARCHAR_LENGTH {
                    format!("VARCHAR({})", (*length).max(1))
                } else if *length <= TEXT_LENGTH {
                    "TEXT".to_string()
                } else if *length <= MEDIUMTEXT_LENGTH {
                    "MEDIUMTEXT".to_string()
                } else {
                    "LONGTEXT".to_string()
                }
            }
            ColumnType::Int { digits } => {
                if *digits <= INT_DIGITS {
                    "INT".to_string()
                } else {
                    "BIGINT".to_string()
                }
            }
            ColumnType::Double { precision, scale } => {
                format!("DECIMAL({},{})", precision, scale)
            }
            ColumnType::Bool => "TINYINT(1)".to_string(),
            ColumnType::DateTime { fraction } => {
                if *fraction == 0 {
                    "DATETIME".to_string()
                } else {
                    format!("DATETIME({})", fraction)
                }
            }
        }
    }

    /// Whether a live column of type `self` can hold values described by `required`
    pub fn fit(&self, required: &ColumnType) -> Fit {
        match (self, required) {
            (ColumnType::String { length: live }, ColumnType::String { length: req }) => {
                size_fit(*live >= *req)
            }
            (ColumnType::Int { digits: live }, ColumnType::Int { digits: req }) => {
                size_fit(*live >= *req)
            }
            (
                ColumnType::Double {
                    precision: lp,
                    scale: ls,
                },
                ColumnType::Double {
                    precision: rp,
                    scale: rs,
                },
            ) => {
                let live_int = lp.saturating_sub(*ls);
                let req_int = rp.saturating_sub(*rs);
                size_fit(live_int >= req_int && ls >= rs)
            }
            (ColumnType::Bool, ColumnType::Bool) => Fit::Fits,
            (ColumnType::DateTime { fraction: live }, ColumnType::DateTime { fraction: req }) => {
                size_fit(*live >= *req)
            }
            _ => Fit::KindMismatch,
        }
    }

    /// Smallest type of the same kind holding both `self` and `other`
    ///
    /// Returns `None` when the kinds differ.
    pub fn widen(&self, other: &ColumnType) -> Option<ColumnType> {
        match (self, other) {
            (ColumnType::String { length: a }, ColumnType::String { length: b }) => {
                Some(ColumnType::string((*a).max(*b)))
            }
            (ColumnType::Int { digits: a }, ColumnType::Int { digits: b }) => {
                Some(ColumnType::int((*a).max(*b)))
            }
            (
                ColumnType::Double {
                    precision: ap,
                    scale: as_,
                },
                ColumnType::Double {
                    precision: bp,
                    scale: bs,
                },
            ) => {
                let int_digits = ap.saturating_sub(*as_).max(bp.saturating_sub(*bs));
                let scale = (*as_).max(*bs).min(MAX_DECIMAL_SCALE);
                let precision = (int_digits + scale).clamp(1, MAX_DECIMAL_PRECISION);
                Some(ColumnType::double(precision, scale))
            }
            (ColumnType::Bool, ColumnType::Bool) => Some(ColumnType::Bool),
            (ColumnType::DateTime { fraction: a }, ColumnType::DateTime { fraction: b }) => {
                Some(ColumnType::datetime((*a).max(*b)))
            }
            _ => None,
        }
    }

    /// Parse a MySQL column type string as reported by `information_schema`
    ///
    /// Returns `None` for types this engine never creates and cannot map.
    pub fn parse_sql_type(raw: &str) -> Option<ColumnType> {
        static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^([a-z]+)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?").expect("valid regex")
        });

        let normalized = raw.trim().to_lowercase();
        let caps = TYPE_RE.captures(&normalized)?;
        let base = caps.get(1)?.as_str();
        let first: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let second: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());

        match base {
            "varchar" | "char" => Some(ColumnType::string(first?)),
            "tinytext" => Some(ColumnType::string(255)),
            "text" => Some(ColumnType::string(TEXT_LENGTH)),
            "mediumtext" => Some(ColumnType::string(MEDIUMTEXT_LENGTH)),
            "longtext" => Some(ColumnType::string(LONGTEXT_LENGTH)),
            "tinyint" if first == Some(1) => Some(ColumnType::Bool),
            "bool" | "boolean" => Some(ColumnType::Bool),
            "tinyint" => Some(ColumnType::int(2)),
            "smallint" => Some(ColumnType::int(4)),
            "mediumint" => Some(ColumnType::int(6)),
            "int" | "integer" => Some(ColumnType::int(INT_DIGITS)),
            "bigint" => Some(ColumnType::int(BIGINT_DIGITS)),
            "decimal" | "numeric" => {
                let precision = first.unwrap_or(10).min(MAX_DECIMAL_PRECISION as u32) as u8;
                let scale = second.unwrap_or(0).min(MAX_DECIMAL_SCALE as u32) as u8;
                Some(ColumnType::double(precision, scale))
            }
            // Floating point columns hold any value this engine infers
            "double" | "float" | "real" => Some(ColumnType::double(
                MAX_DECIMAL_PRECISION,
                MAX_DECIMAL_SCALE,
            )),
            "datetime" | "timestamp" => {
                Some(ColumnType::datetime(first.unwrap_or(0).min(6) as u8))
            }
            _ => None,
        }
    }
}

fn size_fit(fits: bool) -> Fit {
    if fits { Fit::Fits } else { Fit::TooSmall }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_type())
    }
}

// ============================================================================
// Type descriptors
// ============================================================================

fn default_nullable() -> bool {
    true
}

/// Canonical storage shape of a column: kind, size and nullability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Column type with its size
    #[serde(flatten)]
    pub column_type: ColumnType,

    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl TypeDescriptor {
    /// Create a nullable descriptor for a column type
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: true,
        }
    }

    pub fn string(length: u32) -> Self {
        Self::new(ColumnType::string(length))
    }

    pub fn int(digits: u8) -> Self {
        Self::new(ColumnType::int(digits))
    }

    pub fn double(precision: u8, scale: u8) -> Self {
        Self::new(ColumnType::double(precision, scale))
    }

    pub fn bool() -> Self {
        Self::new(ColumnType::Bool)
    }

    pub fn datetime(fraction: u8) -> Self {
        Self::new(ColumnType::datetime(fraction))
    }

    /// Set the column as non-nullable
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn kind(&self) -> ColumnKind {
        self.column_type.kind()
    }

    pub fn to_sql_type(&self) -> String {
        self.column_type.to_sql_type()
    }

    /// Widen to hold `other` too, keeping nullability if either side allows NULL
    pub fn widen(&self, other: &TypeDescriptor) -> Option<TypeDescriptor> {
        self.column_type.widen(&other.column_type).map(|column_type| TypeDescriptor {
            column_type,
            nullable: self.nullable || other.nullable,
        })
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column_type)?;
        if !self.nullable {
            f.write_str(" NOT NULL")?;
        }
        Ok(())
    }
}

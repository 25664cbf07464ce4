//! SQL Identifier Sanitization Utilities
//!
//! Provides functions to safely quote and validate SQL identifiers, locale
//! codes and derived table names.

use std::sync::LazyLock;

use regex::Regex;

/// Longest identifier MySQL accepts for tables, columns and keys
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Arguments
/// * `identifier` - The identifier to quote
///
/// # Returns
/// The identifier wrapped in backticks with escaped internal backticks
///
/// # Example
/// ```
/// use runtara_object_persistence::sql::quote_identifier;
///
/// let quoted = quote_identifier("my_table");
/// assert_eq!(quoted, "`my_table`");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    let escaped = identifier.replace('`', "``");
    format!("`{}`", escaped)
}

/// Validate a kind or property name
///
/// Rules:
/// - Must start with an ASCII letter
/// - Can only contain ASCII letters, digits and underscores
/// - At most 64 characters
///
/// Names starting with an underscore are rejected here too; callers that need
/// to report them as reserved check for the prefix first.
///
/// # Example
/// ```
/// use runtara_object_persistence::sql::validate_identifier;
///
/// assert!(validate_identifier("createdAt").is_ok());
/// assert!(validate_identifier("first name").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<(), String> {
    static IDENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid regex"));

    if name.is_empty() {
        return Err("Identifier cannot be empty".to_string());
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(format!(
            "Identifier '{}' is longer than {} characters",
            name, MAX_IDENTIFIER_LENGTH
        ));
    }

    if !IDENT_RE.is_match(name) {
        return Err(format!(
            "Identifier '{}' is invalid. Must start with a letter and contain only letters, numbers, and underscores.",
            name
        ));
    }

    Ok(())
}

/// Normalize and validate a locale code (`en`, `en-US`, `pt_BR`)
///
/// Hyphens become underscores so the code can be embedded in a column name.
pub fn normalize_locale(locale: &str) -> Result<String, String> {
    static LOCALE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[A-Za-z]{2,3}(_[A-Za-z0-9]{2,8})*$").expect("valid regex")
    });

    let normalized = locale.trim().replace('-', "_");
    if !LOCALE_RE.is_match(&normalized) {
        return Err(format!("Locale '{}' is not a valid locale code", locale));
    }
    Ok(normalized)
}

/// Convert a kind name such as `OrderLine` into a table base name `order_line`
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(*c);
        }
    }

    out
}

/// Name of the advisory lock guarding schema changes of `table`
pub fn schema_lock_name(table: &str) -> String {
    let name = format!("schema:{}", table);
    name.chars().take(MAX_IDENTIFIER_LENGTH).collect()
}

//! SQL utilities for the persistence engine
//!
//! Provides DDL and DML generation plus identifier sanitization.

pub mod ddl;
pub mod dml;
pub mod sanitize;

pub use ddl::DdlGenerator;
pub use sanitize::{normalize_locale, quote_identifier, to_snake_case, validate_identifier};

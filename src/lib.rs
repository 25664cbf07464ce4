//! # runtara-object-persistence
//!
//! A schema-synchronizing object persistence engine for MySQL and MariaDB.
//!
//! Objects are saved without any upfront migration: the engine infers the
//! column type each property needs (or checks it against a declared type),
//! compares that against the live table, creates or widens what is missing and
//! then writes the object's rows in a single transaction.
//!
//! ## Features
//!
//! - **Type Inference**: STRING, INT, DOUBLE, BOOL and DATETIME columns sized from the values saved
//! - **Schema Reconciliation**: Create tables, add columns, widen columns, detect drift
//! - **Side Tables**: Array and multi-language properties stored in per-property tables
//! - **Cascading Delete**: Deleting an object removes the objects referencing it
//! - **Soft Delete**: `deletedAt` stamping with finds that skip soft-deleted rows
//! - **SQL Injection Prevention**: All identifiers are validated and quoted, all values bound
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runtara_object_persistence::{
//!     DynamicObject, ObjectDescriptor, ObjectManager, PropertyDescriptor, StoreConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::builder("mysql://localhost/mydb")
//!         .resize_on_grow(true)
//!         .build();
//!     let mut manager = ObjectManager::connect(config).await?;
//!
//!     let customer = Arc::new(
//!         ObjectDescriptor::new("Customer")
//!             .property(PropertyDescriptor::scalar("name"))
//!             .property(PropertyDescriptor::array("tags")),
//!     );
//!
//!     // Creates `customer` and `customer_tags` on first save
//!     let mut john = DynamicObject::new(Arc::clone(&customer))
//!         .with("name", "john")?
//!         .with("tags", vec!["vip"])?;
//!     let id = manager.save(&mut john).await?;
//!
//!     let found = manager.find_dynamic_by_ids(&customer, &[id]).await?;
//!     assert_eq!(found.len(), 1);
//!
//!     manager.delete_by_ids(&customer, &[id]).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use runtara_object_persistence::StoreConfig;
//!
//! let config = StoreConfig::builder("mysql://localhost/mydb")
//!     .table_prefix("app_")          // Prepended to every table name
//!     .resize_on_grow(true)          // Widen columns instead of failing
//!     .delete_missing_columns(false) // Fail on columns no property maps to
//!     .typing_mandatory(false)       // Infer types of undeclared properties
//!     .build();
//! assert_eq!(config.table_name("customer"), "app_customer");
//! ```

pub mod client;
pub mod config;
pub mod delete;
pub mod error;
pub mod infer;
pub mod object;
pub mod reconcile;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use client::{DatabaseClient, ExecResult, MySqlClient, RawColumn, SqlRow, SqlValue};
pub use config::{SchemaPolicy, StoreConfig, StoreConfigBuilder};
pub use error::{MismatchReason, PersistenceError, Result};
pub use object::{
    DynamicObject, ObjectDescriptor, Persistable, PersistableKind, PropertyDescriptor,
    PropertyShape, RecordMeta,
};
pub use reconcile::SchemaAction;
pub use schema::{LiveTable, TableDefinition};
pub use store::ObjectManager;
pub use types::{ColumnKind, ColumnType, TypeDescriptor};
pub use value::{Localized, Timestamp, Value};

// Re-export SQL utilities for advanced users
pub use sql::ddl::DdlGenerator;
pub use sql::sanitize::{quote_identifier, validate_identifier};

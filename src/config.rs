//! Configuration for ObjectManager
//!
//! Provides a builder pattern for configuring the persistence engine, and the
//! per-call `SchemaPolicy` that drives schema reconciliation.

use serde::{Deserialize, Serialize};

/// Schema reconciliation toggles, passed explicitly into every save/delete call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaPolicy {
    /// Widen a column when a value larger than its current size arrives
    #[serde(rename = "resizeOnGrow")]
    pub resize_on_grow: bool,
    /// Drop live columns that the object type no longer declares
    #[serde(rename = "deleteMissingColumns")]
    pub delete_missing_columns: bool,
    /// Require an explicit type declaration on every property
    #[serde(rename = "typingMandatory")]
    pub typing_mandatory: bool,
}

impl SchemaPolicy {
    /// Strict policy: no widening, no dropping, inference allowed
    pub fn strict() -> Self {
        Self::default()
    }

    /// Enable or disable resize-on-grow
    pub fn resize_on_grow(mut self, enabled: bool) -> Self {
        self.resize_on_grow = enabled;
        self
    }

    /// Enable or disable delete-missing-columns
    pub fn delete_missing_columns(mut self, enabled: bool) -> Self {
        self.delete_missing_columns = enabled;
        self
    }

    /// Enable or disable mandatory typing
    pub fn typing_mandatory(mut self, enabled: bool) -> Self {
        self.typing_mandatory = enabled;
        self
    }
}

/// Configuration for the object manager
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// MySQL database URL
    pub database_url: String,
    /// Prefix prepended to every table name (default: empty)
    pub table_prefix: String,
    /// Default schema policy used by calls that do not pass one
    pub policy: SchemaPolicy,
    /// Whether finds skip rows with a non-NULL `deletedAt` (default: true)
    pub exclude_soft_deleted: bool,
    /// Seconds to wait for the per-table schema lock (default: 10)
    pub schema_lock_timeout: u32,
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder(database_url: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(database_url)
    }

    /// The default schema policy of this configuration
    pub fn policy(&self) -> SchemaPolicy {
        self.policy
    }

    /// Full table name for an unprefixed base name
    pub fn table_name(&self, base: &str) -> String {
        format!("{}{}", self.table_prefix, base)
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    database_url: String,
    table_prefix: String,
    policy: SchemaPolicy,
    exclude_soft_deleted: bool,
    schema_lock_timeout: u32,
}

impl StoreConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            table_prefix: String::new(),
            policy: SchemaPolicy::default(),
            exclude_soft_deleted: true,
            schema_lock_timeout: 10,
        }
    }

    /// Set the table name prefix (default: empty)
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Enable or disable resize-on-grow (default: false)
    pub fn resize_on_grow(mut self, enabled: bool) -> Self {
        self.policy.resize_on_grow = enabled;
        self
    }

    /// Enable or disable delete-missing-columns (default: false)
    pub fn delete_missing_columns(mut self, enabled: bool) -> Self {
        self.policy.delete_missing_columns = enabled;
        self
    }

    /// Enable or disable mandatory typing (default: false)
    pub fn typing_mandatory(mut self, enabled: bool) -> Self {
        self.policy.typing_mandatory = enabled;
        self
    }

    /// Replace the whole schema policy
    pub fn policy(mut self, policy: SchemaPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Include soft-deleted rows in finds
    pub fn include_soft_deleted(mut self) -> Self {
        self.exclude_soft_deleted = false;
        self
    }

    /// Set the schema lock timeout in seconds (default: 10)
    pub fn schema_lock_timeout(mut self, seconds: u32) -> Self {
        self.schema_lock_timeout = seconds;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url,
            table_prefix: self.table_prefix,
            policy: self.policy,
            exclude_soft_deleted: self.exclude_soft_deleted,
            schema_lock_timeout: self.schema_lock_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // StoreConfig Default Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = StoreConfig::builder("mysql://localhost/test").build();

        assert_eq!(config.database_url, "mysql://localhost/test");
        assert_eq!(config.table_prefix, "");
        assert!(!config.policy.resize_on_grow);
        assert!(!config.policy.delete_missing_columns);
        assert!(!config.policy.typing_mandatory);
        assert!(config.exclude_soft_deleted);
        assert_eq!(config.schema_lock_timeout, 10);
    }

    #[test]
    fn test_builder_accepts_string() {
        let config = StoreConfig::builder(String::from("mysql://localhost/db")).build();
        assert_eq!(config.database_url, "mysql://localhost/db");
    }

    // =========================================================================
    // Table Prefix Tests
    // =========================================================================

    #[test]
    fn test_table_prefix() {
        let config = StoreConfig::builder("mysql://localhost/test")
            .table_prefix("app_")
            .build();

        assert_eq!(config.table_prefix, "app_");
        assert_eq!(config.table_name("customer"), "app_customer");
    }

    #[test]
    fn test_table_name_without_prefix() {
        let config = StoreConfig::builder("mysql://localhost/test").build();
        assert_eq!(config.table_name("customer"), "customer");
    }

    // =========================================================================
    // Policy Tests
    // =========================================================================

    #[test]
    fn test_policy_toggles() {
        let config = StoreConfig::builder("mysql://localhost/test")
            .resize_on_grow(true)
            .delete_missing_columns(true)
            .typing_mandatory(true)
            .build();

        let policy = config.policy();
        assert!(policy.resize_on_grow);
        assert!(policy.delete_missing_columns);
        assert!(policy.typing_mandatory);
    }

    #[test]
    fn test_policy_replaced_wholesale() {
        let config = StoreConfig::builder("mysql://localhost/test")
            .resize_on_grow(true)
            .policy(SchemaPolicy::strict().delete_missing_columns(true))
            .build();

        assert!(!config.policy.resize_on_grow);
        assert!(config.policy.delete_missing_columns);
    }

    #[test]
    fn test_strict_policy_is_default() {
        assert_eq!(SchemaPolicy::strict(), SchemaPolicy::default());
    }

    #[test]
    fn test_policy_serialization() {
        let policy = SchemaPolicy::strict().resize_on_grow(true);
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"resizeOnGrow\":true"));
        assert!(json.contains("\"deleteMissingColumns\":false"));
    }

    // =========================================================================
    // Soft Delete and Lock Tests
    // =========================================================================

    #[test]
    fn test_include_soft_deleted() {
        let config = StoreConfig::builder("mysql://localhost/test")
            .include_soft_deleted()
            .build();
        assert!(!config.exclude_soft_deleted);
    }

    #[test]
    fn test_schema_lock_timeout() {
        let config = StoreConfig::builder("mysql://localhost/test")
            .schema_lock_timeout(3)
            .build();
        assert_eq!(config.schema_lock_timeout, 3);
    }

    #[test]
    fn test_builder_debug() {
        let builder = StoreConfig::builder("mysql://localhost/test");
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("StoreConfigBuilder"));
    }
}

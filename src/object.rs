//! Persistable objects
//!
//! An object kind is described by an [`ObjectDescriptor`]: its name, its
//! properties and the methods it exposes. Instances carry engine-owned
//! bookkeeping in [`RecordMeta`] and expose their property values through the
//! [`Persistable`] trait. [`DynamicObject`] is a ready-made implementation
//! backed by maps, used for descriptor-driven loads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PersistenceError, Result};
use crate::schema::{
    CREATED_AT_COLUMN, DELETED_AT_COLUMN, ID_COLUMN, MODIFIED_AT_COLUMN, RESERVED_COLUMNS,
    UUID_COLUMN,
};
use crate::sql::sanitize::{to_snake_case, validate_identifier};
use crate::types::{ColumnKind, TypeDescriptor};
use crate::value::{Localized, Timestamp, Value};

/// Methods a persistable kind may declare
///
/// Descriptors built from reflection list every member of the type; only
/// side-effect-free conversions and comparisons are accepted.
pub const ALLOWED_METHODS: [&str; 6] = ["clone", "default", "eq", "fmt", "to_string", "hash"];

// ============================================================================
// Record metadata
// ============================================================================

/// Engine-owned bookkeeping of a persisted object
///
/// Fields are read-only to callers. The engine sets them after a successful
/// commit and clears them after a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMeta {
    id: Option<u64>,
    uuid: Option<Uuid>,
    created_at: Option<Timestamp>,
    modified_at: Option<Timestamp>,
    deleted_at: Option<Timestamp>,
    fixture: bool,
}

impl RecordMeta {
    /// Metadata of an object that has never been saved
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of an unsaved object that must be inserted with `id`
    ///
    /// Used to load fixtures with known ids.
    pub fn with_fixture_id(id: i64) -> Result<Self> {
        let id = u64::try_from(id)
            .map_err(|_| PersistenceError::reserved(ID_COLUMN, format!("{} is negative", id)))?;
        Ok(Self {
            id: Some(id),
            fixture: true,
            ..Self::default()
        })
    }

    /// Rebuild the metadata of a stored row
    pub fn restore(
        id: u64,
        uuid: Uuid,
        created_at: Timestamp,
        modified_at: Timestamp,
        deleted_at: Option<Timestamp>,
    ) -> Result<Self> {
        if modified_at < created_at {
            return Err(PersistenceError::reserved(
                MODIFIED_AT_COLUMN,
                format!("{} is before {} {}", modified_at, CREATED_AT_COLUMN, created_at),
            ));
        }
        Ok(Self {
            id: Some(id),
            uuid: Some(uuid),
            created_at: Some(created_at),
            modified_at: Some(modified_at),
            deleted_at,
            fixture: false,
        })
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    pub fn modified_at(&self) -> Option<Timestamp> {
        self.modified_at
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        self.deleted_at
    }

    /// Whether the object corresponds to a stored row
    pub fn is_persisted(&self) -> bool {
        self.id.is_some() && !self.fixture
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub(crate) fn is_fixture(&self) -> bool {
        self.fixture
    }

    /// Check that the fields describe either an unsaved or a stored object
    pub fn validate(&self) -> Result<()> {
        let stamped = self.created_at.is_some() || self.modified_at.is_some();

        if self.fixture || self.id.is_none() {
            if stamped {
                let field = if self.created_at.is_some() {
                    CREATED_AT_COLUMN
                } else {
                    MODIFIED_AT_COLUMN
                };
                return Err(PersistenceError::reserved(
                    field,
                    "must be NULL until the object is inserted",
                ));
            }
            if self.deleted_at.is_some() {
                return Err(PersistenceError::reserved(
                    DELETED_AT_COLUMN,
                    "must be NULL until the object is inserted",
                ));
            }
            return Ok(());
        }

        match (self.created_at, self.modified_at) {
            (Some(created), Some(modified)) if modified >= created => {}
            (Some(_), Some(_)) => {
                return Err(PersistenceError::reserved(
                    MODIFIED_AT_COLUMN,
                    "is before createdAt",
                ));
            }
            (None, _) => {
                return Err(PersistenceError::reserved(
                    CREATED_AT_COLUMN,
                    "is NULL on a stored object",
                ));
            }
            (_, None) => {
                return Err(PersistenceError::reserved(
                    MODIFIED_AT_COLUMN,
                    "is NULL on a stored object",
                ));
            }
        }
        if self.uuid.is_none() {
            return Err(PersistenceError::reserved(
                UUID_COLUMN,
                "is NULL on a stored object",
            ));
        }
        Ok(())
    }

    pub(crate) fn mark_inserted(&mut self, id: u64, uuid: Uuid, now: Timestamp) {
        self.id = Some(id);
        self.uuid = Some(uuid);
        self.created_at = Some(now);
        self.modified_at = Some(now);
        self.deleted_at = None;
        self.fixture = false;
    }

    pub(crate) fn mark_updated(&mut self, now: Timestamp) {
        self.modified_at = Some(now);
    }

    pub(crate) fn mark_soft_deleted(&mut self, deleted_at: Option<Timestamp>, now: Timestamp) {
        self.deleted_at = deleted_at;
        self.modified_at = Some(now);
    }

    /// Forget the stored row after a delete
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// How a property is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyShape {
    /// One column of the main table
    Scalar,
    /// Ordered elements in a side table
    Array,
    /// Per-locale values in a side table
    MultiLanguage,
}

/// A persisted property of an object kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub shape: PropertyShape,
    /// Declared type; inferred from the value when absent
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub declared: Option<TypeDescriptor>,
    #[serde(default)]
    pub unique: bool,
    /// Kind whose ids this property holds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

impl PropertyDescriptor {
    fn new(name: impl Into<String>, shape: PropertyShape) -> Self {
        Self {
            name: name.into(),
            shape,
            declared: None,
            unique: false,
            references: None,
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, PropertyShape::Scalar)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, PropertyShape::Array)
    }

    pub fn multi_language(name: impl Into<String>) -> Self {
        Self::new(name, PropertyShape::MultiLanguage)
    }

    /// Declare the property's type
    pub fn typed(mut self, descriptor: TypeDescriptor) -> Self {
        self.declared = Some(descriptor);
        self
    }

    /// Back the column with a unique key
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark the property as holding ids of `kind`
    pub fn references(mut self, kind: impl Into<String>) -> Self {
        self.references = Some(kind.into());
        self
    }
}

/// Description of a persistable kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub kind: String,
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub methods: Vec<String>,
}

impl ObjectDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.methods.push(name.into());
        self
    }

    pub fn find_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Unprefixed table name, the kind in snake case
    pub fn table_base(&self) -> String {
        to_snake_case(&self.kind)
    }

    pub fn properties_of(&self, shape: PropertyShape) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(move |p| p.shape == shape)
    }

    /// Check the descriptor before anything touches the database
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.kind).map_err(PersistenceError::Validation)?;

        if let Some(method) = self
            .methods
            .iter()
            .find(|m| !ALLOWED_METHODS.contains(&m.as_str()))
        {
            return Err(PersistenceError::DisallowedMethod {
                kind: self.kind.clone(),
                method: method.clone(),
            });
        }

        let mut seen = Vec::with_capacity(self.properties.len());
        for property in &self.properties {
            let name = property.name.as_str();

            if name.starts_with('_') {
                return Err(PersistenceError::UnderscoreProperty {
                    kind: self.kind.clone(),
                    property: name.to_string(),
                });
            }
            if RESERVED_COLUMNS.contains(&name) {
                return Err(PersistenceError::reserved(
                    name,
                    format!("cannot be declared as a property of '{}'", self.kind),
                ));
            }
            validate_identifier(name).map_err(PersistenceError::Validation)?;
            if seen.contains(&name) {
                return Err(PersistenceError::validation(format!(
                    "Property '{}' is declared twice on '{}'",
                    name, self.kind
                )));
            }
            seen.push(name);

            if property.unique && property.shape != PropertyShape::Scalar {
                return Err(PersistenceError::validation(format!(
                    "Property '{}' of '{}' cannot be unique: only scalar properties can",
                    name, self.kind
                )));
            }

            if let Some(target) = &property.references {
                let foreign = |detail: &str| PersistenceError::InvalidForeignReference {
                    kind: self.kind.clone(),
                    property: name.to_string(),
                    detail: detail.to_string(),
                };
                if validate_identifier(target).is_err() {
                    return Err(foreign("target kind name is invalid"));
                }
                if property.shape != PropertyShape::Scalar {
                    return Err(foreign("only scalar properties can reference another kind"));
                }
                if property
                    .declared
                    .is_some_and(|d| d.kind() != ColumnKind::Int)
                {
                    return Err(foreign("a reference must be typed INT"));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Persistable
// ============================================================================

/// An object the engine can save, load and delete
pub trait Persistable: Send + Sync {
    fn descriptor(&self) -> &ObjectDescriptor;

    fn record(&self) -> &RecordMeta;

    fn record_mut(&mut self) -> &mut RecordMeta;

    /// Value of a scalar or array property, NULL when unset
    fn value(&self, property: &str) -> Value;

    /// Values of a multi-language property
    fn localized(&self, property: &str) -> Option<&Localized>;

    fn set_value(&mut self, property: &str, value: Value) -> Result<()>;

    fn set_localized(&mut self, property: &str, value: Localized) -> Result<()>;

    /// Locales whose values are persisted, in priority order
    fn locales(&self) -> &[String] {
        &[]
    }
}

/// A persistable type that can be materialized from a stored row
pub trait PersistableKind: Persistable + Sized {
    /// An unsaved instance with every property unset
    fn blank() -> Self;
}

// ============================================================================
// DynamicObject
// ============================================================================

/// A persistable object described at runtime
#[derive(Debug, Clone)]
pub struct DynamicObject {
    descriptor: Arc<ObjectDescriptor>,
    record: RecordMeta,
    values: BTreeMap<String, Value>,
    localized: BTreeMap<String, Localized>,
    locales: Vec<String>,
}

impl DynamicObject {
    pub fn new(descriptor: Arc<ObjectDescriptor>) -> Self {
        Self {
            descriptor,
            record: RecordMeta::new(),
            values: BTreeMap::new(),
            localized: BTreeMap::new(),
            locales: Vec::new(),
        }
    }

    /// Set a property and return the object
    pub fn with(mut self, property: &str, value: impl Into<Value>) -> Result<Self> {
        self.set_value(property, value.into())?;
        Ok(self)
    }

    /// Set a multi-language property and return the object
    pub fn with_localized(mut self, property: &str, value: Localized) -> Result<Self> {
        self.set_localized(property, value)?;
        Ok(self)
    }

    /// Configure the locales persisted for multi-language properties
    pub fn with_locales(mut self, locales: Vec<String>) -> Self {
        self.locales = locales;
        self
    }

    pub fn with_record(mut self, record: RecordMeta) -> Self {
        self.record = record;
        self
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    /// Value of a multi-language property in the first configured locale
    /// holding one, else its fallback
    pub fn localized_value(&self, property: &str) -> Value {
        self.localized
            .get(property)
            .map(|l| l.resolve(&self.locales).clone())
            .unwrap_or_default()
    }

    fn expect_shape(&self, property: &str, shapes: &[PropertyShape]) -> Result<()> {
        match self.descriptor.find_property(property) {
            Some(p) if shapes.contains(&p.shape) => Ok(()),
            Some(p) => Err(PersistenceError::validation(format!(
                "Property '{}' of '{}' is {:?}",
                property, self.descriptor.kind, p.shape
            ))),
            None => Err(PersistenceError::validation(format!(
                "'{}' has no property '{}'",
                self.descriptor.kind, property
            ))),
        }
    }
}

impl Persistable for DynamicObject {
    fn descriptor(&self) -> &ObjectDescriptor {
        &self.descriptor
    }

    fn record(&self) -> &RecordMeta {
        &self.record
    }

    fn record_mut(&mut self) -> &mut RecordMeta {
        &mut self.record
    }

    fn value(&self, property: &str) -> Value {
        self.values.get(property).cloned().unwrap_or_default()
    }

    fn localized(&self, property: &str) -> Option<&Localized> {
        self.localized.get(property)
    }

    fn set_value(&mut self, property: &str, value: Value) -> Result<()> {
        self.expect_shape(property, &[PropertyShape::Scalar, PropertyShape::Array])?;
        self.values.insert(property.to_string(), value);
        Ok(())
    }

    fn set_localized(&mut self, property: &str, value: Localized) -> Result<()> {
        self.expect_shape(property, &[PropertyShape::MultiLanguage])?;
        self.localized.insert(property.to_string(), value);
        Ok(())
    }

    fn locales(&self) -> &[String] {
        &self.locales
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> Arc<ObjectDescriptor> {
        Arc::new(
            ObjectDescriptor::new("Customer")
                .property(PropertyDescriptor::scalar("name"))
                .property(PropertyDescriptor::array("tags"))
                .property(PropertyDescriptor::multi_language("bio")),
        )
    }

    // =========================================================================
    // RecordMeta Tests
    // =========================================================================

    #[test]
    fn test_new_record_is_unsaved() {
        let record = RecordMeta::new();
        assert!(record.id().is_none());
        assert!(!record.is_persisted());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_fixture_id() {
        let record = RecordMeta::with_fixture_id(42).unwrap();
        assert_eq!(record.id(), Some(42));
        assert!(!record.is_persisted());
        assert!(record.is_fixture());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_fixture_id_rejects_negative() {
        let err = RecordMeta::with_fixture_id(-1).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidReservedField { .. }));
    }

    #[test]
    fn test_restore_and_validate() {
        let created = Timestamp::now(6);
        let record = RecordMeta::restore(7, Uuid::new_v4(), created, created, None).unwrap();
        assert!(record.is_persisted());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_restore_rejects_modified_before_created() {
        let created = Timestamp::now(6);
        let earlier = Timestamp::from_utc(created.instant() - chrono::TimeDelta::seconds(5), 6);
        let err = RecordMeta::restore(7, Uuid::new_v4(), created, earlier, None).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::InvalidReservedField { ref field, .. } if field == "modifiedAt"
        ));
    }

    #[test]
    fn test_marks() {
        let mut record = RecordMeta::new();
        let now = Timestamp::now(6);
        record.mark_inserted(3, Uuid::new_v4(), now);
        assert_eq!(record.id(), Some(3));
        assert_eq!(record.created_at(), record.modified_at());
        assert!(record.validate().is_ok());

        record.mark_soft_deleted(Some(now.next_tick()), now.next_tick());
        assert!(record.is_soft_deleted());

        record.clear();
        assert_eq!(record, RecordMeta::new());
    }

    // =========================================================================
    // Descriptor Validation Tests
    // =========================================================================

    #[test]
    fn test_valid_descriptor() {
        assert!(customer().validate().is_ok());
        assert_eq!(customer().table_base(), "customer");
    }

    #[test]
    fn test_disallowed_method() {
        let descriptor = ObjectDescriptor::new("Customer")
            .method("clone")
            .method("send_email");
        let err = descriptor.validate().unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::DisallowedMethod { ref method, .. } if method == "send_email"
        ));
    }

    #[test]
    fn test_underscore_property() {
        let descriptor =
            ObjectDescriptor::new("Customer").property(PropertyDescriptor::scalar("_secret"));
        assert!(matches!(
            descriptor.validate().unwrap_err(),
            PersistenceError::UnderscoreProperty { .. }
        ));
    }

    #[test]
    fn test_reserved_property_name() {
        let descriptor =
            ObjectDescriptor::new("Customer").property(PropertyDescriptor::scalar("createdAt"));
        assert!(matches!(
            descriptor.validate().unwrap_err(),
            PersistenceError::InvalidReservedField { .. }
        ));
    }

    #[test]
    fn test_duplicate_property() {
        let descriptor = ObjectDescriptor::new("Customer")
            .property(PropertyDescriptor::scalar("name"))
            .property(PropertyDescriptor::scalar("name"));
        assert!(matches!(
            descriptor.validate().unwrap_err(),
            PersistenceError::Validation(_)
        ));
    }

    #[test]
    fn test_unique_array_rejected() {
        let descriptor =
            ObjectDescriptor::new("Customer").property(PropertyDescriptor::array("tags").unique());
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_reference_must_be_int_scalar() {
        let descriptor = ObjectDescriptor::new("Book").property(
            PropertyDescriptor::scalar("authorId")
                .typed(TypeDescriptor::string(10))
                .references("Author"),
        );
        assert!(matches!(
            descriptor.validate().unwrap_err(),
            PersistenceError::InvalidForeignReference { .. }
        ));

        let descriptor = ObjectDescriptor::new("Book")
            .property(PropertyDescriptor::array("authorIds").references("Author"));
        assert!(matches!(
            descriptor.validate().unwrap_err(),
            PersistenceError::InvalidForeignReference { .. }
        ));

        let descriptor = ObjectDescriptor::new("Book")
            .property(PropertyDescriptor::scalar("authorId").references("Author"));
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = ObjectDescriptor::new("Product").property(
            PropertyDescriptor::scalar("price").typed(TypeDescriptor::double(8, 2)),
        );
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["properties"][0]["shape"], "scalar");
        assert_eq!(json["properties"][0]["type"]["kind"], "double");

        let back: ObjectDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, descriptor);
    }

    // =========================================================================
    // DynamicObject Tests
    // =========================================================================

    #[test]
    fn test_dynamic_object_values() {
        let object = DynamicObject::new(customer())
            .with("name", "john")
            .unwrap()
            .with("tags", vec!["a", "b"])
            .unwrap();

        assert_eq!(object.value("name"), Value::from("john"));
        assert_eq!(object.value("tags").as_array().unwrap().len(), 2);
        assert_eq!(object.value("missing"), Value::Null);
    }

    #[test]
    fn test_dynamic_object_rejects_unknown_property() {
        let err = DynamicObject::new(customer()).with("age", 3).unwrap_err();
        assert!(matches!(err, PersistenceError::Validation(_)));
    }

    #[test]
    fn test_dynamic_object_shape_checks() {
        let mut object = DynamicObject::new(customer());
        assert!(object.set_value("bio", Value::from("x")).is_err());
        assert!(object.set_localized("name", Localized::new()).is_err());
        assert!(object.set_localized("bio", Localized::new()).is_ok());
    }

    #[test]
    fn test_localized_value_resolution() {
        let object = DynamicObject::new(customer())
            .with_localized(
                "bio",
                Localized::new().with_default("hello").with("fr", "bonjour"),
            )
            .unwrap()
            .with_locales(vec!["de".to_string(), "fr".to_string()]);

        assert_eq!(object.localized_value("bio"), Value::from("bonjour"));

        let fallback = object.clone().with_locales(vec!["de".to_string()]);
        assert_eq!(fallback.localized_value("bio"), Value::from("hello"));
    }
}

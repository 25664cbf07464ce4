//! ObjectManager - saves and loads persistable objects
//!
//! Every save first converges the tables the object needs (main table plus one
//! side table per array or multi-language property), each under its schema
//! lock, and only then writes all rows in a single transaction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{DatabaseClient, MySqlClient, SqlRow, SqlValue};
use crate::config::{SchemaPolicy, StoreConfig};
use crate::error::{PersistenceError, Result};
use crate::infer;
use crate::object::{
    DynamicObject, ObjectDescriptor, Persistable, PersistableKind, PropertyDescriptor,
    PropertyShape, RecordMeta,
};
use crate::reconcile;
use crate::schema::{
    ARRAY_INDEX_COLUMN, CREATED_AT_COLUMN, ColumnSpec, DELETED_AT_COLUMN, ID_COLUMN, LiveColumn,
    LiveTable, MODIFIED_AT_COLUMN, OWNER_ID_COLUMN, RESERVED_COLUMNS, TIMESTAMP_FRACTION,
    TableDefinition, UUID_COLUMN, VALUE_COLUMN, column_locale, locale_column, side_table_name,
};
use crate::sql::dml;
use crate::sql::sanitize::{normalize_locale, validate_identifier};
use crate::types::{ColumnType, TypeDescriptor};
use crate::value::{self, Localized, Timestamp, Value};

/// Persistence engine over one database connection
pub struct ObjectManager<C: DatabaseClient = MySqlClient> {
    pub(crate) client: C,
    pub(crate) config: StoreConfig,
    pub(crate) registry: HashMap<String, Arc<ObjectDescriptor>>,
}

/// Encoded values of the main table columns
struct MainRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

/// Encoded rows of one side table
enum SideRows {
    Array {
        table: String,
        elements: Vec<SqlValue>,
    },
    Localized {
        table: String,
        columns: Vec<String>,
        values: Vec<SqlValue>,
    },
}

enum Written {
    Inserted {
        id: u64,
        uuid: Uuid,
        at: Timestamp,
    },
    Updated {
        at: Timestamp,
    },
}

/// A stored object before it is materialized into a concrete type
pub(crate) struct LoadedRow {
    pub(crate) record: RecordMeta,
    values: Vec<(String, Value)>,
    localized: Vec<(String, Localized)>,
}

impl LoadedRow {
    fn id(&self) -> u64 {
        self.record.id().unwrap_or_default()
    }

    fn materialize<T: Persistable>(self, mut object: T) -> Result<T> {
        *object.record_mut() = self.record;
        for (name, value) in self.values {
            object.set_value(&name, value)?;
        }
        for (name, localized) in self.localized {
            object.set_localized(&name, localized)?;
        }
        Ok(object)
    }
}

impl ObjectManager<MySqlClient> {
    /// Connect to the database named in `config`
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let client = MySqlClient::connect(&config.database_url).await?;
        Ok(Self::new(client, config))
    }
}

impl<C: DatabaseClient> ObjectManager<C> {
    /// Create a manager over an existing client
    pub fn new(client: C, config: StoreConfig) -> Self {
        Self {
            client,
            config,
            registry: HashMap::new(),
        }
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get a mutable reference to the underlying client
    pub fn client(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    /// Register a kind so that deletes of the kinds it references cascade to it
    ///
    /// Saving an object registers its kind too.
    pub fn register(&mut self, descriptor: ObjectDescriptor) -> Result<Arc<ObjectDescriptor>> {
        descriptor.validate()?;
        let descriptor = Arc::new(descriptor);
        self.registry
            .insert(descriptor.kind.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Registered descriptor of `kind`
    pub fn descriptor(&self, kind: &str) -> Option<Arc<ObjectDescriptor>> {
        self.registry.get(kind).cloned()
    }

    /// Main table of a kind, prefix included
    pub fn table_name(&self, descriptor: &ObjectDescriptor) -> String {
        self.config.table_name(&descriptor.table_base())
    }

    fn remember(&mut self, descriptor: &ObjectDescriptor) {
        let current = self.registry.get(&descriptor.kind);
        if current.is_none_or(|known| known.as_ref() != descriptor) {
            self.registry
                .insert(descriptor.kind.clone(), Arc::new(descriptor.clone()));
        }
    }

    fn check_references(&self, descriptor: &ObjectDescriptor) -> Result<()> {
        for property in &descriptor.properties {
            let Some(target) = &property.references else {
                continue;
            };
            if *target != descriptor.kind && !self.registry.contains_key(target) {
                return Err(PersistenceError::InvalidForeignReference {
                    kind: descriptor.kind.clone(),
                    property: property.name.clone(),
                    detail: format!("kind '{}' is not registered", target),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Insert or update `object` under the configured schema policy
    ///
    /// Returns the object's id.
    pub async fn save<T: Persistable + ?Sized>(&mut self, object: &mut T) -> Result<u64> {
        let policy = self.config.policy();
        self.save_with(object, policy).await
    }

    /// Insert or update `object` under an explicit schema policy
    ///
    /// The object is inserted when it has no id (or only a fixture id) and
    /// updated otherwise. Its tables are converged before any row is written;
    /// the rows are written in one transaction. Record metadata is updated
    /// only after the commit.
    #[tracing::instrument(
        level = "debug",
        skip(self, object, policy),
        fields(kind = %object.descriptor().kind)
    )]
    pub async fn save_with<T: Persistable + ?Sized>(
        &mut self,
        object: &mut T,
        policy: SchemaPolicy,
    ) -> Result<u64> {
        let descriptor = object.descriptor().clone();
        descriptor.validate()?;
        object.record().validate()?;
        self.check_references(&descriptor)?;
        self.remember(&descriptor);

        let table = self.table_name(&descriptor);
        let (main, sides) = self
            .prepare_tables(&table, &descriptor, &*object, &policy)
            .await?;

        let record = object.record().clone();
        self.client.begin().await?;
        let written = match self.write_rows(&table, &record, &main, &sides).await {
            Ok(written) => written,
            Err(err) => {
                self.rollback_quietly().await;
                return Err(err.in_table(&table));
            }
        };
        self.client.commit().await?;

        let id = match written {
            Written::Inserted { id, uuid, at } => {
                object.record_mut().mark_inserted(id, uuid, at);
                debug!(table = %table, id, "Inserted object");
                id
            }
            Written::Updated { at } => {
                object.record_mut().mark_updated(at);
                let id = record.id().unwrap_or_default();
                debug!(table = %table, id, "Updated object");
                id
            }
        };
        Ok(id)
    }

    pub(crate) async fn rollback_quietly(&mut self) {
        if let Err(err) = self.client.rollback().await {
            warn!(error = %err, "Rollback failed");
        }
    }

    /// Converge `table` under its schema lock
    ///
    /// `build` derives the required definition from the live table and
    /// returns it with whatever the caller needs for the data phase.
    async fn converge<R>(
        &mut self,
        table: &str,
        policy: &SchemaPolicy,
        build: impl FnOnce(Option<&LiveTable>) -> Result<(TableDefinition, R)>,
    ) -> Result<R> {
        let timeout = self.config.schema_lock_timeout;
        self.client.acquire_schema_lock(table, timeout).await?;

        let result: Result<R> = async {
            let live = reconcile::inspect(&mut self.client, table).await?;
            let (required, output) = build(live.as_ref())?;
            let actions = reconcile::plan(&required, live.as_ref(), policy)?;
            reconcile::apply(&mut self.client, &actions).await?;
            Ok(output)
        }
        .await;

        let released = self.client.release_schema_lock(table).await;
        let output = result?;
        released?;
        Ok(output)
    }

    async fn prepare_tables<T: Persistable + ?Sized>(
        &mut self,
        table: &str,
        descriptor: &ObjectDescriptor,
        object: &T,
        policy: &SchemaPolicy,
    ) -> Result<(MainRow, Vec<SideRows>)> {
        let locales = configured_locales(object.locales())?;
        check_names(table, descriptor, &locales)?;

        let main = self
            .converge(table, policy, |live| {
                main_table(table, descriptor, object, live, policy)
            })
            .await?;

        let mut sides = Vec::new();
        for property in descriptor.properties_of(PropertyShape::Array) {
            let side = side_table_name(table, &property.name);
            let rows = self
                .converge(&side, policy, |live| {
                    array_table(&side, table, property, object, live, policy)
                })
                .await?;
            sides.push(rows);
        }

        for property in descriptor.properties_of(PropertyShape::MultiLanguage) {
            let side = side_table_name(table, &property.name);
            let rows = self
                .converge(&side, policy, |live| {
                    localized_table(&side, table, property, object, &locales, live, policy)
                })
                .await?;
            sides.push(rows);
        }

        Ok((main, sides))
    }

    async fn write_rows(
        &mut self,
        table: &str,
        record: &RecordMeta,
        main: &MainRow,
        sides: &[SideRows],
    ) -> Result<Written> {
        let (id, written) = match record.id() {
            Some(id) if !record.is_fixture() => {
                let at = self.update_main(table, id, record, main).await?;
                (id, Written::Updated { at })
            }
            fixture_id => {
                let at = Timestamp::now(TIMESTAMP_FRACTION);
                let uuid = Uuid::new_v4();
                let id = self.insert_main(table, fixture_id, uuid, at, main).await?;
                (id, Written::Inserted { id, uuid, at })
            }
        };

        for side in sides {
            self.write_side(id, side).await?;
        }

        Ok(written)
    }

    async fn insert_main(
        &mut self,
        table: &str,
        fixture_id: Option<u64>,
        uuid: Uuid,
        at: Timestamp,
        main: &MainRow,
    ) -> Result<u64> {
        let mut columns: Vec<&str> = Vec::with_capacity(main.columns.len() + 4);
        let mut params = Vec::with_capacity(main.values.len() + 4);

        if let Some(id) = fixture_id {
            columns.push(ID_COLUMN);
            params.push(SqlValue::UInt(id));
        }
        columns.extend([UUID_COLUMN, CREATED_AT_COLUMN, MODIFIED_AT_COLUMN]);
        params.extend([
            SqlValue::Text(uuid.to_string()),
            SqlValue::DateTime(at.to_naive()),
            SqlValue::DateTime(at.to_naive()),
        ]);
        columns.extend(main.columns.iter().map(String::as_str));
        params.extend(main.values.iter().cloned());

        let result = self
            .client
            .execute(&dml::insert(table, &columns, 1), &params)
            .await?;

        match fixture_id {
            Some(id) => Ok(id),
            None if result.last_insert_id > 0 => Ok(result.last_insert_id),
            None => Err(PersistenceError::database(format!(
                "Insert into '{}' did not report an id",
                table
            ))),
        }
    }

    async fn update_main(
        &mut self,
        table: &str,
        id: u64,
        record: &RecordMeta,
        main: &MainRow,
    ) -> Result<Timestamp> {
        let locked = self
            .client
            .query(&dml::lock_ids(table, 1), &[SqlValue::UInt(id)])
            .await?;
        if locked.is_empty() {
            return Err(PersistenceError::RowNotFound {
                table: table.to_string(),
                id,
            });
        }

        let now = Timestamp::now(TIMESTAMP_FRACTION);
        let at = match record.modified_at() {
            Some(previous) if now <= previous => previous.next_tick(),
            _ => now,
        };

        let mut columns: Vec<&str> = vec![MODIFIED_AT_COLUMN];
        columns.extend(main.columns.iter().map(String::as_str));
        let mut params = vec![SqlValue::DateTime(at.to_naive())];
        params.extend(main.values.iter().cloned());
        params.push(SqlValue::UInt(id));

        let result = self
            .client
            .execute(&dml::update_by_id(table, &columns), &params)
            .await?;
        if result.rows_affected == 0 {
            return Err(PersistenceError::RowNotFound {
                table: table.to_string(),
                id,
            });
        }
        Ok(at)
    }

    async fn write_side(&mut self, owner: u64, side: &SideRows) -> Result<()> {
        match side {
            SideRows::Array { table, elements } => {
                self.client
                    .execute(
                        &dml::delete_where_in(table, OWNER_ID_COLUMN, 1),
                        &[SqlValue::UInt(owner)],
                    )
                    .await?;
                if elements.is_empty() {
                    return Ok(());
                }

                let columns = [OWNER_ID_COLUMN, ARRAY_INDEX_COLUMN, VALUE_COLUMN];
                let batch = dml::batch_rows(columns.len());
                for (number, chunk) in elements.chunks(batch).enumerate() {
                    let first = number * batch;
                    let mut params = Vec::with_capacity(chunk.len() * columns.len());
                    for (offset, element) in chunk.iter().enumerate() {
                        params.push(SqlValue::UInt(owner));
                        params.push(SqlValue::Int((first + offset) as i64));
                        params.push(element.clone());
                    }
                    self.client
                        .execute(&dml::insert(table, &columns, chunk.len()), &params)
                        .await?;
                }
            }
            SideRows::Localized {
                table,
                columns,
                values,
            } => {
                let mut names: Vec<&str> = vec![OWNER_ID_COLUMN];
                names.extend(columns.iter().map(String::as_str));
                let mut params = vec![SqlValue::UInt(owner)];
                params.extend(values.iter().cloned());
                self.client
                    .execute(&dml::upsert(table, &names, OWNER_ID_COLUMN), &params)
                    .await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Find
    // ========================================================================

    /// Load objects by id, in the order requested
    ///
    /// Ids without a row (or with a soft-deleted row, unless configured
    /// otherwise) are left out of the result.
    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    pub async fn find_by_ids<T: PersistableKind>(&mut self, ids: &[u64]) -> Result<Vec<T>> {
        let descriptor = T::blank().descriptor().clone();
        let rows = self.load(&descriptor, Some(ids)).await?;
        rows.into_iter().map(|row| row.materialize(T::blank())).collect()
    }

    /// Load every object of a kind, ordered by id
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn find_all<T: PersistableKind>(&mut self) -> Result<Vec<T>> {
        let descriptor = T::blank().descriptor().clone();
        let rows = self.load(&descriptor, None).await?;
        rows.into_iter().map(|row| row.materialize(T::blank())).collect()
    }

    /// Load objects of a runtime-described kind by id
    pub async fn find_dynamic_by_ids(
        &mut self,
        descriptor: &Arc<ObjectDescriptor>,
        ids: &[u64],
    ) -> Result<Vec<DynamicObject>> {
        let rows = self.load(descriptor, Some(ids)).await?;
        rows.into_iter()
            .map(|row| row.materialize(DynamicObject::new(Arc::clone(descriptor))))
            .collect()
    }

    /// Load every object of a runtime-described kind
    pub async fn find_all_dynamic(
        &mut self,
        descriptor: &Arc<ObjectDescriptor>,
    ) -> Result<Vec<DynamicObject>> {
        let rows = self.load(descriptor, None).await?;
        rows.into_iter()
            .map(|row| row.materialize(DynamicObject::new(Arc::clone(descriptor))))
            .collect()
    }

    /// Number of stored objects of a kind
    pub async fn count(&mut self, descriptor: &ObjectDescriptor) -> Result<u64> {
        let table = self.table_name(descriptor);
        if !self.client.table_exists(&table).await? {
            return Ok(0);
        }
        let rows = self
            .client
            .query(
                &dml::count_rows(&table, self.config.exclude_soft_deleted),
                &[],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(SqlValue::as_u64)
            .unwrap_or(0))
    }

    pub(crate) async fn load(
        &mut self,
        descriptor: &ObjectDescriptor,
        ids: Option<&[u64]>,
    ) -> Result<Vec<LoadedRow>> {
        descriptor.validate()?;
        let table = self.table_name(descriptor);

        let ids: Option<Vec<u64>> = ids.map(unique_ids);
        if ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let Some(live) = reconcile::inspect(&mut self.client, &table).await? else {
            return Ok(Vec::new());
        };

        let scalars: Vec<&PropertyDescriptor> = descriptor
            .properties_of(PropertyShape::Scalar)
            .filter(|p| live.has_column(&p.name))
            .collect();
        let mut columns: Vec<&str> = RESERVED_COLUMNS.to_vec();
        columns.extend(scalars.iter().map(|p| p.name.as_str()));

        let params: Vec<SqlValue> = ids
            .iter()
            .flatten()
            .map(|id| SqlValue::UInt(*id))
            .collect();
        let exclude = self.config.exclude_soft_deleted;
        let rows = if ids.is_some() {
            self.query_in_batches(&params, |count| {
                dml::select_rows(&table, &columns, Some(count), exclude)
            })
            .await?
        } else {
            let sql = dml::select_rows(&table, &columns, None, exclude);
            self.client.query(&sql, &[]).await?
        };

        let mut loaded = rows
            .iter()
            .map(|row| decode_main_row(&table, &live, &scalars, row))
            .collect::<Result<Vec<_>>>()?;

        if !loaded.is_empty() {
            self.load_arrays(&table, descriptor, &mut loaded).await?;
            self.load_localized(&table, descriptor, &mut loaded).await?;
        }

        if let Some(ids) = ids {
            let mut by_id: HashMap<u64, LoadedRow> =
                loaded.into_iter().map(|row| (row.id(), row)).collect();
            loaded = ids.iter().filter_map(|id| by_id.remove(id)).collect();
        }

        debug!(table = %table, rows = loaded.len(), "Loaded objects");
        Ok(loaded)
    }

    async fn side_rows(
        &mut self,
        side: &str,
        owners: &[SqlValue],
        ordered: bool,
    ) -> Result<Option<(LiveTable, Vec<SqlRow>)>> {
        let Some(live) = reconcile::inspect(&mut self.client, side).await? else {
            return Ok(None);
        };
        let rows = self
            .query_in_batches(owners, |count| {
                dml::select_side_rows(side, count, ordered)
            })
            .await?;
        Ok(Some((live, rows)))
    }

    /// Run an IN-list query over `params`, one statement per batch
    pub(crate) async fn query_in_batches(
        &mut self,
        params: &[SqlValue],
        sql: impl Fn(usize) -> String,
    ) -> Result<Vec<SqlRow>> {
        let mut rows = Vec::new();
        for batch in params.chunks(dml::batch_rows(1)) {
            rows.extend(self.client.query(&sql(batch.len()), batch).await?);
        }
        Ok(rows)
    }

    /// Execute an IN-list statement over `params`, summing the affected rows
    pub(crate) async fn execute_in_batches(
        &mut self,
        params: &[SqlValue],
        sql: impl Fn(usize) -> String,
    ) -> Result<u64> {
        let mut affected = 0;
        for batch in params.chunks(dml::batch_rows(1)) {
            affected += self.client.execute(&sql(batch.len()), batch).await?.rows_affected;
        }
        Ok(affected)
    }

    async fn load_arrays(
        &mut self,
        table: &str,
        descriptor: &ObjectDescriptor,
        loaded: &mut [LoadedRow],
    ) -> Result<()> {
        let owners = owner_params(loaded);

        for property in descriptor.properties_of(PropertyShape::Array) {
            let side = side_table_name(table, &property.name);
            let mut elements: BTreeMap<u64, Vec<Value>> = BTreeMap::new();

            if let Some((live, rows)) = self.side_rows(&side, &owners, true).await? {
                let value_type = read_type(&side, &live, VALUE_COLUMN, property)?;
                for row in &rows {
                    let owner = row_owner(&side, row)?;
                    let cell = row.get(VALUE_COLUMN).unwrap_or(&SqlValue::Null);
                    elements
                        .entry(owner)
                        .or_default()
                        .push(value::decode(cell, &value_type, VALUE_COLUMN)?);
                }
            }

            for row in loaded.iter_mut() {
                let items = elements.remove(&row.id()).unwrap_or_default();
                row.values.push((property.name.clone(), Value::Array(items)));
            }
        }
        Ok(())
    }

    async fn load_localized(
        &mut self,
        table: &str,
        descriptor: &ObjectDescriptor,
        loaded: &mut [LoadedRow],
    ) -> Result<()> {
        let owners = owner_params(loaded);

        for property in descriptor.properties_of(PropertyShape::MultiLanguage) {
            let side = side_table_name(table, &property.name);
            let Some((live, rows)) = self.side_rows(&side, &owners, false).await? else {
                continue;
            };

            let mut by_owner: HashMap<u64, Localized> = HashMap::new();
            for row in &rows {
                let owner = row_owner(&side, row)?;
                let mut localized = Localized::new();
                for (column, cell) in row.iter() {
                    let locale = if column == VALUE_COLUMN {
                        value::DEFAULT_LOCALE
                    } else if let Some(locale) = column_locale(column) {
                        locale
                    } else {
                        continue;
                    };
                    let column_type = read_type(&side, &live, column, property)?;
                    localized.set(locale, value::decode(cell, &column_type, column)?);
                }
                by_owner.insert(owner, localized);
            }

            for row in loaded.iter_mut() {
                if let Some(localized) = by_owner.remove(&row.id()) {
                    row.localized.push((property.name.clone(), localized));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Table builders
// ============================================================================

fn live_descriptor(live: Option<&LiveTable>, column: &str) -> Option<TypeDescriptor> {
    live.and_then(|l| l.column(column))
        .and_then(LiveColumn::descriptor)
}

fn main_table<T: Persistable + ?Sized>(
    table: &str,
    descriptor: &ObjectDescriptor,
    object: &T,
    live: Option<&LiveTable>,
    policy: &SchemaPolicy,
) -> Result<(TableDefinition, MainRow)> {
    let mut specs = Vec::new();
    let mut row = MainRow {
        columns: Vec::new(),
        values: Vec::new(),
    };

    for property in descriptor.properties_of(PropertyShape::Scalar) {
        let name = property.name.as_str();
        let owned = object.value(name);
        let value = infer::scalar_value(name, &owned)?;
        let resolved = infer::resolve(property, &[value], live_descriptor(live, name), policy)?;

        row.columns.push(property.name.clone());
        row.values
            .push(value::encode(value, &resolved.column_type, name)?);

        let spec = ColumnSpec::new(name, resolved);
        specs.push(if property.unique { spec.unique() } else { spec });
    }

    Ok((TableDefinition::main(table, specs), row))
}

fn array_table<T: Persistable + ?Sized>(
    side: &str,
    owner: &str,
    property: &PropertyDescriptor,
    object: &T,
    live: Option<&LiveTable>,
    policy: &SchemaPolicy,
) -> Result<(TableDefinition, SideRows)> {
    let name = property.name.as_str();
    let owned = object.value(name);
    let items = infer::array_elements(name, &owned)?;
    let refs: Vec<&Value> = items.iter().collect();

    let resolved = infer::resolve(property, &refs, live_descriptor(live, VALUE_COLUMN), policy)
        .map_err(|e| e.for_property(name))?;
    let elements = items
        .iter()
        .map(|item| value::encode(item, &resolved.column_type, name))
        .collect::<Result<Vec<_>>>()?;

    Ok((
        TableDefinition::array(side, owner, resolved),
        SideRows::Array {
            table: side.to_string(),
            elements,
        },
    ))
}

fn localized_table<T: Persistable + ?Sized>(
    side: &str,
    owner: &str,
    property: &PropertyDescriptor,
    object: &T,
    locales: &[(String, String)],
    live: Option<&LiveTable>,
    policy: &SchemaPolicy,
) -> Result<(TableDefinition, SideRows)> {
    let name = property.name.as_str();
    let empty = Localized::new();
    let localized = object.localized(name).unwrap_or(&empty);

    let mut columns = vec![VALUE_COLUMN.to_string()];
    let mut values = vec![localized.default_value().cloned().unwrap_or_default()];
    for (_, normalized) in locales {
        let value = localized.get(normalized).cloned().unwrap_or_default();
        columns.push(locale_column(normalized));
        values.push(value);
    }

    let ignored = localized
        .iter()
        .filter(|(locale, _)| {
            !locale.is_empty() && !locales.iter().any(|(_, n)| n == locale)
        })
        .count();
    if ignored > 0 {
        debug!(property = %name, ignored, "Skipping values of locales not configured");
    }

    let refs: Vec<&Value> = values.iter().collect();
    let resolved = infer::resolve(property, &refs, live_descriptor(live, VALUE_COLUMN), policy)
        .map_err(|e| e.for_property(name))?;
    let encoded = values
        .iter()
        .map(|v| value::encode(v, &resolved.column_type, name))
        .collect::<Result<Vec<_>>>()?;

    let normalized: Vec<String> = locales.iter().map(|(_, n)| n.clone()).collect();
    Ok((
        TableDefinition::multi_language(side, owner, resolved, &normalized),
        SideRows::Localized {
            table: side.to_string(),
            columns,
            values: encoded,
        },
    ))
}

/// Configured locales as (given, normalized) pairs, duplicates dropped
fn configured_locales(locales: &[String]) -> Result<Vec<(String, String)>> {
    let mut out: Vec<(String, String)> = Vec::with_capacity(locales.len());
    for locale in locales {
        let normalized = normalize_locale(locale).map_err(PersistenceError::Validation)?;
        if !out.iter().any(|(_, n)| *n == normalized) {
            out.push((locale.clone(), normalized));
        }
    }
    Ok(out)
}

/// Every table and locale column a save may create must be a valid identifier
fn check_names(
    table: &str,
    descriptor: &ObjectDescriptor,
    locales: &[(String, String)],
) -> Result<()> {
    let invalid = |name: &str, detail: String| {
        PersistenceError::Validation(format!(
            "Table '{}' of '{}' cannot be created: {}",
            name, descriptor.kind, detail
        ))
    };

    validate_identifier(table).map_err(|e| invalid(table, e))?;
    for property in descriptor
        .properties
        .iter()
        .filter(|p| p.shape != PropertyShape::Scalar)
    {
        let side = side_table_name(table, &property.name);
        validate_identifier(&side).map_err(|e| invalid(&side, e))?;
        if property.shape == PropertyShape::MultiLanguage {
            for (_, locale) in locales {
                validate_identifier(&locale_column(locale)).map_err(|e| invalid(&side, e))?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Row decoding
// ============================================================================

pub(crate) fn unique_ids(ids: &[u64]) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn owner_params(loaded: &[LoadedRow]) -> Vec<SqlValue> {
    loaded.iter().map(|row| SqlValue::UInt(row.id())).collect()
}

fn live_type(table: &str, live: &LiveTable, column: &str) -> Result<ColumnType> {
    live.column_type(column).ok_or_else(|| {
        PersistenceError::database(format!(
            "Column '{}.{}' has a type that cannot be read",
            table, column
        ))
    })
}

/// Type a property's column is decoded with
///
/// A declared DATETIME keeps its own precision on a column widened past it.
fn read_type(
    table: &str,
    live: &LiveTable,
    column: &str,
    property: &PropertyDescriptor,
) -> Result<ColumnType> {
    let live_type = live_type(table, live, column)?;
    Ok(match (live_type, property.declared.as_ref()) {
        (ColumnType::DateTime { .. }, Some(declared))
            if matches!(declared.column_type, ColumnType::DateTime { .. }) =>
        {
            declared.column_type
        }
        (live_type, _) => live_type,
    })
}

fn row_owner(table: &str, row: &SqlRow) -> Result<u64> {
    row.get(OWNER_ID_COLUMN)
        .and_then(SqlValue::as_u64)
        .ok_or_else(|| PersistenceError::database(format!("Row of '{}' has no owner id", table)))
}

fn row_timestamp(table: &str, row: &SqlRow, column: &str) -> Result<Option<Timestamp>> {
    match row.get(column) {
        None | Some(SqlValue::Null) => Ok(None),
        Some(SqlValue::DateTime(naive)) => Ok(Some(Timestamp::from_utc(
            naive.and_utc(),
            TIMESTAMP_FRACTION,
        ))),
        Some(other) => Err(PersistenceError::database(format!(
            "Column '{}.{}' holds {:?}, expected a timestamp",
            table, column, other
        ))),
    }
}

fn decode_main_row(
    table: &str,
    live: &LiveTable,
    scalars: &[&PropertyDescriptor],
    row: &SqlRow,
) -> Result<LoadedRow> {
    let missing = |column: &str| {
        PersistenceError::database(format!("Row of '{}' has no valid {}", table, column))
    };

    let id = row
        .get(ID_COLUMN)
        .and_then(SqlValue::as_u64)
        .ok_or_else(|| missing(ID_COLUMN))?;
    let uuid = match row.get(UUID_COLUMN) {
        Some(SqlValue::Text(text)) => Uuid::parse_str(text).map_err(|_| missing(UUID_COLUMN))?,
        _ => return Err(missing(UUID_COLUMN)),
    };
    let created_at =
        row_timestamp(table, row, CREATED_AT_COLUMN)?.ok_or_else(|| missing(CREATED_AT_COLUMN))?;
    let modified_at = row_timestamp(table, row, MODIFIED_AT_COLUMN)?
        .ok_or_else(|| missing(MODIFIED_AT_COLUMN))?;
    let deleted_at = row_timestamp(table, row, DELETED_AT_COLUMN)?;

    let record = RecordMeta::restore(id, uuid, created_at, modified_at, deleted_at)?;

    let mut values = Vec::with_capacity(scalars.len());
    for property in scalars {
        let name = property.name.as_str();
        let column_type = read_type(table, live, name, property)?;
        let cell = row.get(name).unwrap_or(&SqlValue::Null);
        values.push((
            property.name.clone(),
            value::decode(cell, &column_type, name)?,
        ));
    }

    Ok(LoadedRow {
        record,
        values,
        localized: Vec::new(),
    })
}

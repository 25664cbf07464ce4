//! Deletion and soft deletion
//!
//! Every delete funnels into one primitive running inside a transaction: lock
//! the target rows, fail the whole call if any id is missing, remove rows of
//! registered kinds referencing the targets (one level), then the targets'
//! side table rows and finally the main rows.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::client::{DatabaseClient, SqlValue};
use crate::error::{PersistenceError, Result};
use crate::object::{ObjectDescriptor, Persistable, PropertyShape};
use crate::reconcile;
use crate::schema::{
    DELETED_AT_COLUMN, ID_COLUMN, MODIFIED_AT_COLUMN, OWNER_ID_COLUMN, TIMESTAMP_FRACTION,
    side_table_name,
};
use crate::sql::dml;
use crate::store::{ObjectManager, unique_ids};
use crate::value::{self, Timestamp, Value};

fn id_params(ids: &[u64]) -> Vec<SqlValue> {
    ids.iter().map(|id| SqlValue::UInt(*id)).collect()
}

impl<C: DatabaseClient> ObjectManager<C> {
    /// Delete objects of a kind by id
    ///
    /// Fails with `ObjectNotFound` and deletes nothing when any id has no
    /// row. Returns the number of main rows deleted.
    #[tracing::instrument(
        level = "debug",
        skip(self, descriptor, ids),
        fields(kind = %descriptor.kind, count = ids.len())
    )]
    pub async fn delete_by_ids(
        &mut self,
        descriptor: &ObjectDescriptor,
        ids: &[u64],
    ) -> Result<u64> {
        descriptor.validate()?;
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(0);
        }
        let table = self.table_name(descriptor);

        self.client.begin().await?;
        let deleted = match self.delete_rows(descriptor, &ids).await {
            Ok(deleted) => deleted,
            Err(err) => {
                self.rollback_quietly().await;
                return Err(err.in_table(&table));
            }
        };
        self.client.commit().await?;

        info!(table = %table, deleted, "Deleted objects");
        Ok(deleted)
    }

    /// Delete saved objects, possibly of several kinds, in one transaction
    ///
    /// Clears the record metadata of every instance once the delete commits.
    #[tracing::instrument(level = "debug", skip(self, objects), fields(count = objects.len()))]
    pub async fn delete_by_instances<T: Persistable>(&mut self, objects: &mut [T]) -> Result<u64> {
        let mut groups: Vec<(ObjectDescriptor, Vec<u64>)> = Vec::new();
        for object in objects.iter() {
            let descriptor = object.descriptor();
            descriptor.validate()?;
            let id = match object.record().id() {
                Some(id) if object.record().is_persisted() => id,
                _ => {
                    return Err(PersistenceError::validation(format!(
                        "Cannot delete an unsaved '{}'",
                        descriptor.kind
                    )));
                }
            };
            match groups.iter_mut().find(|(d, _)| d.kind == descriptor.kind) {
                Some((_, ids)) => ids.push(id),
                None => groups.push((descriptor.clone(), vec![id])),
            }
        }
        if groups.is_empty() {
            return Ok(0);
        }

        self.client.begin().await?;
        let mut deleted = 0;
        for (descriptor, ids) in &groups {
            let ids = unique_ids(ids);
            match self.delete_rows(descriptor, &ids).await {
                Ok(count) => deleted += count,
                Err(err) => {
                    self.rollback_quietly().await;
                    let table = self.table_name(descriptor);
                    return Err(err.in_table(&table));
                }
            }
        }
        self.client.commit().await?;

        for object in objects.iter_mut() {
            object.record_mut().clear();
        }
        debug!(deleted, kinds = groups.len(), "Deleted instances");
        Ok(deleted)
    }

    /// Delete every object of a kind whose properties equal the given values
    ///
    /// A NULL value matches NULL columns. Filtering on a property with no
    /// column yet matches nothing.
    #[tracing::instrument(
        level = "debug",
        skip(self, descriptor, filter),
        fields(kind = %descriptor.kind)
    )]
    pub async fn delete_by_property_values(
        &mut self,
        descriptor: &ObjectDescriptor,
        filter: &[(&str, Value)],
    ) -> Result<u64> {
        descriptor.validate()?;
        if filter.is_empty() {
            return Err(PersistenceError::validation(
                "Property filter must name at least one property",
            ));
        }
        for (name, _) in filter {
            match descriptor.find_property(name) {
                Some(p) if p.shape == PropertyShape::Scalar => {}
                _ => {
                    return Err(PersistenceError::validation(format!(
                        "'{}' has no scalar property '{}' to filter on",
                        descriptor.kind, name
                    )));
                }
            }
        }

        let table = self.table_name(descriptor);
        let Some(live) = reconcile::inspect(&mut self.client, &table).await? else {
            return Ok(0);
        };

        let mut conditions = Vec::with_capacity(filter.len());
        let mut params = Vec::new();
        for (name, wanted) in filter {
            let Some(column_type) = live.column_type(name) else {
                return Ok(0);
            };
            let encoded = value::encode(wanted, &column_type, name)?;
            conditions.push((*name, encoded.is_null()));
            if !encoded.is_null() {
                params.push(encoded);
            }
        }

        self.client.begin().await?;
        let result: Result<u64> = async {
            let rows = self
                .client
                .query(&dml::select_ids_matching(&table, &conditions), &params)
                .await?;
            let ids: Vec<u64> = rows
                .iter()
                .filter_map(|row| row.get(ID_COLUMN).and_then(SqlValue::as_u64))
                .collect();
            if ids.is_empty() {
                return Ok(0);
            }
            self.delete_rows(descriptor, &ids).await
        }
        .await;

        let deleted = match result {
            Ok(deleted) => deleted,
            Err(err) => {
                self.rollback_quietly().await;
                return Err(err.in_table(&table));
            }
        };
        self.client.commit().await?;
        Ok(deleted)
    }

    /// Mark a saved object deleted without removing its rows
    #[tracing::instrument(
        level = "debug",
        skip(self, object),
        fields(kind = %object.descriptor().kind)
    )]
    pub async fn soft_delete<T: Persistable + ?Sized>(&mut self, object: &mut T) -> Result<()> {
        let at = Timestamp::now(TIMESTAMP_FRACTION);
        self.stamp_deleted(object, Some(at)).await
    }

    /// Undo a soft delete
    pub async fn restore<T: Persistable + ?Sized>(&mut self, object: &mut T) -> Result<()> {
        self.stamp_deleted(object, None).await
    }

    async fn stamp_deleted<T: Persistable + ?Sized>(
        &mut self,
        object: &mut T,
        deleted_at: Option<Timestamp>,
    ) -> Result<()> {
        let table = self.table_name(object.descriptor());
        let record = object.record();
        let id = match record.id() {
            Some(id) if record.is_persisted() => id,
            _ => {
                return Err(PersistenceError::validation(format!(
                    "Cannot change the deleted state of an unsaved '{}'",
                    object.descriptor().kind
                )));
            }
        };

        let now = Timestamp::now(TIMESTAMP_FRACTION);
        let modified_at = match record.modified_at() {
            Some(previous) if now <= previous => previous.next_tick(),
            _ => now,
        };
        let deleted_at = deleted_at.map(|at| at.max(modified_at));

        let params = vec![
            deleted_at.map_or(SqlValue::Null, |at| SqlValue::DateTime(at.to_naive())),
            SqlValue::DateTime(modified_at.to_naive()),
            SqlValue::UInt(id),
        ];
        let result = self
            .client
            .execute(
                &dml::update_by_id(&table, &[DELETED_AT_COLUMN, MODIFIED_AT_COLUMN]),
                &params,
            )
            .await?;
        if result.rows_affected == 0 {
            return Err(PersistenceError::RowNotFound { table, id });
        }

        object.record_mut().mark_soft_deleted(deleted_at, modified_at);
        debug!(table = %table, id, deleted = deleted_at.is_some(), "Changed deleted state");
        Ok(())
    }

    // ========================================================================
    // Delete primitive
    // ========================================================================

    /// Delete `ids` of one kind inside the open transaction
    async fn delete_rows(&mut self, descriptor: &ObjectDescriptor, ids: &[u64]) -> Result<u64> {
        let table = self.table_name(descriptor);
        let params = id_params(ids);

        // Every batch is locked before any id is judged missing
        let found: HashSet<u64> = if self.client.table_exists(&table).await? {
            self.query_in_batches(&params, |count| dml::lock_ids(&table, count))
                .await?
                .iter()
                .filter_map(|row| row.get(ID_COLUMN).and_then(SqlValue::as_u64))
                .collect()
        } else {
            HashSet::new()
        };
        let missing: Vec<u64> = ids.iter().copied().filter(|id| !found.contains(id)).collect();
        if !missing.is_empty() {
            return Err(PersistenceError::ObjectNotFound {
                table,
                ids: missing,
            });
        }

        for (dependent, property) in self.dependents_of(&descriptor.kind) {
            let dependent_table = self.table_name(&dependent);
            if !self.client.table_exists(&dependent_table).await? {
                continue;
            }
            let rows = self
                .query_in_batches(&params, |count| {
                    dml::select_ids_where_in(&dependent_table, &property, count)
                })
                .await?;
            let dependent_ids: Vec<u64> = rows
                .iter()
                .filter_map(|row| row.get(ID_COLUMN).and_then(SqlValue::as_u64))
                .collect();
            if dependent_ids.is_empty() {
                continue;
            }

            self.delete_side_rows(&dependent_table, &dependent, &dependent_ids)
                .await?;
            let deleted = self
                .execute_in_batches(&id_params(&dependent_ids), |count| {
                    dml::delete_where_in(&dependent_table, ID_COLUMN, count)
                })
                .await?;
            debug!(
                table = %dependent_table,
                property = %property,
                deleted,
                "Deleted referencing objects"
            );
        }

        self.delete_side_rows(&table, descriptor, ids).await?;
        self.execute_in_batches(&params, |count| {
            dml::delete_where_in(&table, ID_COLUMN, count)
        })
        .await
    }

    async fn delete_side_rows(
        &mut self,
        table: &str,
        descriptor: &ObjectDescriptor,
        ids: &[u64],
    ) -> Result<()> {
        let params = id_params(ids);
        for property in descriptor
            .properties
            .iter()
            .filter(|p| p.shape != PropertyShape::Scalar)
        {
            let side = side_table_name(table, &property.name);
            if !self.client.table_exists(&side).await? {
                continue;
            }
            self.execute_in_batches(&params, |count| {
                dml::delete_where_in(&side, OWNER_ID_COLUMN, count)
            })
            .await?;
        }
        Ok(())
    }

    /// Registered kinds other than `kind` with a property referencing it
    fn dependents_of(&self, kind: &str) -> Vec<(Arc<ObjectDescriptor>, String)> {
        let mut dependents: Vec<(Arc<ObjectDescriptor>, String)> = self
            .registry
            .values()
            .filter(|d| d.kind != kind)
            .flat_map(|d| {
                d.properties
                    .iter()
                    .filter(|p| p.references.as_deref() == Some(kind))
                    .map(move |p| (Arc::clone(d), p.name.clone()))
            })
            .collect();
        dependents.sort_by(|a, b| (&a.0.kind, &a.1).cmp(&(&b.0.kind, &b.1)));
        dependents
    }
}

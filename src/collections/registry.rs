// Collection Registry - collection rows, their field associations and layouts
// Associations and layouts are fully replaced on every save

use sqlx::sqlite::SqliteConnection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::core::{current_time_millis, millis_to_datetime, CollectionId, Handle, Identifier, LayoutId};
use crate::error::{AppError, AppResult, NotFound};
use crate::fields::{Field, FieldRegistry};
use crate::infrastructure::cache::ModelCache;
use crate::infrastructure::collaborators::{ElementStore, LayoutService};
use crate::infrastructure::database::{RatingDatabase, COLLECTIONS_TABLE, COLLECTION_FIELDS_TABLE};
use crate::infrastructure::hooks::{HookContext, HookOperation, HookRegistry, HookTarget};

use super::model::{Collection, CollectionDefinition, CollectionField, CollectionFieldSpec};

const ENTITY: &str = "rating collection";

pub struct CollectionRegistry {
    db: RatingDatabase,
    hooks: Arc<HookRegistry>,
    fields: Arc<FieldRegistry>,
    elements: Arc<dyn ElementStore>,
    layouts: Arc<dyn LayoutService>,
    cache: ModelCache<Collection>,
    associations: Mutex<HashMap<CollectionId, Vec<CollectionField>>>,
    max_handle_length: usize,
}

impl CollectionRegistry {
    pub fn new(
        db: RatingDatabase,
        hooks: Arc<HookRegistry>,
        fields: Arc<FieldRegistry>,
        elements: Arc<dyn ElementStore>,
        layouts: Arc<dyn LayoutService>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            hooks,
            fields,
            elements,
            layouts,
            cache: ModelCache::new(config.cache.capacity),
            associations: Mutex::new(HashMap::new()),
            max_handle_length: config.schema.max_identifier_length,
        }
    }

    pub async fn find_all(&self) -> AppResult<Vec<Collection>> {
        if let Some(all) = self.cache.all().await {
            return Ok(all);
        }
        let rows = sqlx::query(&format!("SELECT * FROM {COLLECTIONS_TABLE} ORDER BY name, id"))
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load rating collections: {}", e)))?;
        let collections = rows
            .iter()
            .map(Collection::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::DatabaseError(format!("Failed to decode rating collection: {}", e)))?;
        self.cache.put_all(collections.clone()).await;
        Ok(collections)
    }

    pub async fn find_by_id(&self, id: CollectionId) -> AppResult<Option<Collection>> {
        if let Some(collection) = self.cache.get_by_id(id.value()).await {
            return Ok(Some(collection));
        }
        let row = sqlx::query(&format!("SELECT * FROM {COLLECTIONS_TABLE} WHERE id = ?"))
            .bind(id.value())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load rating collection: {}", e)))?;
        self.remember(row).await
    }

    pub async fn find_by_handle(&self, handle: &str) -> AppResult<Option<Collection>> {
        if let Some(collection) = self.cache.get_by_handle(handle).await {
            return Ok(Some(collection));
        }
        let row = sqlx::query(&format!(
            "SELECT * FROM {COLLECTIONS_TABLE} WHERE handle = ? COLLATE NOCASE"
        ))
        .bind(handle)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to load rating collection: {}", e)))?;
        self.remember(row).await
    }

    pub async fn find(&self, identifier: impl Into<Identifier>) -> AppResult<Option<Collection>> {
        match identifier.into() {
            Identifier::Id(id) => self.find_by_id(CollectionId::new(id)).await,
            Identifier::Key(handle) => self.find_by_handle(&handle).await,
        }
    }

    pub async fn get_by_id(&self, id: CollectionId) -> AppResult<Collection> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| NotFound::by_id(ENTITY, id.value()).into())
    }

    pub async fn get_by_handle(&self, handle: &str) -> AppResult<Collection> {
        self.find_by_handle(handle)
            .await?
            .ok_or_else(|| NotFound::by_handle(ENTITY, handle).into())
    }

    pub async fn get(&self, identifier: impl Into<Identifier>) -> AppResult<Collection> {
        match identifier.into() {
            Identifier::Id(id) => self.get_by_id(CollectionId::new(id)).await,
            Identifier::Key(handle) => self.get_by_handle(&handle).await,
        }
    }

    /// Stored associations of a collection, in sort order.
    pub async fn associations_for(&self, id: CollectionId) -> AppResult<Vec<CollectionField>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {COLLECTION_FIELDS_TABLE} WHERE collection_id = ? ORDER BY sort_order, field_id"
        ))
        .bind(id.value())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to load collection fields: {}", e)))?;
        rows.iter()
            .map(CollectionField::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::DatabaseError(format!("Failed to decode collection field: {}", e)))
    }

    /// Fields of a collection with their required flag, in sort order.
    /// Associations are memoized per process; fields deleted since are skipped.
    pub async fn rating_field_requirements(&self, collection: &Collection) -> AppResult<Vec<(Field, bool)>> {
        let associations = {
            let memo = self.associations.lock().await;
            memo.get(&collection.id).cloned()
        };
        let associations = match associations {
            Some(associations) => associations,
            None => {
                let loaded = self.associations_for(collection.id).await?;
                self.associations
                    .lock()
                    .await
                    .insert(collection.id, loaded.clone());
                loaded
            }
        };

        let catalog: HashMap<_, _> = self
            .fields
            .find_all()
            .await?
            .into_iter()
            .map(|field| (field.id, field))
            .collect();
        Ok(associations
            .iter()
            .filter_map(|association| {
                catalog
                    .get(&association.field_id)
                    .map(|field| (field.clone(), association.required))
            })
            .collect())
    }

    pub async fn get_rating_fields(&self, collection: &Collection) -> AppResult<Vec<Field>> {
        Ok(self
            .rating_field_requirements(collection)
            .await?
            .into_iter()
            .map(|(field, _)| field)
            .collect())
    }

    #[instrument(skip(self, definition, fields), fields(handle = %definition.handle))]
    pub async fn create(
        &self,
        definition: CollectionDefinition,
        fields: Vec<CollectionFieldSpec>,
    ) -> AppResult<Collection> {
        let handle = self.validate(&definition, &fields, None).await?;

        let mut ctx = HookContext::new(HookTarget::Collection, HookOperation::Create)
            .with_handle(handle.as_str())
            .with_payload(&definition)?;
        self.hooks.before(&mut ctx).await?;

        let layout_id = self.layouts.save_layout(&definition.field_layout).await?;
        let now = current_time_millis();
        let mut collection = Collection {
            id: CollectionId::new(0),
            handle,
            name: definition.name.trim().to_string(),
            element_type: definition.element_type.trim().to_string(),
            field_layout_id: Some(layout_id),
            date_created: millis_to_datetime(now),
            date_updated: millis_to_datetime(now),
        };

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            collection.id = insert_collection(tx.conn(), &collection, now).await?;
            write_associations(tx.conn(), collection.id, &fields).await?;
            ctx.entity_id = Some(collection.id.value());
            self.hooks.after(&mut ctx).await
        }
        .await;
        if let Err(err) = tx.finish(result).await {
            self.discard_layout(layout_id).await;
            return Err(err);
        }

        self.cache.put(collection.clone()).await;
        self.associations.lock().await.remove(&collection.id);
        info!(collection_id = %collection.id, handle = %collection.handle, field_count = fields.len(), "created rating collection");
        Ok(collection)
    }

    #[instrument(skip(self, definition, fields), fields(handle = %definition.handle))]
    pub async fn update(
        &self,
        id: CollectionId,
        definition: CollectionDefinition,
        fields: Vec<CollectionFieldSpec>,
    ) -> AppResult<Collection> {
        let existing = self.get_by_id(id).await?;
        let handle = self.validate(&definition, &fields, Some(id)).await?;

        let mut ctx = HookContext::new(HookTarget::Collection, HookOperation::Update)
            .with_entity_id(id)
            .with_handle(handle.as_str())
            .with_payload(&definition)?;
        self.hooks.before(&mut ctx).await?;

        let layout_id = self.layouts.save_layout(&definition.field_layout).await?;
        let now = current_time_millis();
        let collection = Collection {
            id,
            handle,
            name: definition.name.trim().to_string(),
            element_type: definition.element_type.trim().to_string(),
            field_layout_id: Some(layout_id),
            date_created: existing.date_created,
            date_updated: millis_to_datetime(now),
        };

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            update_collection(tx.conn(), &collection, now).await?;
            delete_associations(tx.conn(), id).await?;
            write_associations(tx.conn(), id, &fields).await?;
            self.hooks.after(&mut ctx).await
        }
        .await;
        if let Err(err) = tx.finish(result).await {
            self.discard_layout(layout_id).await;
            return Err(err);
        }

        if let Some(previous) = existing.field_layout_id {
            self.discard_layout(previous).await;
        }
        self.cache.put(collection.clone()).await;
        self.associations.lock().await.remove(&id);
        info!(collection_id = %id, handle = %collection.handle, field_count = fields.len(), "updated rating collection");
        Ok(collection)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: CollectionId) -> AppResult<()> {
        let collection = self.get_by_id(id).await?;

        let mut ctx = HookContext::new(HookTarget::Collection, HookOperation::Delete)
            .with_entity_id(id)
            .with_handle(collection.handle.as_str());
        self.hooks.before(&mut ctx).await?;

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            delete_associations(tx.conn(), id).await?;
            sqlx::query(&format!("DELETE FROM {COLLECTIONS_TABLE} WHERE id = ?"))
                .bind(id.value())
                .execute(tx.conn())
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to delete rating collection: {}", e))
                })?;
            self.hooks.after(&mut ctx).await
        }
        .await;
        tx.finish(result).await?;

        if let Some(layout_id) = collection.field_layout_id {
            self.discard_layout(layout_id).await;
        }
        self.cache.remove(id.value()).await;
        self.associations.lock().await.remove(&id);
        info!(collection_id = %id, handle = %collection.handle, "deleted rating collection");
        Ok(())
    }

    async fn validate(
        &self,
        definition: &CollectionDefinition,
        fields: &[CollectionFieldSpec],
        existing: Option<CollectionId>,
    ) -> AppResult<Handle> {
        let (handle, mut errors) = definition.validate(self.max_handle_length);

        if let Some(handle) = &handle {
            let taken: Option<i64> = sqlx::query_scalar(&format!(
                "SELECT id FROM {COLLECTIONS_TABLE} WHERE handle = ? COLLATE NOCASE AND id != ?"
            ))
            .bind(handle.as_str())
            .bind(existing.map(CollectionId::value).unwrap_or(-1))
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to check collection handle: {}", e)))?;
            if taken.is_some() {
                errors.add("handle", format!("Handle \"{}\" has already been taken.", handle));
            }
        }

        let element_type = definition.element_type.trim();
        if !element_type.is_empty() && !self.elements.supports_type(element_type).await? {
            errors.add(
                "elementType",
                format!("\"{}\" isn't a known element type.", element_type),
            );
        }

        let known: HashSet<_> = self
            .fields
            .find_all()
            .await?
            .into_iter()
            .map(|field| field.id)
            .collect();
        let mut seen = HashSet::new();
        for spec in fields {
            if !known.contains(&spec.field_id) {
                errors.add(
                    "fields",
                    NotFound::by_id("rating field", spec.field_id.value()).to_string(),
                );
            }
            if !seen.insert(spec.field_id) {
                errors.add(
                    "fields",
                    format!("Rating field {} is listed more than once.", spec.field_id),
                );
            }
        }

        errors.into_result()?;
        handle.ok_or_else(|| AppError::validation("handle", "Handle is invalid."))
    }

    async fn remember(&self, row: Option<sqlx::sqlite::SqliteRow>) -> AppResult<Option<Collection>> {
        let collection = row
            .as_ref()
            .map(Collection::from_row)
            .transpose()
            .map_err(|e| AppError::DatabaseError(format!("Failed to decode rating collection: {}", e)))?;
        if let Some(collection) = &collection {
            self.cache.put(collection.clone()).await;
        }
        Ok(collection)
    }

    /// Layouts live outside the database transaction; undo them by hand.
    async fn discard_layout(&self, layout_id: LayoutId) {
        if let Err(err) = self.layouts.delete_layout(layout_id).await {
            warn!(%layout_id, error = %err, "failed to delete collection layout");
        }
    }
}

async fn insert_collection(
    conn: &mut SqliteConnection,
    collection: &Collection,
    now: i64,
) -> AppResult<CollectionId> {
    let result = sqlx::query(&format!(
        "INSERT INTO {COLLECTIONS_TABLE} (handle, name, element_type, field_layout_id, date_created, date_updated) \
         VALUES (?, ?, ?, ?, ?, ?)"
    ))
    .bind(collection.handle.as_str())
    .bind(&collection.name)
    .bind(&collection.element_type)
    .bind(collection.field_layout_id.map(LayoutId::value))
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(format!("Failed to insert rating collection: {}", e)))?;
    Ok(CollectionId::new(result.last_insert_rowid()))
}

async fn update_collection(conn: &mut SqliteConnection, collection: &Collection, now: i64) -> AppResult<()> {
    sqlx::query(&format!(
        "UPDATE {COLLECTIONS_TABLE} SET handle = ?, name = ?, element_type = ?, field_layout_id = ?, \
         date_updated = ? WHERE id = ?"
    ))
    .bind(collection.handle.as_str())
    .bind(&collection.name)
    .bind(&collection.element_type)
    .bind(collection.field_layout_id.map(LayoutId::value))
    .bind(now)
    .bind(collection.id.value())
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(format!("Failed to update rating collection: {}", e)))?;
    Ok(())
}

async fn delete_associations(conn: &mut SqliteConnection, id: CollectionId) -> AppResult<()> {
    sqlx::query(&format!("DELETE FROM {COLLECTION_FIELDS_TABLE} WHERE collection_id = ?"))
        .bind(id.value())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to delete collection fields: {}", e)))?;
    Ok(())
}

async fn write_associations(
    conn: &mut SqliteConnection,
    id: CollectionId,
    fields: &[CollectionFieldSpec],
) -> AppResult<()> {
    for (position, spec) in fields.iter().enumerate() {
        sqlx::query(&format!(
            "INSERT INTO {COLLECTION_FIELDS_TABLE} (collection_id, field_id, required, sort_order) VALUES (?, ?, ?, ?)"
        ))
        .bind(id.value())
        .bind(spec.field_id.value())
        .bind(spec.required)
        .bind(position as i64 + 1)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert collection field: {}", e)))?;
    }
    Ok(())
}

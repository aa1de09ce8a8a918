// Field Registry - catalog of rating fields and their columns on the ratings table
// Row write and column DDL commit together; the field-version token moves after commit

use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::core::{current_time_millis, millis_to_datetime, FieldId, Handle, Identifier};
use crate::error::{AppError, AppResult, NotFound};
use crate::infrastructure::cache::ModelCache;
use crate::infrastructure::database::{RatingDatabase, FIELDS_TABLE, RATINGS_TABLE};
use crate::infrastructure::hooks::{HookContext, HookOperation, HookRegistry, HookTarget};
use crate::infrastructure::schema_ops;
use crate::infrastructure::settings::SettingsStore;

use super::model::{Field, FieldDefinition};
use super::version::FieldVersionGate;

const ENTITY: &str = "rating field";

pub struct FieldRegistry {
    db: RatingDatabase,
    settings: SettingsStore,
    hooks: Arc<HookRegistry>,
    cache: ModelCache<Field>,
    catalog: FieldVersionGate<Vec<Field>>,
    max_handle_length: usize,
}

impl FieldRegistry {
    pub fn new(
        db: RatingDatabase,
        settings: SettingsStore,
        hooks: Arc<HookRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            settings,
            hooks,
            cache: ModelCache::new(config.cache.capacity),
            catalog: FieldVersionGate::new(),
            max_handle_length: config.max_field_handle_length(),
        }
    }

    pub fn max_handle_length(&self) -> usize {
        self.max_handle_length
    }

    /// Current field-version token. Cached models are dropped when it moved.
    pub async fn field_version(&self) -> AppResult<String> {
        let token = self.settings.field_version().await?.unwrap_or_default();
        if self.catalog.observe(&token).await {
            self.cache.clear().await;
            debug!(field_version = %token, "field catalog changed, caches dropped");
        }
        Ok(token)
    }

    /// Every field, in creation order.
    pub async fn find_all(&self) -> AppResult<Vec<Field>> {
        let token = self.field_version().await?;
        if let Some(fields) = self.catalog.get(&token).await {
            return Ok(fields.as_ref().clone());
        }

        let rows = sqlx::query(&format!("SELECT * FROM {FIELDS_TABLE} ORDER BY id"))
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load rating fields: {}", e)))?;
        let fields = rows
            .iter()
            .map(Field::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::DatabaseError(format!("Failed to decode rating field: {}", e)))?;

        let fields = self.catalog.store(&token, fields).await;
        self.cache.put_all(fields.as_ref().clone()).await;
        Ok(fields.as_ref().clone())
    }

    pub async fn find_by_id(&self, id: FieldId) -> AppResult<Option<Field>> {
        self.field_version().await?;
        if let Some(field) = self.cache.get_by_id(id.value()).await {
            return Ok(Some(field));
        }
        let field = self
            .fetch_one(&format!("SELECT * FROM {FIELDS_TABLE} WHERE id = ?"), id.value().into())
            .await?;
        if let Some(field) = &field {
            self.cache.put(field.clone()).await;
        }
        Ok(field)
    }

    pub async fn find_by_handle(&self, handle: &str) -> AppResult<Option<Field>> {
        self.field_version().await?;
        if let Some(field) = self.cache.get_by_handle(handle).await {
            return Ok(Some(field));
        }
        let field = self
            .fetch_one(
                &format!("SELECT * FROM {FIELDS_TABLE} WHERE handle = ? COLLATE NOCASE"),
                Identifier::Key(handle.to_string()),
            )
            .await?;
        if let Some(field) = &field {
            self.cache.put(field.clone()).await;
        }
        Ok(field)
    }

    /// Look a field up by id or handle.
    pub async fn find(&self, identifier: impl Into<Identifier>) -> AppResult<Option<Field>> {
        match identifier.into() {
            Identifier::Id(id) => self.find_by_id(FieldId::new(id)).await,
            Identifier::Key(handle) => self.find_by_handle(&handle).await,
        }
    }

    pub async fn get_by_id(&self, id: FieldId) -> AppResult<Field> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| NotFound::by_id(ENTITY, id.value()).into())
    }

    pub async fn get_by_handle(&self, handle: &str) -> AppResult<Field> {
        self.find_by_handle(handle)
            .await?
            .ok_or_else(|| NotFound::by_handle(ENTITY, handle).into())
    }

    pub async fn get(&self, identifier: impl Into<Identifier>) -> AppResult<Field> {
        match identifier.into() {
            Identifier::Id(id) => self.get_by_id(FieldId::new(id)).await,
            Identifier::Key(handle) => self.get_by_handle(&handle).await,
        }
    }

    #[instrument(skip(self, definition), fields(handle = %definition.handle))]
    pub async fn create(&self, definition: FieldDefinition) -> AppResult<Field> {
        let handle = self.validate(&definition, None).await?;

        let mut ctx = HookContext::new(HookTarget::Field, HookOperation::Create)
            .with_handle(handle.as_str())
            .with_payload(&definition)?;
        self.hooks.before(&mut ctx).await?;

        let now = current_time_millis();
        let mut field = Field {
            id: FieldId::new(0),
            handle,
            name: definition.name.trim().to_string(),
            min: definition.min,
            max: definition.max,
            increment: definition.increment,
            precision: definition.precision,
            date_created: millis_to_datetime(now),
            date_updated: millis_to_datetime(now),
        };

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            let id = insert_field(tx.conn(), &field, now).await?;
            field.id = id;
            let column = field.column_name();
            if schema_ops::column_exists(tx.conn(), RATINGS_TABLE, &column).await? {
                // left behind by an earlier drift; adopt it
                schema_ops::alter_column(tx.conn(), RATINGS_TABLE, &column, None, field.column_type())
                    .await?;
            } else {
                schema_ops::add_column(tx.conn(), RATINGS_TABLE, &column, field.column_type())
                    .await?;
            }
            ctx.entity_id = Some(id.value());
            self.hooks.after(&mut ctx).await
        }
        .await;
        tx.finish(result).await?;

        self.publish_catalog_change().await?;
        self.cache.put(field.clone()).await;
        info!(field_id = %field.id, handle = %field.handle, column_type = %field.column_type(), "created rating field");
        Ok(field)
    }

    #[instrument(skip(self, definition), fields(handle = %definition.handle))]
    pub async fn update(&self, id: FieldId, definition: FieldDefinition) -> AppResult<Field> {
        let existing = self.get_by_id(id).await?;
        let handle = self.validate(&definition, Some(id)).await?;

        let mut ctx = HookContext::new(HookTarget::Field, HookOperation::Update)
            .with_entity_id(id)
            .with_handle(handle.as_str())
            .with_payload(&definition)?
            .with_metadata("previousHandle", existing.handle.as_str().into());
        self.hooks.before(&mut ctx).await?;

        let now = current_time_millis();
        let field = Field {
            id,
            handle,
            name: definition.name.trim().to_string(),
            min: definition.min,
            max: definition.max,
            increment: definition.increment,
            precision: definition.precision,
            date_created: existing.date_created,
            date_updated: millis_to_datetime(now),
        };
        let column_changes = definition.changes_column_of(&existing);

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            update_field(tx.conn(), &field, now).await?;
            if column_changes {
                migrate_column(tx.conn(), &existing, &field).await?;
            }
            self.hooks.after(&mut ctx).await
        }
        .await;
        tx.finish(result).await?;

        self.publish_catalog_change().await?;
        self.cache.put(field.clone()).await;
        info!(field_id = %id, handle = %field.handle, column_changes, "updated rating field");
        Ok(field)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: FieldId) -> AppResult<()> {
        let field = self.get_by_id(id).await?;

        let mut ctx = HookContext::new(HookTarget::Field, HookOperation::Delete)
            .with_entity_id(id)
            .with_handle(field.handle.as_str());
        self.hooks.before(&mut ctx).await?;

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            sqlx::query(&format!("DELETE FROM {FIELDS_TABLE} WHERE id = ?"))
                .bind(id.value())
                .execute(tx.conn())
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to delete rating field: {}", e)))?;

            let column = field.column_name();
            if schema_ops::column_exists(tx.conn(), RATINGS_TABLE, &column).await? {
                schema_ops::drop_column(tx.conn(), RATINGS_TABLE, &column).await?;
            } else {
                debug!(%column, "column already absent, nothing to drop");
            }
            self.hooks.after(&mut ctx).await
        }
        .await;
        tx.finish(result).await?;

        self.publish_catalog_change().await?;
        self.cache.remove(id.value()).await;
        info!(field_id = %id, handle = %field.handle, "deleted rating field");
        Ok(())
    }

    async fn validate(&self, definition: &FieldDefinition, existing: Option<FieldId>) -> AppResult<Handle> {
        let (handle, mut errors) = definition.validate(self.max_handle_length);
        if let Some(handle) = &handle {
            if self.handle_taken(handle.as_str(), existing).await? {
                errors.add(
                    "handle",
                    format!("Handle \"{}\" has already been taken.", handle),
                );
            }
        }
        errors.into_result()?;
        handle.ok_or_else(|| AppError::validation("handle", "Handle is invalid."))
    }

    /// Column names are case-insensitive, so handles are too.
    async fn handle_taken(&self, handle: &str, except: Option<FieldId>) -> AppResult<bool> {
        let taken: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT id FROM {FIELDS_TABLE} WHERE handle = ? COLLATE NOCASE AND id != ?"
        ))
        .bind(handle)
        .bind(except.map(FieldId::value).unwrap_or(-1))
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to check field handle: {}", e)))?;
        Ok(taken.is_some())
    }

    async fn fetch_one(&self, sql: &str, key: Identifier) -> AppResult<Option<Field>> {
        let query = sqlx::query(sql);
        let query = match key {
            Identifier::Id(id) => query.bind(id),
            Identifier::Key(handle) => query.bind(handle),
        };
        let row = query
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load rating field: {}", e)))?;
        row.as_ref()
            .map(Field::from_row)
            .transpose()
            .map_err(|e| AppError::DatabaseError(format!("Failed to decode rating field: {}", e)))
    }

    async fn publish_catalog_change(&self) -> AppResult<()> {
        let token = self.settings.bump_field_version().await?;
        self.catalog.observe(&token).await;
        self.cache.clear().await;
        Ok(())
    }
}

async fn insert_field(conn: &mut SqliteConnection, field: &Field, now: i64) -> AppResult<FieldId> {
    let result = sqlx::query(&format!(
        "INSERT INTO {FIELDS_TABLE} (handle, name, min_value, max_value, increment, decimal_precision, date_created, date_updated) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(field.handle.as_str())
    .bind(&field.name)
    .bind(field.min)
    .bind(field.max)
    .bind(field.increment)
    .bind(field.precision as i64)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(format!("Failed to insert rating field: {}", e)))?;
    Ok(FieldId::new(result.last_insert_rowid()))
}

async fn update_field(conn: &mut SqliteConnection, field: &Field, now: i64) -> AppResult<()> {
    sqlx::query(&format!(
        "UPDATE {FIELDS_TABLE} SET handle = ?, name = ?, min_value = ?, max_value = ?, increment = ?, \
         decimal_precision = ?, date_updated = ? WHERE id = ?"
    ))
    .bind(field.handle.as_str())
    .bind(&field.name)
    .bind(field.min)
    .bind(field.max)
    .bind(field.increment)
    .bind(field.precision as i64)
    .bind(now)
    .bind(field.id.value())
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(format!("Failed to update rating field: {}", e)))?;
    Ok(())
}

/// Move the column of `before` to the name and type of `after`, keeping stored values.
/// The column under the old handle wins; a column already under the new handle is retyped;
/// if neither exists the column is created.
async fn migrate_column(conn: &mut SqliteConnection, before: &Field, after: &Field) -> AppResult<()> {
    let old_column = before.column_name();
    let new_column = after.column_name();
    let column_type = after.column_type();

    if schema_ops::column_exists(conn, RATINGS_TABLE, &old_column).await? {
        let rename = (old_column != new_column).then_some(new_column.as_str());
        schema_ops::alter_column(conn, RATINGS_TABLE, &old_column, rename, column_type).await
    } else if schema_ops::column_exists(conn, RATINGS_TABLE, &new_column).await? {
        schema_ops::alter_column(conn, RATINGS_TABLE, &new_column, None, column_type).await
    } else {
        schema_ops::add_column(conn, RATINGS_TABLE, &new_column, column_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::hooks::create_default_hook_registry;
    use crate::infrastructure::schema_ops::{find_column, ColumnType};

    async fn registry() -> (RatingDatabase, FieldRegistry) {
        let db = RatingDatabase::new_in_memory().await.unwrap();
        let registry = FieldRegistry::new(
            db.clone(),
            SettingsStore::new(db.clone()),
            Arc::new(create_default_hook_registry()),
            &Config::default(),
        );
        (db, registry)
    }

    #[tokio::test]
    async fn test_create_adds_column_and_bumps_version() {
        let (db, registry) = registry().await;
        let before = registry.field_version().await.unwrap();

        let field = registry
            .create(FieldDefinition::new("quality", "Quality").with_range(1.0, 5.0))
            .await
            .unwrap();
        assert_eq!(field.column_name(), "rating_quality");
        assert_ne!(registry.field_version().await.unwrap(), before);

        let mut conn = db.pool().acquire().await.unwrap();
        let column = find_column(&mut conn, RATINGS_TABLE, "rating_quality")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(column.column_type(), Some(ColumnType::TinyIntUnsigned));
    }

    #[tokio::test]
    async fn test_duplicate_handle_is_rejected_case_insensitively() {
        let (_db, registry) = registry().await;
        registry
            .create(FieldDefinition::new("quality", "Quality"))
            .await
            .unwrap();

        let err = registry
            .create(FieldDefinition::new("Quality", "Quality again"))
            .await
            .unwrap_err();
        assert!(err.validation_errors().unwrap().has("handle"));
        assert_eq!(registry.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_variants() {
        let (_db, registry) = registry().await;
        let field = registry
            .create(FieldDefinition::new("value", "Value for money"))
            .await
            .unwrap();

        assert_eq!(registry.get(field.id).await.unwrap().handle.as_str(), "value");
        assert_eq!(registry.get("value").await.unwrap().id, field.id);
        assert_eq!(registry.find("VALUE").await.unwrap().map(|f| f.id), Some(field.id));

        let err = registry.get_by_id(FieldId::new(99)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Not found: Rating field does not exist with the id \"99\"."
        );
        let err = registry.get_by_handle("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_name_only_update_keeps_column_type() {
        let (db, registry) = registry().await;
        let field = registry
            .create(FieldDefinition::new("quality", "Quality").with_range(1.0, 5.0))
            .await
            .unwrap();

        let updated = registry
            .update(
                field.id,
                FieldDefinition::new("quality", "Build quality").with_range(1.0, 5.0),
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Build quality");
        assert_eq!(updated.date_created, field.date_created);

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(find_column(&mut conn, RATINGS_TABLE, "rating_quality")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_column() {
        let (db, registry) = registry().await;
        let field = registry
            .create(FieldDefinition::new("quality", "Quality"))
            .await
            .unwrap();

        {
            let mut conn = db.pool().acquire().await.unwrap();
            schema_ops::drop_column(&mut conn, RATINGS_TABLE, "rating_quality")
                .await
                .unwrap();
        }

        registry.delete(field.id).await.unwrap();
        assert!(registry.find_by_id(field.id).await.unwrap().is_none());
    }
}

// Rating Service - validated saves, deletes and moderation status transitions
// Plain saves never write status on update; status moves only through the narrow path

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::collections::{Collection, CollectionRegistry};
use crate::core::{current_time_millis, millis_to_datetime, ElementId, Identifier, RatingId, UserId};
use crate::error::{AppError, AppResult, NotFound, ValidationErrors};
use crate::fields::{Field, FieldRegistry};
use crate::infrastructure::collaborators::{ElementStore, UserStore};
use crate::infrastructure::database::{RatingDatabase, RATINGS_TABLE};
use crate::infrastructure::hooks::{HookContext, HookOperation, HookRegistry, HookTarget};
use crate::infrastructure::schema_ops::{self, quote_ident};
use crate::infrastructure::settings::SettingsStore;

use super::model::{FieldValues, Rating};
use super::query::RatingQuery;
use super::relations::{CollectionRelation, ElementRelation, OwnerRelation};
use super::status::RatingStatus;

const ENTITY: &str = "rating";

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

pub struct RatingService {
    db: RatingDatabase,
    settings: SettingsStore,
    hooks: Arc<HookRegistry>,
    fields: Arc<FieldRegistry>,
    collections: Arc<CollectionRegistry>,
    elements: Arc<dyn ElementStore>,
    users: Arc<dyn UserStore>,
}

impl RatingService {
    pub fn new(
        db: RatingDatabase,
        settings: SettingsStore,
        hooks: Arc<HookRegistry>,
        fields: Arc<FieldRegistry>,
        collections: Arc<CollectionRegistry>,
        elements: Arc<dyn ElementStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            db,
            settings,
            hooks,
            fields,
            collections,
            elements,
            users,
        }
    }

    pub fn database(&self) -> &RatingDatabase {
        &self.db
    }

    pub fn field_registry(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn collection_registry(&self) -> &CollectionRegistry {
        &self.collections
    }

    pub fn element_store(&self) -> &dyn ElementStore {
        self.elements.as_ref()
    }

    pub fn user_store(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    /// Columns physically present on the ratings table right now.
    pub async fn physical_columns(&self) -> AppResult<HashSet<String>> {
        let mut conn = self.db.pool().acquire().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to acquire connection: {}", e))
        })?;
        let columns = schema_ops::table_columns(&mut conn, RATINGS_TABLE).await?;
        Ok(columns.into_iter().map(|column| column.name).collect())
    }

    /// Start a query. Only active ratings match until the status filter is changed.
    pub fn find(&self) -> RatingQuery<'_> {
        RatingQuery::new(self)
    }

    /// Look a rating up by id, whatever its status.
    pub async fn find_by_id(&self, id: RatingId) -> AppResult<Option<Rating>> {
        self.find().id(id).any_status().one().await
    }

    pub async fn get_by_id(&self, id: RatingId) -> AppResult<Rating> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| NotFound::by_id(ENTITY, id.value()).into())
    }

    /// A blank rating for an element of a collection, owned by the current identity.
    pub async fn new_rating(
        &self,
        collection: impl Into<Identifier>,
        element: impl Into<Identifier>,
    ) -> AppResult<Rating> {
        let collection = self.collections.get(collection).await?;
        let element = match element.into() {
            Identifier::Id(id) => self
                .elements
                .element_by_id(ElementId::new(id))
                .await?
                .ok_or_else(|| AppError::from(NotFound::by_id("element", id)))?,
            Identifier::Key(uri) => self
                .elements
                .element_by_uri(&uri)
                .await?
                .ok_or_else(|| AppError::from(NotFound::by_handle("element", uri.clone())))?,
        };
        if element.element_type != collection.element_type {
            return Err(AppError::validation(
                "elementId",
                format!(
                    "Collection \"{}\" only rates elements of type \"{}\".",
                    collection.name, collection.element_type
                ),
            ));
        }

        let status = self.settings.default_status().await?;
        let owner = self.current_user().await?;
        Ok(Rating::new(collection.id, element.id)
            .with_owner(owner)
            .with_status(status))
    }

    #[instrument(skip(self, rating), fields(collection_id = %rating.collection_id(), element_id = %rating.element_id()))]
    pub async fn create(&self, mut rating: Rating) -> AppResult<Rating> {
        if rating.id.is_some() {
            return Err(AppError::validation("id", "Rating has already been saved."));
        }
        let status = match rating.status.take() {
            Some(status) => status,
            None => RatingStatus::from(self.settings.default_status().await?),
        };
        rating.status = Some(status.clone());
        let (collection, fields) = self.validate(&rating, Some(&status)).await?;
        let columns = self.column_values(&fields, &rating.values).await?;

        let user = self.current_user().await?;
        let mut ctx = HookContext::new(HookTarget::Rating, HookOperation::Create)
            .with_handle(collection.handle.as_str())
            .with_user(user)
            .with_payload(&rating)?;
        self.hooks.before(&mut ctx).await?;

        let now = current_time_millis();
        let mut saved = rating;
        saved.values = rounded_values(&fields, &saved.values);

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            let id = insert_rating(tx.conn(), &saved, &status, &columns, now).await?;
            ctx.entity_id = Some(id.value());
            self.hooks.after(&mut ctx).await?;
            Ok::<_, AppError>(id)
        }
        .await;
        let id = tx.finish(result).await?;

        saved.id = Some(id);
        saved.date_created = Some(millis_to_datetime(now));
        saved.date_updated = Some(millis_to_datetime(now));
        saved.sequence = None;
        info!(rating_id = %id, collection = %collection.handle, %status, "created rating");
        Ok(saved)
    }

    /// Save everything but the status. A changed status then runs through the
    /// status transition inside the same transaction. No status keeps the stored one.
    #[instrument(skip(self, rating), fields(rating_id = ?rating.id.map(RatingId::value)))]
    pub async fn update(&self, mut rating: Rating) -> AppResult<Rating> {
        let id = rating
            .id
            .ok_or_else(|| AppError::validation("id", "Rating has not been saved yet."))?;
        let stored = self.get_by_id(id).await?;
        let stored_status = stored.status.clone().unwrap_or_default();
        let status = rating.status.take().unwrap_or_else(|| stored_status.clone());
        rating.status = Some(status.clone());
        let status_changed = status != stored_status;

        let (collection, fields) = self
            .validate(&rating, status_changed.then_some(&status))
            .await?;
        let columns = self.column_values(&fields, &rating.values).await?;

        let user = self.current_user().await?;
        let mut ctx = HookContext::new(HookTarget::Rating, HookOperation::Update)
            .with_entity_id(id)
            .with_handle(collection.handle.as_str())
            .with_user(user)
            .with_payload(&rating)?;
        self.hooks.before(&mut ctx).await?;

        let mut status_ctx = if status_changed {
            let mut status_ctx = self.status_context(id, &stored_status, &status, user);
            self.hooks.before(&mut status_ctx).await?;
            Some(status_ctx)
        } else {
            None
        };

        let now = current_time_millis();
        let mut saved = rating;
        saved.values = rounded_values(&fields, &saved.values);

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            update_rating(tx.conn(), id, &saved, &columns, now).await?;
            if let Some(status_ctx) = status_ctx.as_mut() {
                write_status(tx.conn(), id, &status).await?;
                self.hooks.after(status_ctx).await?;
            }
            self.hooks.after(&mut ctx).await
        }
        .await;
        tx.finish(result).await?;

        saved.date_created = stored.date_created;
        saved.date_updated = Some(millis_to_datetime(now));
        saved.sequence = None;
        info!(
            rating_id = %id,
            status_changed = status_ctx.is_some(),
            "updated rating"
        );
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: RatingId) -> AppResult<()> {
        let user = self.current_user().await?;
        let mut ctx = HookContext::new(HookTarget::Rating, HookOperation::Delete)
            .with_entity_id(id)
            .with_user(user);
        self.hooks.before(&mut ctx).await?;

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            let deleted = sqlx::query(&format!("DELETE FROM {RATINGS_TABLE} WHERE id = ?"))
                .bind(id.value())
                .execute(tx.conn())
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to delete rating: {}", e)))?
                .rows_affected();
            if deleted == 0 {
                return Err(NotFound::by_id(ENTITY, id.value()).into());
            }
            self.hooks.after(&mut ctx).await
        }
        .await;
        tx.finish(result).await?;

        info!(rating_id = %id, "deleted rating");
        Ok(())
    }

    /// Move a rating to `status`, through the dedicated transition for built-in statuses.
    pub async fn change_status(&self, id: RatingId, status: impl Into<RatingStatus>) -> AppResult<Rating> {
        match status.into() {
            RatingStatus::Active => self.activate(id).await,
            RatingStatus::Pending => self.pending(id).await,
            RatingStatus::Disabled => self.disable(id).await,
            custom => self.transition(id, custom).await,
        }
    }

    pub async fn activate(&self, id: RatingId) -> AppResult<Rating> {
        self.transition(id, RatingStatus::Active).await
    }

    pub async fn pending(&self, id: RatingId) -> AppResult<Rating> {
        self.transition(id, RatingStatus::Pending).await
    }

    pub async fn disable(&self, id: RatingId) -> AppResult<Rating> {
        self.transition(id, RatingStatus::Disabled).await
    }

    /// Writes the status column and nothing else.
    #[instrument(skip(self))]
    async fn transition(&self, id: RatingId, status: RatingStatus) -> AppResult<Rating> {
        let mut rating = self.get_by_id(id).await?;
        if !self.settings.load().await?.has_status(status.as_str()) {
            return Err(AppError::validation(
                "status",
                format!("\"{}\" isn't a rating status.", status),
            ));
        }
        let current = rating.status.clone().unwrap_or_default();
        if current == status {
            debug!(rating_id = %id, "status unchanged");
            return Ok(rating);
        }

        let user = self.current_user().await?;
        let mut ctx = self.status_context(id, &current, &status, user);
        self.hooks.before(&mut ctx).await?;

        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            write_status(tx.conn(), id, &status).await?;
            self.hooks.after(&mut ctx).await
        }
        .await;
        tx.finish(result).await?;

        info!(rating_id = %id, from = %current, to = %status, "changed rating status");
        rating.status = Some(status);
        rating.sequence = None;
        Ok(rating)
    }

    fn status_context(
        &self,
        id: RatingId,
        from: &RatingStatus,
        to: &RatingStatus,
        user: Option<UserId>,
    ) -> HookContext {
        HookContext::new(HookTarget::Rating, to.hook_operation())
            .with_entity_id(id)
            .with_user(user)
            .with_data(serde_json::json!({ "status": to.as_str() }))
            .with_metadata("previousStatus", from.as_str().into())
    }

    async fn current_user(&self) -> AppResult<Option<UserId>> {
        Ok(self.users.current_identity().await?.map(|user| user.id))
    }

    /// Check fixed attributes and field values. Nothing is written on failure.
    /// `status` is checked against the configured list only when given.
    async fn validate(
        &self,
        rating: &Rating,
        status: Option<&RatingStatus>,
    ) -> AppResult<(Collection, Vec<(Field, bool)>)> {
        let mut errors = ValidationErrors::new();

        let collection = self.collections.find_by_id(rating.collection_id()).await?;
        if collection.is_none() {
            errors.add("collectionId", "Collection does not exist.");
        }

        match self.elements.element_by_id(rating.element_id()).await? {
            None => errors.add("elementId", "Element does not exist."),
            Some(element) => {
                if let Some(collection) = &collection {
                    if element.element_type != collection.element_type {
                        errors.add(
                            "elementId",
                            format!(
                                "Collection \"{}\" only rates elements of type \"{}\".",
                                collection.name, collection.element_type
                            ),
                        );
                    }
                }
            }
        }

        if let Some(owner_id) = rating.owner_id() {
            if self.users.user_by_id(owner_id).await?.is_none() {
                errors.add("ownerId", "User does not exist.");
            }
        }

        if let Some(email) = rating.email.as_deref().map(str::trim) {
            if !email.is_empty() && !EMAIL_PATTERN.is_match(email) {
                errors.add("email", "Email is not a valid email address.");
            }
        }

        if let Some(status) = status {
            if !self.settings.load().await?.has_status(status.as_str()) {
                errors.add("status", format!("\"{}\" isn't a rating status.", status));
            }
        }

        let fields = match &collection {
            Some(collection) => {
                let fields = self.collections.rating_field_requirements(collection).await?;
                errors.merge(rating.values.check_against(&fields));
                fields
            }
            None => Vec::new(),
        };

        errors.into_result()?;
        let collection = collection
            .ok_or_else(|| NotFound::by_id("rating collection", rating.collection_id().value()))?;
        Ok((collection, fields))
    }

    /// Column and rounded value for every field of the collection.
    /// Columns missing from the table are skipped while empty and fatal once a value needs them.
    async fn column_values(
        &self,
        fields: &[(Field, bool)],
        values: &FieldValues,
    ) -> AppResult<Vec<(String, Option<f64>)>> {
        let physical = self.physical_columns().await?;
        let mut columns = Vec::with_capacity(fields.len());
        for (field, _) in fields {
            let column = field.column_name();
            let value = values.get(field.handle.as_str()).map(|value| field.round(value));
            if physical.contains(&column) {
                columns.push((column, value));
            } else if value.is_some() {
                return Err(AppError::SchemaDrift {
                    table: RATINGS_TABLE.to_string(),
                    column,
                });
            } else {
                debug!(%column, "column missing from table, value skipped");
            }
        }
        Ok(columns)
    }
}

fn rounded_values(fields: &[(Field, bool)], values: &FieldValues) -> FieldValues {
    let mut rounded = FieldValues::new();
    for (field, _) in fields {
        let handle = field.handle.as_str();
        if values.contains(handle) {
            rounded.set(handle, values.get(handle).map(|value| field.round(value)));
        }
    }
    rounded
}

async fn insert_rating(
    conn: &mut SqliteConnection,
    rating: &Rating,
    status: &RatingStatus,
    columns: &[(String, Option<f64>)],
    now: i64,
) -> AppResult<RatingId> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "INSERT INTO {RATINGS_TABLE} ({}, {}, {}, name, email, status, date_created, date_updated",
        CollectionRelation::COLUMN,
        ElementRelation::COLUMN,
        OwnerRelation::COLUMN
    ));
    for (column, _) in columns {
        qb.push(", ").push(quote_ident(column));
    }
    qb.push(") VALUES (");
    {
        let mut values = qb.separated(", ");
        values.push_bind(rating.collection_id().value());
        values.push_bind(rating.element_id().value());
        values.push_bind(rating.owner_id().map(UserId::value));
        values.push_bind(rating.name.clone());
        values.push_bind(rating.email.clone());
        values.push_bind(status.as_str().to_string());
        values.push_bind(now);
        values.push_bind(now);
        for (_, value) in columns {
            values.push_bind(*value);
        }
    }
    qb.push(")");

    let result = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert rating: {}", e)))?;
    Ok(RatingId::new(result.last_insert_rowid()))
}

async fn update_rating(
    conn: &mut SqliteConnection,
    id: RatingId,
    rating: &Rating,
    columns: &[(String, Option<f64>)],
    now: i64,
) -> AppResult<()> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {RATINGS_TABLE} SET "));
    {
        let mut assignments = qb.separated(", ");
        assignments
            .push(format!("{} = ", CollectionRelation::COLUMN))
            .push_bind_unseparated(rating.collection_id().value());
        assignments
            .push(format!("{} = ", ElementRelation::COLUMN))
            .push_bind_unseparated(rating.element_id().value());
        assignments
            .push(format!("{} = ", OwnerRelation::COLUMN))
            .push_bind_unseparated(rating.owner_id().map(UserId::value));
        assignments.push("name = ").push_bind_unseparated(rating.name.clone());
        assignments.push("email = ").push_bind_unseparated(rating.email.clone());
        assignments.push("date_updated = ").push_bind_unseparated(now);
        for (column, value) in columns {
            assignments
                .push(format!("{} = ", quote_ident(column)))
                .push_bind_unseparated(*value);
        }
    }
    qb.push(" WHERE id = ").push_bind(id.value());

    let updated = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update rating: {}", e)))?
        .rows_affected();
    if updated == 0 {
        return Err(NotFound::by_id(ENTITY, id.value()).into());
    }
    Ok(())
}

async fn write_status(conn: &mut SqliteConnection, id: RatingId, status: &RatingStatus) -> AppResult<()> {
    let updated = sqlx::query(&format!("UPDATE {RATINGS_TABLE} SET status = ? WHERE id = ?"))
        .bind(status.as_str())
        .bind(id.value())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to change rating status: {}", e)))?
        .rows_affected();
    if updated == 0 {
        return Err(NotFound::by_id(ENTITY, id.value()).into());
    }
    Ok(())
}

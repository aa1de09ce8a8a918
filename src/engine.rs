// Rating Engine - wires the store, settings, hooks, registries and collaborators together

use std::sync::Arc;
use tracing::info;

use crate::collections::CollectionRegistry;
use crate::config::Config;
use crate::core::LayoutId;
use crate::error::{AppError, AppResult};
use crate::fields::FieldRegistry;
use crate::infrastructure::collaborators::{
    ElementStore, FieldLayout, InMemoryElementStore, InMemoryLayoutService, InMemoryUserStore,
    LayoutService, UserStore,
};
use crate::infrastructure::database::RatingDatabase;
use crate::infrastructure::hooks::{create_default_hook_registry, HookRegistry, HookTarget, RatingHook};
use crate::infrastructure::settings::SettingsStore;
use crate::ratings::RatingService;

/// Everything a host needs to manage rating fields, collections and ratings.
pub struct RatingEngine {
    config: Config,
    db: RatingDatabase,
    settings: SettingsStore,
    layouts: Arc<dyn LayoutService>,
    fields: Arc<FieldRegistry>,
    collections: Arc<CollectionRegistry>,
    ratings: RatingService,
}

impl RatingEngine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// In-memory store with in-memory collaborators and the default hooks.
    pub async fn in_memory() -> AppResult<Self> {
        Self::builder(Config::in_memory()).build().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &RatingDatabase {
        &self.db
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    pub fn ratings(&self) -> &RatingService {
        &self.ratings
    }

    /// Replace the layout of extra attributes shown on every rating form.
    pub async fn save_default_layout(&self, layout: &FieldLayout) -> AppResult<LayoutId> {
        self.settings
            .save_default_layout(self.layouts.as_ref(), layout)
            .await
    }
}

pub struct EngineBuilder {
    config: Config,
    hooks: HookRegistry,
    elements: Option<Arc<dyn ElementStore>>,
    users: Option<Arc<dyn UserStore>>,
    layouts: Option<Arc<dyn LayoutService>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            hooks: create_default_hook_registry(),
            elements: None,
            users: None,
            layouts: None,
        }
    }

    pub fn with_element_store(mut self, elements: Arc<dyn ElementStore>) -> Self {
        self.elements = Some(elements);
        self
    }

    pub fn with_user_store(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_layout_service(mut self, layouts: Arc<dyn LayoutService>) -> Self {
        self.layouts = Some(layouts);
        self
    }

    /// Add a hook next to the default audit hooks.
    pub fn with_hook(mut self, target: HookTarget, hook: Arc<dyn RatingHook>) -> Self {
        self.hooks.register_hook(target, hook);
        self
    }

    /// Connect, install the schema and build the registries.
    pub async fn build(self) -> AppResult<RatingEngine> {
        self.config
            .validate()
            .map_err(|e| AppError::ConfigurationError(e.to_string()))?;
        let db = RatingDatabase::connect(&self.config).await?;
        db.install().await?;

        let elements = self
            .elements
            .unwrap_or_else(|| Arc::new(InMemoryElementStore::default()));
        let users = self
            .users
            .unwrap_or_else(|| Arc::new(InMemoryUserStore::new()));
        let layouts = self
            .layouts
            .unwrap_or_else(|| Arc::new(InMemoryLayoutService::new()));
        let hooks = Arc::new(self.hooks);

        let fields = Arc::new(FieldRegistry::new(
            db.clone(),
            SettingsStore::new(db.clone()),
            hooks.clone(),
            &self.config,
        ));
        let collections = Arc::new(CollectionRegistry::new(
            db.clone(),
            hooks.clone(),
            fields.clone(),
            elements.clone(),
            layouts.clone(),
            &self.config,
        ));
        let ratings = RatingService::new(
            db.clone(),
            SettingsStore::new(db.clone()),
            hooks,
            fields.clone(),
            collections.clone(),
            elements,
            users,
        );

        info!(url = %self.config.database.url, "rating engine ready");
        Ok(RatingEngine {
            settings: SettingsStore::new(db.clone()),
            config: self.config,
            db,
            layouts,
            fields,
            collections,
            ratings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldDefinition;

    #[tokio::test]
    async fn test_in_memory_engine_starts_empty() {
        let engine = RatingEngine::in_memory().await.unwrap();
        assert!(engine.fields().find_all().await.unwrap().is_empty());
        assert!(engine.collections().find_all().await.unwrap().is_empty());
        assert_eq!(engine.settings().default_status().await.unwrap(), "active");
    }

    #[tokio::test]
    async fn test_registries_share_one_store() {
        let engine = RatingEngine::in_memory().await.unwrap();
        let field = engine
            .fields()
            .create(FieldDefinition::new("quality", "Quality"))
            .await
            .unwrap();
        let columns = engine.ratings().physical_columns().await.unwrap();
        assert!(columns.contains(&field.column_name()));
    }

    #[tokio::test]
    async fn test_default_layout_replaces_previous() {
        let layouts = Arc::new(InMemoryLayoutService::new());
        let engine = RatingEngine::builder(Config::in_memory())
            .with_layout_service(layouts.clone())
            .build()
            .await
            .unwrap();

        let first = engine
            .save_default_layout(&FieldLayout::new(["comment"]))
            .await
            .unwrap();
        let second = engine
            .save_default_layout(&FieldLayout::new(["comment", "title"]))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(layouts.layout_count().await, 1);
        assert_eq!(
            engine.settings().load().await.unwrap().field_layout_id,
            Some(second)
        );
    }
}

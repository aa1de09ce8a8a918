// Infrastructure - storage, schema DDL, settings, caches, hooks and collaborators
pub mod cache;                 // LRU model caches
pub mod collaborators;         // Element, user and layout services of the host CMS
pub mod database;              // SQLite pool, transactions, install
pub mod hooks;                 // Before/After lifecycle hooks
pub mod schema_ops;            // Dynamic column DDL on the ratings table
pub mod settings;              // Status list, field-version token, default layout

pub use cache::{Cache, CachedModel, ModelCache};
pub use collaborators::{
    Element, ElementStore, FieldLayout, InMemoryElementStore, InMemoryLayoutService,
    InMemoryUserStore, LayoutService, User, UserStore,
};
pub use database::{DatabaseTransaction, RatingDatabase};
pub use hooks::{
    create_default_hook_registry, AuditLogHook, HookContext, HookOperation, HookRegistry,
    HookTarget, HookTiming, RatingHook,
};
pub use schema_ops::{ColumnInfo, ColumnType};
pub use settings::{Settings, SettingsStore, StatusOption};
